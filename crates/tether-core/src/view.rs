//! Higher-level web-view surface over a [`RemoteContext`].
//!
//! Navigation and editing commands are fire-and-forget: each issues an
//! `async-member-call` one-way against the view's tab handle and never
//! waits for a result. State queries read a locally cached [`ViewMirror`]
//! the host refreshes through `mirror-update` pushes; until the first
//! update arrives they answer `None` with a diagnostic rather than
//! blocking on a round trip.

use crate::channel::events;
use crate::context::RemoteContext;
use crate::error::Result;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Host-pushed snapshot of one view's observable state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewMirror {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub zoom_percent: f64,
    #[serde(default)]
    pub entry_count: u64,
    #[serde(default)]
    pub current_entry_index: u64,
}

/// Client-side binding for one hosted view, identified by its tab handle.
pub struct WebViewBinding {
    ctx: RemoteContext,
    handle: i64,
    mirror: Arc<Mutex<Option<ViewMirror>>>,
}

impl WebViewBinding {
    /// Bind to the view with the given tab handle and start consuming
    /// mirror updates for it.
    pub fn new(ctx: RemoteContext, handle: i64) -> Self {
        let mirror: Arc<Mutex<Option<ViewMirror>>> = Arc::new(Mutex::new(None));

        let updates = mirror.clone();
        ctx.channel().subscribe(
            events::MIRROR_UPDATE,
            Arc::new(move |args| {
                let matches = args.first().and_then(|v| v.as_i64()) == Some(handle);
                if !matches {
                    return;
                }
                let Some(raw) = args.get(1) else {
                    warn!("Mirror update for view {} carries no snapshot", handle);
                    return;
                };
                match serde_json::from_value::<ViewMirror>(raw.clone()) {
                    Ok(snapshot) => {
                        if let Ok(mut mirror) = updates.lock() {
                            *mirror = Some(snapshot);
                        }
                    }
                    Err(e) => warn!("Undecodable mirror update for view {}: {}", handle, e),
                }
            }),
        );

        Self {
            ctx,
            handle,
            mirror,
        }
    }

    pub fn handle(&self) -> i64 {
        self.handle
    }

    async fn command(&self, method: &str, args: &[Value]) -> Result<()> {
        self.ctx.call_async_member(self.handle, method, args).await
    }

    // ------------------------------------------------------------------
    // Fire-and-forget commands
    // ------------------------------------------------------------------

    pub async fn load_url(&self, url: &str) -> Result<()> {
        self.command("loadURL", &[Value::from(url)]).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.command("stop", &[]).await
    }

    pub async fn reload(&self) -> Result<()> {
        self.command("reload", &[]).await
    }

    pub async fn go_back(&self) -> Result<()> {
        self.command("goBack", &[]).await
    }

    pub async fn go_forward(&self) -> Result<()> {
        self.command("goForward", &[]).await
    }

    pub async fn undo(&self) -> Result<()> {
        self.command("undo", &[]).await
    }

    pub async fn redo(&self) -> Result<()> {
        self.command("redo", &[]).await
    }

    pub async fn cut(&self) -> Result<()> {
        self.command("cut", &[]).await
    }

    pub async fn copy(&self) -> Result<()> {
        self.command("copy", &[]).await
    }

    pub async fn paste(&self) -> Result<()> {
        self.command("paste", &[]).await
    }

    pub async fn print(&self) -> Result<()> {
        self.command("print", &[]).await
    }

    pub async fn set_zoom_level(&self, level: f64) -> Result<()> {
        self.command("setZoomLevel", &[Value::Number(level)]).await
    }

    pub async fn zoom_in(&self) -> Result<()> {
        self.command("zoomIn", &[]).await
    }

    pub async fn zoom_out(&self) -> Result<()> {
        self.command("zoomOut", &[]).await
    }

    pub async fn zoom_reset(&self) -> Result<()> {
        self.command("zoomReset", &[]).await
    }

    pub async fn close(&self) -> Result<()> {
        self.command("close", &[]).await
    }

    // ------------------------------------------------------------------
    // Mirror queries
    // ------------------------------------------------------------------

    fn snapshot(&self, query: &str) -> Option<ViewMirror> {
        let mirror = self.mirror.lock().ok()?.clone();
        if mirror.is_none() {
            warn!("View state is not available for: {}", query);
        }
        mirror
    }

    pub fn url(&self) -> Option<String> {
        self.snapshot("url").map(|m| m.url)
    }

    pub fn title(&self) -> Option<String> {
        self.snapshot("title").map(|m| m.title)
    }

    pub fn is_loading(&self) -> Option<bool> {
        self.snapshot("isLoading").map(|m| m.loading)
    }

    pub fn is_focused(&self) -> Option<bool> {
        self.snapshot("isFocused").map(|m| m.focused)
    }

    pub fn zoom_percent(&self) -> Option<f64> {
        self.snapshot("zoomPercent").map(|m| m.zoom_percent)
    }

    pub fn entry_count(&self) -> Option<u64> {
        self.snapshot("entryCount").map(|m| m.entry_count)
    }

    pub fn current_entry_index(&self) -> Option<u64> {
        self.snapshot("currentEntryIndex").map(|m| m.current_entry_index)
    }

    /// Last received full snapshot, if any.
    pub fn mirror(&self) -> Option<ViewMirror> {
        self.mirror.lock().ok()?.clone()
    }
}
