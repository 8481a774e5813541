//! In-process channel stub for unit tests.

use crate::channel::{Channel, PushHandler};
use crate::error::Result;
use crate::meta::Meta;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

type Script = dyn Fn(&str, &[serde_json::Value]) -> Result<Meta> + Send + Sync;

/// Scripted channel: round trips run a test-provided handler, one-way sends
/// are recorded, and tests can simulate host pushes.
pub(crate) struct MockChannel {
    script: Box<Script>,
    round_trips: Mutex<Vec<(String, Vec<serde_json::Value>)>>,
    one_ways: Mutex<Vec<(String, Vec<serde_json::Value>)>>,
    handlers: Mutex<HashMap<String, Vec<PushHandler>>>,
    sent: Notify,
}

impl MockChannel {
    pub fn scripted<F>(script: F) -> Arc<Self>
    where
        F: Fn(&str, &[serde_json::Value]) -> Result<Meta> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            round_trips: Mutex::new(Vec::new()),
            one_ways: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            sent: Notify::new(),
        })
    }

    /// Number of round trips issued so far.
    pub fn round_trips(&self) -> usize {
        self.round_trips.lock().unwrap().len()
    }

    /// Round trips issued under `request`.
    pub fn round_trips_for(&self, request: &str) -> usize {
        self.round_trips
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == request)
            .count()
    }

    /// Simulate a host push; handlers run inline on the caller.
    pub fn push(&self, event: &str, args: Vec<serde_json::Value>) {
        let handlers: Vec<PushHandler> = self
            .handlers
            .lock()
            .unwrap()
            .get(event)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(args.clone());
        }
    }

    /// Wait until a one-way send named `event` has been recorded and return
    /// its arguments (first match wins).
    pub async fn wait_for_one_way(
        &self,
        event: &str,
        timeout: Duration,
    ) -> Option<Vec<serde_json::Value>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for wakeup before checking, so a send in between is
            // not missed.
            let notified = self.sent.notified();
            if let Some(args) = self
                .one_ways
                .lock()
                .unwrap()
                .iter()
                .find(|(name, _)| name == event)
                .map(|(_, args)| args.clone())
            {
                return Some(args);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn round_trip(&self, request: &str, args: Vec<serde_json::Value>) -> Result<Meta> {
        self.round_trips
            .lock()
            .unwrap()
            .push((request.to_string(), args.clone()));
        (self.script)(request, &args)
    }

    async fn one_way(&self, event: &str, args: Vec<serde_json::Value>) -> Result<()> {
        self.one_ways
            .lock()
            .unwrap()
            .push((event.to_string(), args));
        self.sent.notify_waiters();
        Ok(())
    }

    fn subscribe(&self, event: &str, handler: PushHandler) {
        self.handlers
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn unsubscribe(&self, event: &str) {
        self.handlers.lock().unwrap().remove(event);
    }
}
