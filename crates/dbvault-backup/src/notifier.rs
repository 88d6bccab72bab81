//! Event notifications for backup and recovery lifecycle events

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, event: &str, payload: Value) -> Result<()>;
}

/// Writes events to the tracing sink
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, event: &str, payload: Value) -> Result<()> {
        info!(event = event, payload = %payload, "notification");
        Ok(())
    }
}

/// Fire-and-forget dispatch: failures are logged, never returned
pub async fn notify(notifier: &dyn Notifier, event: &str, payload: Value) {
    if let Err(e) = notifier.send(event, payload).await {
        warn!("Failed to send {} notification: {}", event, e);
    }
}
