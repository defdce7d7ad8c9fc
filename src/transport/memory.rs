//! In-process transport for testing and single-process deployments

use super::{PubSubTransport, SignalStream};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// In-process pub/sub backed by broadcast channels
///
/// Signals reach every live subscriber of a channel within the process.
/// There is no shared broker, so invalidation stays local.
pub struct MemoryTransport {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl MemoryTransport {
    /// Create a transport with the default per-channel buffer
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create a transport with an explicit per-channel buffer capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        // A send with no receivers just means the signal has no audience
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn SignalStream>> {
        let rx = self.sender(channel).subscribe();
        Ok(Box::new(MemorySignalStream { rx }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Subscription stream over one in-process channel
pub struct MemorySignalStream {
    rx: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl SignalStream for MemorySignalStream {
    async fn next(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Signal subscriber lagged, missed signals dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}
