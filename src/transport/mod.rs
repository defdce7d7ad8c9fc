//! Pub/sub transport trait — the abstraction reload signaling rides on
//!
//! Transports carry opaque payloads between processes. Reload signaling uses
//! them for fire-and-forget invalidation, so delivery is at-least-once and
//! nothing is persisted.

use crate::error::Result;
use async_trait::async_trait;

pub mod memory;
pub mod nats;

/// Core trait for pub/sub backends
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Publish a payload to a channel
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a channel, returning a stream of payloads
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn SignalStream>>;

    /// Transport name (e.g., "nats", "memory")
    fn name(&self) -> &str;
}

/// Async stream of raw payloads from one channel
///
/// Dropping the stream unsubscribes at the transport.
#[async_trait]
pub trait SignalStream: Send {
    /// Receive the next payload; `None` when the channel is closed
    async fn next(&mut self) -> Result<Option<Vec<u8>>>;
}
