//! NATS transport for cross-process reload signaling
//!
//! Uses plain core-NATS subjects. Reload signals are fire-and-forget
//! invalidations, so no JetStream persistence is involved — a process that
//! was down during a signal simply rebuilds from current configuration on
//! its next access anyway.

use super::{PubSubTransport, SignalStream};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;

/// NATS connection configuration
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Optional auth token
    pub token: Option<String>,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            token: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

/// Core-NATS pub/sub transport
pub struct NatsTransport {
    client: async_nats::Client,
}

impl NatsTransport {
    /// Connect to NATS
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let options = build_connect_options(&config);

        let client = options
            .connect(&config.url)
            .await
            .map_err(|e| CoreError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");
        Ok(Self { client })
    }

    /// Get the underlying NATS client for advanced usage
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}

#[async_trait]
impl PubSubTransport for NatsTransport {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(channel.to_string(), Bytes::from(payload))
            .await
            .map_err(|e| CoreError::Publish {
                scope: channel.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn SignalStream>> {
        let subscriber = self
            .client
            .subscribe(channel.to_string())
            .await
            .map_err(|e| CoreError::Subscribe {
                scope: channel.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(channel, "NATS subscription created");
        Ok(Box::new(NatsSignalStream { subscriber }))
    }

    fn name(&self) -> &str {
        "nats"
    }
}

/// Subscription stream over a core-NATS subject
pub struct NatsSignalStream {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl SignalStream for NatsSignalStream {
    async fn next(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.subscriber.next().await.map(|msg| msg.payload.to_vec()))
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut options = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        options = options.token(token.clone());
    }

    options
}
