//! NATS transport integration tests
//!
//! These tests require a running NATS server:
//!   nats-server
//!
//! Tests are skipped automatically if NATS is not available.

use async_trait::async_trait;
use attache_core::{
    NatsConfig, NatsTransport, PubSubTransport, ReloadChannel, ReloadScope, ReloadSignal,
    SignalHandler, SignalStream,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Try to connect to NATS. Returns None if the server is unavailable.
async fn try_transport() -> Option<NatsTransport> {
    let config = NatsConfig {
        url: "nats://127.0.0.1:4222".to_string(),
        connect_timeout_secs: 2,
        ..Default::default()
    };

    match NatsTransport::connect(config).await {
        Ok(transport) => Some(transport),
        Err(_) => {
            eprintln!("NATS not available, skipping integration test");
            None
        }
    }
}

macro_rules! nats_transport {
    () => {
        match try_transport().await {
            Some(transport) => Arc::new(transport),
            None => return,
        }
    };
}

struct Collector {
    tx: mpsc::UnboundedSender<ReloadSignal>,
}

#[async_trait]
impl SignalHandler for Collector {
    async fn on_signal(&self, signal: ReloadSignal) {
        let _ = self.tx.send(signal);
    }
}

#[tokio::test]
async fn test_nats_raw_publish_subscribe() {
    let transport = nats_transport!();

    let mut stream = transport.subscribe("reload.test.raw").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    transport
        .publish("reload.test.raw", b"signal".to_vec())
        .await
        .unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload.unwrap(), b"signal");
}

#[tokio::test]
async fn test_nats_reload_signal_crosses_channels() {
    let transport = nats_transport!();

    // Two channels stand in for two processes sharing the broker
    let subscriber = ReloadChannel::new(transport.clone());
    let publisher = ReloadChannel::new(transport);

    let (tx, mut rx) = mpsc::unbounded_channel();
    subscriber
        .subscribe(&[ReloadScope::Connections], Arc::new(Collector { tx }))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.publish(ReloadScope::Connections).await;

    let signal = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal.scope, ReloadScope::Connections);
    assert_eq!(signal.origin, publisher.origin());
    assert_ne!(signal.origin, subscriber.origin());

    subscriber.close().await;
}

#[tokio::test]
async fn test_nats_resubscribe_replaces_subscription() {
    let transport = nats_transport!();

    let subscriber = ReloadChannel::new(transport.clone());
    let publisher = ReloadChannel::new(transport);

    let (old_tx, mut old_rx) = mpsc::unbounded_channel();
    let (new_tx, mut new_rx) = mpsc::unbounded_channel();

    subscriber
        .subscribe(&[ReloadScope::Schedule], Arc::new(Collector { tx: old_tx }))
        .await;
    subscriber
        .subscribe(&[ReloadScope::Schedule], Arc::new(Collector { tx: new_tx }))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.publish(ReloadScope::Schedule).await;

    let signal = tokio::time::timeout(Duration::from_secs(2), new_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal.scope, ReloadScope::Schedule);
    assert!(old_rx.try_recv().is_err());

    subscriber.close().await;
}
