//! Scoped reload signaling across processes
//!
//! Config routes and adapters publish an invalidation signal tagged with a
//! scope; subscribers re-derive from current state on every signal rather
//! than applying a payload. With no transport configured the channel
//! degrades to a silent local no-op — invalidation then requires an explicit
//! in-process `reload` call instead of a remote signal.

use crate::error::{CoreError, Result};
use crate::transport::PubSubTransport;
use crate::types::{ReloadScope, ReloadSignal};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Channel name prefix; the full name is `reload:<scope>`
pub const CHANNEL_PREFIX: &str = "reload:";

/// Build the transport channel name for a scope
pub fn channel_name(scope: ReloadScope) -> String {
    format!("{}{}", CHANNEL_PREFIX, scope)
}

/// Receiver of reload signals
///
/// Delivery is at-least-once and unordered across scopes — treat every
/// signal as "state may have changed, re-derive".
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn on_signal(&self, signal: ReloadSignal);
}

struct ActiveSubscription {
    scope: ReloadScope,
    task: JoinHandle<()>,
}

/// Scoped publish/subscribe for cache invalidation
///
/// One instance per owner: re-subscribing tears down the previous
/// subscription before establishing the new one, so a process never holds
/// two live subscriptions to the same scope.
pub struct ReloadChannel {
    transport: Option<Arc<dyn PubSubTransport>>,
    origin: String,
    subscriptions: Mutex<Vec<ActiveSubscription>>,
}

impl ReloadChannel {
    /// Create a channel over a transport
    pub fn new(transport: Arc<dyn PubSubTransport>) -> Self {
        Self {
            transport: Some(transport),
            origin: format!("proc-{}", uuid::Uuid::new_v4()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Create a channel with no transport
    ///
    /// Publish and subscribe become silent no-ops; invalidation is
    /// local-process-only.
    pub fn disconnected() -> Self {
        Self {
            transport: None,
            origin: format!("proc-{}", uuid::Uuid::new_v4()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// This process's origin id, stamped on published signals
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Publish an invalidation signal for one scope
    ///
    /// Never fails: a missing or failing transport is logged and ignored.
    pub async fn publish(&self, scope: ReloadScope) {
        if let Err(e) = self.try_publish(scope).await {
            match e {
                CoreError::TransportUnavailable(_) => {
                    tracing::debug!(scope = %scope, "No reload transport, signal not published");
                }
                other => {
                    tracing::warn!(scope = %scope, error = %other, "Failed to publish reload signal");
                }
            }
        }
    }

    /// Publish one signal per scope
    pub async fn publish_many(&self, scopes: &[ReloadScope]) {
        for scope in scopes {
            self.publish(*scope).await;
        }
    }

    async fn try_publish(&self, scope: ReloadScope) -> Result<()> {
        let transport = self.transport.as_ref().ok_or_else(|| {
            CoreError::TransportUnavailable("no transport configured".to_string())
        })?;

        let signal = ReloadSignal::new(scope, self.origin.clone());
        let payload = serde_json::to_vec(&signal)?;
        transport.publish(&channel_name(scope), payload).await?;

        tracing::debug!(scope = %scope, origin = %self.origin, "Reload signal published");
        Ok(())
    }

    /// Subscribe a handler to a set of scopes
    ///
    /// Replaces any previous subscription held by this channel: the old
    /// listeners are torn down (dropping their streams unsubscribes at the
    /// transport) before the new ones start.
    pub async fn subscribe(&self, scopes: &[ReloadScope], handler: Arc<dyn SignalHandler>) {
        let mut subscriptions = self.subscriptions.lock().await;
        teardown(&mut subscriptions);

        let Some(transport) = &self.transport else {
            tracing::debug!("No reload transport, subscription is a local no-op");
            return;
        };

        for &scope in scopes {
            let channel = channel_name(scope);
            let mut stream = match transport.subscribe(&channel).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(scope = %scope, error = %e, "Failed to subscribe to reload scope");
                    continue;
                }
            };

            let handler = handler.clone();
            let task = tokio::spawn(async move {
                loop {
                    match stream.next().await {
                        Ok(Some(payload)) => {
                            let signal = match serde_json::from_slice::<ReloadSignal>(&payload) {
                                Ok(signal) => signal,
                                Err(e) => {
                                    tracing::warn!(
                                        scope = %scope,
                                        error = %e,
                                        "Ignoring malformed reload signal"
                                    );
                                    continue;
                                }
                            };
                            handler.on_signal(signal).await;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(scope = %scope, error = %e, "Reload stream failed");
                            break;
                        }
                    }
                }
            });

            subscriptions.push(ActiveSubscription { scope, task });
            tracing::info!(scope = %scope, "Subscribed to reload scope");
        }
    }

    /// Release all subscriptions; idempotent
    pub async fn close(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        teardown(&mut subscriptions);
    }
}

fn teardown(subscriptions: &mut Vec<ActiveSubscription>) {
    for subscription in subscriptions.drain(..) {
        subscription.task.abort();
        tracing::debug!(scope = %subscription.scope, "Reload subscription released");
    }
}
