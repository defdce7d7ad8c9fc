//! Priority-ordered event dispatch with deduplication and failure isolation
//!
//! `EventDispatcher` is the backbone all inbound events flow through: channel
//! adapters, API routes, and schedulers call `dispatch`, and every registered
//! handler sees each event exactly once, in priority order, with individual
//! handler failures logged and skipped.

use crate::error::{CoreError, Result};
use crate::types::{DispatchOptions, Event, DEDUP_WINDOW_MS};
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// A consumer of dispatched events
///
/// Handlers are invoked sequentially per event, in registration order. A
/// failure is logged and skipped — it never aborts delivery to the remaining
/// handlers or processing of subsequent events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name, used in failure logs
    fn name(&self) -> &str;

    /// Process one event
    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Opaque registration handle returned by `register`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Priority-queued, deduplicating event dispatcher
///
/// All mutable state is private to one instance — inject the instance into
/// every producer rather than sharing module-level globals.
pub struct EventDispatcher {
    inner: Mutex<DispatchInner>,
    window: Duration,
}

struct DispatchInner {
    queue: BinaryHeap<QueuedEvent>,
    dedup: HashMap<String, DedupEntry>,
    handlers: Vec<(HandlerId, Arc<dyn EventHandler>)>,
    next_handler: u64,
    next_seq: u64,
    draining: bool,
}

struct DedupEntry {
    id: String,
    expires_at: Instant,
}

/// Queue entry ordered by priority (descending), then insertion (ascending)
struct QueuedEvent {
    event: Event,
    seq: u64,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.event.priority == other.event.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first; earlier insertion wins among equals
        self.event
            .priority
            .cmp(&other.event.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Create a dispatcher with the default 60s dedup window
    pub fn new() -> Self {
        Self::with_window(Duration::from_millis(DEDUP_WINDOW_MS))
    }

    /// Create a dispatcher with a custom dedup window
    pub fn with_window(window: Duration) -> Self {
        Self {
            inner: Mutex::new(DispatchInner {
                queue: BinaryHeap::new(),
                dedup: HashMap::new(),
                handlers: Vec::new(),
                next_handler: 0,
                next_seq: 0,
                draining: false,
            }),
            window,
        }
    }

    /// Add a handler to the fan-out list; invocation order is registration order
    pub fn register(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let mut inner = self.lock();
        let id = HandlerId(inner.next_handler);
        inner.next_handler += 1;
        inner.handlers.push((id, handler));
        id
    }

    /// Remove a previously registered handler; returns whether it was present
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut inner = self.lock();
        let before = inner.handlers.len();
        inner.handlers.retain(|(h, _)| *h != id);
        inner.handlers.len() != before
    }

    /// Number of currently registered handlers
    pub fn handler_count(&self) -> usize {
        self.lock().handlers.len()
    }

    /// Dispatch an event with default options
    ///
    /// Returns the stamped event id. If an identical event (same source, type,
    /// and payload) was dispatched within the dedup window, the original id is
    /// returned and nothing is enqueued.
    pub async fn dispatch(
        &self,
        source: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> String {
        self.dispatch_with_options(source, event_type, payload, &DispatchOptions::default())
            .await
    }

    /// Dispatch an event with an explicit correlation id and/or priority
    ///
    /// When this call starts the drain loop (no other dispatch is currently
    /// draining), it returns only after every handler has run for every event
    /// queued so far, including this one. When a drain is already in progress
    /// the event is merely enqueued and picked up by the active loop.
    pub async fn dispatch_with_options(
        &self,
        source: &str,
        event_type: &str,
        payload: serde_json::Value,
        options: &DispatchOptions,
    ) -> String {
        let event = Event::stamp(source, event_type, payload, options);
        let key = event.dedup_key();
        let id = event.id.clone();

        let should_drain = {
            let mut inner = self.lock();
            let now = Instant::now();
            inner.dedup.retain(|_, entry| entry.expires_at > now);

            if let Some(entry) = inner.dedup.get(&key) {
                tracing::debug!(
                    event_id = %entry.id,
                    source = %event.source,
                    event_type = %event.event_type,
                    "Duplicate event coalesced"
                );
                return entry.id.clone();
            }

            inner.dedup.insert(
                key,
                DedupEntry {
                    id: id.clone(),
                    expires_at: now + self.window,
                },
            );

            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.queue.push(QueuedEvent { event, seq });

            if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            }
        };

        if should_drain {
            self.drain().await;
        }

        id
    }

    /// Deliver queued events one at a time until the queue is empty
    ///
    /// Only one drain loop runs at a time; events enqueued while it runs are
    /// picked up by the same loop.
    async fn drain(&self) {
        loop {
            let (event, handlers) = {
                let mut inner = self.lock();
                match inner.queue.pop() {
                    Some(queued) => (queued.event, inner.handlers.clone()),
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };

            for (_, handler) in &handlers {
                if let Err(e) = handler.handle(&event).await {
                    let wrapped = CoreError::Handler {
                        handler: handler.name().to_string(),
                        reason: e.to_string(),
                    };
                    tracing::error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %wrapped,
                        "Handler failed, skipping"
                    );
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DispatchInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Recorder {
        label: String,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            &self.label
        }

        async fn handle(&self, event: &Event) -> Result<()> {
            self.seen.lock().unwrap().push(event.event_type.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, _event: &Event) -> Result<()> {
            Err(CoreError::Handler {
                handler: "failing".to_string(),
                reason: "always fails".to_string(),
            })
        }
    }

    fn recorder(label: &str) -> (Arc<Recorder>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Recorder {
                label: label.to_string(),
                seen: seen.clone(),
            }),
            seen,
        )
    }

    #[tokio::test]
    async fn test_dispatch_delivers_to_all_handlers() {
        let dispatcher = EventDispatcher::new();
        let (first, seen_first) = recorder("first");
        let (second, seen_second) = recorder("second");
        dispatcher.register(first);
        dispatcher.register(second);

        let id = dispatcher
            .dispatch("chat", "message.sent", json!({"text": "hi"}))
            .await;

        assert!(id.starts_with("evt-"));
        assert_eq!(*seen_first.lock().unwrap(), vec!["message.sent"]);
        assert_eq!(*seen_second.lock().unwrap(), vec!["message.sent"]);
    }

    #[tokio::test]
    async fn test_duplicate_within_window_coalesces() {
        let dispatcher = EventDispatcher::new();
        let (handler, seen) = recorder("rec");
        dispatcher.register(handler);

        let id1 = dispatcher
            .dispatch("jira", "message.sent", json!({"key": "A"}))
            .await;
        let id2 = dispatcher
            .dispatch("jira", "message.sent", json!({"key": "A"}))
            .await;

        assert_eq!(id1, id2);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_different_payloads_not_coalesced() {
        let dispatcher = EventDispatcher::new();
        let (handler, seen) = recorder("rec");
        dispatcher.register(handler);

        let id1 = dispatcher
            .dispatch("jira", "message.sent", json!({"key": "A"}))
            .await;
        let id2 = dispatcher
            .dispatch("jira", "message.sent", json!({"key": "B"}))
            .await;

        assert_ne!(id1, id2);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_entry_expires_after_window() {
        let dispatcher = EventDispatcher::new();
        let (handler, seen) = recorder("rec");
        dispatcher.register(handler);

        let id1 = dispatcher
            .dispatch("jira", "message.sent", json!({"key": "A"}))
            .await;
        tokio::time::advance(Duration::from_secs(61)).await;
        let id2 = dispatcher
            .dispatch("jira", "message.sent", json!({"key": "A"}))
            .await;

        assert_ne!(id1, id2);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    /// Dispatches two more events from inside the drain loop, so they queue
    /// up behind the seed event and exercise priority reordering.
    struct Fanout {
        dispatcher: Arc<EventDispatcher>,
        fired: AtomicBool,
        priorities: Vec<(&'static str, i32)>,
    }

    #[async_trait]
    impl EventHandler for Fanout {
        fn name(&self) -> &str {
            "fanout"
        }

        async fn handle(&self, event: &Event) -> Result<()> {
            if event.event_type == "seed" && !self.fired.swap(true, Ordering::SeqCst) {
                for (event_type, priority) in &self.priorities {
                    self.dispatcher
                        .dispatch_with_options(
                            "test",
                            event_type,
                            json!({}),
                            &DispatchOptions {
                                correlation_id: None,
                                priority: Some(*priority),
                            },
                        )
                        .await;
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_priority_order_high_before_low() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (rec, seen) = recorder("rec");
        dispatcher.register(Arc::new(Fanout {
            dispatcher: dispatcher.clone(),
            fired: AtomicBool::new(false),
            priorities: vec![("low", 1), ("high", 9)],
        }));
        dispatcher.register(rec);

        dispatcher.dispatch("test", "seed", json!({})).await;

        // "high" was enqueued second but has the greater priority
        assert_eq!(*seen.lock().unwrap(), vec!["seed", "high", "low"]);
    }

    #[tokio::test]
    async fn test_equal_priority_preserves_insertion_order() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (rec, seen) = recorder("rec");
        dispatcher.register(Arc::new(Fanout {
            dispatcher: dispatcher.clone(),
            fired: AtomicBool::new(false),
            priorities: vec![("first", 3), ("second", 3)],
        }));
        dispatcher.register(rec);

        dispatcher.dispatch("test", "seed", json!({})).await;

        assert_eq!(*seen.lock().unwrap(), vec!["seed", "first", "second"]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let dispatcher = EventDispatcher::new();
        dispatcher.register(Arc::new(Failing));
        let (rec, seen) = recorder("rec");
        dispatcher.register(rec);

        dispatcher.dispatch("chat", "message.sent", json!({"n": 1})).await;
        dispatcher.dispatch("chat", "message.sent", json!({"n": 2})).await;

        // Both events reached the handler registered after the failing one
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let dispatcher = EventDispatcher::new();
        let (rec, seen) = recorder("rec");
        let id = dispatcher.register(rec);

        dispatcher.dispatch("chat", "message.sent", json!({"n": 1})).await;
        assert!(dispatcher.unregister(id));
        assert!(!dispatcher.unregister(id));
        dispatcher.dispatch("chat", "message.sent", json!({"n": 2})).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_correlation_id_survives_dedup() {
        let dispatcher = EventDispatcher::new();

        let opts = DispatchOptions {
            correlation_id: Some("corr-1".to_string()),
            priority: None,
        };
        let id1 = dispatcher
            .dispatch_with_options("jira", "issue.updated", json!({"key": "X"}), &opts)
            .await;
        // Same logical event without a correlation id still coalesces to it
        let id2 = dispatcher
            .dispatch("jira", "issue.updated", json!({"key": "X"}))
            .await;

        assert_eq!(id1, "corr-1");
        assert_eq!(id2, "corr-1");
    }
}
