//! Core event and signal types for the attache dispatch layer
//!
//! All types use camelCase JSON serialization for wire compatibility with the
//! JavaScript processes sharing the broker and lookup store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default priority assigned to event types with no table entry
pub const DEFAULT_PRIORITY: i32 = 5;

/// Dedup window during which identical events coalesce
pub const DEDUP_WINDOW_MS: u64 = 60_000;

/// A single dispatched event
///
/// `id` and `timestamp` are stamped by the dispatcher, never by the producer.
/// Events are immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier (evt-<uuid>, or a caller-supplied correlation id)
    pub id: String,

    /// Producer that submitted the event (e.g., "whatsapp", "jira", "scheduler")
    pub source: String,

    /// Event type identifier (e.g., "message.sent", "task.scheduled")
    pub event_type: String,

    /// Event payload — arbitrary JSON data
    pub payload: serde_json::Value,

    /// Unix timestamp in milliseconds, assigned at dispatch
    pub timestamp: u64,

    /// Resolved delivery priority (higher delivers first)
    pub priority: i32,
}

impl Event {
    /// Stamp a new event with a fresh id, timestamp, and resolved priority
    pub(crate) fn stamp(
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        options: &DispatchOptions,
    ) -> Self {
        let event_type = event_type.into();
        let priority = options
            .priority
            .unwrap_or_else(|| default_priority(&event_type));
        let id = options
            .correlation_id
            .clone()
            .unwrap_or_else(|| format!("evt-{}", uuid::Uuid::new_v4()));

        Self {
            id,
            source: source.into(),
            event_type,
            payload,
            timestamp: now_millis(),
            priority,
        }
    }

    /// Deduplication key — deterministic over (source, type, payload)
    pub(crate) fn dedup_key(&self) -> String {
        format!("{}|{}|{}", self.source, self.event_type, self.payload)
    }
}

/// Per-dispatch options supplied by a producer
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Use this id instead of generating one (correlation across systems)
    pub correlation_id: Option<String>,

    /// Override the type-based default priority
    pub priority: Option<i32>,
}

/// Static default-priority table keyed by event type
pub fn default_priority(event_type: &str) -> i32 {
    match event_type {
        "message.sent" => 10,
        "task.scheduled" => 5,
        _ => DEFAULT_PRIORITY,
    }
}

/// A named category of cached state that can be invalidated independently
///
/// Publishers target exactly one scope per signal; subscribers register
/// interest in a set of scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadScope {
    /// Schedule definitions changed
    Schedule,
    /// Channel adapter configuration changed
    ChannelConfig,
    /// Tool connection configuration changed
    Connections,
}

impl ReloadScope {
    /// Scope name as used in channel names and wire payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadScope::Schedule => "schedule",
            ReloadScope::ChannelConfig => "channel-config",
            ReloadScope::Connections => "connections",
        }
    }
}

impl fmt::Display for ReloadScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An invalidation signal broadcast over the reload channel
///
/// Carries no state to apply — subscribers re-derive from current
/// configuration on every signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadSignal {
    /// Which cached state the signal invalidates
    pub scope: ReloadScope,

    /// Identifier of the publishing process (proc-<uuid>)
    pub origin: String,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl ReloadSignal {
    /// Create a new signal for a scope from the given origin
    pub fn new(scope: ReloadScope, origin: impl Into<String>) -> Self {
        Self {
            scope,
            origin: origin.into(),
            timestamp: now_millis(),
        }
    }
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
