//! # attache-core
//!
//! Event dispatch, session caching, and reload signaling for the Attache
//! assistant backend.
//!
//! ## Overview
//!
//! `attache-core` is the coordination layer every inbound event flows
//! through: channel adapters and API routes dispatch events, handlers consume
//! them against a cached tool-connected session, and configuration changes in
//! any process invalidate that cache through a scoped reload channel.
//!
//! ## Quick Start
//!
//! ```rust
//! use attache_core::{EventDispatcher, MemoryTransport, ReloadChannel, ReloadScope};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! // Dispatch an inbound event; handlers run in priority order
//! let dispatcher = EventDispatcher::new();
//! let id = dispatcher
//!     .dispatch("jira", "message.sent", serde_json::json!({"key": "OPS-7"}))
//!     .await;
//! println!("Dispatched: {}", id);
//!
//! // Signal other processes that connection config changed
//! let reload = ReloadChannel::new(Arc::new(MemoryTransport::new()));
//! reload.publish(ReloadScope::Connections).await;
//! # }
//! ```
//!
//! ## Transports
//!
//! - **memory** — in-process broadcast for testing and single-process use
//! - **nats** — core-NATS subjects for cross-process invalidation
//!
//! ## Architecture
//!
//! - **EventDispatcher** — dedup window, priority queue, single drain loop,
//!   per-handler failure isolation
//! - **SessionManager** — lazy coalesced build of the tool-connected session,
//!   timeout-bounded teardown, reload-driven invalidation
//! - **ReloadChannel** — scoped invalidation signals over a pluggable
//!   `PubSubTransport`, degrading to a local no-op without a broker

pub mod deadline;
pub mod dispatch;
pub mod error;
pub mod reload;
pub mod session;
pub mod transport;
pub mod types;

// Re-export core types
pub use deadline::race_deadline;
pub use dispatch::{EventDispatcher, EventHandler, HandlerId};
pub use error::{CoreError, Result};
pub use reload::{channel_name, ReloadChannel, SignalHandler, CHANNEL_PREFIX};
pub use session::contract::{
    AgentRunner, ConnectionConfig, ConnectionsStore, Connector, DiscoveredTools,
    MemoryToolListStore, RunnerFactory, ToolConnection, ToolDescriptor, ToolDiscovery,
    ToolListStore,
};
pub use session::{Session, SessionConfig, SessionDeps, SessionManager};
pub use types::{
    default_priority, DispatchOptions, Event, ReloadScope, ReloadSignal, DEDUP_WINDOW_MS,
    DEFAULT_PRIORITY,
};

// Re-export transports for convenience
pub use transport::memory::MemoryTransport;
pub use transport::nats::{NatsConfig, NatsTransport};
pub use transport::{PubSubTransport, SignalStream};
