//! Collaborator contracts for session building
//!
//! The session layer treats everything expensive or external as a trait:
//! where connection configs come from, how a config becomes a live
//! connection, how tools are discovered over open connections, and how a
//! runner is derived from the tool map. Implementations live in the adapter
//! crates; doubles live in tests.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration for one tool connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Unique connection name; also the tool-name prefix
    pub name: String,

    /// Connection kind (e.g., "stdio", "sse", "http")
    pub kind: String,

    /// Kind-specific settings, opaque to this layer
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// A tool exposed by an open connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name as exposed by the connection
    pub name: String,

    /// Name of the connection that provides the tool
    pub connection: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Input schema, opaque to this layer
    #[serde(default)]
    pub schema: serde_json::Value,
}

/// Tools discovered over a set of open connections
#[derive(Debug, Clone, Default)]
pub struct DiscoveredTools {
    /// Tools keyed by prefixed name ("<connection>/<tool>")
    pub prefixed: HashMap<String, ToolDescriptor>,

    /// Flat list in discovery order
    pub flat: Vec<ToolDescriptor>,
}

/// Source of user-defined connection configurations
///
/// Read once per session build.
#[async_trait]
pub trait ConnectionsStore: Send + Sync {
    async fn get_all(&self) -> Result<Vec<ConnectionConfig>>;
}

/// Opens a connection config into a live connection handle
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, config: &ConnectionConfig) -> Result<Arc<dyn ToolConnection>>;
}

/// A live tool connection
///
/// Closing is the session manager's exclusive responsibility — handlers only
/// ever see the session's read-only view, which does not expose these.
#[async_trait]
pub trait ToolConnection: Send + Sync {
    /// Connection name, matching its `ConnectionConfig::name`
    fn name(&self) -> &str;

    /// Close the connection, releasing its resources
    async fn close(&self) -> Result<()>;
}

/// Derives the tool list from a set of open connections
#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    async fn discover(&self, connections: &[Arc<dyn ToolConnection>]) -> Result<DiscoveredTools>;
}

/// Builds an agent runner from a discovered tool map
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    async fn build(&self, tools: &HashMap<String, ToolDescriptor>) -> Result<Arc<dyn AgentRunner>>;
}

/// Capability to execute one agent turn
///
/// Opaque to this layer: input in, text/tool-call output back.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn generate(&self, input: serde_json::Value) -> Result<serde_json::Value>;
}

/// Shared external lookup for the current tool list
///
/// Both operations are best-effort from the session manager's perspective:
/// failures are logged, never propagated.
#[async_trait]
pub trait ToolListStore: Send + Sync {
    async fn set(&self, key: &str, json: &str) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
}

/// In-memory tool-list store for testing and single-process deployments
#[derive(Default)]
pub struct MemoryToolListStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryToolListStore {
    /// Read back a stored value (test and diagnostics convenience)
    pub async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.get(key).cloned()
    }
}

#[async_trait]
impl ToolListStore for MemoryToolListStore {
    async fn set(&self, key: &str, json: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), json.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}
