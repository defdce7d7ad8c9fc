//! Long-lived session caching with coalesced builds and bounded teardown
//!
//! `SessionManager` owns exactly one cached session — the expensive aggregate
//! of opened tool connections, the discovered tool list, and an agent-runner
//! handle. The first `get_session` after start or reload builds it; concurrent
//! callers coalesce onto the same in-flight build; `reload` clears the cache
//! synchronously and closes the old connections under a timeout bound.

pub mod contract;

use crate::deadline::race_deadline;
use crate::error::{CoreError, Result};
use crate::reload::{ReloadChannel, SignalHandler};
use crate::types::{ReloadScope, ReloadSignal};
use async_trait::async_trait;
use contract::{
    AgentRunner, ConnectionConfig, ConnectionsStore, Connector, RunnerFactory, ToolConnection,
    ToolDescriptor, ToolDiscovery, ToolListStore,
};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for a session build; `None` disables the timeout
    pub connect_timeout: Option<Duration>,

    /// Deadline for closing cached connections during reload; `None` disables
    pub close_timeout: Option<Duration>,

    /// Key under which the discovered tool list is published
    pub tool_list_key: String,

    /// Connections opened on every build, ahead of the store's user-defined ones
    pub default_connections: Vec<ConnectionConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_millis(300_000)),
            close_timeout: Some(Duration::from_millis(10_000)),
            tool_list_key: "attache:tools".to_string(),
            default_connections: Vec::new(),
        }
    }
}

/// External collaborators the session manager builds from
pub struct SessionDeps {
    /// Source of user-defined connection configs, read once per build
    pub store: Arc<dyn ConnectionsStore>,

    /// Opens configs into live connections
    pub connector: Arc<dyn Connector>,

    /// Derives the tool list from open connections
    pub discovery: Arc<dyn ToolDiscovery>,

    /// Derives the runner handle from the tool map
    pub runner_factory: Arc<dyn RunnerFactory>,

    /// Shared lookup the current tool list is published to (best-effort)
    pub tool_list: Option<Arc<dyn ToolListStore>>,
}

/// Read-only view of the cached session handed to event handlers
///
/// Cheap to clone. Exposes the discovered tools and the runner capability but
/// not the connection handles — closing connections is the manager's exclusive
/// responsibility, so a handler can never tear down a session other callers
/// are concurrently using.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connections: Vec<Arc<dyn ToolConnection>>,
    prefixed: HashMap<String, ToolDescriptor>,
    tools: Vec<ToolDescriptor>,
    runner: Arc<dyn AgentRunner>,
}

impl Session {
    /// Discovered tools in discovery order
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.inner.tools
    }

    /// Look up a tool by its prefixed name ("<connection>/<tool>")
    pub fn tool(&self, prefixed_name: &str) -> Option<&ToolDescriptor> {
        self.inner.prefixed.get(prefixed_name)
    }

    /// The agent-runner capability
    pub fn runner(&self) -> &Arc<dyn AgentRunner> {
        &self.inner.runner
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tools", &self.inner.tools.len())
            .finish_non_exhaustive()
    }
}

/// Build failure shared between coalesced waiters
#[derive(Debug, Clone)]
enum BuildFailure {
    Timeout(u64),
    Failed(String),
}

impl BuildFailure {
    fn into_error(self) -> CoreError {
        match self {
            BuildFailure::Timeout(ms) => CoreError::BuildTimeout(ms),
            BuildFailure::Failed(reason) => CoreError::Build(reason),
        }
    }
}

type SharedBuild = Shared<BoxFuture<'static, std::result::Result<Session, BuildFailure>>>;

/// Cache slot state — never more than one build is in flight
enum BuildState {
    Absent,
    Building { id: u64, result: SharedBuild },
    Ready(Session),
}

struct ManagerState {
    build: BuildState,
    next_build: u64,
}

struct ManagerInner {
    deps: SessionDeps,
    config: SessionConfig,
    state: Mutex<ManagerState>,
}

/// Owner of the one cached session
///
/// Cheap to clone — clones share the same cache.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Create a manager with default configuration
    pub fn new(deps: SessionDeps) -> Self {
        Self::with_config(deps, SessionConfig::default())
    }

    /// Create a manager with explicit configuration
    pub fn with_config(deps: SessionDeps, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                deps,
                config,
                state: Mutex::new(ManagerState {
                    build: BuildState::Absent,
                    next_build: 0,
                }),
            }),
        }
    }

    /// Get the cached session, building it if necessary
    ///
    /// Concurrent callers before the build completes all await the same
    /// in-flight build. On build timeout every waiter gets `BuildTimeout`;
    /// the underlying build keeps running in the background and its late
    /// result is discarded. A failed build does not poison the cache — the
    /// next call retries from scratch.
    pub async fn get_session(&self) -> Result<Session> {
        loop {
            let (build_id, shared) = {
                let mut state = self.lock();
                match &state.build {
                    BuildState::Ready(session) => return Ok(session.clone()),
                    BuildState::Building { id, result } => (*id, result.clone()),
                    BuildState::Absent => self.start_build(&mut state),
                }
            };

            match shared.await {
                // The build published its result; re-check the cache in case
                // a reload raced the wait.
                Ok(_) => continue,
                Err(failure) => {
                    let mut state = self.lock();
                    if matches!(&state.build, BuildState::Building { id, .. } if *id == build_id) {
                        state.build = BuildState::Absent;
                    }
                    return Err(failure.into_error());
                }
            }
        }
    }

    /// Clear the cache and tear down the previously cached connections
    ///
    /// The cache is cleared synchronously before any close is attempted, so a
    /// concurrent `get_session` starts a fresh build rather than observing
    /// stale state. Close failures and timeouts are logged, never returned;
    /// the published tool list is cleared regardless of close outcome.
    pub async fn reload(&self) {
        let previous = {
            let mut state = self.lock();
            std::mem::replace(&mut state.build, BuildState::Absent)
        };

        let connections = match previous {
            BuildState::Ready(session) => session.inner.connections.clone(),
            BuildState::Building { id, .. } => {
                tracing::debug!(build = id, "Reload dropped an in-flight session build");
                Vec::new()
            }
            BuildState::Absent => Vec::new(),
        };

        if !connections.is_empty() {
            let total = connections.len();
            let failures = Arc::new(AtomicUsize::new(0));
            let counter = failures.clone();
            let close_all = tokio::spawn(async move {
                for connection in connections {
                    if let Err(e) = connection.close().await {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!(
                            connection = connection.name(),
                            error = %e,
                            "Failed to close connection"
                        );
                    }
                }
            });

            let close_timeout = self.inner.config.close_timeout;
            let outcome = race_deadline(
                async move { close_all.await.map_err(|e| CoreError::Task(e.to_string())) },
                close_timeout,
                move || CoreError::CloseTimeout(duration_millis(close_timeout)),
            )
            .await;

            match outcome {
                Ok(()) => {
                    let failed = failures.load(Ordering::SeqCst);
                    if failed > 0 {
                        tracing::warn!(
                            failed,
                            total,
                            "Some connections failed to close during reload"
                        );
                    }
                }
                // Already-issued closes keep running in the background
                Err(e) => tracing::warn!(error = %e, "Abandoning connection close loop"),
            }
        }

        self.clear_tool_list().await;
        tracing::info!("Session cache cleared");
    }

    /// Subscribe this manager to connection invalidation signals
    ///
    /// Each signal on the `connections` scope triggers `reload`, so the next
    /// `get_session` rebuilds from current configuration.
    pub async fn watch_reloads(&self, channel: &ReloadChannel) {
        let handler = Arc::new(ManagerReloadHandler {
            manager: self.clone(),
        });
        channel.subscribe(&[ReloadScope::Connections], handler).await;
    }

    /// Start exactly one build and park it in the state slot
    fn start_build(&self, state: &mut ManagerState) -> (u64, SharedBuild) {
        let build_id = state.next_build;
        state.next_build += 1;

        let (tx, rx) = oneshot::channel::<std::result::Result<Session, BuildFailure>>();
        let manager = self.clone();
        tokio::spawn(async move { manager.run_build(build_id, tx).await });

        let timeout = self.inner.config.connect_timeout;
        let shared = race_deadline(
            async move {
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(BuildFailure::Failed("session build task dropped".to_string())),
                }
            },
            timeout,
            move || BuildFailure::Timeout(duration_millis(timeout)),
        )
        .boxed()
        .shared();

        state.build = BuildState::Building {
            id: build_id,
            result: shared.clone(),
        };
        tracing::debug!(build = build_id, "Session build started");
        (build_id, shared)
    }

    /// Build, publish into the cache if this build still owns the slot, then
    /// resolve the waiters
    async fn run_build(
        self,
        build_id: u64,
        tx: oneshot::Sender<std::result::Result<Session, BuildFailure>>,
    ) {
        let result = self.build_session().await;

        let current = {
            let mut state = self.lock();
            let current =
                matches!(&state.build, BuildState::Building { id, .. } if *id == build_id);
            if current {
                match &result {
                    Ok(session) => state.build = BuildState::Ready(session.clone()),
                    Err(_) => state.build = BuildState::Absent,
                }
            }
            current
        };

        match (&result, current) {
            (Ok(session), true) => {
                tracing::info!(
                    connections = session.inner.connections.len(),
                    tools = session.tools().len(),
                    "Session ready"
                );
                self.publish_tool_list(session).await;
            }
            (Ok(_), false) => {
                tracing::debug!(build = build_id, "Discarding stale session build result");
            }
            (Err(e), _) => {
                tracing::warn!(build = build_id, error = %e, "Session build failed");
            }
        }

        let _ = tx.send(result.map_err(|e| BuildFailure::Failed(e.to_string())));
    }

    /// Gather configs, open connections, discover tools, derive the runner
    async fn build_session(&self) -> Result<Session> {
        let deps = &self.inner.deps;
        let user_defined = deps.store.get_all().await?;
        let mut configs = self.inner.config.default_connections.clone();
        configs.extend(user_defined);

        let mut connections: Vec<Arc<dyn ToolConnection>> = Vec::with_capacity(configs.len());
        for config in &configs {
            match deps.connector.open(config).await {
                Ok(connection) => connections.push(connection),
                Err(e) => {
                    tracing::warn!(
                        connection = %config.name,
                        error = %e,
                        "Failed to open connection, skipping"
                    );
                }
            }
        }

        let discovered = deps.discovery.discover(&connections).await?;
        let runner = deps.runner_factory.build(&discovered.prefixed).await?;

        Ok(Session {
            inner: Arc::new(SessionInner {
                connections,
                prefixed: discovered.prefixed,
                tools: discovered.flat,
                runner,
            }),
        })
    }

    async fn publish_tool_list(&self, session: &Session) {
        let Some(lookup) = &self.inner.deps.tool_list else {
            return;
        };
        let json = match serde_json::to_string(session.tools()) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize tool list");
                return;
            }
        };
        if let Err(e) = lookup.set(&self.inner.config.tool_list_key, &json).await {
            tracing::warn!(
                key = %self.inner.config.tool_list_key,
                error = %e,
                "Failed to publish tool list"
            );
        }
    }

    async fn clear_tool_list(&self) {
        let Some(lookup) = &self.inner.deps.tool_list else {
            return;
        };
        if let Err(e) = lookup.del(&self.inner.config.tool_list_key).await {
            tracing::warn!(
                key = %self.inner.config.tool_list_key,
                error = %e,
                "Failed to clear tool list"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct ManagerReloadHandler {
    manager: SessionManager,
}

#[async_trait]
impl SignalHandler for ManagerReloadHandler {
    async fn on_signal(&self, signal: ReloadSignal) {
        tracing::info!(
            scope = %signal.scope,
            origin = %signal.origin,
            "Reload signal received, clearing session cache"
        );
        self.manager.reload().await;
    }
}

fn duration_millis(limit: Option<Duration>) -> u64 {
    limit.map(|d| d.as_millis() as u64).unwrap_or(0)
}
