//! The execution orchestrator - runs a dashboard tree to completion.

use crate::error::{ExecutionError, Result};
use crate::resolver::{resolve_dependencies, ResolvedDependencies};
use crate::tree::{DashboardTree, NodeIndex};
use crate::with_run::RunStatus;
use async_trait::async_trait;
use chrono::Utc;
use dashdeps_core::{DependencyError, ExecutionId, LeafData, ResourceKind, Time};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Environment variable overriding [`EngineConfig::max_parallel`].
pub const MAX_PARALLEL_ENV: &str = "DASHDEPS_MAX_PARALLEL";

/// Environment variable overriding [`EngineConfig::dependency_timeout`] (seconds, 0 disables).
pub const DEPENDENCY_TIMEOUT_ENV: &str = "DASHDEPS_DEPENDENCY_TIMEOUT_SECS";

/// Configuration for the execution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max leaves executing at once
    pub max_parallel: NonZeroUsize,
    /// Max time a node waits for its dependencies (None = until cancelled)
    pub dependency_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: NonZeroUsize::new(10).unwrap_or(NonZeroUsize::MIN),
            dependency_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `DASHDEPS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(MAX_PARALLEL_ENV) {
            match raw.trim().parse::<NonZeroUsize>() {
                Ok(max) => config.max_parallel = max,
                Err(_) => warn!("Ignoring invalid {}={}", MAX_PARALLEL_ENV, raw),
            }
        }

        if let Some(raw) = lookup(DEPENDENCY_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.dependency_timeout = None,
                Ok(secs) => config.dependency_timeout = Some(Duration::from_secs(secs)),
                Err(_) => warn!("Ignoring invalid {}={}", DEPENDENCY_TIMEOUT_ENV, raw),
            }
        }

        config
    }

    /// Set max parallel leaves.
    pub fn with_max_parallel(mut self, max: NonZeroUsize) -> Self {
        self.max_parallel = max;
        self
    }

    /// Set the dependency wait bound.
    pub fn with_dependency_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dependency_timeout = timeout;
        self
    }
}

/// What a leaf needs to execute.
#[derive(Debug, Clone)]
pub struct LeafRequest {
    /// Node name
    pub name: String,
    /// Node kind
    pub kind: ResourceKind,
    /// SQL to run
    pub sql: String,
    /// Resolved dependency values keyed by consumer slot (`args.ids`, `title`)
    pub resolved: BTreeMap<String, Value>,
}

/// Runs leaf SQL. Supplied by the query-execution subsystem.
#[async_trait]
pub trait LeafExecutor: Send + Sync {
    /// Execute a leaf and return its rows.
    async fn execute(&self, request: &LeafRequest) -> std::result::Result<LeafData, DependencyError>;
}

/// Values supplied from outside the tree.
#[derive(Debug, Clone, Default)]
pub struct ExecutionInputs {
    /// Input values keyed by input short name
    pub inputs: HashMap<String, Value>,
    /// Param arguments keyed by node name, then param short name
    pub args: HashMap<String, HashMap<String, Value>>,
}

/// Outcome of one executed or dependent node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    /// Node name
    pub name: String,
    /// Node kind
    pub kind: ResourceKind,
    /// Complete or Error
    pub status: RunStatus,
    /// Rows returned, for executed leaves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<LeafData>,
    /// Resolved dependency values keyed by consumer slot
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dependency_values: BTreeMap<String, Value>,
    /// Error text, if the node failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    index: NodeIndex,
}

/// Result of a whole execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Execution identifier
    pub execution_id: ExecutionId,
    /// Start time
    pub started_at: Time,
    /// End time
    pub completed_at: Time,
    /// Node outcomes in tree order
    pub nodes: Vec<NodeOutcome>,
}

impl ExecutionReport {
    /// Look up a node's outcome by name.
    pub fn node(&self, name: &str) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Number of failed nodes.
    pub fn failed(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status == RunStatus::Error)
            .count()
    }
}

/// Runs one dashboard tree.
///
/// ```text
/// Resolve (setup) → Publish inputs/params → Execute leaves concurrently → Report
/// ```
pub struct DashboardExecution {
    id: ExecutionId,
    tree: Arc<DashboardTree>,
    executor: Arc<dyn LeafExecutor>,
    config: EngineConfig,
}

impl DashboardExecution {
    /// Create an execution of `tree`.
    pub fn new(tree: DashboardTree, executor: Arc<dyn LeafExecutor>) -> Self {
        Self {
            id: ExecutionId::new(),
            tree: Arc::new(tree),
            executor,
            config: EngineConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Execution identifier.
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// The tree being executed.
    pub fn tree(&self) -> &DashboardTree {
        &self.tree
    }

    /// Run the tree to completion.
    ///
    /// An execution is one-shot: publishers remember what they published, so
    /// running consumes it.
    ///
    /// ```compile_fail
    /// # use dashdeps_execution::{DashboardExecution, ExecutionInputs};
    /// # async fn twice(execution: DashboardExecution) {
    /// let cancel = tokio_util::sync::CancellationToken::new();
    /// let _ = execution.run(ExecutionInputs::default(), cancel.clone()).await;
    /// let _ = execution.run(ExecutionInputs::default(), cancel).await;
    /// # }
    /// ```
    pub async fn run(self, inputs: ExecutionInputs, cancel: CancellationToken) -> Result<ExecutionReport> {
        let started_at = Utc::now();
        let root = self.tree.node(self.tree.root()).name().to_string();
        info!("Starting execution {} of {}", self.id, root);

        // 1. Setup: every subscription is in place before anything publishes
        let mut jobs = Vec::new();
        for (idx, node) in self.tree.nodes() {
            if node.sql().is_none() && node.dependencies().is_empty() {
                continue;
            }
            jobs.push((idx, resolve_dependencies(&self.tree, idx)?));
        }
        debug!("Resolved dependencies for {} node(s)", jobs.len());

        // 2. Values known up front
        let no_args = HashMap::new();
        for publisher in self.tree.publishers() {
            let args = inputs.args.get(publisher.name()).unwrap_or(&no_args);
            publisher.publish_param_values(args);
            publisher.publish_input_values(&inputs.inputs);
        }

        // 3. Execute
        let cancel = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.get()));
        let mut tasks = JoinSet::new();
        for (idx, resolved) in jobs {
            let task = NodeTask {
                tree: Arc::clone(&self.tree),
                executor: Arc::clone(&self.executor),
                semaphore: Arc::clone(&semaphore),
                cancel: cancel.clone(),
                dependency_timeout: self.config.dependency_timeout,
            };
            tasks.spawn(task.run(idx, resolved));
        }

        let mut nodes = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    warn!("Execution {} cancelled", self.id);
                    return Err(ExecutionError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(outcome)) => nodes.push(outcome),
                    Some(Err(e)) => {
                        cancel.cancel();
                        return Err(ExecutionError::TaskFailed(e.to_string()));
                    }
                    None => break,
                },
            }
        }
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        for publisher in self.tree.publishers() {
            if !publisher.all_withs_complete() {
                warn!("Publisher {} finished with incomplete withs", publisher.name());
            }
        }

        // 4. Report
        nodes.sort_by_key(|n| n.index);
        let report = ExecutionReport {
            execution_id: self.id,
            started_at,
            completed_at: Utc::now(),
            nodes,
        };
        info!(
            "Execution {} complete: {} node(s), {} failed",
            self.id,
            report.nodes.len(),
            report.failed()
        );
        Ok(report)
    }
}

struct NodeTask {
    tree: Arc<DashboardTree>,
    executor: Arc<dyn LeafExecutor>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    dependency_timeout: Option<Duration>,
}

impl NodeTask {
    async fn run(self, idx: NodeIndex, mut resolved: ResolvedDependencies) -> NodeOutcome {
        let node = self.tree.node(idx);
        if let Some(run) = node.with_run() {
            run.set_running();
        }

        let result = match self.wait_for_dependencies(&mut resolved).await {
            Ok(()) => self.execute(idx, &resolved).await,
            Err(e) => Err(e),
        };

        // completion trigger: a with's outcome, good or bad, reaches all its consumers
        if let Some(run) = node.with_run() {
            if let Some((_, owner)) = self.tree.parent_publisher(idx) {
                owner.set_with_value(run, result.clone().map(Option::unwrap_or_default));
            }
        }

        let (status, data, error) = match result {
            Ok(data) => {
                debug!("Node {} complete", node.name());
                (RunStatus::Complete, data, None)
            }
            Err(e) => {
                warn!("Node {} failed: {}", node.name(), e);
                (RunStatus::Error, None, Some(e.to_string()))
            }
        };

        NodeOutcome {
            name: node.name().to_string(),
            kind: node.kind(),
            status,
            data,
            dependency_values: resolved.values_by_target(),
            error,
            index: idx,
        }
    }

    async fn wait_for_dependencies(
        &self,
        resolved: &mut ResolvedDependencies,
    ) -> std::result::Result<(), DependencyError> {
        let Some(limit) = self.dependency_timeout else {
            return resolved.resolve_all(&self.cancel).await;
        };
        let owner = resolved.owner().to_string();
        match tokio::time::timeout(limit, resolved.resolve_all(&self.cancel)).await {
            Ok(result) => result,
            Err(_) => Err(DependencyError::Timeout(owner)),
        }
    }

    async fn execute(
        &self,
        idx: NodeIndex,
        resolved: &ResolvedDependencies,
    ) -> std::result::Result<Option<LeafData>, DependencyError> {
        let node = self.tree.node(idx);
        let Some(sql) = node.sql() else {
            return Ok(None);
        };

        // hold a permit only while executing, never while waiting on dependencies
        let Ok(_permit) = self.semaphore.acquire().await else {
            return Err(DependencyError::Cancelled(node.name().to_string()));
        };

        let request = LeafRequest {
            name: node.name().to_string(),
            kind: node.kind(),
            sql: sql.to_string(),
            resolved: resolved.values_by_target(),
        };
        info!("Executing {}", request.name);

        tokio::select! {
            result = self.executor.execute(&request) => result.map(Some),
            _ = self.cancel.cancelled() => Err(DependencyError::Cancelled(request.name.clone())),
        }
    }
}
