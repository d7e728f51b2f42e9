//! Execution layer - dependency resolution, value publication, and orchestration.

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod extract;
pub mod publisher;
pub mod resolver;
pub mod tree;
pub mod with_run;

pub use engine::{
    DashboardExecution, EngineConfig, ExecutionInputs, ExecutionReport, LeafExecutor, LeafRequest,
    NodeOutcome,
};
pub use error::{ExecutionError, Result};
pub use extract::extract_with_value;
pub use publisher::{InputDef, ParamDef, Publisher, SubscribeOptions};
pub use resolver::{resolve_dependencies, ResolvedDependencies, ResolvedRuntimeDependency};
pub use tree::{DashboardTree, NodeIndex, NodeSpec, TreeNode};
pub use with_run::{canonicalize_json_columns, RunStatus, WithRun};
