//! Fatal execution errors.

/// Result alias for execution operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Conditions that abort dependency resolution or a whole execution.
///
/// Unlike [`DependencyError`](dashdeps_core::DependencyError), these mean the
/// tree was built wrong, not that a single value is unavailable.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// No ancestor publisher provides a declared dependency
    #[error("cannot resolve runtime dependency {dependency} of {consumer}")]
    UnresolvedDependency {
        /// Consuming node
        consumer: String,
        /// The dependency as declared
        dependency: String,
    },

    /// A subscription arrived after the value was already published
    #[error("subscription to '{name}' on {publisher} arrived after its value was published")]
    SubscribeAfterPublish {
        /// Publisher node
        publisher: String,
        /// Subscribed name
        name: String,
    },

    /// Attempt to register a producible value on a node that cannot own one
    #[error("node '{0}' cannot own withs, inputs or params")]
    NotAPublisher(String),

    /// A node task panicked or was aborted
    #[error("node task failed: {0}")]
    TaskFailed(String),

    /// The execution was cancelled
    #[error("dashboard execution was cancelled")]
    Cancelled,
}
