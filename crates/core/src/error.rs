//! Recoverable errors delivered to dependency consumers.

/// Errors that describe why a single dependency value could not be produced.
///
/// These travel over delivery channels as the error half of a
/// [`ResolvedRuntimeDependencyValue`](crate::ResolvedRuntimeDependencyValue),
/// so one failure can be cloned out to every subscriber of a name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    /// Malformed address string or sub-path
    #[error("invalid property path '{path}': {reason}")]
    InvalidPropertyPath {
        /// The path as written
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// Address names a resource kind that does not exist
    #[error("invalid property path '{path}': unknown resource type '{item_type}'")]
    UnknownResourceType {
        /// The path as written
        path: String,
        /// The unrecognized kind
        item_type: String,
    },

    /// No column selected and the result has several
    #[error("reference to with '{name}' is returning more than one column - not supported")]
    AmbiguousColumnSelection {
        /// Dependency name
        name: String,
    },

    /// No column selected and the result has none
    #[error("reference to with '{name}' returned no columns")]
    NoColumns {
        /// Dependency name
        name: String,
    },

    /// A row lacks the selected column
    #[error("column {column} does not exist")]
    MissingColumn {
        /// Selected column
        column: String,
    },

    /// Row selector past the end of the result
    #[error("reference to with '{name}' has invalid row index '{index}' - {row_count} {} were returned", row_noun(.row_count))]
    RowIndexOutOfRange {
        /// Dependency name
        name: String,
        /// Requested row
        index: usize,
        /// Rows actually returned
        row_count: usize,
    },

    /// A JSON column value could not be re-encoded as text
    #[error("failed to serialize value of column '{column}': {message}")]
    ValueSerialization {
        /// Column being canonicalized
        column: String,
        /// Serializer message
        message: String,
    },

    /// Extraction failed for a with reference
    #[error("failed to resolve with value '{path}' for {name}: {source}")]
    WithValue {
        /// Dependency name
        name: String,
        /// Original path string
        path: String,
        /// Underlying extraction error
        #[source]
        source: Box<DependencyError>,
    },

    /// The producing run finished with an error
    #[error("{0}")]
    RunFailed(String),

    /// The publisher went away without publishing
    #[error("publisher of '{0}' was dropped before a value was published")]
    PublisherDropped(String),

    /// The wait for a value was cancelled
    #[error("resolution of '{0}' was cancelled")]
    Cancelled(String),

    /// The wait for a value exceeded the configured bound
    #[error("timed out waiting for '{0}'")]
    Timeout(String),
}

impl DependencyError {
    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPropertyPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

fn row_noun(count: &usize) -> &'static str {
    if *count == 1 {
        "row"
    } else {
        "rows"
    }
}
