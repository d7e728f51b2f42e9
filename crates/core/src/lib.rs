//! dashdeps core data models.
//!
//! This crate defines the addressing grammar and value types that the
//! runtime dependency engine passes between dashboard nodes.

#![warn(missing_docs)]

// Identities
mod id;

// Addressing
mod resource;
mod property_path;
mod dependency;

// Values
mod leaf_data;
mod value;
mod error;

// Re-exports
pub use id::ExecutionId;

pub use resource::ResourceKind;
pub use property_path::{PropertyPath, SELF_SCOPE};
pub use dependency::{ArgTarget, RuntimeDependency};

pub use leaf_data::{LeafData, LeafDataColumn, Row};
pub use value::{DependencyValue, ResolvedRuntimeDependencyValue};
pub use error::DependencyError;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
