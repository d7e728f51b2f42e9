//! Runtime dependency declarations.

use crate::property_path::PropertyPath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parent property that feeds query arguments.
const ARGS_PROPERTY: &str = "args";

/// Which query argument a dependency feeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgTarget {
    /// Named argument
    Named(String),
    /// Positional argument
    Positional(usize),
}

/// A value a node needs from elsewhere in the tree.
///
/// Created during tree construction and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDependency {
    /// Address of the producing resource (and optional sub-value)
    pub property_path: PropertyPath,

    /// Field of the consumer this value feeds, e.g. `title`, `sql`, `args`
    pub parent_property_name: String,

    /// Argument slot, when `parent_property_name` is `args`
    pub arg: Option<ArgTarget>,
}

impl RuntimeDependency {
    /// Create a dependency feeding a plain property.
    pub fn new(property_path: PropertyPath, parent_property_name: impl Into<String>) -> Self {
        Self {
            property_path,
            parent_property_name: parent_property_name.into(),
            arg: None,
        }
    }

    /// Create a dependency feeding a query argument.
    pub fn for_arg(property_path: PropertyPath, arg: ArgTarget) -> Self {
        Self {
            property_path,
            parent_property_name: ARGS_PROPERTY.to_string(),
            arg: Some(arg),
        }
    }

    /// Unqualified name of the producer, e.g. `with.stuff1`.
    pub fn source_resource_name(&self) -> String {
        self.property_path.to_resource_name()
    }

    /// The consumer slot this value lands in: `title`, `args.ids`, `args[0]`.
    pub fn target_name(&self) -> String {
        match &self.arg {
            Some(ArgTarget::Named(name)) => format!("{}.{}", self.parent_property_name, name),
            Some(ArgTarget::Positional(idx)) => format!("{}[{}]", self.parent_property_name, idx),
            None => self.parent_property_name.clone(),
        }
    }

    /// Key identifying this dependency within its consumer.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RuntimeDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- {}", self.target_name(), self.property_path)
    }
}
