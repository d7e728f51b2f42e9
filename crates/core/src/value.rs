//! Values delivered to dependency consumers.

use crate::error::DependencyError;
use crate::leaf_data::LeafData;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;

/// A produced value.
///
/// Whole with results are shared behind an `Arc`; every projection a
/// subscriber asks for is a freshly built `Json` value.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyValue {
    /// An entire tabular result
    Table(Arc<LeafData>),
    /// A scalar, row projection, input or param value
    Json(Value),
}

impl DependencyValue {
    /// The tabular result, if this is one.
    pub fn as_table(&self) -> Option<&Arc<LeafData>> {
        match self {
            Self::Table(data) => Some(data),
            Self::Json(_) => None,
        }
    }

    /// The JSON value, if this is one.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Table(_) => None,
        }
    }

    /// Convert to a JSON value (tables become `{columns, rows}`).
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            Self::Table(data) => serde_json::to_value(data.as_ref()),
            Self::Json(value) => Ok(value.clone()),
        }
    }
}

impl From<Value> for DependencyValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<LeafData> for DependencyValue {
    fn from(data: LeafData) -> Self {
        Self::Table(Arc::new(data))
    }
}

impl Serialize for DependencyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Table(data) => data.as_ref().serialize(serializer),
            Self::Json(value) => value.serialize(serializer),
        }
    }
}

/// The unit sent over a delivery channel: a value or the reason there is none.
pub type ResolvedRuntimeDependencyValue = Result<DependencyValue, DependencyError>;
