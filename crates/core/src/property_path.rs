//! Dotted resource references and their parser.
//!
//! Valid forms:
//! ```text
//! [self.]<mod>.<kind>.<name>[.rows[.<idx>|*][.<column>]]
//! [self.]<kind>.<name>[.rows[.<idx>|*][.<column>]]
//! ```
//! Index brackets are accepted as an alternative to a dotted selector, so
//! `with.w1.rows[0].a` and `with.w1.rows.0.a` address the same value.

use crate::error::DependencyError;
use crate::resource::ResourceKind;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Scope qualifier that may prefix a runtime dependency reference.
pub const SELF_SCOPE: &str = "self";

/// A parsed resource reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyPath {
    /// Mod name (empty for unqualified references)
    #[serde(rename = "mod")]
    pub mod_name: String,

    /// Kind of the referenced resource
    pub item_type: ResourceKind,

    /// Resource name
    pub name: String,

    /// Sub-path below the resource, e.g. `["rows", "0", "a"]`
    pub segments: Vec<String>,

    /// Optional scope qualifier (`self`)
    pub scope: Option<String>,

    /// The reference exactly as written
    pub original: String,
}

impl PropertyPath {
    /// Parse a dotted reference.
    pub fn parse(raw: &str) -> Result<Self, DependencyError> {
        let split: Vec<&str> = raw.split('.').collect();
        if split.len() < 2 {
            return Err(DependencyError::invalid_path(
                raw,
                "expected at least <kind>.<name>",
            ));
        }

        let mut parts = Vec::with_capacity(split.len() + 2);
        for part in split {
            expand_part(raw, part, &mut parts)?;
        }

        let mut scope = None;
        if parts[0] == SELF_SCOPE {
            scope = Some(parts.remove(0));
        }

        // unqualified reference: insert an empty mod so parts[0] is always the mod
        if parts
            .first()
            .is_some_and(|p| ResourceKind::from_keyword(p).is_some())
        {
            parts.insert(0, String::new());
        }

        if parts.len() < 3 {
            return Err(DependencyError::invalid_path(
                raw,
                "expected at least <kind>.<name>",
            ));
        }

        let segments = parts.split_off(3);
        let mut head = parts.into_iter();
        let mod_name = head.next().unwrap_or_default();
        let item_type = head.next().unwrap_or_default();
        let name = head.next().unwrap_or_default();

        let Some(item_type) = ResourceKind::from_keyword(&item_type) else {
            return Err(DependencyError::UnknownResourceType {
                path: raw.to_string(),
                item_type,
            });
        };

        Ok(Self {
            mod_name,
            item_type,
            name,
            segments,
            scope,
            original: raw.to_string(),
        })
    }

    /// The `<kind>.<name>` key a publisher registers this resource under.
    pub fn to_resource_name(&self) -> String {
        format!("{}.{}", self.item_type, self.name)
    }

    /// Sub-path segments joined back with dots.
    pub fn segments_string(&self) -> String {
        self.segments.join(".")
    }

    /// Whether the reference carried the `self` qualifier.
    pub fn is_self_scoped(&self) -> bool {
        self.scope.as_deref() == Some(SELF_SCOPE)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for PropertyPath {
    type Err = DependencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn index_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<ident>[^\[\]]+)\[(?P<selector>[^\[\]]+)\]$")
            .unwrap_or_else(|e| panic!("index pattern must compile: {e}"))
    })
}

/// Push one dotted part, splitting `ident[selector]` into two.
fn expand_part(raw: &str, part: &str, out: &mut Vec<String>) -> Result<(), DependencyError> {
    // stricter than a plain dot split, which would keep "" as a segment
    // and leave the extractor to reject it
    if part.is_empty() {
        return Err(DependencyError::invalid_path(raw, "empty path segment"));
    }
    if !part.contains('[') && !part.contains(']') {
        out.push(part.to_string());
        return Ok(());
    }

    let Some(captures) = index_pattern().captures(part) else {
        return Err(DependencyError::invalid_path(
            raw,
            format!("malformed index in segment '{part}'"),
        ));
    };
    out.push(captures["ident"].to_string());
    out.push(captures["selector"].trim().to_string());
    Ok(())
}
