//! Attribute query templates for filtering a scan.
//!
//! A template is a set of attribute constraints; a file or series is kept
//! only when every constrained attribute matches. Values match exactly,
//! or by wildcard when the constraint contains `*` or `?`, the way DICOM
//! query attributes are written. An empty constraint value matches
//! anything (universal matching).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::{MetaRecord, Tag};

/// Granularity at which query filtering is applied.
///
/// At `Series` level a whole group is kept as soon as one of its files
/// matched; at `Image` level every file must match on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FindLevel {
    Series,
    #[default]
    Image,
}

/// A set of attribute-value constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTemplate {
    constraints: BTreeMap<Tag, String>,
}

impl QueryTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constraint on one attribute.
    pub fn insert(&mut self, tag: Tag, pattern: impl Into<String>) {
        self.constraints.insert(tag, pattern.into());
    }

    /// Builder-style `insert`.
    pub fn with(mut self, tag: Tag, pattern: impl Into<String>) -> Self {
        self.insert(tag, pattern);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// The attributes this template constrains.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.constraints.keys().copied()
    }

    /// Returns true when every constraint is satisfied by the record.
    ///
    /// A constrained attribute must be present in the record unless the
    /// constraint value is empty, which matches unconditionally.
    pub fn matches(&self, record: &MetaRecord) -> bool {
        self.constraints.iter().all(|(tag, pattern)| {
            if pattern.is_empty() {
                return true;
            }
            match record.get(*tag) {
                Some(value) => value_matches(pattern, value),
                None => false,
            }
        })
    }
}

fn value_matches(pattern: &str, value: &str) -> bool {
    if pattern.contains(['*', '?']) {
        glob::Pattern::new(pattern)
            .map(|p| p.matches(value))
            .unwrap_or(false)
    } else {
        pattern == value
    }
}
