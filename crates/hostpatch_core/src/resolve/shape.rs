//! Capability shapes and structural candidate search.
//!
//! # Responsibility
//! - Describe a required capability by property names, nested paths and an
//!   optional display name.
//! - Scan one registry snapshot and yield every structurally matching export.
//!
//! # Invariants
//! - One registry snapshot per `find_candidates` call; no caching here.
//! - Candidates come out in registry order.
//! - A record that fails (or panics) on property access is skipped.
//! - Only one level of `default` indirection is followed.

use crate::host::registry::{ModuleId, ModuleRecord, ModuleRegistryView};
use crate::host::value::HostValue;
use log::debug;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};

const DEFAULT_EXPORT_KEY: &str = "default";
const DISPLAY_NAME_KEYS: &[&str] = &["displayName", "name"];

/// Structural description of a wanted capability.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilityShape {
    required_keys: Vec<String>,
    nested_paths: Vec<String>,
    display_name: Option<String>,
}

impl CapabilityShape {
    /// Shape requiring every listed property name.
    ///
    /// Blank and repeated names are dropped; first-seen order is kept.
    pub fn props<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut shape = Self::default();
        for key in keys {
            push_unique(&mut shape.required_keys, key.into());
        }
        shape
    }

    /// Shape matching an export by its `displayName` or `name`.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into().trim().to_string();
        Self {
            display_name: (!name.is_empty()).then_some(name),
            ..Self::default()
        }
    }

    /// Adds one dotted path that must resolve to a value.
    pub fn with_nested_path(mut self, path: impl Into<String>) -> Self {
        push_unique(&mut self.nested_paths, path.into());
        self
    }

    pub fn required_keys(&self) -> &[String] {
        &self.required_keys
    }

    pub fn nested_paths(&self) -> &[String] {
        &self.nested_paths
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Returns true when the shape carries no criterion at all.
    pub fn is_empty(&self) -> bool {
        self.required_keys.is_empty() && self.nested_paths.is_empty() && self.display_name.is_none()
    }

    /// Stable cache key for this logical capability.
    pub fn key(&self) -> ShapeKey {
        let mut keys = self.required_keys.clone();
        keys.sort();
        let mut paths = self.nested_paths.clone();
        paths.sort();

        let mut raw = format!("props={}", keys.join(","));
        if !paths.is_empty() {
            raw.push_str(&format!("|paths={}", paths.join(",")));
        }
        if let Some(name) = &self.display_name {
            raw.push_str(&format!("|name={name}"));
        }
        ShapeKey(raw)
    }

    /// Checks one value against the shape.
    ///
    /// Any property access failure counts as "does not match".
    pub fn matches(&self, value: &HostValue) -> bool {
        if self.is_empty() {
            return false;
        }

        for key in &self.required_keys {
            match value.get_property(key) {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => return false,
            }
        }

        for path in &self.nested_paths {
            match value.get_path(path) {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => return false,
            }
        }

        match &self.display_name {
            Some(expected) => DISPLAY_NAME_KEYS.iter().any(|key| {
                matches!(
                    value.get_property(key),
                    Ok(Some(HostValue::Text(actual))) if actual.as_str() == expected.as_str()
                )
            }),
            None => true,
        }
    }
}

impl Display for CapabilityShape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

fn push_unique(target: &mut Vec<String>, value: String) {
    let value = value.trim().to_string();
    if value.is_empty() || target.contains(&value) {
        return;
    }
    target.push(value);
}

/// Stable key derived from a `CapabilityShape`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeKey(String);

impl ShapeKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShapeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Export that matched a shape structurally but is not verified yet.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub module_id: ModuleId,
    /// Matched value: the export itself or its `default` property.
    pub target: HostValue,
    /// Whether the match was found through the `default` indirection.
    pub via_default: bool,
}

/// Lazily yields every record export matching `shape`.
pub fn find_candidates<'a>(
    registry: &dyn ModuleRegistryView,
    shape: &'a CapabilityShape,
) -> impl Iterator<Item = Candidate> + 'a {
    registry
        .records()
        .into_iter()
        .filter_map(move |record| match_record_isolated(shape, record))
}

fn match_record_isolated(shape: &CapabilityShape, record: ModuleRecord) -> Option<Candidate> {
    let module_id = record.id;
    match catch_unwind(AssertUnwindSafe(|| match_record(shape, record))) {
        Ok(candidate) => candidate,
        Err(_) => {
            debug!(
                "event=shape_match module=resolver status=skipped module_id={} reason=panic",
                module_id
            );
            None
        }
    }
}

fn match_record(shape: &CapabilityShape, record: ModuleRecord) -> Option<Candidate> {
    if shape.matches(&record.exports) {
        return Some(Candidate {
            module_id: record.id,
            target: record.exports,
            via_default: false,
        });
    }

    match record.exports.get_property(DEFAULT_EXPORT_KEY) {
        Ok(Some(inner)) if shape.matches(&inner) => Some(Candidate {
            module_id: record.id,
            target: inner,
            via_default: true,
        }),
        Ok(_) => None,
        Err(err) => {
            debug!(
                "event=shape_match module=resolver status=skipped module_id={} error={}",
                record.id, err
            );
            None
        }
    }
}
