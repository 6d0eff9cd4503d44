//! Extension manifest declaration and validation.

use crate::extension::capability::{
    parse_runtime_capability, RuntimeCapability, RuntimeCapabilityError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Declarative extension manifest, usually shipped as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Stable identifier, e.g. `community.smartcopy`.
    pub id: String,
    /// Display name shown in settings.
    pub name: String,
    /// `major.minor.patch`.
    pub version: String,
    /// Host services the extension may use.
    #[serde(default, alias = "capabilities")]
    pub runtime_capabilities: Vec<String>,
}

impl ExtensionManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            runtime_capabilities: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: RuntimeCapability) -> Self {
        self.runtime_capabilities
            .push(capability.as_str().to_string());
        self
    }

    /// Parses and validates a JSON manifest.
    pub fn from_json(raw: &str) -> Result<Self, ManifestValidationError> {
        let manifest: Self = serde_json::from_str(raw)
            .map_err(|err| ManifestValidationError::Malformed(err.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validates declaration-level invariants.
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(ManifestValidationError::EmptyId);
        }
        if !is_valid_extension_id(id) {
            return Err(ManifestValidationError::InvalidId(self.id.clone()));
        }
        if self.name.trim().is_empty() {
            return Err(ManifestValidationError::EmptyName);
        }
        if !is_semver_triplet(self.version.trim()) {
            return Err(ManifestValidationError::InvalidVersion(
                self.version.clone(),
            ));
        }
        self.capability_set().map(|_| ())
    }

    /// Declared capabilities, rejecting unknown and duplicate entries.
    pub fn capability_set(&self) -> Result<BTreeSet<RuntimeCapability>, ManifestValidationError> {
        let mut set = BTreeSet::new();
        for raw in &self.runtime_capabilities {
            let capability =
                parse_runtime_capability(raw).map_err(ManifestValidationError::Capability)?;
            if !set.insert(capability) {
                return Err(ManifestValidationError::DuplicateCapability(capability));
            }
        }
        Ok(set)
    }
}

fn is_valid_extension_id(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first.is_ascii_digit() => {}
        _ => return false,
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
        } else if matches!(c, '.' | '_' | '-') && !prev_separator {
            prev_separator = true;
        } else {
            return false;
        }
    }
    !prev_separator
}

fn is_semver_triplet(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestValidationError {
    Malformed(String),
    EmptyId,
    InvalidId(String),
    EmptyName,
    InvalidVersion(String),
    Capability(RuntimeCapabilityError),
    DuplicateCapability(RuntimeCapability),
}

impl Display for ManifestValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "manifest is not valid JSON: {reason}"),
            Self::EmptyId => write!(f, "manifest id must not be empty"),
            Self::InvalidId(value) => write!(f, "manifest id is invalid: {value}"),
            Self::EmptyName => write!(f, "manifest name must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "manifest version is invalid: {value} (expected major.minor.patch)"
            ),
            Self::Capability(err) => write!(f, "{err}"),
            Self::DuplicateCapability(value) => {
                write!(f, "manifest capability is duplicated: {value}")
            }
        }
    }
}

impl Error for ManifestValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Capability(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtensionManifest, ManifestValidationError};
    use crate::extension::capability::{RuntimeCapability, RuntimeCapabilityError};

    fn valid_manifest() -> ExtensionManifest {
        ExtensionManifest::new("community.smartcopy", "Smartcopy", "1.0.0")
            .with_capability(RuntimeCapability::Hook)
            .with_capability(RuntimeCapability::Clipboard)
    }

    #[test]
    fn validates_baseline_manifest() {
        let manifest = valid_manifest();
        assert!(manifest.validate().is_ok());
        let set = manifest.capability_set().expect("capabilities");
        assert!(set.contains(&RuntimeCapability::Clipboard));
        assert!(!set.contains(&RuntimeCapability::Storage));
    }

    #[test]
    fn parses_json_with_capabilities_alias() {
        let manifest = ExtensionManifest::from_json(
            r#"{"id":"community.alts","name":"Alts","version":"0.2.1","capabilities":["storage","notification"]}"#,
        )
        .expect("manifest should parse");
        assert_eq!(manifest.runtime_capabilities.len(), 2);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ExtensionManifest::from_json("{").expect_err("malformed");
        assert!(matches!(err, ManifestValidationError::Malformed(_)));
    }

    #[test]
    fn rejects_duplicate_capabilities() {
        let manifest = valid_manifest().with_capability(RuntimeCapability::Hook);
        assert_eq!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::DuplicateCapability(RuntimeCapability::Hook)
        );
    }

    #[test]
    fn rejects_unsupported_capability() {
        let mut manifest = valid_manifest();
        manifest.runtime_capabilities.push("network".to_string());
        assert_eq!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::Capability(RuntimeCapabilityError::UnsupportedCapability(
                "network".to_string()
            ))
        );
    }

    #[test]
    fn rejects_invalid_id_and_version() {
        let mut manifest = valid_manifest();
        manifest.id = "Smart Copy".to_string();
        assert!(matches!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::InvalidId(_)
        ));

        let mut manifest = valid_manifest();
        manifest.version = "v1".to_string();
        assert!(matches!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::InvalidVersion(_)
        ));
    }
}
