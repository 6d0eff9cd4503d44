//! Runtime capabilities an extension must declare before using host services.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Host service gated behind a manifest declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuntimeCapability {
    Hook,
    Storage,
    Notification,
    Clipboard,
}

impl RuntimeCapability {
    /// Stable string id used in manifest declarations.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hook => RUNTIME_CAPABILITY_HOOK,
            Self::Storage => RUNTIME_CAPABILITY_STORAGE,
            Self::Notification => RUNTIME_CAPABILITY_NOTIFICATION,
            Self::Clipboard => RUNTIME_CAPABILITY_CLIPBOARD,
        }
    }

    /// User-facing short description.
    pub fn description(self) -> &'static str {
        match self {
            Self::Hook => "Intercept calls to app components.",
            Self::Storage => "Keep extension settings and data on this device.",
            Self::Notification => "Show toast notifications.",
            Self::Clipboard => "Write text to the clipboard.",
        }
    }
}

impl Display for RuntimeCapability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const RUNTIME_CAPABILITY_HOOK: &str = "hook";
pub const RUNTIME_CAPABILITY_STORAGE: &str = "storage";
pub const RUNTIME_CAPABILITY_NOTIFICATION: &str = "notification";
pub const RUNTIME_CAPABILITY_CLIPBOARD: &str = "clipboard";

/// Parses one manifest capability string. Matching is case-sensitive.
pub fn parse_runtime_capability(value: &str) -> Result<RuntimeCapability, RuntimeCapabilityError> {
    match value.trim() {
        "" => Err(RuntimeCapabilityError::EmptyCapability),
        RUNTIME_CAPABILITY_HOOK => Ok(RuntimeCapability::Hook),
        RUNTIME_CAPABILITY_STORAGE => Ok(RuntimeCapability::Storage),
        RUNTIME_CAPABILITY_NOTIFICATION => Ok(RuntimeCapability::Notification),
        RUNTIME_CAPABILITY_CLIPBOARD => Ok(RuntimeCapability::Clipboard),
        other => Err(RuntimeCapabilityError::UnsupportedCapability(
            other.to_string(),
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCapabilityError {
    EmptyCapability,
    UnsupportedCapability(String),
}

impl Display for RuntimeCapabilityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCapability => write!(f, "runtime capability value must not be empty"),
            Self::UnsupportedCapability(value) => {
                write!(f, "runtime capability is unsupported: {value}")
            }
        }
    }
}

impl Error for RuntimeCapabilityError {}
