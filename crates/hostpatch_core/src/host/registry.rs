//! Read-only view over the host's numerically indexed module table.
//!
//! # Responsibility
//! - Define the contract through which the core observes loader-owned
//!   module records.
//! - Provide an in-process table implementation for embedders and tests.
//!
//! # Invariants
//! - The core never creates or destroys records through the view.
//! - `records()` returns records in stable ascending id order.

use crate::host::value::HostValue;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Loader-assigned module key.
pub type ModuleId = u32;

/// One module as exported by the foreign loader.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub exports: HostValue,
}

/// Read-only registry contract consumed by the resolver.
pub trait ModuleRegistryView: Send + Sync {
    /// Returns a snapshot of every record in iteration order.
    fn records(&self) -> Vec<ModuleRecord>;
}

/// In-process module table.
#[derive(Default)]
pub struct ModuleTable {
    modules: RwLock<BTreeMap<ModuleId, HostValue>>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines (or redefines) one module's exports.
    ///
    /// Returns the previous exports when the id was already present.
    pub fn define(&self, id: ModuleId, exports: HostValue) -> Option<HostValue> {
        self.modules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, exports)
    }

    pub fn remove(&self, id: ModuleId) -> Option<HostValue> {
        self.modules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    pub fn get(&self, id: ModuleId) -> Option<HostValue> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.modules.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModuleRegistryView for ModuleTable {
    fn records(&self) -> Vec<ModuleRecord> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, exports)| ModuleRecord {
                id: *id,
                exports: exports.clone(),
            })
            .collect()
    }
}
