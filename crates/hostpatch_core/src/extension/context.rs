//! Per-activation handle an extension uses to reach the host.
//!
//! # Invariants
//! - Gated services fail with `CapabilityDenied` unless the manifest declares
//!   the matching capability.
//! - Every hook installed through `hooks()` belongs to this activation and is
//!   torn down with it.

use crate::extension::capability::RuntimeCapability;
use crate::extension::kernel::ExtensionError;
use crate::extension::services::{Clipboard, HostServices};
use crate::hook::ledger::HookScope;
use crate::resolve::cache::ResolvedHandle;
use crate::resolve::probe::ProbeSpec;
use crate::resolve::resolver::CapabilityResolver;
use crate::resolve::shape::CapabilityShape;
use crate::schedule::TaskQueue;
use crate::storage::ScopedStorage;
use log::debug;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct ExtensionContext {
    extension_id: String,
    capabilities: BTreeSet<RuntimeCapability>,
    resolver: Arc<CapabilityResolver>,
    hooks: HookScope,
    services: HostServices,
    tasks: Arc<TaskQueue>,
}

impl ExtensionContext {
    pub(crate) fn new(
        extension_id: String,
        capabilities: BTreeSet<RuntimeCapability>,
        resolver: Arc<CapabilityResolver>,
        hooks: HookScope,
        services: HostServices,
        tasks: Arc<TaskQueue>,
    ) -> Self {
        Self {
            extension_id,
            capabilities,
            resolver,
            hooks,
            services,
            tasks,
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn has_capability(&self, capability: RuntimeCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn resolver(&self) -> &Arc<CapabilityResolver> {
        &self.resolver
    }

    /// Shorthand for `resolver().resolve(..)` with the error lifted.
    pub fn resolve(
        &self,
        shape: &CapabilityShape,
        probe: &ProbeSpec,
    ) -> Result<Arc<ResolvedHandle>, ExtensionError> {
        Ok(self.resolver.resolve(shape, probe)?)
    }

    pub fn hooks(&self) -> Result<&HookScope, ExtensionError> {
        self.require(RuntimeCapability::Hook)?;
        Ok(&self.hooks)
    }

    pub fn storage(&self) -> Result<ScopedStorage, ExtensionError> {
        self.require(RuntimeCapability::Storage)?;
        Ok(ScopedStorage::new(
            self.extension_id.clone(),
            Arc::clone(&self.services.storage),
        ))
    }

    pub fn notify(&self, message: &str, icon: Option<&str>) -> Result<(), ExtensionError> {
        self.require(RuntimeCapability::Notification)?;
        self.services.notifier.notify(message, icon);
        Ok(())
    }

    pub fn clipboard(&self) -> Result<Arc<dyn Clipboard>, ExtensionError> {
        self.require(RuntimeCapability::Clipboard)?;
        Ok(Arc::clone(&self.services.clipboard))
    }

    pub fn tasks(&self) -> &Arc<TaskQueue> {
        &self.tasks
    }

    pub(crate) fn scope(&self) -> &HookScope {
        &self.hooks
    }

    fn require(&self, capability: RuntimeCapability) -> Result<(), ExtensionError> {
        if self.capabilities.contains(&capability) {
            return Ok(());
        }
        debug!(
            "event=capability_guard module=extension status=denied extension_id={} capability={}",
            self.extension_id, capability
        );
        Err(ExtensionError::CapabilityDenied {
            extension_id: self.extension_id.clone(),
            capability,
        })
    }
}
