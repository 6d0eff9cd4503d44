//! Extension lifecycle host.
//!
//! # Responsibility
//! - Register extensions after manifest validation.
//! - Drive `on_load`/`on_unload` and own each activation's hook scope.
//! - Tell the user once when an extension cannot find a host component.
//!
//! # Invariants
//! - A failed or panicking `on_load` leaves no hook installed.
//! - Deactivation disposes every hook of the activation, even when
//!   `on_unload` fails.
//! - Extension errors and panics never escape as panics.

use crate::extension::capability::RuntimeCapability;
use crate::extension::context::ExtensionContext;
use crate::extension::manifest::{ExtensionManifest, ManifestValidationError};
use crate::extension::services::HostServices;
use crate::hook::ledger::{DisposeReport, HookError, HookLedger, HookScope};
use crate::host::value::HostError;
use crate::resolve::cache::InvocationError;
use crate::resolve::resolver::{CapabilityResolver, ResolveError};
use crate::schedule::{TaskQueue, TurnSummary};
use crate::storage::StorageError;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Client extension contract.
pub trait Extension: Send + Sync {
    fn manifest(&self) -> &ExtensionManifest;

    /// Installs hooks and reads settings. Errors roll the activation back.
    fn on_load(&self, ctx: &ExtensionContext) -> Result<(), ExtensionError>;

    /// Runs before the host disposes the activation's hooks.
    fn on_unload(&self, _ctx: &ExtensionContext) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// Lifecycle status of one registered extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionHealth {
    /// Registered, not loaded.
    Inactive,
    Healthy,
    /// Last unload left hooks it could not restore, or `on_unload` failed.
    Degraded,
    /// Last activation failed.
    Unavailable,
}

#[derive(Debug)]
pub enum ExtensionError {
    InvalidManifest(ManifestValidationError),
    DuplicateExtensionId(String),
    UnknownExtension(String),
    CapabilityDenied {
        extension_id: String,
        capability: RuntimeCapability,
    },
    Resolve(ResolveError),
    Hook(HookError),
    Invocation(InvocationError),
    Storage(StorageError),
    Host(HostError),
    Panicked { extension_id: String, phase: &'static str },
    /// Extension-defined failure.
    Other(String),
}

impl ExtensionError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl Display for ExtensionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidManifest(err) => write!(f, "invalid extension manifest: {err}"),
            Self::DuplicateExtensionId(id) => write!(f, "extension id already registered: {id}"),
            Self::UnknownExtension(id) => write!(f, "extension is not registered: {id}"),
            Self::CapabilityDenied {
                extension_id,
                capability,
            } => write!(
                f,
                "extension `{extension_id}` did not declare capability `{capability}`"
            ),
            Self::Resolve(err) => write!(f, "{err}"),
            Self::Hook(err) => write!(f, "{err}"),
            Self::Invocation(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::Host(err) => write!(f, "{err}"),
            Self::Panicked {
                extension_id,
                phase,
            } => write!(f, "extension `{extension_id}` panicked during {phase}"),
            Self::Other(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ExtensionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidManifest(err) => Some(err),
            Self::Resolve(err) => Some(err),
            Self::Hook(err) => Some(err),
            Self::Invocation(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Host(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ManifestValidationError> for ExtensionError {
    fn from(value: ManifestValidationError) -> Self {
        Self::InvalidManifest(value)
    }
}

impl From<ResolveError> for ExtensionError {
    fn from(value: ResolveError) -> Self {
        Self::Resolve(value)
    }
}

impl From<HookError> for ExtensionError {
    fn from(value: HookError) -> Self {
        Self::Hook(value)
    }
}

impl From<InvocationError> for ExtensionError {
    fn from(value: InvocationError) -> Self {
        Self::Invocation(value)
    }
}

impl From<StorageError> for ExtensionError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<HostError> for ExtensionError {
    fn from(value: HostError) -> Self {
        Self::Host(value)
    }
}

struct Slot {
    extension: Arc<dyn Extension>,
    active: Option<ExtensionContext>,
    health: ExtensionHealth,
}

/// Owns registered extensions and the hooks they install.
pub struct ExtensionHost {
    resolver: Arc<CapabilityResolver>,
    ledger: HookLedger,
    services: HostServices,
    tasks: Arc<TaskQueue>,
    order: Vec<String>,
    slots: BTreeMap<String, Slot>,
}

impl ExtensionHost {
    pub fn new(resolver: Arc<CapabilityResolver>, services: HostServices) -> Self {
        Self {
            resolver,
            ledger: HookLedger::new(),
            services,
            tasks: Arc::new(TaskQueue::new()),
            order: Vec::new(),
            slots: BTreeMap::new(),
        }
    }

    pub fn resolver(&self) -> &Arc<CapabilityResolver> {
        &self.resolver
    }

    pub fn ledger(&self) -> &HookLedger {
        &self.ledger
    }

    pub fn tasks(&self) -> &Arc<TaskQueue> {
        &self.tasks
    }

    /// Registers an extension after validating its manifest.
    pub fn register(&mut self, extension: Arc<dyn Extension>) -> Result<(), ExtensionError> {
        let manifest = extension.manifest();
        manifest.validate()?;
        let id = manifest.id.trim().to_string();
        if self.slots.contains_key(&id) {
            return Err(ExtensionError::DuplicateExtensionId(id));
        }

        info!(
            "event=extension_register module=extension status=ok extension_id={} version={}",
            id, manifest.version
        );
        self.order.push(id.clone());
        self.slots.insert(
            id,
            Slot {
                extension,
                active: None,
                health: ExtensionHealth::Inactive,
            },
        );
        Ok(())
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn health(&self, extension_id: &str) -> Option<ExtensionHealth> {
        self.slots.get(extension_id).map(|slot| slot.health)
    }

    pub fn is_active(&self, extension_id: &str) -> bool {
        self.slots
            .get(extension_id)
            .is_some_and(|slot| slot.active.is_some())
    }

    /// Hooks currently held by one activation.
    pub fn active_hooks(&self, extension_id: &str) -> usize {
        self.slots
            .get(extension_id)
            .and_then(|slot| slot.active.as_ref())
            .map_or(0, |ctx| ctx.scope().len())
    }

    /// Loads one extension. Already-active extensions are left untouched.
    pub fn activate(&mut self, extension_id: &str) -> Result<(), ExtensionError> {
        let started_at = Instant::now();
        let resolver = Arc::clone(&self.resolver);
        let ledger = self.ledger.clone();
        let services = self.services.clone();
        let tasks = Arc::clone(&self.tasks);

        let slot = self
            .slots
            .get_mut(extension_id)
            .ok_or_else(|| ExtensionError::UnknownExtension(extension_id.to_string()))?;
        if slot.active.is_some() {
            debug!(
                "event=extension_activate module=extension status=skipped extension_id={} reason=already_active",
                extension_id
            );
            return Ok(());
        }

        let capabilities = slot.extension.manifest().capability_set()?;
        let ctx = ExtensionContext::new(
            extension_id.to_string(),
            capabilities,
            resolver,
            HookScope::new(extension_id, ledger),
            services.clone(),
            tasks,
        );

        let extension = Arc::clone(&slot.extension);
        let outcome = catch_unwind(AssertUnwindSafe(|| extension.on_load(&ctx)))
            .unwrap_or_else(|_| {
                Err(ExtensionError::Panicked {
                    extension_id: extension_id.to_string(),
                    phase: "load",
                })
            });

        match outcome {
            Ok(()) => {
                info!(
                    "event=extension_activate module=extension status=ok extension_id={} hooks={} duration_ms={}",
                    extension_id,
                    ctx.scope().len(),
                    started_at.elapsed().as_millis()
                );
                slot.active = Some(ctx);
                slot.health = ExtensionHealth::Healthy;
                Ok(())
            }
            Err(err) => {
                let rollback = ctx.scope().dispose_all();
                error!(
                    "event=extension_activate module=extension status=error extension_id={} rolled_back={} rollback_failures={} error={}",
                    extension_id,
                    rollback.disposed,
                    rollback.failures.len(),
                    err
                );
                if let ExtensionError::Resolve(resolve_err) = &err {
                    services
                        .notifier
                        .notify(&resolve_err.user_message(), Some("warning"));
                }
                slot.health = ExtensionHealth::Unavailable;
                Err(err)
            }
        }
    }

    /// Unloads one extension and disposes its hooks.
    ///
    /// Returns the teardown report; an inactive extension yields an empty one.
    pub fn deactivate(&mut self, extension_id: &str) -> Result<DisposeReport, ExtensionError> {
        let slot = self
            .slots
            .get_mut(extension_id)
            .ok_or_else(|| ExtensionError::UnknownExtension(extension_id.to_string()))?;
        let Some(ctx) = slot.active.take() else {
            return Ok(DisposeReport::default());
        };

        let extension = Arc::clone(&slot.extension);
        let unload = catch_unwind(AssertUnwindSafe(|| extension.on_unload(&ctx)))
            .unwrap_or_else(|_| {
                Err(ExtensionError::Panicked {
                    extension_id: extension_id.to_string(),
                    phase: "unload",
                })
            });
        if let Err(err) = &unload {
            warn!(
                "event=extension_deactivate module=extension status=error extension_id={} stage=on_unload error={}",
                extension_id, err
            );
        }

        let report = ctx.scope().dispose_all();
        slot.health = if unload.is_ok() && report.is_clean() {
            ExtensionHealth::Inactive
        } else {
            ExtensionHealth::Degraded
        };
        info!(
            "event=extension_deactivate module=extension status={} extension_id={} disposed={} failures={}",
            if slot.health == ExtensionHealth::Inactive { "ok" } else { "partial" },
            extension_id,
            report.disposed,
            report.failures.len()
        );
        Ok(report)
    }

    /// Loads every registered extension in registration order.
    ///
    /// Returns the failures; one failing extension does not stop the rest.
    pub fn activate_all(&mut self) -> Vec<(String, ExtensionError)> {
        let ids = self.order.clone();
        self.activate_each(ids)
    }

    /// Unloads every active extension in reverse registration order.
    pub fn deactivate_all(&mut self) -> Vec<(String, DisposeReport)> {
        let ids: Vec<String> = self.order.iter().rev().cloned().collect();
        let mut reports = Vec::new();
        for id in ids {
            if !self.is_active(&id) {
                continue;
            }
            if let Ok(report) = self.deactivate(&id) {
                reports.push((id, report));
            }
        }
        reports
    }

    /// Handles a host bundle reload: tears down active extensions, forgets
    /// every resolved handle, and loads the same extensions again.
    pub fn on_host_reload(&mut self) -> Vec<(String, ExtensionError)> {
        let reloaded: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.is_active(id))
            .cloned()
            .collect();
        self.deactivate_all();
        let cleared = self.resolver.clear_cache();
        info!(
            "event=host_reload module=extension status=start extensions={} cleared_handles={}",
            reloaded.len(),
            cleared
        );
        self.activate_each(reloaded)
    }

    /// Runs queued extension jobs that are due.
    pub fn run_due_tasks(&self) -> TurnSummary {
        self.tasks.run_due(Instant::now())
    }

    fn activate_each(&mut self, ids: Vec<String>) -> Vec<(String, ExtensionError)> {
        let mut failures = Vec::new();
        for id in ids {
            if let Err(err) = self.activate(&id) {
                failures.push((id, err));
            }
        }
        failures
    }
}

impl Drop for ExtensionHost {
    fn drop(&mut self) {
        let reports = self.deactivate_all();
        if !reports.is_empty() {
            debug!(
                "event=extension_host_drop module=extension status=ok deactivated={}",
                reports.len()
            );
        }
    }
}
