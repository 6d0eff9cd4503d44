//! Hook installation bookkeeping and reversible teardown.
//!
//! # Responsibility
//! - Wrap a target method once per layer and append interceptors to its chain.
//! - Hand out `HookRecord`s that remove exactly their own interceptor.
//! - Restore the original method when the last interceptor goes away.
//! - Tear down many hooks while isolating individual failures.
//!
//! # Invariants
//! - Every installed record maps to exactly one live chain entry.
//! - `dispose` is idempotent and a no-op after the ledger is gone.
//! - A chain's original is fixed when the layer is created. When the slot no
//!   longer holds our top dispatcher, the next install stacks a new layer over
//!   whatever function is there; existing layers are never re-pointed.
//! - Host `get`/`set` never run while the ledger mutex is held.
//! - The original is written back only while our dispatcher is still in place.
//!   A layer covered by someone else's wrapper stays as a pass-through.

use crate::hook::chain::{dispatcher, CallFrame, HookId, HookPhase, Interceptor, PatchChain};
use crate::host::value::{HostError, HostFunction, HostObject, HostResult, HostValue};
use crate::resolve::cache::ResolvedHandle;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

/// Per-target install/dispose failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    /// Patch site is not an object.
    NotAnObject { target: String },
    /// Reading the target property failed.
    TargetAccess { target: String, source: HostError },
    /// Target property is absent.
    TargetMissing { target: String },
    /// Target property is not a function.
    TargetNotCallable { target: String },
    /// Writing the dispatcher failed; nothing was installed.
    TargetReadOnly { target: String, source: HostError },
    /// Interceptor was removed but the original could not be written back.
    RestoreFailed { target: String, source: HostError },
}

impl Display for HookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject { target } => write!(f, "hook target `{target}` is not an object"),
            Self::TargetAccess { target, source } => {
                write!(f, "hook target `{target}` could not be read: {source}")
            }
            Self::TargetMissing { target } => write!(f, "hook target `{target}` does not exist"),
            Self::TargetNotCallable { target } => {
                write!(f, "hook target `{target}` is not a function")
            }
            Self::TargetReadOnly { target, source } => {
                write!(f, "hook target `{target}` could not be patched: {source}")
            }
            Self::RestoreFailed { target, source } => {
                write!(f, "hook target `{target}` could not be restored: {source}")
            }
        }
    }
}

impl Error for HookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::TargetAccess { source, .. }
            | Self::TargetReadOnly { source, .. }
            | Self::RestoreFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TargetKey {
    object_addr: usize,
    method: String,
}

/// Method slot on a host object that hooks wrap.
#[derive(Clone)]
pub struct PatchTarget {
    object: Arc<dyn HostObject>,
    method: String,
}

impl PatchTarget {
    pub fn new(object: Arc<dyn HostObject>, method: impl Into<String>) -> Self {
        Self {
            object,
            method: method.into(),
        }
    }

    /// Targets `method` on an object-valued host value.
    pub fn on(value: &HostValue, method: impl Into<String>) -> Result<Self, HookError> {
        let method = method.into();
        match value.as_object() {
            Some(object) => Ok(Self::new(Arc::clone(object), method)),
            None => Err(HookError::NotAnObject { target: method }),
        }
    }

    /// Targets `method` on a resolved capability.
    pub fn from_handle(
        handle: &ResolvedHandle,
        method: impl Into<String>,
    ) -> Result<Self, HookError> {
        Self::on(handle.target(), method)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    fn key(&self) -> TargetKey {
        TargetKey {
            object_addr: Arc::as_ptr(&self.object) as *const () as usize,
            method: self.method.clone(),
        }
    }

    fn current_function(&self) -> Result<HostFunction, HookError> {
        match self.object.get(&self.method) {
            Ok(Some(HostValue::Function(function))) => Ok(function),
            Ok(Some(_)) => Err(HookError::TargetNotCallable {
                target: self.method.clone(),
            }),
            Ok(None) => Err(HookError::TargetMissing {
                target: self.method.clone(),
            }),
            Err(source) => Err(HookError::TargetAccess {
                target: self.method.clone(),
                source,
            }),
        }
    }

    fn write(&self, function: HostFunction) -> HostResult<()> {
        self.object.set(&self.method, HostValue::Function(function))
    }
}

impl Debug for PatchTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatchTarget({})", self.method)
    }
}

struct PatchSite {
    target: PatchTarget,
    chain: Arc<PatchChain>,
    dispatcher: HostFunction,
}

impl PatchSite {
    /// Writes the original back if our dispatcher is still installed.
    fn restore(&self) -> Result<(), HookError> {
        match self.target.current_function() {
            Ok(current) if current.same_as(&self.dispatcher) => self
                .target
                .write(self.chain.original())
                .map_err(|source| HookError::RestoreFailed {
                    target: self.target.method.clone(),
                    source,
                }),
            Ok(_) | Err(_) => {
                debug!(
                    "event=hook_restore module=hook status=skipped target={} reason=dispatcher_replaced",
                    self.target.method
                );
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct LedgerState {
    /// Layers per target, innermost first.
    sites: HashMap<TargetKey, Vec<PatchSite>>,
}

#[derive(Default)]
struct LedgerShared {
    state: Mutex<LedgerState>,
}

impl LedgerShared {
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn contains(&self, key: &TargetKey, id: HookId) -> bool {
        self.lock()
            .sites
            .get(key)
            .is_some_and(|layers| layers.iter().any(|site| site.chain.contains(id)))
    }

    /// Removes one interceptor. `Ok(false)` means it was already gone.
    fn remove(&self, key: &TargetKey, id: HookId) -> Result<bool, HookError> {
        let emptied = {
            let mut state = self.lock();
            let Some(layers) = state.sites.get_mut(key) else {
                return Ok(false);
            };
            let Some(index) = layers.iter().position(|site| site.chain.contains(id)) else {
                return Ok(false);
            };
            layers[index].chain.remove(id);
            if !layers[index].chain.is_empty() {
                debug!(
                    "event=hook_dispose module=hook status=ok target={} hook_id={} remaining={}",
                    key.method,
                    id,
                    layers[index].chain.len()
                );
                return Ok(true);
            }
            let site = layers.remove(index);
            if layers.is_empty() {
                state.sites.remove(key);
            }
            site
        };

        match emptied.restore() {
            Ok(()) => {
                info!(
                    "event=hook_dispose module=hook status=ok target={} hook_id={} restored=true",
                    key.method, id
                );
                Ok(true)
            }
            Err(err) => {
                warn!(
                    "event=hook_dispose module=hook status=error target={} hook_id={} error={}",
                    key.method, id, err
                );
                Err(err)
            }
        }
    }
}

impl Drop for LedgerShared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        let sites = state.sites.drain().flat_map(|(_, layers)| layers.into_iter().rev());
        for site in sites {
            if let Err(err) = site.restore() {
                warn!(
                    "event=hook_ledger_drop module=hook status=error target={} error={}",
                    site.target.method, err
                );
            }
        }
    }
}

/// Owner of every patch site; cheap to clone.
///
/// Dropping the last clone restores every target still wrapped.
#[derive(Clone, Default)]
pub struct HookLedger {
    shared: Arc<LedgerShared>,
}

impl HookLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an interceptor that runs before the target.
    pub fn install_before(
        &self,
        target: &PatchTarget,
        body: impl Fn(&mut CallFrame) -> HostResult<()> + Send + Sync + 'static,
    ) -> Result<HookRecord, HookError> {
        self.install(target, Interceptor::before(body))
    }

    /// Installs an interceptor that runs after the target.
    pub fn install_after(
        &self,
        target: &PatchTarget,
        body: impl Fn(&[HostValue], HostValue) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Result<HookRecord, HookError> {
        self.install(target, Interceptor::after(body))
    }

    /// Appends `interceptor` to the target's chain, wrapping it on first use.
    ///
    /// If the slot no longer holds our top dispatcher, a new layer wraps the
    /// function currently there.
    pub fn install(
        &self,
        target: &PatchTarget,
        interceptor: Interceptor,
    ) -> Result<HookRecord, HookError> {
        let key = target.key();
        let id = Uuid::new_v4();
        let phase = interceptor.phase();
        let current = target.current_function()?;

        let pending = {
            let state = self.shared.lock();
            match state.sites.get(&key).and_then(|layers| layers.last()) {
                Some(site) if current.same_as(&site.dispatcher) => {
                    site.chain.push(id, interceptor);
                    None
                }
                top => Some((interceptor, top.is_some())),
            }
        };

        if let Some((interceptor, covered)) = pending {
            if covered {
                warn!(
                    "event=hook_install module=hook status=stacked target={} reason=dispatcher_replaced",
                    target.method
                );
            }
            let chain = Arc::new(PatchChain::new(target.method.clone(), current));
            chain.push(id, interceptor);
            let wrapper = dispatcher(Arc::clone(&chain));
            target
                .write(wrapper.clone())
                .map_err(|source| HookError::TargetReadOnly {
                    target: target.method.clone(),
                    source,
                })?;
            self.shared
                .lock()
                .sites
                .entry(key.clone())
                .or_default()
                .push(PatchSite {
                    target: target.clone(),
                    chain,
                    dispatcher: wrapper,
                });
        }

        info!(
            "event=hook_install module=hook status=ok target={} phase={} hook_id={}",
            target.method,
            phase.as_str(),
            id
        );
        Ok(HookRecord {
            id,
            phase,
            target: target.method.clone(),
            key,
            installed: AtomicBool::new(true),
            ledger: Arc::downgrade(&self.shared),
        })
    }

    /// Number of live interceptors across all targets.
    pub fn active_hooks(&self) -> usize {
        self.shared
            .lock()
            .sites
            .values()
            .flatten()
            .map(|site| site.chain.len())
            .sum()
    }

    /// Number of targets currently wrapped.
    pub fn patched_targets(&self) -> usize {
        self.shared.lock().sites.len()
    }

    /// Removes every interceptor and restores every target, outermost layer
    /// first.
    ///
    /// Outstanding records become no-ops.
    pub fn restore_all(&self) -> DisposeReport {
        let sites: Vec<PatchSite> = {
            let mut state = self.shared.lock();
            state
                .sites
                .drain()
                .flat_map(|(_, layers)| layers.into_iter().rev())
                .collect()
        };

        let mut report = DisposeReport::default();
        for site in sites {
            let removed = site.chain.len();
            match site.restore() {
                Ok(()) => report.disposed += removed,
                Err(error) => report.failures.push(DisposeFailure {
                    hook_id: None,
                    target: site.target.method.clone(),
                    error,
                }),
            }
        }
        report
    }
}

/// Reversible handle for one installed interceptor.
pub struct HookRecord {
    id: HookId,
    phase: HookPhase,
    target: String,
    key: TargetKey,
    installed: AtomicBool,
    ledger: Weak<LedgerShared>,
}

impl HookRecord {
    pub fn id(&self) -> HookId {
        self.id
    }

    pub fn phase(&self) -> HookPhase {
        self.phase
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether this interceptor is still part of a live chain.
    pub fn is_installed(&self) -> bool {
        if !self.installed.load(Ordering::SeqCst) {
            return false;
        }
        self.ledger
            .upgrade()
            .is_some_and(|shared| shared.contains(&self.key, self.id))
    }

    /// Removes this interceptor; repeated calls are no-ops.
    ///
    /// An error means the interceptor is gone but the original method could
    /// not be written back.
    pub fn dispose(&self) -> Result<(), HookError> {
        self.release().map(|_| ())
    }

    /// Like `dispose`, but reports whether an interceptor was removed.
    fn release(&self) -> Result<bool, HookError> {
        if !self.installed.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(shared) = self.ledger.upgrade() else {
            return Ok(false);
        };
        shared.remove(&self.key, self.id)
    }
}

impl Debug for HookRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRecord")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("target", &self.target)
            .field("installed", &self.installed.load(Ordering::SeqCst))
            .finish()
    }
}

/// One failed removal inside a bulk teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposeFailure {
    /// Failing record, when the failure belongs to one record.
    pub hook_id: Option<HookId>,
    pub target: String,
    pub error: HookError,
}

/// Summary of a bulk teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisposeReport {
    pub disposed: usize,
    pub failures: Vec<DisposeFailure>,
}

impl DisposeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Disposes every record, collecting failures instead of stopping.
///
/// Records that were already disposed are not counted.
pub fn dispose_all<'a>(records: impl IntoIterator<Item = &'a HookRecord>) -> DisposeReport {
    let mut report = DisposeReport::default();
    for record in records {
        match record.release() {
            Ok(true) => report.disposed += 1,
            Ok(false) => {}
            Err(error) => {
                warn!(
                    "event=hook_dispose_all module=hook status=error target={} hook_id={} error={}",
                    record.target, record.id, error
                );
                report.failures.push(DisposeFailure {
                    hook_id: Some(record.id),
                    target: record.target.clone(),
                    error,
                });
            }
        }
    }
    report
}

/// Records installed on behalf of one owner, torn down together.
pub struct HookScope {
    owner: String,
    ledger: HookLedger,
    records: Mutex<Vec<HookRecord>>,
}

impl HookScope {
    pub fn new(owner: impl Into<String>, ledger: HookLedger) -> Self {
        Self {
            owner: owner.into(),
            ledger,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn before(
        &self,
        target: &PatchTarget,
        body: impl Fn(&mut CallFrame) -> HostResult<()> + Send + Sync + 'static,
    ) -> Result<HookId, HookError> {
        self.install(target, Interceptor::before(body))
    }

    pub fn after(
        &self,
        target: &PatchTarget,
        body: impl Fn(&[HostValue], HostValue) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Result<HookId, HookError> {
        self.install(target, Interceptor::after(body))
    }

    pub fn install(
        &self,
        target: &PatchTarget,
        interceptor: Interceptor,
    ) -> Result<HookId, HookError> {
        let record = self.ledger.install(target, interceptor)?;
        let id = record.id();
        self.lock_records().push(record);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disposes one record of this scope. Returns whether it was tracked.
    pub fn dispose(&self, id: HookId) -> Result<bool, HookError> {
        let record = {
            let mut records = self.lock_records();
            match records.iter().position(|record| record.id() == id) {
                Some(index) => records.remove(index),
                None => return Ok(false),
            }
        };
        record.dispose().map(|()| true)
    }

    /// Disposes every record of this scope.
    pub fn dispose_all(&self) -> DisposeReport {
        let records: Vec<HookRecord> = self.lock_records().drain(..).collect();
        let report = dispose_all(records.iter());
        info!(
            "event=hook_scope_dispose module=hook status={} owner={} disposed={} failures={}",
            if report.is_clean() { "ok" } else { "partial" },
            self.owner,
            report.disposed,
            report.failures.len()
        );
        report
    }

    fn lock_records(&self) -> MutexGuard<'_, Vec<HookRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}
