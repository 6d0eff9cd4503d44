//! Resolved handles and their per-shape memo table.
//!
//! # Responsibility
//! - Hold verified references to host capabilities.
//! - Memoize successes per `ShapeKey`; failures are never stored here.
//!
//! # Invariants
//! - A stored handle is never replaced; only `invalidate`/`clear` remove it.
//! - Calls through a handle surface host failures as `InvocationError`.

use crate::host::registry::ModuleId;
use crate::host::value::{HostError, HostFunction, HostValue};
use crate::resolve::shape::ShapeKey;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Failure of a real (non-probe) call through a resolved handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// Resolved target has no such method.
    MissingMethod { shape_key: String, method: String },
    /// Property exists but is not a function.
    NotCallable { shape_key: String, method: String },
    /// Host threw while reading the method or executing it.
    Threw {
        shape_key: String,
        method: String,
        source: HostError,
    },
    /// Call panicked on the Rust side.
    Panicked { shape_key: String, method: String },
}

impl Display for InvocationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingMethod { shape_key, method } => {
                write!(f, "resolved capability `{shape_key}` has no method `{method}`")
            }
            Self::NotCallable { shape_key, method } => {
                write!(f, "`{method}` on resolved capability `{shape_key}` is not callable")
            }
            Self::Threw {
                shape_key,
                method,
                source,
            } => write!(f, "`{method}` on resolved capability `{shape_key}` failed: {source}"),
            Self::Panicked { shape_key, method } => {
                write!(f, "`{method}` on resolved capability `{shape_key}` panicked")
            }
        }
    }
}

impl Error for InvocationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Threw { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Verified reference to the accepted export for one shape.
#[derive(Debug)]
pub struct ResolvedHandle {
    shape_key: ShapeKey,
    module_id: ModuleId,
    target: HostValue,
    via_default: bool,
    resolved_at_ms: i64,
}

impl ResolvedHandle {
    pub(crate) fn new(
        shape_key: ShapeKey,
        module_id: ModuleId,
        target: HostValue,
        via_default: bool,
    ) -> Self {
        Self {
            shape_key,
            module_id,
            target,
            via_default,
            resolved_at_ms: now_epoch_ms(),
        }
    }

    pub fn shape_key(&self) -> &ShapeKey {
        &self.shape_key
    }

    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    pub fn target(&self) -> &HostValue {
        &self.target
    }

    pub fn via_default(&self) -> bool {
        self.via_default
    }

    pub fn resolved_at_ms(&self) -> i64 {
        self.resolved_at_ms
    }

    /// Looks up one method on the resolved target.
    pub fn function(&self, method: &str) -> Result<HostFunction, InvocationError> {
        match self.target.get_property(method) {
            Ok(Some(HostValue::Function(function))) => Ok(function),
            Ok(Some(_)) => Err(InvocationError::NotCallable {
                shape_key: self.shape_key.to_string(),
                method: method.to_string(),
            }),
            Ok(None) => Err(InvocationError::MissingMethod {
                shape_key: self.shape_key.to_string(),
                method: method.to_string(),
            }),
            Err(source) => Err(InvocationError::Threw {
                shape_key: self.shape_key.to_string(),
                method: method.to_string(),
                source,
            }),
        }
    }

    /// Calls one method on the resolved target.
    ///
    /// The method is looked up at call time, so hooks installed on it are
    /// observed.
    pub fn call(&self, method: &str, args: &[HostValue]) -> Result<HostValue, InvocationError> {
        let function = self.function(method)?;
        match catch_unwind(AssertUnwindSafe(|| function.call(args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(InvocationError::Threw {
                shape_key: self.shape_key.to_string(),
                method: method.to_string(),
                source,
            }),
            Err(_) => Err(InvocationError::Panicked {
                shape_key: self.shape_key.to_string(),
                method: method.to_string(),
            }),
        }
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Success-only memo table keyed by shape.
#[derive(Debug, Default)]
pub struct HandleCache {
    entries: RwLock<HashMap<ShapeKey, Arc<ResolvedHandle>>>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ShapeKey) -> Option<Arc<ResolvedHandle>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Stores `handle` unless one is already cached for its key.
    ///
    /// Returns the handle that is cached after the call.
    pub fn insert_if_absent(&self, handle: ResolvedHandle) -> Arc<ResolvedHandle> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(handle.shape_key.clone())
            .or_insert_with(|| Arc::new(handle))
            .clone()
    }

    /// Drops the handle for one key. Returns whether one was present.
    pub fn invalidate(&self, key: &ShapeKey) -> bool {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some()
    }

    /// Drops every handle. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{HandleCache, InvocationError, ResolvedHandle};
    use crate::host::value::{HostError, HostValue, PlainObject};
    use crate::resolve::shape::CapabilityShape;
    use std::sync::Arc;

    fn handle(target: HostValue) -> ResolvedHandle {
        ResolvedHandle::new(
            CapabilityShape::props(["getToken"]).key(),
            7,
            target,
            false,
        )
    }

    #[test]
    fn insert_if_absent_keeps_first_handle() {
        let cache = HandleCache::new();
        let first = cache.insert_if_absent(handle(HostValue::from("first")));
        let second = cache.insert_if_absent(handle(HostValue::from("second")));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.target(), &HostValue::from("first"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_and_clear_remove_entries() {
        let cache = HandleCache::new();
        let stored = cache.insert_if_absent(handle(HostValue::Null));
        assert!(cache.invalidate(stored.shape_key()));
        assert!(!cache.invalidate(stored.shape_key()));

        cache.insert_if_absent(handle(HostValue::Null));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn call_surfaces_host_failures() {
        let target = PlainObject::new()
            .with_method("getToken", |_| Err(HostError::thrown("session expired")))
            .with("version", 3.0)
            .into_value();
        let handle = handle(target);

        assert!(matches!(
            handle.call("getToken", &[]),
            Err(InvocationError::Threw { .. })
        ));
        assert!(matches!(
            handle.call("version", &[]),
            Err(InvocationError::NotCallable { .. })
        ));
        assert!(matches!(
            handle.call("missing", &[]),
            Err(InvocationError::MissingMethod { .. })
        ));
    }

    #[test]
    fn call_returns_value_and_records_resolution_time() {
        let target = PlainObject::new()
            .with_method("getToken", |_| Ok(HostValue::from("tok")))
            .into_value();
        let handle = handle(target);
        assert_eq!(
            handle.call("getToken", &[]).expect("call should succeed"),
            HostValue::from("tok")
        );
        assert!(handle.resolved_at_ms() > 0);
        assert_eq!(handle.module_id(), 7);
    }
}
