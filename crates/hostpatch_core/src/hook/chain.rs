//! Interceptor pipeline wrapped around one host function.
//!
//! # Responsibility
//! - Hold the original function and the ordered interceptors of one target.
//! - Run BEFORE interceptors, the original, then AFTER interceptors.
//!
//! # Invariants
//! - BEFORE and AFTER interceptors run in install order.
//! - Each AFTER interceptor consumes the previous interceptor's result.
//! - A failing or panicking interceptor is skipped with its changes discarded.
//! - Errors from the original function reach the caller unchanged.
//! - No lock is held while interceptors or the original run.

use crate::host::value::{HostError, HostFunction, HostResult, HostValue};
use log::warn;
use std::fmt::{Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Stable identifier of one installed interceptor.
pub type HookId = Uuid;

/// Position of an interceptor relative to the original call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Before,
    After,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// Mutable view of one call seen by BEFORE interceptors.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    args: Vec<HostValue>,
    substitute: Option<HostValue>,
}

impl CallFrame {
    pub fn new(args: Vec<HostValue>) -> Self {
        Self {
            args,
            substitute: None,
        }
    }

    pub fn args(&self) -> &[HostValue] {
        &self.args
    }

    pub fn args_mut(&mut self) -> &mut Vec<HostValue> {
        &mut self.args
    }

    pub fn arg(&self, index: usize) -> Option<&HostValue> {
        self.args.get(index)
    }

    /// Replaces argument `index`, padding with `Null` when it is past the end.
    pub fn set_arg(&mut self, index: usize, value: HostValue) {
        if index >= self.args.len() {
            self.args.resize(index + 1, HostValue::Null);
        }
        self.args[index] = value;
    }

    /// Skips the original call; `result` becomes its return value.
    pub fn suppress(&mut self, result: HostValue) {
        self.substitute = Some(result);
    }

    pub fn is_suppressed(&self) -> bool {
        self.substitute.is_some()
    }
}

type BeforeFn = dyn Fn(&mut CallFrame) -> HostResult<()> + Send + Sync;
type AfterFn = dyn Fn(&[HostValue], HostValue) -> HostResult<HostValue> + Send + Sync;

/// One interceptor body.
#[derive(Clone)]
pub enum Interceptor {
    Before(Arc<BeforeFn>),
    After(Arc<AfterFn>),
}

impl Interceptor {
    pub fn before(body: impl Fn(&mut CallFrame) -> HostResult<()> + Send + Sync + 'static) -> Self {
        Self::Before(Arc::new(body))
    }

    pub fn after(
        body: impl Fn(&[HostValue], HostValue) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Self {
        Self::After(Arc::new(body))
    }

    pub fn phase(&self) -> HookPhase {
        match self {
            Self::Before(_) => HookPhase::Before,
            Self::After(_) => HookPhase::After,
        }
    }
}

impl Debug for Interceptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interceptor({})", self.phase().as_str())
    }
}

#[derive(Clone)]
struct ChainEntry {
    id: HookId,
    interceptor: Interceptor,
}

/// Original function plus its ordered interceptors.
///
/// The original is fixed at construction and never re-pointed.
pub(crate) struct PatchChain {
    label: String,
    original: HostFunction,
    entries: RwLock<Vec<ChainEntry>>,
}

impl PatchChain {
    pub(crate) fn new(label: String, original: HostFunction) -> Self {
        Self {
            label,
            original,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn original(&self) -> HostFunction {
        self.original.clone()
    }

    pub(crate) fn push(&self, id: HookId, interceptor: Interceptor) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(ChainEntry { id, interceptor });
    }

    /// Removes one interceptor. Returns whether it was present.
    pub(crate) fn remove(&self, id: HookId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub(crate) fn contains(&self, id: HookId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|entry| entry.id == id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the full pipeline for one call.
    pub(crate) fn invoke(&self, args: &[HostValue]) -> HostResult<HostValue> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let original = &self.original;

        let mut frame = CallFrame::new(args.to_vec());
        for entry in &entries {
            let Interceptor::Before(body) = &entry.interceptor else {
                continue;
            };
            let snapshot = frame.clone();
            if let Err(err) = isolate(|| body(&mut frame)) {
                warn!(
                    "event=hook_interceptor module=hook status=error phase=before target={} hook_id={} error={}",
                    self.label, entry.id, err
                );
                frame = snapshot;
            }
        }

        let CallFrame { args, substitute } = frame;
        let mut result = match substitute {
            Some(value) => value,
            None => original.call(&args)?,
        };

        for entry in &entries {
            let Interceptor::After(body) = &entry.interceptor else {
                continue;
            };
            let previous = result.clone();
            match isolate(|| body(&args, previous)) {
                Ok(next) => result = next,
                Err(err) => {
                    warn!(
                        "event=hook_interceptor module=hook status=error phase=after target={} hook_id={} error={}",
                        self.label, entry.id, err
                    );
                }
            }
        }

        Ok(result)
    }
}

fn isolate<T>(work: impl FnOnce() -> HostResult<T>) -> HostResult<T> {
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(outcome) => outcome,
        Err(_) => Err(HostError::Panicked("interceptor panicked".to_string())),
    }
}

/// Builds the single function installed in place of the original.
pub(crate) fn dispatcher(chain: Arc<PatchChain>) -> HostFunction {
    let name = chain.original.name().to_string();
    HostFunction::new(name, move |args| chain.invoke(args))
}
