//! Trial-invocation verification of shape-matching candidates.
//!
//! # Responsibility
//! - Invoke each candidate's entry method with caller-supplied probe args.
//! - Turn every outcome (value, host error, panic) into a `Verdict`.
//! - Pick the first accepted candidate in candidate order.
//!
//! # Invariants
//! - Probe failures never propagate; they become `Rejected`.
//! - Selection is first-match, not best-of-all.
//! - At most `max_probes` candidates are invoked per selection.

use crate::host::registry::ModuleId;
use crate::host::value::{HostError, HostValue};
use crate::resolve::shape::Candidate;
use log::debug;
use std::fmt::{Debug, Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Observed result of one trial call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Entry method returned normally.
    Returned(HostValue),
    /// Entry method threw.
    Threw(HostError),
    /// Structural probe; nothing was invoked.
    NotInvoked,
}

impl ProbeOutcome {
    pub fn result(&self) -> Option<&HostValue> {
        match self {
            Self::Returned(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&HostError> {
        match self {
            Self::Threw(err) => Some(err),
            _ => None,
        }
    }
}

type AcceptFn = dyn Fn(&ProbeOutcome) -> bool + Send + Sync;

/// Caller-defined meaning of "correctly found".
#[derive(Clone)]
pub struct ProbeSpec {
    method: Option<String>,
    args: Vec<HostValue>,
    accept: Arc<AcceptFn>,
}

impl ProbeSpec {
    /// Accepts the first structural match without invoking anything.
    pub fn structural() -> Self {
        Self {
            method: None,
            args: Vec::new(),
            accept: Arc::new(|_| true),
        }
    }

    /// Invokes `method` with `args`; accepts any normal return by default.
    pub fn call(method: impl Into<String>, args: Vec<HostValue>) -> Self {
        Self {
            method: Some(method.into()),
            args,
            accept: Arc::new(|outcome| matches!(outcome, ProbeOutcome::Returned(_))),
        }
    }

    /// Invokes `method` and accepts only a non-empty return value.
    pub fn non_empty(method: impl Into<String>, args: Vec<HostValue>) -> Self {
        Self::call(method, args).accept_when(|outcome| {
            outcome
                .result()
                .is_some_and(|value| value.is_non_empty())
        })
    }

    /// Replaces the acceptance predicate.
    pub fn accept_when(
        mut self,
        accept: impl Fn(&ProbeOutcome) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.accept = Arc::new(accept);
        self
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn args(&self) -> &[HostValue] {
        &self.args
    }
}

impl Debug for ProbeSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSpec")
            .field("method", &self.method)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Why a candidate was not accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Entry method is absent on the candidate.
    MissingEntry(String),
    /// Entry property exists but is not callable.
    EntryNotCallable(String),
    /// Reading the entry property failed.
    AccessFailed(HostError),
    /// Invocation or predicate panicked.
    Panicked,
    /// Predicate returned false for the observed outcome.
    PredicateRejected(ProbeOutcome),
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEntry(method) => write!(f, "entry method `{method}` missing"),
            Self::EntryNotCallable(method) => write!(f, "entry `{method}` is not callable"),
            Self::AccessFailed(err) => write!(f, "entry access failed: {err}"),
            Self::Panicked => write!(f, "probe panicked"),
            Self::PredicateRejected(ProbeOutcome::Threw(err)) => {
                write!(f, "probe threw: {err}")
            }
            Self::PredicateRejected(_) => write!(f, "probe result not accepted"),
        }
    }
}

/// Verification decision for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

/// One rejected candidate with its reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub module_id: ModuleId,
    pub reason: RejectReason,
}

/// Outcome of verifying a candidate sequence.
#[derive(Debug, Clone)]
pub enum Selection {
    Accepted {
        candidate: Candidate,
        /// Number of candidates examined, the accepted one included.
        examined: usize,
    },
    NotFound {
        /// Number of structural candidates seen.
        matched: usize,
        rejections: Vec<Rejection>,
        /// Whether the probe bound stopped the search early.
        truncated: bool,
    },
}

/// Verifies one candidate against the probe.
pub fn verify_candidate(candidate: &Candidate, probe: &ProbeSpec) -> Verdict {
    let Some(method) = probe.method() else {
        return judge(probe, &ProbeOutcome::NotInvoked);
    };

    let entry = match candidate.target.get_property(method) {
        Ok(Some(value)) => value,
        Ok(None) => return Verdict::Rejected(RejectReason::MissingEntry(method.to_string())),
        Err(err) => return Verdict::Rejected(RejectReason::AccessFailed(err)),
    };
    let Some(function) = entry.as_function() else {
        return Verdict::Rejected(RejectReason::EntryNotCallable(method.to_string()));
    };

    let invoked = catch_unwind(AssertUnwindSafe(|| function.call(probe.args())));
    let outcome = match invoked {
        Ok(Ok(value)) => ProbeOutcome::Returned(value),
        Ok(Err(err)) => ProbeOutcome::Threw(err),
        Err(_) => return Verdict::Rejected(RejectReason::Panicked),
    };
    judge(probe, &outcome)
}

fn judge(probe: &ProbeSpec, outcome: &ProbeOutcome) -> Verdict {
    match catch_unwind(AssertUnwindSafe(|| (probe.accept)(outcome))) {
        Ok(true) => Verdict::Accepted,
        Ok(false) => Verdict::Rejected(RejectReason::PredicateRejected(outcome.clone())),
        Err(_) => Verdict::Rejected(RejectReason::Panicked),
    }
}

/// Returns the first candidate accepted by `probe`.
///
/// Candidates beyond `max_probes` are counted but never invoked.
pub fn select_candidate(
    candidates: impl IntoIterator<Item = Candidate>,
    probe: &ProbeSpec,
    max_probes: usize,
) -> Selection {
    let mut matched = 0usize;
    let mut rejections = Vec::new();
    let mut truncated = false;

    for candidate in candidates {
        matched += 1;
        if matched > max_probes {
            truncated = true;
            continue;
        }

        match verify_candidate(&candidate, probe) {
            Verdict::Accepted => {
                return Selection::Accepted {
                    candidate,
                    examined: matched,
                };
            }
            Verdict::Rejected(reason) => {
                debug!(
                    "event=probe_candidate module=resolver status=rejected module_id={} reason={}",
                    candidate.module_id, reason
                );
                rejections.push(Rejection {
                    module_id: candidate.module_id,
                    reason,
                });
            }
        }
    }

    Selection::NotFound {
        matched,
        rejections,
        truncated,
    }
}
