//! Cooperative deferred and detached work.
//!
//! # Responsibility
//! - Queue "not before" jobs for the host's cooperative turn loop.
//! - Run detached (fire-and-forget) jobs whose failures are only logged.
//! - Re-resolve capabilities when a deferred job runs, not when it is queued.
//!
//! # Invariants
//! - Job failures and panics never reach the code that queued the job.
//! - Delays are advisory; there is no cancellation once a job is due.
//! - Jobs run outside the queue lock, so a job may queue more work.

use crate::host::value::{HostError, HostResult, HostValue};
use crate::resolve::cache::ResolvedHandle;
use crate::resolve::probe::ProbeSpec;
use crate::resolve::resolver::{CapabilityResolver, ResolveError};
use crate::resolve::shape::CapabilityShape;
use log::{debug, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Queue-assigned job identifier.
pub type TaskId = u64;

type Job = Box<dyn FnOnce() -> HostResult<()> + Send>;

struct PendingJob {
    id: TaskId,
    label: String,
    due: Instant,
    job: Job,
}

/// Result of one `run_due` turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnSummary {
    pub ran: usize,
    pub failed: usize,
}

/// Single-owner queue drained by the host's turn loop.
#[derive(Default)]
pub struct TaskQueue {
    pending: Mutex<Vec<PendingJob>>,
    next_id: AtomicU64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `job` to run no earlier than `delay` from now.
    pub fn defer(
        &self,
        label: impl Into<String>,
        delay: Duration,
        job: impl FnOnce() -> HostResult<()> + Send + 'static,
    ) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let label = label.into();
        debug!(
            "event=task_defer module=schedule status=queued task_id={} label={} delay_ms={}",
            id,
            label,
            delay.as_millis()
        );
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PendingJob {
                id,
                label,
                due: Instant::now() + delay,
                job: Box::new(job),
            });
        id
    }

    /// Queues `job` for the next turn; its outcome is never reported back.
    pub fn detach(
        &self,
        label: impl Into<String>,
        job: impl FnOnce() -> HostResult<()> + Send + 'static,
    ) -> TaskId {
        self.defer(label, Duration::ZERO, job)
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Runs every job due at `now`, in due order then queue order.
    pub fn run_due(&self, now: Instant) -> TurnSummary {
        let mut due = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let (ready, waiting): (Vec<PendingJob>, Vec<PendingJob>) =
                pending.drain(..).partition(|job| job.due <= now);
            *pending = waiting;
            ready
        };
        due.sort_by_key(|job| (job.due, job.id));

        let mut summary = TurnSummary::default();
        for PendingJob { id, label, job, .. } in due {
            summary.ran += 1;
            let outcome = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(outcome) => outcome,
                Err(_) => Err(HostError::Panicked(format!("task `{label}` panicked"))),
            };
            if let Err(err) = outcome {
                summary.failed += 1;
                warn!(
                    "event=task_run module=schedule status=error task_id={} label={} error={}",
                    id, label, err
                );
            }
        }
        summary
    }
}

/// Calls `method` on a resolved handle without observing the outcome.
pub fn detach_call(
    queue: &TaskQueue,
    handle: Arc<ResolvedHandle>,
    method: impl Into<String>,
    args: Vec<HostValue>,
) -> TaskId {
    let method = method.into();
    let label = format!("{}#{}", handle.shape_key(), method);
    queue.detach(label, move || {
        handle
            .call(&method, &args)
            .map(|_| ())
            .map_err(|err| HostError::Thrown(err.to_string()))
    })
}

/// Resolves `shape` when the deferred job runs and hands the outcome to
/// `then`.
pub fn defer_resolve(
    queue: &TaskQueue,
    resolver: Arc<CapabilityResolver>,
    delay: Duration,
    shape: CapabilityShape,
    probe: ProbeSpec,
    then: impl FnOnce(Result<Arc<ResolvedHandle>, ResolveError>) -> HostResult<()> + Send + 'static,
) -> TaskId {
    let label = format!("resolve {}", shape.key());
    queue.defer(label, delay, move || then(resolver.resolve(&shape, &probe)))
}
