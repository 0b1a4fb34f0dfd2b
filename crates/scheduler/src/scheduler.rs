//! The admission/dispatch engine.
//!
//! The [`Scheduler`] owns the ordered pending sequence and the active-unit
//! count. All state lives behind one coarse mutex; every state transition
//! (enqueue, removal, slot claim, unit-event bookkeeping) takes it for the
//! whole transition, so producer threads and the event pump never interleave
//! inside one. Caller-supplied code — deferred payload capabilities and
//! message callbacks — always runs with the lock released, so it may re-enter
//! the scheduler freely. Unit events arrive on a single mpsc channel whose
//! only consumer is [`Scheduler::run`].
//!
//! Draining is iterative, never recursive: a unit exit decrements the active
//! count and runs one more bounded drain pass, so bursts of rapid completions
//! cannot grow the call stack.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use jobforge_core::error::CoreError;
use jobforge_core::registry::JobRegistry;
use jobforge_core::status::{STATUS_FAILED, STATUS_IN_PROGRESS};
use jobforge_core::types::JobId;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::entry::{MessageCallback, MethodCall, QueueEntry};
use crate::payload;
use crate::unit::{
    ResolvedCall, UnitDescriptor, UnitEvent, UnitEventKind, UnitEventSender, UnitHandle,
    UnitMessage, UnitRuntime,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Capacity bounds for one scheduler instance.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently running units.
    pub max_workers: usize,
    /// Advertised pending-sequence ceiling. A hint, not a hard bound:
    /// enqueue operations never reject on overflow, they log a warning.
    pub max_queue_items: usize,
}

impl Default for SchedulerConfig {
    /// `max_workers` = hardware parallelism, `max_queue_items` = 3x that.
    fn default() -> Self {
        let max_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_workers,
            max_queue_items: max_workers * 3,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// A dispatched unit the scheduler is still tracking.
///
/// Inserted the moment a dispatch claims the entry, before the lock is
/// released for payload resolution; `handle` is attached once the spawn
/// returns. A unit that exits before attachment simply removes the record
/// and the late handle is dropped.
struct ActiveUnit {
    title: String,
    handle: Option<Box<dyn UnitHandle>>,
    /// An error event arrived before the handle was attached; terminate as
    /// soon as it is.
    terminate_requested: bool,
    on_main_thread_message: Option<MessageCallback>,
}

struct SchedulerState {
    pending: VecDeque<QueueEntry>,
    active: usize,
    units: HashMap<JobId, ActiveUnit>,
}

/// Read-only view of one pending entry.
#[derive(Debug, Clone, Serialize)]
pub struct PendingJob {
    pub job_id: JobId,
    pub title: String,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Bounded worker-pool scheduler.
///
/// Construct one per process and share it via `Arc`; independent instances
/// (with their own registry and runtime) keep tests isolated.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    registry: Arc<dyn JobRegistry>,
    runtime: Arc<dyn UnitRuntime>,
    events_tx: UnitEventSender,
    // Taken exactly once, by `run`.
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<UnitEvent>>>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(registry: Arc<dyn JobRegistry>, runtime: Arc<dyn UnitRuntime>) -> Self {
        Self::with_config(registry, runtime, SchedulerConfig::default())
    }

    pub fn with_config(
        registry: Arc<dyn JobRegistry>,
        runtime: Arc<dyn UnitRuntime>,
        config: SchedulerConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(SchedulerState {
                pending: VecDeque::new(),
                active: 0,
                units: HashMap::new(),
            }),
            registry,
            runtime,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            config,
        }
    }

    // -- Capacity -----------------------------------------------------------

    /// Maximum number of concurrently running units.
    pub fn capacity(&self) -> usize {
        self.config.max_workers
    }

    /// Advertised pending-sequence ceiling (not enforced on insertion).
    pub fn queue_limit(&self) -> usize {
        self.config.max_queue_items
    }

    // -- Enqueue / removal ----------------------------------------------------

    /// Append an entry to the tail of the pending sequence and drain.
    pub fn enqueue_tail(&self, entry: QueueEntry) -> Result<(), CoreError> {
        self.enqueue(entry, false)
    }

    /// Insert an entry at the head of the pending sequence and drain.
    ///
    /// The entry is dispatched before any previously tail-inserted entry
    /// still pending at the time of insertion.
    pub fn enqueue_head(&self, entry: QueueEntry) -> Result<(), CoreError> {
        self.enqueue(entry, true)
    }

    fn enqueue(&self, entry: QueueEntry, at_head: bool) -> Result<(), CoreError> {
        entry.validate()?;

        {
            let mut state = self.lock_state();
            // A job id lives in at most one place: never twice in the pending
            // sequence, never pending while also dispatched.
            if state.units.contains_key(&entry.job_id)
                || state.pending.iter().any(|e| e.job_id == entry.job_id)
            {
                return Err(CoreError::InvalidEntry(format!(
                    "job {} is already pending or dispatched",
                    entry.job_id
                )));
            }

            let job_id = entry.job_id;
            if at_head {
                state.pending.push_front(entry);
            } else {
                state.pending.push_back(entry);
            }

            if state.pending.len() > self.config.max_queue_items {
                tracing::warn!(
                    job_id,
                    pending = state.pending.len(),
                    limit = self.config.max_queue_items,
                    "Pending sequence exceeds the advertised queue limit",
                );
            }
        }

        self.drain();
        Ok(())
    }

    /// Remove the first pending entry with the given id.
    ///
    /// A no-op returning `false` when the id is absent (already dispatched,
    /// already removed, or never enqueued).
    pub fn remove_by_id(&self, job_id: JobId) -> bool {
        let mut state = self.lock_state();
        match state.pending.iter().position(|e| e.job_id == job_id) {
            Some(idx) => {
                state.pending.remove(idx);
                tracing::debug!(job_id, "Pending entry removed before dispatch");
                true
            }
            None => false,
        }
    }

    // -- Introspection --------------------------------------------------------

    /// Pending-sequence membership only; a running job is not "contained".
    pub fn contains(&self, job_id: JobId) -> bool {
        let state = self.lock_state();
        state.pending.iter().any(|e| e.job_id == job_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.lock_state().active
    }

    /// Read-only snapshot of the pending sequence, head first.
    pub fn pending_snapshot(&self) -> Vec<PendingJob> {
        let state = self.lock_state();
        state
            .pending
            .iter()
            .map(|e| PendingJob {
                job_id: e.job_id,
                title: e.title.clone(),
            })
            .collect()
    }

    // -- Event pump -------------------------------------------------------------

    /// Consume unit events until the cancellation token is triggered.
    ///
    /// This is the single consumer of the scheduler's event channel and the
    /// sole re-entry point that keeps the pipeline flowing after exits. Call
    /// it once, from a dedicated task.
    pub async fn run(&self, cancel: CancellationToken) {
        let receiver = {
            let mut slot = self.events_rx.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        let Some(mut receiver) = receiver else {
            tracing::error!("Scheduler::run called twice; event pump already running");
            return;
        };

        tracing::info!(
            max_workers = self.config.max_workers,
            max_queue_items = self.config.max_queue_items,
            "Scheduler event pump started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler event pump shutting down");
                    break;
                }
                event = receiver.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        // All senders dropped; nothing can ever arrive again.
                        None => break,
                    }
                }
            }
        }
    }

    // -- Internals ----------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admission loop: dispatch head entries while capacity remains.
    ///
    /// Runs after every successful enqueue and after every unit exit. Each
    /// iteration claims a slot and the head entry under the lock, then
    /// releases it before resolving deferred payload fields and spawning:
    /// capabilities are arbitrary caller code and may re-enter the scheduler
    /// (read a count, enqueue a follow-up) without deadlocking.
    fn drain(&self) {
        loop {
            let (entry, active) = {
                let mut state = self.lock_state();
                if state.active >= self.config.max_workers {
                    return;
                }
                let Some(entry) = state.pending.pop_front() else {
                    return;
                };
                state.active += 1;
                // Tracked from the moment the slot is claimed, so the
                // single-residence invariant holds while the lock is down.
                state.units.insert(
                    entry.job_id,
                    ActiveUnit {
                        title: entry.title.clone(),
                        handle: None,
                        terminate_requested: false,
                        on_main_thread_message: entry.on_main_thread_message.clone(),
                    },
                );
                let active = state.active;
                (entry, active)
            };

            // Deferred payload fields are resolved here, exactly once, so
            // callers observe dispatch-time state rather than enqueue-time.
            let descriptor = UnitDescriptor {
                job_id: entry.job_id,
                invocation: serialize_call(&entry.invocation),
                worker_message: entry.worker_message.as_ref().and_then(serialize_call),
            };

            let handle = self.runtime.spawn(descriptor, self.events_tx.clone());
            let unit_id = handle.id();

            tracing::info!(
                job_id = entry.job_id,
                title = %entry.title,
                unit_id,
                active,
                "Job dispatched",
            );

            // Optimistic: the record reads running before the unit confirms
            // anything.
            let updated = self.registry.update(entry.job_id, &mut |record| {
                record.status = STATUS_IN_PROGRESS;
                record.response.status = STATUS_IN_PROGRESS;
                record.response.message = "Job is Running".to_string();
                record.executor = Some(unit_id);
            });
            if let Err(e) = updated {
                tracing::warn!(job_id = entry.job_id, error = %e, "Dispatch could not mark the job record running");
            }

            // A unit that exited before this point has already removed its
            // record; the late handle is simply dropped.
            let mut state = self.lock_state();
            if let Some(unit) = state.units.get_mut(&entry.job_id) {
                if unit.terminate_requested {
                    handle.terminate();
                }
                unit.handle = Some(handle);
            }
        }
    }

    fn handle_event(&self, event: UnitEvent) {
        match event.kind {
            UnitEventKind::Message(message) => self.route_message(message),
            UnitEventKind::Error(cause) => self.handle_error(event.job_id, cause),
            UnitEventKind::Exit(code) => self.handle_exit(event.job_id, code),
        }
    }

    /// Route a unit message by its `type` tag: "default" updates the job
    /// record, anything else goes verbatim to the entry's handler.
    fn route_message(&self, message: UnitMessage) {
        if message.is_default() {
            let fields = match message.payload.as_object() {
                Some(fields) => fields.clone(),
                None => {
                    tracing::warn!(
                        job_id = message.job_id,
                        "Default message payload was not an object; dropped",
                    );
                    return;
                }
            };
            if let Some(raw) = fields.get("status") {
                if raw.as_u64().and_then(|v| u16::try_from(v).ok()).is_none() {
                    tracing::warn!(
                        job_id = message.job_id,
                        status = %raw,
                        "Status field out of range for a status code; ignored",
                    );
                }
            }
            let updated = self.registry.update(message.job_id, &mut |record| {
                if let Some(code) = fields
                    .get("status")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u16::try_from(v).ok())
                {
                    record.status = code;
                }
                record.response.merge(&fields);
            });
            if let Err(e) = updated {
                tracing::warn!(job_id = message.job_id, error = %e, "Status update for unknown job record");
            }
            return;
        }

        // Clone the callback out of the lock so arbitrary handler code can
        // re-enter the scheduler (e.g. enqueue a follow-up job).
        let callback = {
            let state = self.lock_state();
            state
                .units
                .get(&message.job_id)
                .and_then(|unit| unit.on_main_thread_message.clone())
        };
        match callback {
            Some(callback) => callback(message),
            None => tracing::debug!(
                job_id = message.job_id,
                kind = %message.kind,
                "Custom message dropped; entry supplied no handler",
            ),
        }
    }

    /// A unit error is logged and the unit force-terminated. The job record
    /// is left in whatever state it last reached; the exit event that follows
    /// does the capacity bookkeeping.
    fn handle_error(&self, job_id: JobId, cause: String) {
        let mut state = self.lock_state();
        match state.units.get_mut(&job_id) {
            Some(unit) => {
                tracing::error!(job_id, title = %unit.title, error = %cause, "Unit error");
                match &unit.handle {
                    Some(handle) => handle.terminate(),
                    None => unit.terminate_requested = true,
                }
            }
            None => tracing::error!(job_id, error = %cause, "Error from untracked unit"),
        }
    }

    /// Free the unit's capacity slot and re-drain. The sole re-entry point;
    /// there is no timer-driven poll.
    fn handle_exit(&self, job_id: JobId, code: i32) {
        let title = {
            let mut state = self.lock_state();
            state.active = state.active.saturating_sub(1);
            state
                .units
                .remove(&job_id)
                .map(|unit| unit.title)
                .unwrap_or_default()
        };
        tracing::info!(job_id, title = %title, code, "Unit exited");

        // A non-zero exit with the record still In Progress means the unit
        // died before reporting a result; surface that as Failed rather than
        // leaving the record running forever. A zero exit never mutates the
        // record.
        if code != 0 {
            let _ = self.registry.update(job_id, &mut |record| {
                if record.status == STATUS_IN_PROGRESS {
                    record.status = STATUS_FAILED;
                    record.response.status = STATUS_FAILED;
                    record.response.message =
                        format!("Unit exited with code {code} before reporting a result");
                }
            });
        }

        self.drain();
    }
}

fn serialize_call(call: &MethodCall) -> Option<String> {
    let resolved = ResolvedCall {
        reference: call.reference.clone(),
        payload: call.payload.as_ref().map(payload::resolve),
    };
    match serde_json::to_string(&resolved) {
        Ok(raw) => Some(raw),
        Err(e) => {
            tracing::error!(reference = %call.reference, error = %e, "Invocation did not serialize");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use jobforge_core::registry::InMemoryRegistry;

    /// Runtime that never runs anything; handy for pure queue tests when
    /// paired with `max_workers = 0` so nothing dispatches.
    struct InertRuntime;

    struct InertHandle;

    impl UnitHandle for InertHandle {
        fn id(&self) -> u64 {
            0
        }
        fn terminate(&self) {}
    }

    impl UnitRuntime for InertRuntime {
        fn spawn(&self, _: UnitDescriptor, _: UnitEventSender) -> Box<dyn UnitHandle> {
            Box::new(InertHandle)
        }
    }

    fn queue_only_scheduler() -> Scheduler {
        Scheduler::with_config(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InertRuntime),
            SchedulerConfig {
                max_workers: 0,
                max_queue_items: 4,
            },
        )
    }

    fn entry(job_id: JobId) -> QueueEntry {
        QueueEntry::new(job_id, format!("job-{job_id}"), MethodCall::new("t.run"))
    }

    #[test]
    fn tail_then_head_ordering() {
        let scheduler = queue_only_scheduler();
        scheduler.enqueue_tail(entry(1)).unwrap();
        scheduler.enqueue_tail(entry(2)).unwrap();
        scheduler.enqueue_head(entry(3)).unwrap();

        let ids: Vec<_> = scheduler
            .pending_snapshot()
            .iter()
            .map(|p| p.job_id)
            .collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn malformed_entry_rejected_queue_unchanged() {
        let scheduler = queue_only_scheduler();
        let bad = QueueEntry::new(5, "", MethodCall::new("t.run"));
        assert_matches!(scheduler.enqueue_tail(bad), Err(CoreError::InvalidEntry(_)));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn duplicate_pending_id_rejected() {
        let scheduler = queue_only_scheduler();
        scheduler.enqueue_tail(entry(1)).unwrap();
        assert_matches!(
            scheduler.enqueue_tail(entry(1)),
            Err(CoreError::InvalidEntry(_))
        );
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn remove_by_id_is_idempotent() {
        let scheduler = queue_only_scheduler();
        scheduler.enqueue_tail(entry(1)).unwrap();

        assert!(scheduler.remove_by_id(1));
        assert!(!scheduler.contains(1));
        assert_eq!(scheduler.pending_count(), 0);

        // Absent id: no-op, not an error.
        assert!(!scheduler.remove_by_id(1));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn overflow_past_queue_limit_is_accepted() {
        let scheduler = queue_only_scheduler();
        for id in 1..=8 {
            scheduler.enqueue_tail(entry(id)).unwrap();
        }
        // Limit is 4; insertion is never rejected.
        assert_eq!(scheduler.pending_count(), 8);
    }

    #[test]
    fn counts_track_enqueues() {
        let scheduler = queue_only_scheduler();
        assert_eq!(scheduler.pending_count(), 0);
        scheduler.enqueue_tail(entry(1)).unwrap();
        assert_eq!(scheduler.pending_count(), 1);
        scheduler.enqueue_head(entry(2)).unwrap();
        assert_eq!(scheduler.pending_count(), 2);
        assert_eq!(scheduler.active_count(), 0);
    }
}
