//! Thread-backed execution units.
//!
//! [`ThreadRuntime`] runs each dispatched job on its own OS thread. The job
//! body is looked up in a registered function table by the invocation's
//! method reference, mirroring how the scheduler stays agnostic of what a
//! job actually does. Units communicate only through the event channel; they
//! share no mutable state with the scheduler.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use jobforge_core::status::{self, STATUS_COMPLETED, STATUS_FAILED};
use jobforge_core::types::{JobId, UnitId};
use serde_json::{json, Map, Value};

use crate::unit::{
    ResolvedCall, UnitDescriptor, UnitEvent, UnitEventKind, UnitEventSender, UnitHandle,
    UnitMessage, UnitRuntime,
};

/// Outcome of a job body: a result value for the terminal report, or a
/// failure message.
pub type JobResult = Result<Value, String>;

/// A registered job body.
pub type JobFn = dyn Fn(&UnitContext) -> JobResult + Send + Sync;

// ---------------------------------------------------------------------------
// UnitContext
// ---------------------------------------------------------------------------

/// What a job body sees while it runs.
pub struct UnitContext {
    job_id: JobId,
    payload: Map<String, Value>,
    worker_message: Option<ResolvedCall>,
    events: UnitEventSender,
    stop: Arc<AtomicBool>,
}

impl UnitContext {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// The resolved invocation payload.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// The worker-side message descriptor, if the entry carried one.
    pub fn worker_message(&self) -> Option<&ResolvedCall> {
        self.worker_message.as_ref()
    }

    /// Post a custom message; it is forwarded to the entry's main-thread
    /// handler, bypassing the job registry.
    pub fn emit(&self, kind: impl Into<String>, payload: Value) {
        let message = UnitMessage {
            kind: kind.into(),
            job_id: self.job_id,
            payload,
        };
        let _ = self.events.send(UnitEvent {
            job_id: self.job_id,
            kind: UnitEventKind::Message(message),
        });
    }

    /// Post a registry-bound status update.
    pub fn report(&self, payload: Value) {
        let message = UnitMessage::default_report(self.job_id, payload);
        let _ = self.events.send(UnitEvent {
            job_id: self.job_id,
            kind: UnitEventKind::Message(message),
        });
    }

    /// True once the scheduler has requested termination. Long-running job
    /// bodies should poll this and bail out early.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// ThreadRuntime
// ---------------------------------------------------------------------------

type HandlerTable = Arc<RwLock<HashMap<String, Arc<JobFn>>>>;

/// One OS thread per unit, bodies resolved from a function table.
#[derive(Default)]
pub struct ThreadRuntime {
    handlers: HandlerTable,
    next_id: AtomicU64,
}

impl ThreadRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the body for a method reference, replacing any previous one.
    pub fn register(
        &self,
        reference: impl Into<String>,
        body: impl Fn(&UnitContext) -> JobResult + Send + Sync + 'static,
    ) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(reference.into(), Arc::new(body));
    }
}

impl UnitRuntime for ThreadRuntime {
    fn spawn(&self, descriptor: UnitDescriptor, events: UnitEventSender) -> Box<dyn UnitHandle> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = descriptor.job_id;
        let stop = Arc::new(AtomicBool::new(false));
        let handlers = Arc::clone(&self.handlers);
        let thread_stop = Arc::clone(&stop);
        let thread_events = events.clone();

        // Thread spawn failure is reported through the event channel like
        // any other unit failure, so the scheduler's accounting stays intact.
        let spawned = thread::Builder::new()
            .name(format!("jobforge-unit-{id}"))
            .spawn(move || run_unit(descriptor, handlers, thread_events, thread_stop));

        if let Err(e) = spawned {
            tracing::error!(unit_id = id, job_id, error = %e, "Failed to spawn unit thread");
            let _ = events.send(UnitEvent {
                job_id,
                kind: UnitEventKind::Error(format!("unit thread did not start: {e}")),
            });
            let _ = events.send(UnitEvent {
                job_id,
                kind: UnitEventKind::Exit(1),
            });
        }

        Box::new(ThreadHandle { id, stop })
    }
}

/// Handle to a thread-backed unit. Termination is cooperative: it raises a
/// flag the job body observes through [`UnitContext::is_stopped`].
struct ThreadHandle {
    id: UnitId,
    stop: Arc<AtomicBool>,
}

impl UnitHandle for ThreadHandle {
    fn id(&self) -> UnitId {
        self.id
    }

    fn terminate(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Unit body
// ---------------------------------------------------------------------------

fn run_unit(
    descriptor: UnitDescriptor,
    handlers: HandlerTable,
    events: UnitEventSender,
    stop: Arc<AtomicBool>,
) {
    let job_id = descriptor.job_id;
    let send = |kind: UnitEventKind| {
        let _ = events.send(UnitEvent { job_id, kind });
    };

    let Some(raw_invocation) = descriptor.invocation else {
        send(UnitEventKind::Error(
            "descriptor carried no invocation".to_string(),
        ));
        send(UnitEventKind::Exit(1));
        return;
    };

    let invocation: ResolvedCall = match serde_json::from_str(&raw_invocation) {
        Ok(call) => call,
        Err(e) => {
            send(UnitEventKind::Error(format!(
                "invocation did not deserialize: {e}"
            )));
            send(UnitEventKind::Exit(1));
            return;
        }
    };

    let worker_message = descriptor
        .worker_message
        .as_deref()
        .and_then(|raw| serde_json::from_str::<ResolvedCall>(raw).ok());

    let body = {
        let table = handlers.read().unwrap_or_else(|e| e.into_inner());
        table.get(&invocation.reference).cloned()
    };
    let Some(body) = body else {
        send(UnitEventKind::Error(format!(
            "no job body registered for reference \"{}\"",
            invocation.reference
        )));
        send(UnitEventKind::Exit(1));
        return;
    };

    let ctx = UnitContext {
        job_id,
        payload: invocation.payload.unwrap_or_default(),
        worker_message,
        events: events.clone(),
        stop,
    };

    let code = match panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))) {
        Ok(Ok(data)) => {
            ctx.report(json!({
                "status": STATUS_COMPLETED,
                "message": status::status_label(STATUS_COMPLETED),
                "data": data,
            }));
            0
        }
        Ok(Err(message)) => {
            ctx.report(json!({
                "status": STATUS_FAILED,
                "message": message,
            }));
            1
        }
        Err(cause) => {
            let text = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unit panicked".to_string());
            send(UnitEventKind::Error(text));
            1
        }
    };

    send(UnitEventKind::Exit(code));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
