//! Execution-unit protocol: spawn descriptors, messages, events, and the
//! runtime abstraction.
//!
//! Units run with genuine parallelism but share no mutable memory with the
//! scheduler; all coordination is one-way asynchronous message passing with
//! per-unit FIFO delivery. The scheduler is the single consumer of every
//! unit's events.

use jobforge_core::types::{JobId, UnitId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// A method call with its payload fully resolved to concrete values.
///
/// This is the serialized form handed to an execution unit; deferred payload
/// fields have already been substituted by the dispatch pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedCall {
    pub reference: String,
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
}

/// Everything a unit needs to run one job.
///
/// `invocation` and `worker_message` are serialized [`ResolvedCall`]s, or
/// `None` when the entry carried no such descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub job_id: JobId,
    pub invocation: Option<String>,
    pub worker_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Messages and events
// ---------------------------------------------------------------------------

/// Message kind that routes into the job registry.
pub const DEFAULT_MESSAGE_KIND: &str = "default";

/// A message emitted by a running unit.
///
/// `kind == "default"` carries a status/response update for the job record;
/// any other kind is forwarded verbatim to the entry's main-thread handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub job_id: JobId,
    #[serde(default)]
    pub payload: Value,
}

impl UnitMessage {
    /// Build a registry-bound status update.
    pub fn default_report(job_id: JobId, payload: Value) -> Self {
        Self {
            kind: DEFAULT_MESSAGE_KIND.to_string(),
            job_id,
            payload,
        }
    }

    pub fn is_default(&self) -> bool {
        self.kind == DEFAULT_MESSAGE_KIND
    }
}

/// What happened inside a unit.
#[derive(Debug)]
pub enum UnitEventKind {
    /// The unit posted a message.
    Message(UnitMessage),
    /// An uncaught failure. May be followed by an exit event for the same
    /// unit; the two are not mutually exclusive.
    Error(String),
    /// The unit terminated with the given code.
    Exit(i32),
}

/// A unit event tagged with the job it belongs to.
#[derive(Debug)]
pub struct UnitEvent {
    pub job_id: JobId,
    pub kind: UnitEventKind,
}

/// Producer half of the scheduler's event channel, one clone per unit.
pub type UnitEventSender = mpsc::UnboundedSender<UnitEvent>;

// ---------------------------------------------------------------------------
// Runtime abstraction
// ---------------------------------------------------------------------------

/// Spawns isolated execution units.
///
/// `spawn` must return before the unit produces its first message; the unit
/// reports everything through `events`. Implementations must never call back
/// into the scheduler directly.
pub trait UnitRuntime: Send + Sync {
    fn spawn(&self, descriptor: UnitDescriptor, events: UnitEventSender) -> Box<dyn UnitHandle>;
}

/// Handle to a spawned unit.
pub trait UnitHandle: Send + Sync {
    fn id(&self) -> UnitId;

    /// Request termination. Delivery is best-effort; the unit's exit event
    /// still fires through the normal channel.
    fn terminate(&self);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
