//! Bounded worker-pool scheduler.
//!
//! Producers hand [`QueueEntry`]s to the [`Scheduler`], which admits them up
//! to the hardware-parallelism bound, spawns one execution unit per admitted
//! entry through a [`UnitRuntime`], and routes the unit's messages either
//! into the job registry (status updates) or to the entry's caller-supplied
//! handler (custom messages). Exits free a capacity slot and re-drain the
//! pending sequence.
//!
//! Queue state is process-local and not persisted; a restart loses pending
//! entries. There is no cross-process distribution and no cancellation of
//! already-dispatched work.

pub mod entry;
pub mod payload;
pub mod runtime;
pub mod scheduler;
pub mod unit;

pub use entry::{MessageCallback, MethodCall, QueueEntry};
pub use payload::{Payload, PayloadValue};
pub use runtime::{ThreadRuntime, UnitContext};
pub use scheduler::{PendingJob, Scheduler, SchedulerConfig};
pub use unit::{
    ResolvedCall, UnitDescriptor, UnitEvent, UnitEventKind, UnitEventSender, UnitHandle,
    UnitMessage, UnitRuntime,
};
