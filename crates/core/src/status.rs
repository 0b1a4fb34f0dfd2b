//! Job status code vocabulary.
//!
//! A closed mapping from small integers to human labels, shared bit-for-bit
//! by the scheduler, the job registry, and the execution-unit protocol.
//! Lives in `core` to maintain the zero internal dependency constraint.

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The job finished and reported a result.
pub const STATUS_COMPLETED: u16 = 200;

/// The job was accepted and is waiting for a free execution slot.
pub const STATUS_IN_QUEUE: u16 = 201;

/// The job was dispatched to an execution unit.
pub const STATUS_IN_PROGRESS: u16 = 202;

/// The job was removed before dispatch.
pub const STATUS_CANCELLED: u16 = 499;

/// The job terminated without producing a result.
pub const STATUS_FAILED: u16 = 500;

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Human-readable label for a status code.
///
/// Any code outside the closed vocabulary maps to `"Unknown"`.
pub fn status_label(code: u16) -> &'static str {
    match code {
        STATUS_COMPLETED => "Completed",
        STATUS_IN_QUEUE => "In Queue",
        STATUS_IN_PROGRESS => "In Progress",
        STATUS_CANCELLED => "Cancelled",
        STATUS_FAILED => "Failed",
        _ => "Unknown",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
