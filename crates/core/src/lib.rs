//! Shared types for the job execution subsystem.
//!
//! This crate has zero internal dependencies so it can be used by the
//! scheduler, producers, and any future worker or CLI tooling.

pub mod error;
pub mod job;
pub mod registry;
pub mod status;
pub mod types;

pub use error::CoreError;
pub use job::{JobRecord, JobResponse};
pub use registry::{InMemoryRegistry, JobRegistry};
pub use types::{JobId, Timestamp, UnitId};
