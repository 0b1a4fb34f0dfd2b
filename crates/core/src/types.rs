/// Job identifiers are opaque 64-bit integers assigned by the producer.
pub type JobId = i64;

/// Identifier of a spawned execution unit, assigned by the unit runtime.
pub type UnitId = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
