//! Job record model.
//!
//! A [`JobRecord`] is the canonical per-job state owned by the job registry.
//! The scheduler mutates `status` and `response` through the registry; it
//! never owns the record's lifetime.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::{self, STATUS_IN_QUEUE};
use crate::types::{JobId, Timestamp, UnitId};

// ---------------------------------------------------------------------------
// JobResponse
// ---------------------------------------------------------------------------

/// The caller-visible response of a job.
///
/// Execution units report progress as open JSON objects; `status`, `message`
/// and `data` are the well-known fields, everything else lands in `extra` so
/// nothing a unit reports is dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub status: u16,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobResponse {
    /// Merge the fields of a unit-reported object into the response.
    ///
    /// Well-known keys overwrite the typed fields; any other key is stored
    /// verbatim in `extra`. Keys absent from `fields` are left untouched.
    pub fn merge(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            match key.as_str() {
                "status" => {
                    // Out-of-range values would alias another code if
                    // truncated; they are dropped instead.
                    if let Some(code) = value.as_u64().and_then(|v| u16::try_from(v).ok()) {
                        self.status = code;
                    }
                }
                "message" => {
                    if let Some(text) = value.as_str() {
                        self.message = text.to_string();
                    }
                }
                "data" => self.data = value.clone(),
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

impl Default for JobResponse {
    fn default() -> Self {
        Self {
            status: STATUS_IN_QUEUE,
            message: status::status_label(STATUS_IN_QUEUE).to_string(),
            data: Value::Null,
            extra: Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// Canonical per-job state held by the job registry.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: u16,
    pub response: JobResponse,
    /// Identifier of the execution unit currently running this job, if any.
    pub executor: Option<UnitId>,
    pub submitted_at: Timestamp,
    pub updated_at: Timestamp,
}

impl JobRecord {
    /// Create a record in the In Queue state.
    pub fn new(id: JobId) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            status: STATUS_IN_QUEUE,
            response: JobResponse::default(),
            executor: None,
            submitted_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn new_record_starts_in_queue() {
        let record = JobRecord::new(7);
        assert_eq!(record.status, STATUS_IN_QUEUE);
        assert_eq!(record.response.message, "In Queue");
        assert!(record.executor.is_none());
    }

    #[test]
    fn merge_overwrites_known_fields() {
        let mut response = JobResponse::default();
        response.merge(&fields(json!({
            "status": 200,
            "message": "done",
            "data": [1, 2, 3]
        })));
        assert_eq!(response.status, 200);
        assert_eq!(response.message, "done");
        assert_eq!(response.data, json!([1, 2, 3]));
    }

    #[test]
    fn merge_drops_out_of_range_status() {
        let mut response = JobResponse::default();
        response.merge(&fields(json!({
            "status": 65_736u64,
            "message": "weird"
        })));
        // 65736 would alias 200 if truncated to u16.
        assert_eq!(response.status, STATUS_IN_QUEUE);
        assert_eq!(response.message, "weird");
    }

    #[test]
    fn merge_keeps_unknown_fields() {
        let mut response = JobResponse::default();
        response.merge(&fields(json!({ "progress": 42 })));
        assert_eq!(response.extra.get("progress"), Some(&json!(42)));
        // Untouched fields keep their previous values.
        assert_eq!(response.status, STATUS_IN_QUEUE);
    }
}
