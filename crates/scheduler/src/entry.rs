//! Queue entries: the pending unit-of-work descriptor handed to the
//! scheduler.

use std::fmt;
use std::sync::Arc;

use jobforge_core::error::CoreError;
use jobforge_core::types::JobId;

use crate::payload::Payload;
use crate::unit::UnitMessage;

/// Capability invoked on the scheduler side for non-default unit messages.
pub type MessageCallback = Arc<dyn Fn(UnitMessage) + Send + Sync>;

/// A method descriptor: what to run, with what payload.
///
/// Payload fields may be concrete or deferred; deferred fields are resolved
/// at dispatch, not at enqueue.
#[derive(Debug, Clone, Default)]
pub struct MethodCall {
    pub reference: String,
    pub payload: Option<Payload>,
}

impl MethodCall {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// An immutable description of one pending unit of work.
///
/// Entries are created by the producer and discarded once dispatched; from
/// that point the job's state lives only in the job record and the unit
/// handle.
#[derive(Clone)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub invocation: MethodCall,
    /// Human-readable label, used only for diagnostics.
    pub title: String,
    /// Invoked for every non-default message the unit emits.
    pub on_main_thread_message: Option<MessageCallback>,
    /// Descriptor delivered to the unit itself; its payload follows the same
    /// deferred-value resolution rule as the invocation payload.
    pub worker_message: Option<MethodCall>,
}

impl QueueEntry {
    pub fn new(job_id: JobId, title: impl Into<String>, invocation: MethodCall) -> Self {
        Self {
            job_id,
            invocation,
            title: title.into(),
            on_main_thread_message: None,
            worker_message: None,
        }
    }

    pub fn on_message(mut self, callback: impl Fn(UnitMessage) + Send + Sync + 'static) -> Self {
        self.on_main_thread_message = Some(Arc::new(callback));
        self
    }

    pub fn with_worker_message(mut self, message: MethodCall) -> Self {
        self.worker_message = Some(message);
        self
    }

    /// Structural validation performed at enqueue time.
    pub(crate) fn validate(&self) -> Result<(), CoreError> {
        if self.job_id <= 0 {
            return Err(CoreError::InvalidEntry(format!(
                "job id must be positive, got {}",
                self.job_id
            )));
        }
        if self.title.is_empty() {
            return Err(CoreError::InvalidEntry(
                "entry title must not be empty".to_string(),
            ));
        }
        if self.invocation.reference.is_empty() {
            return Err(CoreError::InvalidEntry(
                "invocation reference must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("job_id", &self.job_id)
            .field("title", &self.title)
            .field("invocation", &self.invocation)
            .field("has_message_handler", &self.on_main_thread_message.is_some())
            .field("worker_message", &self.worker_message)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn well_formed_entry_passes_validation() {
        let entry = QueueEntry::new(1, "render", MethodCall::new("video.render"));
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn non_positive_id_rejected() {
        let entry = QueueEntry::new(0, "render", MethodCall::new("video.render"));
        assert_matches!(entry.validate(), Err(CoreError::InvalidEntry(_)));
    }

    #[test]
    fn empty_title_rejected() {
        let entry = QueueEntry::new(1, "", MethodCall::new("video.render"));
        assert_matches!(entry.validate(), Err(CoreError::InvalidEntry(_)));
    }

    #[test]
    fn empty_reference_rejected() {
        let entry = QueueEntry::new(1, "render", MethodCall::new(""));
        assert_matches!(entry.validate(), Err(CoreError::InvalidEntry(_)));
    }
}
