//! Invocation payloads with deferred-value fields.
//!
//! A payload field is either a concrete JSON value or a zero-argument
//! capability producing one. Deferred fields let producers capture state that
//! is late-bound at dispatch time rather than at submission time; the
//! scheduler resolves them in a single pass immediately before serializing
//! the invocation, calling each capability at most once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Zero-argument value producer, substituted for a concrete field at dispatch.
pub type DeferredValue = Arc<dyn Fn() -> Value + Send + Sync>;

/// One payload field.
#[derive(Clone)]
pub enum PayloadValue {
    Concrete(Value),
    Deferred(DeferredValue),
}

impl PayloadValue {
    /// Wrap a concrete value.
    pub fn concrete(value: impl Into<Value>) -> Self {
        Self::Concrete(value.into())
    }

    /// Wrap a capability evaluated at dispatch time.
    pub fn deferred(producer: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self::Deferred(Arc::new(producer))
    }
}

impl fmt::Debug for PayloadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete(value) => f.debug_tuple("Concrete").field(value).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// An invocation payload: field name to concrete-or-deferred value.
pub type Payload = BTreeMap<String, PayloadValue>;

/// Resolve every field of `payload` to a concrete value.
///
/// Deferred capabilities are invoked here, exactly once each.
pub fn resolve(payload: &Payload) -> Map<String, Value> {
    payload
        .iter()
        .map(|(key, value)| {
            let resolved = match value {
                PayloadValue::Concrete(v) => v.clone(),
                PayloadValue::Deferred(producer) => producer(),
            };
            (key.clone(), resolved)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
