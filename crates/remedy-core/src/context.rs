//! Caller-supplied context data handed to handlers with every decision.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque key/value data made available to handlers.
///
/// Handlers read it to decide, and may write to it (e.g. attempt counters).
/// The same context travels through every retry of one `execute` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self { values: Map::new() }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Bump the counter stored under `key` and return the new value.
    ///
    /// A missing or non-numeric entry counts as 0.
    pub fn increment(&mut self, key: &str) -> u64 {
        let next = self.values.get(key).and_then(Value::as_u64).unwrap_or(0) + 1;
        self.values.insert(key.to_string(), Value::from(next));
        next
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Map<String, Value>> for Context {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}
