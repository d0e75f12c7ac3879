use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level mapping held by a session snapshot.
pub type StateMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// StateSnapshot — immutable, versioned view of a session's working state
// ---------------------------------------------------------------------------

/// A committed snapshot. Snapshots are shared behind `Arc` and never mutated;
/// every accepted patch produces a new one with `version + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u64,
    pub values: StateMap,
}

impl StateSnapshot {
    pub fn initial(values: StateMap) -> Self {
        StateSnapshot { version: 0, values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

// ---------------------------------------------------------------------------
// Patch — a partial mapping applied by shallow key union
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum StateError {
    #[error("state patch must be a mapping, got {0}")]
    NotAMapping(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(StateMap);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an arbitrary wire value. Anything other than an object is
    /// rejected whole.
    pub fn from_value(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Object(map) => Ok(Patch(map)),
            other => Err(StateError::NotAMapping(value_kind(&other))),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Replace `key` with an empty array. This is the reset convention for
    /// accumulated logs; there is no separate delete operation.
    pub fn reset_list(self, key: impl Into<String>) -> Self {
        self.set(key, Value::Array(Vec::new()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Shallow union: every key present in `patch` replaces the previous value
/// outright, every other key is carried over. No recursive merge.
pub fn merge(previous: &StateSnapshot, patch: &Patch) -> StateSnapshot {
    let mut values = previous.values.clone();
    for (key, value) in &patch.0 {
        values.insert(key.clone(), value.clone());
    }
    StateSnapshot {
        version: previous.version + 1,
        values,
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
