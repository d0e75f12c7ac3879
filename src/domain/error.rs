use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Fault — recoverable failures, recorded as diagnostics
// ---------------------------------------------------------------------------

/// Failures that never escape to the caller. Each one is recorded as a
/// [`Diagnostic`] and reflected in the status of the entity it concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum Fault {
    #[error("no action registered under `{action_name}`")]
    UnknownAction { action_name: String },
    #[error("arguments for `{action_name}` rejected: {detail}")]
    SchemaMismatch { action_name: String, detail: String },
    #[error("stream ended before `{action_name}` received its final chunk")]
    TransportInterrupted {
        action_name: String,
        reason: Option<String>,
    },
    #[error("state patch rejected: {detail}")]
    StateCorruption { detail: String },
    #[error("handler for `{action_name}` failed: {error}")]
    HandlerFailed { action_name: String, error: String },
    #[error("argument chunk for `{action_name}` ignored: {detail}")]
    MalformedArguments { action_name: String, detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub recorded_at: DateTime<Utc>,
    /// Set for faults tied to a single action invocation.
    pub invocation_id: Option<String>,
    pub fault: Fault,
}

impl Diagnostic {
    pub fn new(invocation_id: Option<&str>, fault: Fault) -> Self {
        Diagnostic {
            recorded_at: Utc::now(),
            invocation_id: invocation_id.map(str::to_string),
            fault,
        }
    }

    pub fn for_invocation(invocation_id: &str, fault: Fault) -> Self {
        Self::new(Some(invocation_id), fault)
    }
}
