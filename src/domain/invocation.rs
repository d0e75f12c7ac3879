use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Partial,
    Complete,
    Error,
}

impl InvocationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvocationStatus::Complete | InvocationStatus::Error)
    }
}

/// The buffer of a later chunk does not extend the buffer already held.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("buffer of {received} bytes does not continue the {held} bytes already received")]
pub struct BufferRegression {
    pub held: usize,
    pub received: usize,
}

/// One streaming action call, keyed by its invocation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub id: String,
    pub action_name: String,
    pub buffer: String,
    pub status: InvocationStatus,
    /// Most recent successfully parsed argument value. Survives errors so an
    /// interrupted invocation can still be shown.
    pub last_parsed: Option<Value>,
    /// Bumped on every render produced for this invocation.
    pub revision: u64,
}

impl ActionInvocation {
    pub fn new(id: impl Into<String>, action_name: impl Into<String>) -> Self {
        ActionInvocation {
            id: id.into(),
            action_name: action_name.into(),
            buffer: String::new(),
            status: InvocationStatus::Pending,
            last_parsed: None,
            revision: 0,
        }
    }

    /// Replace the buffer with `buffer_so_far`, which must start with the
    /// current buffer. Returns whether it grew.
    pub fn extend(&mut self, buffer_so_far: &str) -> Result<bool, BufferRegression> {
        if !buffer_so_far.starts_with(self.buffer.as_str()) {
            return Err(BufferRegression {
                held: self.buffer.len(),
                received: buffer_so_far.len(),
            });
        }
        if buffer_so_far.len() == self.buffer.len() {
            return Ok(false);
        }
        self.buffer.clear();
        self.buffer.push_str(buffer_so_far);
        Ok(true)
    }

    pub fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}
