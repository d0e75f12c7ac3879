use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// A single transcript entry. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Transcript — append-only ordered log
// ---------------------------------------------------------------------------

/// Cloning a transcript is cheap: messages are shared, the clone is a
/// point-in-time view that later appends do not affect.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Arc<Message>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, assigning the next sequence position (starting at 1).
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> Arc<Message> {
        let message = Arc::new(Message {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            sequence: self.messages.len() as u64 + 1,
            created_at: Utc::now(),
        });
        self.messages.push(Arc::clone(&message));
        message
    }

    /// Messages in sequence order. Call again to restart.
    pub fn all(&self) -> std::slice::Iter<'_, Arc<Message>> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Arc<Message>> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_increasing_sequence() {
        let mut transcript = Transcript::new();
        let a = transcript.append(Role::User, "hello");
        let b = transcript.append(Role::Assistant, "hi");
        let c = transcript.append(Role::Tool, "{}");

        assert_eq!((a.sequence, b.sequence, c.sequence), (1, 2, 3));
        let seqs: Vec<u64> = transcript.all().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn all_is_restartable() {
        let mut transcript = Transcript::new();
        transcript.append(Role::User, "one");
        transcript.append(Role::User, "two");

        let first: Vec<&str> = transcript.all().map(|m| m.content.as_str()).collect();
        let second: Vec<&str> = transcript.all().map(|m| m.content.as_str()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn cloned_view_is_not_affected_by_later_appends() {
        let mut transcript = Transcript::new();
        transcript.append(Role::User, "one");
        let view = transcript.clone();
        transcript.append(Role::User, "two");

        assert_eq!(view.len(), 1);
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let role: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, Role::System);
    }
}
