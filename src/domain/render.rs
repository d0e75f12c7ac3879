use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::RenderStatus;

/// A renderer result, published to action subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEvent {
    pub invocation_id: String,
    pub action_name: String,
    pub revision: u64,
    pub status: RenderStatus,
    pub args: Value,
    pub view: Value,
}

// ---------------------------------------------------------------------------
// RenderBoard — latest view per invocation
// ---------------------------------------------------------------------------

/// Holds the most recent render of every invocation a session has shown.
/// Writes carrying a revision no newer than the held one are discarded.
#[derive(Debug, Clone, Default)]
pub struct RenderBoard {
    entries: HashMap<String, RenderEvent>,
}

impl RenderBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when `event` is stale and was dropped.
    pub fn apply(&mut self, event: &RenderEvent) -> bool {
        if let Some(held) = self.entries.get(&event.invocation_id) {
            if held.revision >= event.revision {
                return false;
            }
        }
        self.entries
            .insert(event.invocation_id.clone(), event.clone());
        true
    }

    /// Keep the last view of a failed invocation, flagged as an error.
    /// Returns the updated entry, or `None` if nothing was ever rendered.
    pub fn mark_failed(&mut self, invocation_id: &str) -> Option<RenderEvent> {
        let entry = self.entries.get_mut(invocation_id)?;
        entry.revision += 1;
        entry.status = RenderStatus::Error;
        Some(entry.clone())
    }

    pub fn get(&self, invocation_id: &str) -> Option<&RenderEvent> {
        self.entries.get(invocation_id)
    }

    /// All entries, ordered by invocation id.
    pub fn entries(&self) -> Vec<RenderEvent> {
        let mut all: Vec<_> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| a.invocation_id.cmp(&b.invocation_id));
        all
    }
}
