use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::transcript::Message;

/// Context handed to the suggestion source when a request fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionRequest {
    pub session_id: String,
    pub instructions: String,
    pub max_suggestions: usize,
    pub transcript: Vec<Message>,
    pub state: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub title: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// SuggestionGate — debounce + single-flight decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// (Re)start the quiet-period timer; the previous timer is void.
    Schedule { token: u64 },
    /// A request is in flight; the activity is remembered.
    Recorded,
}

/// Decides when a suggestion request may fire. Timers are identified by a
/// token; only the most recently scheduled token can fire.
#[derive(Debug, Default)]
pub struct SuggestionGate {
    token: u64,
    armed: bool,
    in_flight: bool,
    dirty: bool,
}

impl SuggestionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_activity(&mut self) -> GateDecision {
        if self.in_flight {
            self.dirty = true;
            return GateDecision::Recorded;
        }
        self.arm()
    }

    /// A timer elapsed. Returns `true` if the request should be issued now.
    pub fn on_timer(&mut self, token: u64) -> bool {
        if !self.armed || token != self.token || self.in_flight {
            return false;
        }
        self.armed = false;
        self.in_flight = true;
        true
    }

    /// The in-flight request finished. If activity arrived meanwhile, one
    /// follow-up quiet period is scheduled.
    pub fn on_complete(&mut self) -> Option<GateDecision> {
        self.in_flight = false;
        if !std::mem::take(&mut self.dirty) {
            return None;
        }
        Some(self.arm())
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    fn arm(&mut self) -> GateDecision {
        self.token += 1;
        self.armed = true;
        GateDecision::Schedule { token: self.token }
    }
}
