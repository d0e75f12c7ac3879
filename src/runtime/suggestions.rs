//! Per-session follow-up suggestion trigger.
//!
//! Activity (transcript appends, state notifications) restarts a quiet-period
//! timer; when it elapses a single request is issued to the
//! [`SuggestionSource`]. Activity seen while a request is in flight earns one
//! follow-up quiet period after it completes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::task::AbortHandle;

use crate::domain::config::SuggestionConfig;
use crate::domain::state::StateSnapshot;
use crate::domain::suggestion::{GateDecision, Suggestion, SuggestionGate, SuggestionRequest};
use crate::domain::transcript::Transcript;

use super::session_actor::SessionMessage;

#[async_trait]
pub trait SuggestionSource: Send + Sync + 'static {
    async fn suggest(&self, request: SuggestionRequest) -> Result<Vec<Suggestion>, String>;
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub enum SuggestionMessage {
    /// Something changed; carries the latest view to build a request from.
    Activity {
        transcript: Transcript,
        state: Arc<StateSnapshot>,
    },
    /// Quiet-period timer elapsed.
    Fire { token: u64 },
    Completed(Result<Vec<Suggestion>, String>),
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

pub struct SuggestionActor;

pub struct SuggestionArgs {
    pub session_id: String,
    pub config: SuggestionConfig,
    pub source: Arc<dyn SuggestionSource>,
    pub session: ActorRef<SessionMessage>,
}

pub struct SuggestionState {
    session_id: String,
    config: SuggestionConfig,
    source: Arc<dyn SuggestionSource>,
    session: ActorRef<SessionMessage>,
    gate: SuggestionGate,
    latest: Option<(Transcript, Arc<StateSnapshot>)>,
    timer_handle: Option<AbortHandle>,
}

fn reschedule(state: &mut SuggestionState, myself: &ActorRef<SuggestionMessage>, token: u64) {
    if let Some(handle) = state.timer_handle.take() {
        handle.abort();
    }
    let myself = myself.clone();
    let delay = Duration::from_millis(state.config.debounce_ms);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = myself.send_message(SuggestionMessage::Fire { token });
    });
    state.timer_handle = Some(handle.abort_handle());
}

fn issue(state: &SuggestionState, myself: &ActorRef<SuggestionMessage>) {
    let (transcript, snapshot) = match &state.latest {
        Some(latest) => latest,
        None => return,
    };
    let request = SuggestionRequest {
        session_id: state.session_id.clone(),
        instructions: state.config.instructions.clone(),
        max_suggestions: state.config.max_suggestions,
        transcript: transcript.all().map(|m| m.as_ref().clone()).collect(),
        state: snapshot.to_value(),
    };
    let source = Arc::clone(&state.source);
    let myself = myself.clone();
    tokio::spawn(async move {
        let result = source.suggest(request).await;
        let _ = myself.send_message(SuggestionMessage::Completed(result));
    });
}

impl Actor for SuggestionActor {
    type Msg = SuggestionMessage;
    type State = SuggestionState;
    type Arguments = SuggestionArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(SuggestionState {
            session_id: args.session_id,
            config: args.config,
            source: args.source,
            session: args.session,
            gate: SuggestionGate::new(),
            latest: None,
            timer_handle: None,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(handle) = state.timer_handle.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SuggestionMessage::Activity { transcript, state: snapshot } => {
                state.latest = Some((transcript, snapshot));
                match state.gate.on_activity() {
                    GateDecision::Schedule { token } => reschedule(state, &myself, token),
                    GateDecision::Recorded => {
                        tracing::trace!(session = %state.session_id, "suggestion in flight, activity recorded");
                    }
                }
            }
            SuggestionMessage::Fire { token } => {
                if state.gate.on_timer(token) {
                    state.timer_handle = None;
                    tracing::debug!(session = %state.session_id, "requesting suggestions");
                    issue(state, &myself);
                }
            }
            SuggestionMessage::Completed(result) => {
                match result {
                    Ok(mut suggestions) => {
                        suggestions.truncate(state.config.max_suggestions);
                        let _ = state
                            .session
                            .send_message(SessionMessage::SuggestionsReady(suggestions));
                    }
                    Err(e) => {
                        tracing::warn!(session = %state.session_id, error = %e, "suggestion request failed");
                    }
                }
                if let Some(GateDecision::Schedule { token }) = state.gate.on_complete() {
                    reschedule(state, &myself, token);
                }
            }
        }
        Ok(())
    }
}
