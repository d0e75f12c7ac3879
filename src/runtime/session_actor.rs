use std::sync::Arc;

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, SupervisionEvent};
use serde_json::Value;

use crate::ag_ui::RunAgentInput;
use crate::domain::action::{ActionDefinition, ActionEffect, ActionHandler};
use crate::domain::action_table::{ActionTable, TableError};
use crate::domain::config::{SessionConfig, SuggestionConfig};
use crate::domain::delta::InboundDelta;
use crate::domain::dispatcher::{ActionChunk, ActionDispatcher, ChunkOutcome};
use crate::domain::error::{Diagnostic, Fault};
use crate::domain::invocation::InvocationStatus;
use crate::domain::render::{RenderBoard, RenderEvent};
use crate::domain::state::{merge, Patch, StateMap, StateSnapshot};
use crate::domain::suggestion::Suggestion;
use crate::domain::transcript::{Message, Role, Transcript};

use super::suggestions::{SuggestionActor, SuggestionArgs, SuggestionMessage, SuggestionSource};
use super::upstream::Upstream;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session already open: {0}")]
    SessionExists(String),
    #[error(transparent)]
    DuplicateAction(#[from] TableError),
    #[error("initial state must be a mapping, got {0}")]
    InvalidInitialState(&'static str),
    #[error("actor call failed: {0}")]
    ActorCall(String),
    #[error("failed to spawn session: {0}")]
    Spawn(String),
}

pub type StateListener = Arc<dyn Fn(&Arc<StateSnapshot>) + Send + Sync>;
pub type ActionListener = Arc<dyn Fn(&RenderEvent) + Send + Sync>;

/// Result of a direct `apply_patch` call. A rejected patch is also recorded
/// as a diagnostic; the previous snapshot stays current.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    Applied { version: u64 },
    Rejected(Fault),
}

// ---------------------------------------------------------------------------
// SessionMessage — deltas from the transport + calls from the engine
// ---------------------------------------------------------------------------

pub enum SessionMessage {
    Deliver(InboundDelta),
    /// The delta stream ended; `None` when it ended cleanly.
    StreamEnded(Option<String>),
    ApplyPatch(Value, RpcReplyPort<PatchOutcome>),
    RegisterAction(ActionDefinition, RpcReplyPort<Result<(), TableError>>),
    AppendUserMessage(String, RpcReplyPort<Arc<Message>>),
    SubscribeState(StateListener, RpcReplyPort<u64>),
    SubscribeActions(ActionListener, RpcReplyPort<u64>),
    Unsubscribe(u64),
    SuggestionsReady(Vec<Suggestion>),
    /// An action handler spawned by the session returned (or panicked).
    HandlerFinished {
        invocation_id: String,
        result: Result<Vec<ActionEffect>, String>,
    },
    GetState(RpcReplyPort<Arc<StateSnapshot>>),
    GetTranscript(RpcReplyPort<Transcript>),
    GetDiagnostics(RpcReplyPort<Vec<Diagnostic>>),
    GetRenders(RpcReplyPort<Vec<RenderEvent>>),
    GetFlags(RpcReplyPort<serde_json::Map<String, Value>>),
    GetSuggestions(RpcReplyPort<Vec<Suggestion>>),
    GetInvocationStatus(String, RpcReplyPort<Option<InvocationStatus>>),
    GetHandlersInFlight(RpcReplyPort<usize>),
}

// ---------------------------------------------------------------------------
// SessionActor — one per open session
// ---------------------------------------------------------------------------

pub struct SessionActor;

pub struct SessionActorArgs {
    pub config: SessionConfig,
    pub initial: StateMap,
    pub upstream: Arc<dyn Upstream>,
    pub suggestions: Option<(SuggestionConfig, Arc<dyn SuggestionSource>)>,
}

pub struct SessionActorState {
    config: SessionConfig,
    snapshot: Arc<StateSnapshot>,
    transcript: Transcript,
    table: ActionTable,
    dispatcher: ActionDispatcher,
    board: RenderBoard,
    flags: serde_json::Map<String, Value>,
    diagnostics: Vec<Diagnostic>,
    next_listener_id: u64,
    state_listeners: Vec<(u64, StateListener)>,
    action_listeners: Vec<(u64, ActionListener)>,
    suggestions: Vec<Suggestion>,
    suggester: Option<ActorRef<SuggestionMessage>>,
    upstream: Arc<dyn Upstream>,
}

impl SessionActorState {
    fn record(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(
            session = %self.config.session_id,
            invocation = ?diagnostic.invocation_id,
            fault = %diagnostic.fault,
            "diagnostic recorded"
        );
        self.diagnostics.push(diagnostic);
    }

    fn next_listener_id(&mut self) -> u64 {
        self.next_listener_id += 1;
        self.next_listener_id
    }

    fn notify_activity(&self) {
        if let Some(suggester) = &self.suggester {
            let _ = suggester.send_message(SuggestionMessage::Activity {
                transcript: self.transcript.clone(),
                state: Arc::clone(&self.snapshot),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// State synchronisation
// ---------------------------------------------------------------------------

/// Swap in the merged snapshot, then notify subscribers in subscription order.
fn commit(state: &mut SessionActorState, patch: &Patch) -> u64 {
    let next = Arc::new(merge(&state.snapshot, patch));
    state.snapshot = Arc::clone(&next);
    tracing::debug!(
        session = %state.config.session_id,
        version = next.version,
        keys = ?patch.keys().collect::<Vec<_>>(),
        "state patch applied"
    );
    for (_, listener) in &state.state_listeners {
        listener(&next);
    }
    state.notify_activity();
    next.version
}

fn apply_patch(state: &mut SessionActorState, patch: Value) -> PatchOutcome {
    match Patch::from_value(patch) {
        Ok(patch) => PatchOutcome::Applied {
            version: commit(state, &patch),
        },
        Err(e) => {
            let fault = Fault::StateCorruption {
                detail: e.to_string(),
            };
            state.record(Diagnostic::new(None, fault.clone()));
            PatchOutcome::Rejected(fault)
        }
    }
}

fn append_message(state: &mut SessionActorState, role: Role, content: String) -> Arc<Message> {
    let message = state.transcript.append(role, content);
    state.notify_activity();
    message
}

// ---------------------------------------------------------------------------
// Action dispatch
// ---------------------------------------------------------------------------

fn publish_render(state: &mut SessionActorState, event: RenderEvent) {
    if !state.board.apply(&event) {
        return;
    }
    for (_, listener) in &state.action_listeners {
        listener(&event);
    }
}

fn fail_invocation(state: &mut SessionActorState, diagnostic: Diagnostic) {
    if let Some(id) = &diagnostic.invocation_id {
        if let Some(event) = state.board.mark_failed(id) {
            for (_, listener) in &state.action_listeners {
                listener(&event);
            }
        }
    }
    state.record(diagnostic);
}

fn apply_effect(state: &mut SessionActorState, effect: ActionEffect) {
    match effect {
        ActionEffect::PatchState(patch) => {
            commit(state, &patch);
        }
        ActionEffect::AppendMessage { role, content } => {
            append_message(state, role, content);
        }
        ActionEffect::SetFlag { name, value } => {
            tracing::debug!(session = %state.config.session_id, flag = %name, "ui flag set");
            state.flags.insert(name, value);
        }
    }
}

/// Run a handler off the actor so calls on the session never wait on it.
/// The nested task turns a panic into an ordinary handler error.
fn spawn_handler(
    myself: &ActorRef<SessionMessage>,
    invocation_id: String,
    handler: Arc<dyn ActionHandler>,
    args: Value,
    snapshot: Arc<StateSnapshot>,
) {
    let myself = myself.clone();
    tokio::spawn(async move {
        let run = tokio::spawn(async move { handler.handle(&args, &snapshot).await });
        let result = match run.await {
            Ok(result) => result,
            Err(e) => Err(format!("handler panicked: {e}")),
        };
        let _ = myself.send_message(SessionMessage::HandlerFinished {
            invocation_id,
            result,
        });
    });
}

fn finish_handler(
    state: &mut SessionActorState,
    invocation_id: &str,
    result: Result<Vec<ActionEffect>, String>,
) {
    let result = result.map(|effects| {
        for effect in effects {
            apply_effect(state, effect);
        }
    });
    if let Some(diagnostic) = state.dispatcher.finish(invocation_id, result) {
        fail_invocation(state, diagnostic);
    }
}

#[tracing::instrument(skip_all, fields(session = %state.config.session_id, invocation = %chunk.invocation_id))]
fn dispatch_chunk(
    myself: &ActorRef<SessionMessage>,
    state: &mut SessionActorState,
    chunk: ActionChunk,
) {
    match state.dispatcher.on_chunk(&state.table, &chunk) {
        ChunkOutcome::Ignored => {}
        ChunkOutcome::Rendered(event) => publish_render(state, event),
        ChunkOutcome::Diagnosed(diagnostic) => state.record(diagnostic),
        ChunkOutcome::Failed(diagnostic) => fail_invocation(state, diagnostic),
        ChunkOutcome::Ready {
            render,
            args,
            definition,
        } => {
            publish_render(state, render);
            match &definition.handler {
                None => finish_handler(state, &chunk.invocation_id, Ok(Vec::new())),
                Some(handler) => {
                    tracing::debug!(action = %definition.name(), "running action handler");
                    spawn_handler(
                        myself,
                        chunk.invocation_id,
                        Arc::clone(handler),
                        args,
                        Arc::clone(&state.snapshot),
                    );
                }
            }
        }
    }
}

fn deliver(myself: &ActorRef<SessionMessage>, state: &mut SessionActorState, delta: InboundDelta) {
    match delta {
        InboundDelta::Message { role, content } => {
            append_message(state, role, content);
        }
        InboundDelta::StatePatch {
            session_name,
            patch,
        } => {
            if session_name != state.config.agent {
                tracing::debug!(
                    session = %state.config.session_id,
                    target = %session_name,
                    "state patch addressed to another agent, ignored"
                );
                return;
            }
            apply_patch(state, patch);
        }
        InboundDelta::ActionCall(chunk) => dispatch_chunk(myself, state, chunk),
    }
}

fn send_upstream(state: &SessionActorState) {
    let input = RunAgentInput::for_session(
        &state.config,
        state.transcript.all().map(|m| m.as_ref()),
        &state.table.declarations(),
        &state.snapshot,
    );
    let upstream = Arc::clone(&state.upstream);
    let session_id = state.config.session_id.clone();
    tokio::spawn(async move {
        if let Err(e) = upstream.send(input).await {
            tracing::warn!(session = %session_id, error = %e, "upstream send failed");
        }
    });
}

impl Actor for SessionActor {
    type Msg = SessionMessage;
    type State = SessionActorState;
    type Arguments = SessionActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let suggester = match args.suggestions {
            Some((config, source)) => {
                let (actor, _handle) = Actor::spawn_linked(
                    None,
                    SuggestionActor,
                    SuggestionArgs {
                        session_id: args.config.session_id.clone(),
                        config,
                        source,
                        session: myself.clone(),
                    },
                    myself.get_cell(),
                )
                .await?;
                Some(actor)
            }
            None => None,
        };

        Ok(SessionActorState {
            config: args.config,
            snapshot: Arc::new(StateSnapshot::initial(args.initial)),
            transcript: Transcript::new(),
            table: ActionTable::new(),
            dispatcher: ActionDispatcher::new(),
            board: RenderBoard::new(),
            flags: serde_json::Map::new(),
            diagnostics: Vec::new(),
            next_listener_id: 0,
            state_listeners: Vec::new(),
            action_listeners: Vec::new(),
            suggestions: Vec::new(),
            suggester,
            upstream: args.upstream,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(suggester) = state.suggester.take() {
            suggester.stop(None);
        }
        tracing::debug!(session = %state.config.session_id, "session closed");
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // losing the suggestion trigger never takes the session down
        match message {
            SupervisionEvent::ActorFailed(_, reason) => {
                tracing::warn!(session = %state.config.session_id, error = %reason, "suggestion actor failed");
                state.suggester = None;
            }
            SupervisionEvent::ActorTerminated(..) => state.suggester = None,
            _ => {}
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
            SessionMessage::Deliver(delta) => deliver(&myself, state, delta),
            SessionMessage::StreamEnded(reason) => {
                for diagnostic in state.dispatcher.interrupt_all(reason.as_deref()) {
                    fail_invocation(state, diagnostic);
                }
            }
            SessionMessage::ApplyPatch(patch, reply) => {
                let _ = reply.send(apply_patch(state, patch));
            }
            SessionMessage::RegisterAction(definition, reply) => {
                let _ = reply.send(state.table.register(definition));
            }
            SessionMessage::AppendUserMessage(content, reply) => {
                let message = append_message(state, Role::User, content);
                send_upstream(state);
                let _ = reply.send(message);
            }
            SessionMessage::SubscribeState(listener, reply) => {
                let id = state.next_listener_id();
                state.state_listeners.push((id, listener));
                let _ = reply.send(id);
            }
            SessionMessage::SubscribeActions(listener, reply) => {
                let id = state.next_listener_id();
                state.action_listeners.push((id, listener));
                let _ = reply.send(id);
            }
            SessionMessage::Unsubscribe(id) => {
                state.state_listeners.retain(|(l, _)| *l != id);
                state.action_listeners.retain(|(l, _)| *l != id);
            }
            SessionMessage::SuggestionsReady(suggestions) => {
                tracing::debug!(
                    session = %state.config.session_id,
                    count = suggestions.len(),
                    "suggestions updated"
                );
                state.suggestions = suggestions;
            }
            SessionMessage::HandlerFinished {
                invocation_id,
                result,
            } => finish_handler(state, &invocation_id, result),
            SessionMessage::GetState(reply) => {
                let _ = reply.send(Arc::clone(&state.snapshot));
            }
            SessionMessage::GetTranscript(reply) => {
                let _ = reply.send(state.transcript.clone());
            }
            SessionMessage::GetDiagnostics(reply) => {
                let _ = reply.send(state.diagnostics.clone());
            }
            SessionMessage::GetRenders(reply) => {
                let _ = reply.send(state.board.entries());
            }
            SessionMessage::GetFlags(reply) => {
                let _ = reply.send(state.flags.clone());
            }
            SessionMessage::GetSuggestions(reply) => {
                let _ = reply.send(state.suggestions.clone());
            }
            SessionMessage::GetInvocationStatus(id, reply) => {
                let _ = reply.send(state.dispatcher.status(&id));
            }
            SessionMessage::GetHandlersInFlight(reply) => {
                let _ = reply.send(state.dispatcher.awaiting_handlers());
            }
        }
        Ok(())
    }
}
