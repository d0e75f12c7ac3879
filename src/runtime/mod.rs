use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ractor::{call_t, Actor, ActorRef};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};

use crate::ag_ui::TransportError;
use crate::domain::action::ActionDefinition;
use crate::domain::config::{EngineConfig, SessionConfig};
use crate::domain::delta::InboundDelta;
use crate::domain::error::Diagnostic;
use crate::domain::invocation::InvocationStatus;
use crate::domain::render::RenderEvent;
use crate::domain::state::{value_kind, StateSnapshot};
use crate::domain::suggestion::Suggestion;
use crate::domain::transcript::{Message, Transcript};

mod session_actor;
pub mod suggestions;
pub mod upstream;

pub use session_actor::{
    ActionListener, PatchOutcome, RuntimeError, SessionActor, SessionActorArgs, SessionMessage,
    StateListener,
};
pub use suggestions::SuggestionSource;
pub use upstream::{ChannelUpstream, NullUpstream, Upstream};

const CALL_TIMEOUT_MS: u64 = 5000;

// ---------------------------------------------------------------------------
// Engine — top-level handle owning every open session
// ---------------------------------------------------------------------------

struct SessionEntry {
    actor: ActorRef<SessionMessage>,
    handle: JoinHandle<()>,
}

pub struct Engine {
    config: EngineConfig,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    upstream: Arc<dyn Upstream>,
    suggestion_source: Option<Arc<dyn SuggestionSource>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            sessions: Mutex::new(HashMap::new()),
            upstream: Arc::new(NullUpstream),
            suggestion_source: None,
        }
    }

    /// Replace the upstream collaborator used by `append_user_message`.
    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = upstream;
        self
    }

    /// Enable follow-up suggestions (when the config allows them).
    pub fn with_suggestion_source(mut self, source: Arc<dyn SuggestionSource>) -> Self {
        self.suggestion_source = Some(source);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a session for the configured default agent and endpoint.
    pub async fn open(
        &self,
        session_id: &str,
        initial_state: Value,
    ) -> Result<SessionHandle, RuntimeError> {
        self.open_with(self.config.session(session_id), initial_state)
            .await
    }

    #[tracing::instrument(skip_all, fields(session = %session.session_id, agent = %session.agent))]
    pub async fn open_with(
        &self,
        session: SessionConfig,
        initial_state: Value,
    ) -> Result<SessionHandle, RuntimeError> {
        let initial = match initial_state {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => return Err(RuntimeError::InvalidInitialState(value_kind(&other))),
        };
        let session_id = session.session_id.clone();
        if self.live_sessions().contains_key(&session_id) {
            return Err(RuntimeError::SessionExists(session_id));
        }

        let suggestions = match (&self.suggestion_source, self.config.suggestions.enabled) {
            (Some(source), true) => Some((self.config.suggestions.clone(), Arc::clone(source))),
            _ => None,
        };
        let (actor, handle) = Actor::spawn(
            None,
            SessionActor,
            SessionActorArgs {
                config: session,
                initial,
                upstream: Arc::clone(&self.upstream),
                suggestions,
            },
        )
        .await
        .map_err(|e| RuntimeError::Spawn(e.to_string()))?;

        {
            let mut sessions = self.live_sessions();
            if sessions.contains_key(&session_id) {
                // lost a race with a concurrent open
                actor.stop(None);
                return Err(RuntimeError::SessionExists(session_id));
            }
            sessions.insert(
                session_id.clone(),
                SessionEntry {
                    actor: actor.clone(),
                    handle,
                },
            );
        }
        tracing::info!("session opened");

        Ok(SessionHandle { session_id, actor })
    }

    /// Look up an open session.
    pub fn session(&self, session_id: &str) -> Result<SessionHandle, RuntimeError> {
        self.live_sessions()
            .get(session_id)
            .map(|entry| SessionHandle {
                session_id: session_id.to_string(),
                actor: entry.actor.clone(),
            })
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))
    }

    pub async fn get_state(&self, session_id: &str) -> Result<Arc<StateSnapshot>, RuntimeError> {
        self.session(session_id)?.get_state().await
    }

    pub async fn subscribe<F>(
        &self,
        session_id: &str,
        callback: F,
    ) -> Result<Subscription, RuntimeError>
    where
        F: Fn(&Arc<StateSnapshot>) + Send + Sync + 'static,
    {
        self.session(session_id)?.subscribe(callback).await
    }

    pub async fn subscribe_actions<F>(
        &self,
        session_id: &str,
        callback: F,
    ) -> Result<Subscription, RuntimeError>
    where
        F: Fn(&RenderEvent) + Send + Sync + 'static,
    {
        self.session(session_id)?.subscribe_actions(callback).await
    }

    pub async fn apply_patch(
        &self,
        session_id: &str,
        patch: Value,
    ) -> Result<PatchOutcome, RuntimeError> {
        self.session(session_id)?.apply_patch(patch).await
    }

    pub async fn register_action(
        &self,
        session_id: &str,
        definition: ActionDefinition,
    ) -> Result<(), RuntimeError> {
        self.session(session_id)?.register_action(definition).await
    }

    pub async fn append_user_message(
        &self,
        session_id: &str,
        content: impl Into<String>,
    ) -> Result<Arc<Message>, RuntimeError> {
        self.session(session_id)?
            .append_user_message(content)
            .await
    }

    pub async fn transcript(&self, session_id: &str) -> Result<Transcript, RuntimeError> {
        self.session(session_id)?.transcript().await
    }

    /// Queue one inbound delta. Deltas for a session apply in call order.
    pub fn ingest(&self, session_id: &str, delta: InboundDelta) -> Result<(), RuntimeError> {
        self.session(session_id)?.deliver(delta)
    }

    /// Feed a delta stream into a session until it ends. Whatever ends the
    /// stream, invocations still waiting for their final chunk are marked
    /// interrupted.
    pub async fn run_stream<S>(&self, session_id: &str, deltas: S) -> Result<(), RuntimeError>
    where
        S: Stream<Item = Result<InboundDelta, TransportError>>,
    {
        let session = self.session(session_id)?;
        tokio::pin!(deltas);
        let mut reason = None;
        while let Some(item) = deltas.next().await {
            match item {
                Ok(delta) => session.deliver(delta)?,
                Err(e) => {
                    tracing::warn!(session = %session_id, error = %e, "delta stream failed");
                    reason = Some(e.to_string());
                    break;
                }
            }
        }
        session.end_stream(reason)
    }

    pub async fn diagnostics(&self, session_id: &str) -> Result<Vec<Diagnostic>, RuntimeError> {
        self.session(session_id)?.diagnostics().await
    }

    pub async fn renders(&self, session_id: &str) -> Result<Vec<RenderEvent>, RuntimeError> {
        self.session(session_id)?.renders().await
    }

    pub async fn flags(
        &self,
        session_id: &str,
    ) -> Result<serde_json::Map<String, Value>, RuntimeError> {
        self.session(session_id)?.flags().await
    }

    pub async fn suggestions(&self, session_id: &str) -> Result<Vec<Suggestion>, RuntimeError> {
        self.session(session_id)?.suggestions().await
    }

    /// Action handlers still running for a session.
    pub async fn handlers_in_flight(&self, session_id: &str) -> Result<usize, RuntimeError> {
        self.session(session_id)?.handlers_in_flight().await
    }

    pub async fn invocation_status(
        &self,
        session_id: &str,
        invocation_id: &str,
    ) -> Result<Option<InvocationStatus>, RuntimeError> {
        self.session(session_id)?
            .invocation_status(invocation_id)
            .await
    }

    /// Destroy a session. Pending deltas already queued are processed first.
    pub async fn close(&self, session_id: &str) -> Result<(), RuntimeError> {
        let entry = self
            .live_sessions()
            .remove(session_id)
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))?;
        entry.actor.drain().map_err(|e| RuntimeError::ActorCall(e.to_string()))?;
        let _ = entry.handle.await;
        tracing::info!(session = %session_id, "session removed");
        Ok(())
    }

    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.lock().drain().collect();
        for (_, entry) in &entries {
            entry.actor.stop(None);
        }
        for (_, entry) in entries {
            let _ = entry.handle.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().expect("session registry lock poisoned")
    }

    /// The registry with sessions whose actor has stopped removed.
    fn live_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        let mut sessions = self.lock();
        sessions.retain(|session_id, entry| {
            let alive = !entry.handle.is_finished();
            if !alive {
                tracing::warn!(session = %session_id, "session actor stopped, removing");
            }
            alive
        });
        sessions
    }
}

// ---------------------------------------------------------------------------
// SessionHandle — per-session interface
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    actor: ActorRef<SessionMessage>,
}

fn call_err(e: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::ActorCall(e.to_string())
}

impl SessionHandle {
    pub async fn get_state(&self) -> Result<Arc<StateSnapshot>, RuntimeError> {
        call_t!(self.actor, SessionMessage::GetState, CALL_TIMEOUT_MS).map_err(call_err)
    }

    pub async fn subscribe<F>(&self, callback: F) -> Result<Subscription, RuntimeError>
    where
        F: Fn(&Arc<StateSnapshot>) + Send + Sync + 'static,
    {
        let listener: StateListener = Arc::new(callback);
        let id = call_t!(self.actor, SessionMessage::SubscribeState, CALL_TIMEOUT_MS, listener)
            .map_err(call_err)?;
        Ok(Subscription {
            id,
            actor: self.actor.clone(),
        })
    }

    pub async fn subscribe_actions<F>(&self, callback: F) -> Result<Subscription, RuntimeError>
    where
        F: Fn(&RenderEvent) + Send + Sync + 'static,
    {
        let listener: ActionListener = Arc::new(callback);
        let id = call_t!(self.actor, SessionMessage::SubscribeActions, CALL_TIMEOUT_MS, listener)
            .map_err(call_err)?;
        Ok(Subscription {
            id,
            actor: self.actor.clone(),
        })
    }

    pub async fn apply_patch(&self, patch: Value) -> Result<PatchOutcome, RuntimeError> {
        call_t!(self.actor, SessionMessage::ApplyPatch, CALL_TIMEOUT_MS, patch).map_err(call_err)
    }

    pub async fn register_action(&self, definition: ActionDefinition) -> Result<(), RuntimeError> {
        let result = call_t!(
            self.actor,
            SessionMessage::RegisterAction,
            CALL_TIMEOUT_MS,
            definition
        )
        .map_err(call_err)?;
        Ok(result?)
    }

    pub async fn append_user_message(
        &self,
        content: impl Into<String>,
    ) -> Result<Arc<Message>, RuntimeError> {
        call_t!(
            self.actor,
            SessionMessage::AppendUserMessage,
            CALL_TIMEOUT_MS,
            content.into()
        )
        .map_err(call_err)
    }

    pub async fn transcript(&self) -> Result<Transcript, RuntimeError> {
        call_t!(self.actor, SessionMessage::GetTranscript, CALL_TIMEOUT_MS).map_err(call_err)
    }

    pub fn deliver(&self, delta: InboundDelta) -> Result<(), RuntimeError> {
        self.actor
            .send_message(SessionMessage::Deliver(delta))
            .map_err(|_| RuntimeError::SessionNotFound(self.session_id.clone()))
    }

    pub fn end_stream(&self, reason: Option<String>) -> Result<(), RuntimeError> {
        self.actor
            .send_message(SessionMessage::StreamEnded(reason))
            .map_err(|_| RuntimeError::SessionNotFound(self.session_id.clone()))
    }

    pub async fn diagnostics(&self) -> Result<Vec<Diagnostic>, RuntimeError> {
        call_t!(self.actor, SessionMessage::GetDiagnostics, CALL_TIMEOUT_MS).map_err(call_err)
    }

    pub async fn renders(&self) -> Result<Vec<RenderEvent>, RuntimeError> {
        call_t!(self.actor, SessionMessage::GetRenders, CALL_TIMEOUT_MS).map_err(call_err)
    }

    pub async fn flags(&self) -> Result<serde_json::Map<String, Value>, RuntimeError> {
        call_t!(self.actor, SessionMessage::GetFlags, CALL_TIMEOUT_MS).map_err(call_err)
    }

    pub async fn suggestions(&self) -> Result<Vec<Suggestion>, RuntimeError> {
        call_t!(self.actor, SessionMessage::GetSuggestions, CALL_TIMEOUT_MS).map_err(call_err)
    }

    pub async fn handlers_in_flight(&self) -> Result<usize, RuntimeError> {
        call_t!(self.actor, SessionMessage::GetHandlersInFlight, CALL_TIMEOUT_MS).map_err(call_err)
    }

    pub async fn invocation_status(
        &self,
        invocation_id: &str,
    ) -> Result<Option<InvocationStatus>, RuntimeError> {
        call_t!(
            self.actor,
            SessionMessage::GetInvocationStatus,
            CALL_TIMEOUT_MS,
            invocation_id.to_string()
        )
        .map_err(call_err)
    }
}

// ---------------------------------------------------------------------------
// Subscription — unsubscribes on drop
// ---------------------------------------------------------------------------

pub struct Subscription {
    id: u64,
    actor: ActorRef<SessionMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.actor.send_message(SessionMessage::Unsubscribe(self.id));
    }
}
