use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema::ActionDeclaration;
use super::state::{Patch, StateSnapshot};
use super::transcript::Role;

// ---------------------------------------------------------------------------
// Handler side effects
// ---------------------------------------------------------------------------

/// What a completed handler asks the owning session to do. Effects are
/// applied in order by the session, never by the handler itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEffect {
    PatchState(Patch),
    AppendMessage { role: Role, content: String },
    SetFlag { name: String, value: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    Partial,
    Complete,
    /// Set by the session when an invocation fails after rendering; renderers
    /// are never invoked with it.
    Error,
}

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Runs once per invocation, after the complete render.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(
        &self,
        args: &Value,
        state: &StateSnapshot,
    ) -> Result<Vec<ActionEffect>, String>;
}

/// Produces the view object for an invocation. Called for every partial
/// parse and once more on completion, so it must be cheap and pure.
pub trait ActionRenderer: Send + Sync {
    fn render(&self, args: &Value, status: RenderStatus) -> Value;
}

/// Adapts a synchronous closure into an [`ActionHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(&Value, &StateSnapshot) -> Result<Vec<ActionEffect>, String> + Send + Sync,
{
    async fn handle(
        &self,
        args: &Value,
        state: &StateSnapshot,
    ) -> Result<Vec<ActionEffect>, String> {
        (self.0)(args, state)
    }
}

pub struct FnRenderer<F>(pub F);

impl<F> ActionRenderer for FnRenderer<F>
where
    F: Fn(&Value, RenderStatus) -> Value + Send + Sync,
{
    fn render(&self, args: &Value, status: RenderStatus) -> Value {
        (self.0)(args, status)
    }
}

/// Used when a definition has no renderer: the view is the arguments.
struct PassthroughRenderer;

impl ActionRenderer for PassthroughRenderer {
    fn render(&self, args: &Value, _status: RenderStatus) -> Value {
        args.clone()
    }
}

// ---------------------------------------------------------------------------
// ActionDefinition
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ActionDefinition {
    pub declaration: ActionDeclaration,
    pub handler: Option<Arc<dyn ActionHandler>>,
    pub renderer: Arc<dyn ActionRenderer>,
}

impl ActionDefinition {
    pub fn new(declaration: ActionDeclaration) -> Self {
        ActionDefinition {
            declaration,
            handler: None,
            renderer: Arc::new(PassthroughRenderer),
        }
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    pub fn with_handler(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_renderer(mut self, renderer: impl ActionRenderer + 'static) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn handle_with<F>(self, f: F) -> Self
    where
        F: Fn(&Value, &StateSnapshot) -> Result<Vec<ActionEffect>, String>
            + Send
            + Sync
            + 'static,
    {
        self.with_handler(FnHandler(f))
    }

    pub fn render_with<F>(self, f: F) -> Self
    where
        F: Fn(&Value, RenderStatus) -> Value + Send + Sync + 'static,
    {
        self.with_renderer(FnRenderer(f))
    }
}

impl fmt::Debug for ActionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDefinition")
            .field("declaration", &self.declaration)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}
