use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::config::SessionConfig;
use crate::domain::schema::ActionDeclaration;
use crate::domain::state::StateSnapshot;
use crate::domain::transcript::{self, Role};

// ---------------------------------------------------------------------------
// RunAgentInput — the payload sent upstream to start an agent run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAgentInput {
    /// Thread identifier: the session id.
    pub thread_id: String,
    pub run_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Actions the client can render or execute, advertised as tools.
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub context: Vec<Context>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub forwarded_props: serde_json::Map<String, serde_json::Value>,
}

impl RunAgentInput {
    /// Build a run request from a session's current view.
    pub fn for_session<'a>(
        session: &SessionConfig,
        messages: impl IntoIterator<Item = &'a transcript::Message>,
        actions: &[ActionDeclaration],
        state: &StateSnapshot,
    ) -> Self {
        let mut forwarded_props = serde_json::Map::new();
        forwarded_props.insert("agent".into(), session.agent.clone().into());
        if let Some(endpoint) = &session.endpoint {
            forwarded_props.insert("endpoint".into(), endpoint.clone().into());
        }

        RunAgentInput {
            thread_id: session.session_id.clone(),
            run_id: Uuid::new_v4().to_string(),
            messages: messages.into_iter().map(Message::from).collect(),
            tools: actions.iter().map(Tool::from).collect(),
            context: Vec::new(),
            state: Some(state.to_value()),
            forwarded_props,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl From<&transcript::Message> for Message {
    fn from(m: &transcript::Message) -> Self {
        Message {
            id: m.id.clone(),
            role: m.role,
            content: m.content.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tools & context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

impl From<&ActionDeclaration> for Tool {
    fn from(decl: &ActionDeclaration) -> Self {
        Tool {
            name: decl.name.clone(),
            description: (!decl.description.is_empty()).then(|| decl.description.clone()),
            parameters: decl.to_json_schema(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub description: String,
    pub value: serde_json::Value,
}

// ---------------------------------------------------------------------------
// AgUiEvent — the subset of the AG-UI event protocol the engine consumes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgUiEvent {
    // -- Lifecycle --
    RunStarted {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },
    RunFinished {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },
    RunError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    // -- Steps --
    StepStarted {
        #[serde(rename = "stepName")]
        step_name: String,
    },
    StepFinished {
        #[serde(rename = "stepName")]
        step_name: String,
    },

    // -- Text message streaming --
    TextMessageStart {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(default = "AgUiEvent::default_role")]
        role: Role,
    },
    TextMessageContent {
        #[serde(rename = "messageId")]
        message_id: String,
        delta: String,
    },
    TextMessageEnd {
        #[serde(rename = "messageId")]
        message_id: String,
    },

    // -- Tool call streaming --
    ToolCallStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolCallName")]
        tool_call_name: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "parentMessageId")]
        parent_message_id: Option<String>,
    },
    ToolCallArgs {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        delta: String,
    },
    ToolCallEnd {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
    },

    // -- State management --
    StateSnapshot {
        snapshot: serde_json::Value,
    },
    /// RFC 6902 operations.
    StateDelta {
        delta: Vec<serde_json::Value>,
    },

    // -- Special --
    Raw {
        event: serde_json::Value,
    },
    Custom {
        name: String,
        value: serde_json::Value,
    },
}

impl AgUiEvent {
    fn default_role() -> Role {
        Role::Assistant
    }
}
