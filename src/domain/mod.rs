pub mod action;
pub mod action_table;
pub mod config;
pub mod delta;
pub mod dispatcher;
pub mod error;
pub mod invocation;
pub mod partial_json;
pub mod render;
pub mod schema;
pub mod state;
pub mod suggestion;
pub mod transcript;

pub use action::{ActionDefinition, ActionEffect, ActionHandler, ActionRenderer, RenderStatus};
pub use action_table::{ActionTable, TableError};
pub use config::{ConfigError, EngineConfig, RemoteEndpoints, SessionConfig, SuggestionConfig};
pub use delta::InboundDelta;
pub use dispatcher::{ActionChunk, ActionDispatcher, ChunkOutcome};
pub use error::{Diagnostic, Fault};
pub use invocation::{ActionInvocation, InvocationStatus};
pub use partial_json::{parse_complete, parse_partial, MalformedJson, ParseOutcome};
pub use render::{RenderBoard, RenderEvent};
pub use schema::{ActionDeclaration, ParamType, Parameter, SchemaViolation};
pub use state::{merge, Patch, StateError, StateMap, StateSnapshot};
pub use suggestion::{GateDecision, Suggestion, SuggestionGate, SuggestionRequest};
pub use transcript::{Message, Role, Transcript};
