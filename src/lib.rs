pub mod ag_ui;
pub mod domain;
pub mod runtime;

pub use domain::{
    ActionDeclaration, ActionDefinition, ActionEffect, Diagnostic, EngineConfig, Fault,
    InboundDelta, Patch, RenderEvent, RenderStatus, SessionConfig, StateSnapshot,
};
pub use runtime::{Engine, PatchOutcome, RuntimeError, SessionHandle, Subscription};
