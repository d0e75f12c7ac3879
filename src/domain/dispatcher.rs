//! Pure state machine routing streamed action-call chunks.
//!
//! The dispatcher binds each invocation id to a definition on first sight,
//! re-parses the growing argument buffer on every chunk, and tells the caller
//! what to do next through [`ChunkOutcome`]. It never runs handlers itself
//! and holds no view state; the session applies the outcomes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::{ActionDefinition, RenderStatus};
use super::action_table::ActionTable;
use super::error::{Diagnostic, Fault};
use super::invocation::{ActionInvocation, InvocationStatus};
use super::partial_json::{parse_complete, parse_partial, ParseOutcome};
use super::render::RenderEvent;

/// One action-call delta as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionChunk {
    pub invocation_id: String,
    pub action_name: String,
    pub args_buffer: String,
    pub is_final: bool,
}

#[derive(Debug)]
pub enum ChunkOutcome {
    /// Nothing new to show: retired id, unchanged buffer, or a prefix that
    /// does not yet resolve to any value.
    Ignored,
    /// A new partial view.
    Rendered(RenderEvent),
    /// The chunk was dropped; the invocation stays live.
    Diagnosed(Diagnostic),
    /// The invocation is now in `error` and retired.
    Failed(Diagnostic),
    /// The final chunk validated. Apply `render`, then run the handler and
    /// report back through [`ActionDispatcher::finish`]. Until then the
    /// invocation stays live and further chunks for it are ignored.
    Ready {
        render: RenderEvent,
        args: Value,
        definition: Arc<ActionDefinition>,
    },
}

struct LiveInvocation {
    invocation: ActionInvocation,
    definition: Arc<ActionDefinition>,
    reported_malformed: bool,
}

/// How many retired invocation ids a dispatcher remembers by default.
pub const RETIRED_CAPACITY: usize = 4096;

pub struct ActionDispatcher {
    live: HashMap<String, LiveInvocation>,
    /// Final status of recently retired invocations. Later chunks for these
    /// ids are ignored. Oldest entries are evicted past `retired_capacity`.
    retired: HashMap<String, InvocationStatus>,
    retired_order: VecDeque<String>,
    retired_capacity: usize,
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::with_retired_capacity(RETIRED_CAPACITY)
    }
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retired_capacity(retired_capacity: usize) -> Self {
        ActionDispatcher {
            live: HashMap::new(),
            retired: HashMap::new(),
            retired_order: VecDeque::new(),
            retired_capacity: retired_capacity.max(1),
        }
    }

    pub fn on_chunk(&mut self, table: &ActionTable, chunk: &ActionChunk) -> ChunkOutcome {
        let id = chunk.invocation_id.as_str();
        if self.retired.contains_key(id) {
            return ChunkOutcome::Ignored;
        }

        match self.live.get(id) {
            // validated, handler still running
            Some(live) if live.invocation.status == InvocationStatus::Complete => {
                return ChunkOutcome::Ignored;
            }
            Some(_) => {}
            None => {
                let Some(definition) = table.lookup(&chunk.action_name) else {
                    self.retire(id, InvocationStatus::Error);
                    return ChunkOutcome::Failed(Diagnostic::for_invocation(
                        id,
                        Fault::UnknownAction {
                            action_name: chunk.action_name.clone(),
                        },
                    ));
                };
                self.live.insert(
                    id.to_string(),
                    LiveInvocation {
                        invocation: ActionInvocation::new(id, definition.name()),
                        definition,
                        reported_malformed: false,
                    },
                );
            }
        }

        let outcome = match self.live.get_mut(id) {
            Some(live) => live.advance(chunk),
            None => ChunkOutcome::Ignored,
        };
        if let ChunkOutcome::Failed(_) = outcome {
            self.live.remove(id);
            self.retire(id, InvocationStatus::Error);
        }
        outcome
    }

    fn retire(&mut self, id: &str, status: InvocationStatus) {
        if self.retired.insert(id.to_string(), status).is_none() {
            self.retired_order.push_back(id.to_string());
        }
        while self.retired_order.len() > self.retired_capacity {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
    }

    /// Retire an invocation after its handler ran (or was absent).
    pub fn finish(&mut self, invocation_id: &str, result: Result<(), String>) -> Option<Diagnostic> {
        let live = self.live.remove(invocation_id)?;
        match result {
            Ok(()) => {
                self.retire(invocation_id, InvocationStatus::Complete);
                None
            }
            Err(error) => {
                self.retire(invocation_id, InvocationStatus::Error);
                Some(Diagnostic::for_invocation(
                    invocation_id,
                    Fault::HandlerFailed {
                        action_name: live.invocation.action_name,
                        error,
                    },
                ))
            }
        }
    }

    /// The stream ended: every invocation still waiting for its final chunk
    /// becomes an error, keeping its last parsed value. Invocations whose
    /// handler is running are left to [`finish`](Self::finish). Ordered by
    /// invocation id.
    pub fn interrupt_all(&mut self, reason: Option<&str>) -> Vec<Diagnostic> {
        let mut ids: Vec<String> = self
            .live
            .iter()
            .filter(|(_, live)| live.invocation.status != InvocationStatus::Complete)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| {
                let live = self.live.remove(&id)?;
                self.retire(&id, InvocationStatus::Error);
                Some(Diagnostic::for_invocation(
                    &id,
                    Fault::TransportInterrupted {
                        action_name: live.invocation.action_name,
                        reason: reason.map(str::to_string),
                    },
                ))
            })
            .collect()
    }

    pub fn status(&self, invocation_id: &str) -> Option<InvocationStatus> {
        self.live
            .get(invocation_id)
            .map(|l| l.invocation.status)
            .or_else(|| self.retired.get(invocation_id).copied())
    }

    pub fn invocation(&self, invocation_id: &str) -> Option<&ActionInvocation> {
        self.live.get(invocation_id).map(|l| &l.invocation)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Invocations that validated and are waiting on their handler.
    pub fn awaiting_handlers(&self) -> usize {
        self.live
            .values()
            .filter(|l| l.invocation.status == InvocationStatus::Complete)
            .count()
    }
}

impl LiveInvocation {
    fn advance(&mut self, chunk: &ActionChunk) -> ChunkOutcome {
        let grew = match self.invocation.extend(&chunk.args_buffer) {
            Ok(grew) => grew,
            Err(regression) => {
                return ChunkOutcome::Diagnosed(self.diagnostic(Fault::MalformedArguments {
                    action_name: self.invocation.action_name.clone(),
                    detail: regression.to_string(),
                }))
            }
        };

        if chunk.is_final {
            return self.complete();
        }
        if !grew {
            return ChunkOutcome::Ignored;
        }

        match parse_partial(&self.invocation.buffer) {
            Ok(ParseOutcome::Pending) => ChunkOutcome::Ignored,
            Ok(ParseOutcome::Partial(value) | ParseOutcome::Complete(value)) => {
                if self.invocation.last_parsed.as_ref() == Some(&value) {
                    return ChunkOutcome::Ignored;
                }
                self.invocation.status = InvocationStatus::Partial;
                ChunkOutcome::Rendered(self.render(value, RenderStatus::Partial))
            }
            Err(malformed) => {
                // the buffer only grows, so it stays malformed; report it once
                if self.reported_malformed {
                    return ChunkOutcome::Ignored;
                }
                self.reported_malformed = true;
                ChunkOutcome::Diagnosed(self.diagnostic(Fault::MalformedArguments {
                    action_name: self.invocation.action_name.clone(),
                    detail: malformed.to_string(),
                }))
            }
        }
    }

    fn complete(&mut self) -> ChunkOutcome {
        let action_name = self.invocation.action_name.clone();
        let args = match parse_complete(&self.invocation.buffer) {
            Ok(args) => args,
            Err(e) => {
                self.invocation.status = InvocationStatus::Error;
                return ChunkOutcome::Failed(self.diagnostic(Fault::SchemaMismatch {
                    action_name,
                    detail: format!("invalid JSON: {e}"),
                }));
            }
        };
        if let Err(violation) = self.definition.declaration.validate(&args) {
            self.invocation.status = InvocationStatus::Error;
            return ChunkOutcome::Failed(self.diagnostic(Fault::SchemaMismatch {
                action_name,
                detail: violation.to_string(),
            }));
        }

        self.invocation.status = InvocationStatus::Complete;
        let render = self.render(args.clone(), RenderStatus::Complete);
        ChunkOutcome::Ready {
            render,
            args,
            definition: Arc::clone(&self.definition),
        }
    }

    fn render(&mut self, args: Value, status: RenderStatus) -> RenderEvent {
        let view = self.definition.renderer.render(&args, status);
        self.invocation.last_parsed = Some(args.clone());
        RenderEvent {
            invocation_id: self.invocation.id.clone(),
            action_name: self.invocation.action_name.clone(),
            revision: self.invocation.next_revision(),
            status,
            args,
            view,
        }
    }

    fn diagnostic(&self, fault: Fault) -> Diagnostic {
        Diagnostic::for_invocation(&self.invocation.id, fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::{ActionDeclaration, ParamType, Parameter};
    use serde_json::json;

    fn post_table() -> ActionTable {
        let post = || {
            vec![
                Parameter::new("title", ParamType::String),
                Parameter::new("content", ParamType::String),
            ]
        };
        let decl = ActionDeclaration::new("generate_post", "posts")
            .param(Parameter::new("tweet", ParamType::Object).with_attributes(post()))
            .param(Parameter::new("linkedIn", ParamType::Object).with_attributes(post()));
        let mut table = ActionTable::new();
        table.register(ActionDefinition::new(decl)).unwrap();
        table
    }

    fn chunk(id: &str, name: &str, buffer: &str, is_final: bool) -> ActionChunk {
        ActionChunk {
            invocation_id: id.into(),
            action_name: name.into(),
            args_buffer: buffer.into(),
            is_final,
        }
    }

    const FULL: &str = r#"{"tweet":{"title":"Hi","content":"C1"},"linkedIn":{"title":"T2","content":"C2"}}"#;

    #[test]
    fn partial_then_final_renders_then_readies() {
        let table = post_table();
        let mut d = ActionDispatcher::new();

        let first = d.on_chunk(&table, &chunk("c1", "generate_post", r#"{"tweet":{"title":"Hi"#, false));
        let ChunkOutcome::Rendered(render) = first else {
            panic!("expected partial render, got {first:?}");
        };
        assert_eq!(render.status, RenderStatus::Partial);
        assert_eq!(render.args, json!({"tweet": {"title": "Hi"}}));
        assert_eq!(d.status("c1"), Some(InvocationStatus::Partial));

        let last = d.on_chunk(&table, &chunk("c1", "generate_post", FULL, true));
        let ChunkOutcome::Ready { render, args, definition } = last else {
            panic!("expected ready, got {last:?}");
        };
        assert_eq!(render.status, RenderStatus::Complete);
        assert_eq!(render.revision, 2);
        assert_eq!(args["linkedIn"]["content"], "C2");
        assert_eq!(definition.name(), "generate_post");

        assert_eq!(d.finish("c1", Ok(())), None);
        assert_eq!(d.status("c1"), Some(InvocationStatus::Complete));
        assert!(matches!(
            d.on_chunk(&table, &chunk("c1", "generate_post", FULL, true)),
            ChunkOutcome::Ignored
        ));
    }

    #[test]
    fn unknown_action_never_renders() {
        let table = post_table();
        let mut d = ActionDispatcher::new();

        let outcome = d.on_chunk(&table, &chunk("x1", "foo_bar", "{\"a\"", false));
        let ChunkOutcome::Failed(diag) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(
            diag.fault,
            Fault::UnknownAction {
                action_name: "foo_bar".into()
            }
        );
        assert!(matches!(
            d.on_chunk(&table, &chunk("x1", "foo_bar", "{\"a\":1}", true)),
            ChunkOutcome::Ignored
        ));
        // a later chunk naming a registered action under the same id stays ignored
        assert!(matches!(
            d.on_chunk(&table, &chunk("x1", "generate_post", FULL, true)),
            ChunkOutcome::Ignored
        ));
        assert!(matches!(
            d.on_chunk(&table, &chunk("c2", "generate_post", FULL, true)),
            ChunkOutcome::Ready { .. }
        ));
    }

    #[test]
    fn schema_mismatch_on_final_keeps_partial_value() {
        let table = post_table();
        let mut d = ActionDispatcher::new();

        d.on_chunk(&table, &chunk("c1", "generate_post", r#"{"tweet":{"title":"Hi"#, false));
        let outcome = d.on_chunk(
            &table,
            &chunk("c1", "generate_post", r#"{"tweet":{"title":"Hi"}}"#, true),
        );
        let ChunkOutcome::Failed(diag) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(matches!(diag.fault, Fault::SchemaMismatch { .. }));
        assert_eq!(d.status("c1"), Some(InvocationStatus::Error));
    }

    #[test]
    fn truncated_final_buffer_is_a_schema_mismatch() {
        let table = post_table();
        let mut d = ActionDispatcher::new();
        let outcome = d.on_chunk(&table, &chunk("c1", "generate_post", r#"{"tweet":"#, true));
        let ChunkOutcome::Failed(diag) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        let Fault::SchemaMismatch { detail, .. } = diag.fault else {
            panic!("wrong fault");
        };
        assert!(detail.starts_with("invalid JSON"));
    }

    #[test]
    fn unchanged_or_unresolved_buffers_do_not_render() {
        let table = post_table();
        let mut d = ActionDispatcher::new();
        assert!(matches!(
            d.on_chunk(&table, &chunk("c1", "generate_post", "", false)),
            ChunkOutcome::Ignored
        ));
        assert!(matches!(
            d.on_chunk(&table, &chunk("c1", "generate_post", "{", false)),
            ChunkOutcome::Rendered(_)
        ));
        // same buffer again
        assert!(matches!(
            d.on_chunk(&table, &chunk("c1", "generate_post", "{", false)),
            ChunkOutcome::Ignored
        ));
        // grew, but parses to the same value
        assert!(matches!(
            d.on_chunk(&table, &chunk("c1", "generate_post", "{\"twe", false)),
            ChunkOutcome::Ignored
        ));
    }

    #[test]
    fn regression_and_malformed_chunks_are_diagnosed_not_fatal() {
        let table = post_table();
        let mut d = ActionDispatcher::new();
        d.on_chunk(&table, &chunk("c1", "generate_post", r#"{"tweet":{"#, false));

        let regressed = d.on_chunk(&table, &chunk("c1", "generate_post", r#"{"x"#, false));
        assert!(matches!(
            regressed,
            ChunkOutcome::Diagnosed(Diagnostic { fault: Fault::MalformedArguments { .. }, .. })
        ));
        assert_eq!(d.invocation("c1").unwrap().buffer, r#"{"tweet":{"#);

        let malformed = d.on_chunk(&table, &chunk("c1", "generate_post", r#"{"tweet":{]"#, false));
        assert!(matches!(malformed, ChunkOutcome::Diagnosed(_)));
        // reported once
        assert!(matches!(
            d.on_chunk(&table, &chunk("c1", "generate_post", r#"{"tweet":{]]"#, false)),
            ChunkOutcome::Ignored
        ));
        assert_eq!(d.status("c1"), Some(InvocationStatus::Partial));
    }

    #[test]
    fn handler_failure_is_reported_on_finish() {
        let table = post_table();
        let mut d = ActionDispatcher::new();
        d.on_chunk(&table, &chunk("c1", "generate_post", FULL, true));
        let diag = d.finish("c1", Err("boom".into())).unwrap();
        assert_eq!(
            diag.fault,
            Fault::HandlerFailed {
                action_name: "generate_post".into(),
                error: "boom".into()
            }
        );
        assert_eq!(d.status("c1"), Some(InvocationStatus::Error));
    }

    #[test]
    fn interrupt_marks_live_invocations_failed() {
        let table = post_table();
        let mut d = ActionDispatcher::new();
        d.on_chunk(&table, &chunk("c2", "generate_post", r#"{"tweet":{"title":"A"#, false));
        d.on_chunk(&table, &chunk("c1", "generate_post", r#"{"tweet":{"title":"B"#, false));

        let diags = d.interrupt_all(Some("connection reset"));
        let ids: Vec<_> = diags.iter().map(|d| d.invocation_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(d.live_count(), 0);
        assert_eq!(d.status("c1"), Some(InvocationStatus::Error));
        assert!(d.interrupt_all(None).is_empty());
    }

    #[test]
    fn invocation_awaiting_handler_ignores_chunks_and_survives_interrupt() {
        let table = post_table();
        let mut d = ActionDispatcher::new();
        assert!(matches!(
            d.on_chunk(&table, &chunk("c1", "generate_post", FULL, true)),
            ChunkOutcome::Ready { .. }
        ));
        d.on_chunk(&table, &chunk("c2", "generate_post", r#"{"tweet":{"#, false));
        assert_eq!(d.awaiting_handlers(), 1);

        // a repeated final chunk must not run the handler twice
        assert!(matches!(
            d.on_chunk(&table, &chunk("c1", "generate_post", FULL, true)),
            ChunkOutcome::Ignored
        ));

        let diags = d.interrupt_all(None);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].invocation_id.as_deref(), Some("c2"));
        assert_eq!(d.awaiting_handlers(), 1);

        assert_eq!(d.finish("c1", Ok(())), None);
        assert_eq!(d.status("c1"), Some(InvocationStatus::Complete));
        assert_eq!(d.awaiting_handlers(), 0);
    }

    #[test]
    fn retired_ids_are_bounded() {
        let table = post_table();
        let mut d = ActionDispatcher::with_retired_capacity(2);
        for id in ["x1", "x2", "x3"] {
            d.on_chunk(&table, &chunk(id, "foo_bar", "{}", true));
        }
        assert_eq!(d.status("x1"), None);
        assert_eq!(d.status("x2"), Some(InvocationStatus::Error));
        assert_eq!(d.status("x3"), Some(InvocationStatus::Error));

        d.on_chunk(&table, &chunk("c1", "generate_post", FULL, true));
        d.finish("c1", Ok(()));
        assert_eq!(d.status("x2"), None);
        assert_eq!(d.status("c1"), Some(InvocationStatus::Complete));
    }

    #[test]
    fn chunk_wire_shape_is_camel_case() {
        let c: ActionChunk = serde_json::from_value(json!({
            "invocationId": "c1",
            "actionName": "generate_post",
            "argsBuffer": "{}",
            "isFinal": true
        }))
        .unwrap();
        assert!(c.is_final);
    }
}
