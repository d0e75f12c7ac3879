use std::collections::HashMap;

use serde_json::Value;

use crate::domain::delta::InboundDelta;
use crate::domain::dispatcher::ActionChunk;
use crate::domain::transcript::Role;

use super::types::AgUiEvent;

// ---------------------------------------------------------------------------
// TranslateOutput
// ---------------------------------------------------------------------------

/// Result of translating a single AG-UI event.
#[derive(Debug, PartialEq)]
pub enum TranslateOutput {
    /// Normal deltas; the run continues.
    Deltas(Vec<InboundDelta>),
    /// The run finished after these deltas.
    Terminal(Vec<InboundDelta>),
    /// The agent reported an error; the run is over.
    Failed(Vec<InboundDelta>, String),
}

// ---------------------------------------------------------------------------
// DeltaTranslator
// ---------------------------------------------------------------------------

struct OpenToolCall {
    name: String,
    buffer: String,
}

/// Stateful translator from AG-UI events to inbound deltas.
///
/// Text messages are accumulated until their END event and delivered whole.
/// Tool call arguments are delivered on every ARGS event as the full buffer
/// so far, with the END event marking the final chunk.
pub struct DeltaTranslator {
    session_name: String,
    open_text: HashMap<String, (Role, String)>,
    /// Insertion order of `open_text`, so a flush is deterministic.
    text_order: Vec<String>,
    open_tool_calls: HashMap<String, OpenToolCall>,
}

impl DeltaTranslator {
    pub fn new(session_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            open_text: HashMap::new(),
            text_order: Vec::new(),
            open_tool_calls: HashMap::new(),
        }
    }

    pub fn translate(&mut self, event: &AgUiEvent) -> TranslateOutput {
        match event {
            AgUiEvent::RunStarted { .. }
            | AgUiEvent::StepStarted { .. }
            | AgUiEvent::StepFinished { .. }
            | AgUiEvent::Raw { .. }
            | AgUiEvent::Custom { .. } => TranslateOutput::Deltas(vec![]),

            AgUiEvent::RunFinished { .. } => TranslateOutput::Terminal(self.flush_text()),
            AgUiEvent::RunError { message, .. } => {
                TranslateOutput::Failed(self.flush_text(), message.clone())
            }

            AgUiEvent::TextMessageStart { message_id, role } => {
                self.open_message(message_id, *role);
                TranslateOutput::Deltas(vec![])
            }
            AgUiEvent::TextMessageContent { message_id, delta } => {
                if !self.open_text.contains_key(message_id) {
                    self.open_message(message_id, Role::Assistant);
                }
                if let Some((_, content)) = self.open_text.get_mut(message_id) {
                    content.push_str(delta);
                }
                TranslateOutput::Deltas(vec![])
            }
            AgUiEvent::TextMessageEnd { message_id } => {
                self.text_order.retain(|id| id != message_id);
                let deltas = self
                    .open_text
                    .remove(message_id)
                    .filter(|(_, content)| !content.is_empty())
                    .map(|(role, content)| InboundDelta::Message { role, content })
                    .into_iter()
                    .collect();
                TranslateOutput::Deltas(deltas)
            }

            AgUiEvent::ToolCallStart {
                tool_call_id,
                tool_call_name,
                ..
            } => {
                self.open_tool_calls.insert(
                    tool_call_id.clone(),
                    OpenToolCall {
                        name: tool_call_name.clone(),
                        buffer: String::new(),
                    },
                );
                TranslateOutput::Deltas(vec![])
            }
            AgUiEvent::ToolCallArgs {
                tool_call_id,
                delta,
            } => {
                let Some(call) = self.open_tool_calls.get_mut(tool_call_id) else {
                    tracing::warn!(tool_call_id = %tool_call_id, "tool call args without start");
                    return TranslateOutput::Deltas(vec![]);
                };
                call.buffer.push_str(delta);
                TranslateOutput::Deltas(vec![InboundDelta::ActionCall(ActionChunk {
                    invocation_id: tool_call_id.clone(),
                    action_name: call.name.clone(),
                    args_buffer: call.buffer.clone(),
                    is_final: false,
                })])
            }
            AgUiEvent::ToolCallEnd { tool_call_id } => {
                let Some(call) = self.open_tool_calls.remove(tool_call_id) else {
                    tracing::warn!(tool_call_id = %tool_call_id, "tool call end without start");
                    return TranslateOutput::Deltas(vec![]);
                };
                TranslateOutput::Deltas(vec![InboundDelta::ActionCall(ActionChunk {
                    invocation_id: tool_call_id.clone(),
                    action_name: call.name,
                    args_buffer: call.buffer,
                    is_final: true,
                })])
            }

            AgUiEvent::StateSnapshot { snapshot } => {
                TranslateOutput::Deltas(vec![self.state_patch(snapshot.clone())])
            }
            AgUiEvent::StateDelta { delta } => {
                let patch = shallow_patch(delta).unwrap_or_else(|| Value::Array(delta.clone()));
                TranslateOutput::Deltas(vec![self.state_patch(patch)])
            }
        }
    }

    fn open_message(&mut self, message_id: &str, role: Role) {
        if self
            .open_text
            .insert(message_id.to_string(), (role, String::new()))
            .is_none()
        {
            self.text_order.push(message_id.to_string());
        }
    }

    fn flush_text(&mut self) -> Vec<InboundDelta> {
        let order = std::mem::take(&mut self.text_order);
        order
            .into_iter()
            .filter_map(|id| self.open_text.remove(&id))
            .filter(|(_, content)| !content.is_empty())
            .map(|(role, content)| InboundDelta::Message { role, content })
            .collect()
    }

    fn state_patch(&self, patch: Value) -> InboundDelta {
        InboundDelta::StatePatch {
            session_name: self.session_name.clone(),
            patch,
        }
    }
}

/// Map JSON Patch operations onto a top-level key union. Only `add` and
/// `replace` at single-segment paths qualify; anything else returns `None`.
fn shallow_patch(ops: &[Value]) -> Option<Value> {
    let mut patch = serde_json::Map::new();
    for op in ops {
        match op.get("op").and_then(Value::as_str) {
            Some("add" | "replace") => {}
            _ => return None,
        }
        let key = op
            .get("path")
            .and_then(Value::as_str)?
            .strip_prefix('/')
            .filter(|k| !k.is_empty() && !k.contains('/'))?
            .replace("~1", "/")
            .replace("~0", "~");
        patch.insert(key, op.get("value")?.clone());
    }
    Some(Value::Object(patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deltas(output: TranslateOutput) -> Vec<InboundDelta> {
        match output {
            TranslateOutput::Deltas(d) => d,
            other => panic!("expected deltas, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_args_accumulate_into_buffer() {
        let mut t = DeltaTranslator::new("post_generation_agent");
        assert!(deltas(t.translate(&AgUiEvent::ToolCallStart {
            tool_call_id: "c1".into(),
            tool_call_name: "generate_post".into(),
            parent_message_id: None,
        }))
        .is_empty());

        t.translate(&AgUiEvent::ToolCallArgs {
            tool_call_id: "c1".into(),
            delta: r#"{"tweet":"#.into(),
        });
        let second = deltas(t.translate(&AgUiEvent::ToolCallArgs {
            tool_call_id: "c1".into(),
            delta: r#"{"title":"Hi"#.into(),
        }));
        assert_eq!(
            second,
            vec![InboundDelta::ActionCall(ActionChunk {
                invocation_id: "c1".into(),
                action_name: "generate_post".into(),
                args_buffer: r#"{"tweet":{"title":"Hi"#.into(),
                is_final: false,
            })]
        );

        let end = deltas(t.translate(&AgUiEvent::ToolCallEnd {
            tool_call_id: "c1".into(),
        }));
        let [InboundDelta::ActionCall(chunk)] = end.as_slice() else {
            panic!("expected one action call");
        };
        assert!(chunk.is_final);
        assert_eq!(chunk.args_buffer, r#"{"tweet":{"title":"Hi"#);
    }

    #[test]
    fn args_for_unknown_call_are_dropped() {
        let mut t = DeltaTranslator::new("s");
        assert!(deltas(t.translate(&AgUiEvent::ToolCallArgs {
            tool_call_id: "nope".into(),
            delta: "{}".into(),
        }))
        .is_empty());
    }

    #[test]
    fn text_message_delivered_on_end() {
        let mut t = DeltaTranslator::new("s");
        t.translate(&AgUiEvent::TextMessageStart {
            message_id: "m1".into(),
            role: Role::Assistant,
        });
        for part in ["Here ", "are ", "your posts"] {
            assert!(deltas(t.translate(&AgUiEvent::TextMessageContent {
                message_id: "m1".into(),
                delta: part.into(),
            }))
            .is_empty());
        }
        let out = deltas(t.translate(&AgUiEvent::TextMessageEnd {
            message_id: "m1".into(),
        }));
        assert_eq!(
            out,
            vec![InboundDelta::Message {
                role: Role::Assistant,
                content: "Here are your posts".into()
            }]
        );
    }

    #[test]
    fn run_finished_flushes_open_text() {
        let mut t = DeltaTranslator::new("s");
        t.translate(&AgUiEvent::TextMessageContent {
            message_id: "m1".into(),
            delta: "partial".into(),
        });
        let out = t.translate(&AgUiEvent::RunFinished {
            thread_id: "s".into(),
            run_id: "r".into(),
        });
        assert_eq!(
            out,
            TranslateOutput::Terminal(vec![InboundDelta::Message {
                role: Role::Assistant,
                content: "partial".into()
            }])
        );
    }

    #[test]
    fn run_error_fails_the_run() {
        let mut t = DeltaTranslator::new("s");
        let out = t.translate(&AgUiEvent::RunError {
            message: "model overloaded".into(),
            code: None,
        });
        assert_eq!(out, TranslateOutput::Failed(vec![], "model overloaded".into()));
    }

    #[test]
    fn state_snapshot_becomes_patch() {
        let mut t = DeltaTranslator::new("post_generation_agent");
        let out = deltas(t.translate(&AgUiEvent::StateSnapshot {
            snapshot: json!({"tool_logs": [{"message": "searching"}]}),
        }));
        assert_eq!(
            out,
            vec![InboundDelta::StatePatch {
                session_name: "post_generation_agent".into(),
                patch: json!({"tool_logs": [{"message": "searching"}]}),
            }]
        );
    }

    #[test]
    fn top_level_state_delta_becomes_patch() {
        let mut t = DeltaTranslator::new("s");
        let out = deltas(t.translate(&AgUiEvent::StateDelta {
            delta: vec![
                json!({"op": "replace", "path": "/tool_logs", "value": []}),
                json!({"op": "add", "path": "/a~1b", "value": 1}),
            ],
        }));
        let [InboundDelta::StatePatch { patch, .. }] = out.as_slice() else {
            panic!("expected one patch");
        };
        assert_eq!(patch, &json!({"tool_logs": [], "a/b": 1}));
    }

    #[test]
    fn nested_state_delta_is_forwarded_unmerged() {
        let mut t = DeltaTranslator::new("s");
        let ops = vec![json!({"op": "add", "path": "/tool_logs/-", "value": {"m": 1}})];
        let out = deltas(t.translate(&AgUiEvent::StateDelta { delta: ops.clone() }));
        let [InboundDelta::StatePatch { patch, .. }] = out.as_slice() else {
            panic!("expected one patch");
        };
        // not a mapping, so the session rejects it as corruption
        assert_eq!(patch, &Value::Array(ops));

        assert_eq!(shallow_patch(&[json!({"op": "remove", "path": "/a"})]), None);
    }
}
