use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dispatcher::ActionChunk;
use super::transcript::Role;

/// One classified inbound event for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundDelta {
    Message {
        role: Role,
        content: String,
    },
    StatePatch {
        #[serde(rename = "sessionName")]
        session_name: String,
        /// Forwarded as received; anything but a mapping is rejected by the
        /// session that applies it.
        patch: Value,
    },
    ActionCall(ActionChunk),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shapes() {
        let delta: InboundDelta = serde_json::from_value(json!({
            "kind": "action_call",
            "invocationId": "c1",
            "actionName": "generate_post",
            "argsBuffer": "{",
            "isFinal": false
        }))
        .unwrap();
        assert!(matches!(delta, InboundDelta::ActionCall(ref c) if c.invocation_id == "c1"));

        let delta: InboundDelta = serde_json::from_value(json!({
            "kind": "state_patch",
            "sessionName": "post_generation_agent",
            "patch": {"tool_logs": []}
        }))
        .unwrap();
        assert!(matches!(delta, InboundDelta::StatePatch { .. }));

        let delta: InboundDelta =
            serde_json::from_value(json!({"kind": "message", "role": "user", "content": "hi"}))
                .unwrap();
        assert_eq!(
            delta,
            InboundDelta::Message {
                role: Role::User,
                content: "hi".into()
            }
        );
    }
}
