use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use volition_core::{Message, UniqueId};

/// One event on the bus: `{type, senderNode, timestamp, payload}` on the
/// wire. The payload shape depends on the type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    #[serde(rename = "senderNode")]
    pub sender_node: String,
    pub timestamp: u64,
    #[serde(flatten)]
    pub body: ProtocolBody,
}

impl ProtocolEvent {
    pub fn new(sender_node: UniqueId, timestamp: u64, body: ProtocolBody) -> Self {
        Self {
            sender_node: sender_node.to_hex(),
            timestamp,
            body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BdiLogLevel {
    Normal,
    Important,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ProtocolBody {
    Control {
        agent: String,
        command: String,
    },
    Percept {
        agent: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        value: JsonValue,
        resource: bool,
    },
    Pursue {
        agent: String,
        goal: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<JsonValue>,
        persistent: bool,
    },
    Drop {
        agent: String,
        goal: String,
        #[serde(rename = "goalId")]
        goal_id: String,
        mode: String,
    },
    Delegation {
        team: String,
        delegate: String,
        goal: String,
        #[serde(rename = "goalId")]
        goal_id: String,
        analyse: bool,
        score: f64,
        status: String,
    },
    Message {
        agent: String,
        message: JsonValue,
    },
    Register {
        name: String,
        id: String,
        team: bool,
    },
    Deregister {
        name: String,
        id: String,
    },
    AgentJoinTeam {
        team: String,
        member: String,
        role: String,
    },
    AgentLeaveTeam {
        team: String,
        member: String,
    },
    ActionBegin {
        agent: String,
        action: String,
        goal: String,
        #[serde(rename = "goalId")]
        goal_id: String,
        #[serde(rename = "intentionId")]
        intention_id: String,
        plan: String,
        #[serde(rename = "taskId")]
        task_id: String,
    },
    ActionUpdate {
        agent: String,
        action: String,
        #[serde(rename = "taskId")]
        task_id: String,
        success: bool,
    },
    #[serde(rename = "BDILog")]
    BdiLog {
        level: BdiLogLevel,
        agent: String,
        goal: String,
        #[serde(rename = "goalId")]
        goal_id: String,
        #[serde(rename = "intentionId")]
        intention_id: String,
        plan: String,
        #[serde(rename = "taskId")]
        task_id: String,
        message: String,
    },
}

/// Encode a message for a protocol payload.
pub fn message_to_json(msg: &Message) -> JsonValue {
    serde_json::to_value(msg).unwrap_or(JsonValue::Null)
}

/// Decode a message from a protocol payload.
pub fn message_from_json(value: &JsonValue) -> Option<Message> {
    serde_json::from_value(value.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = ProtocolEvent::new(
            UniqueId::from_halves(0, 9),
            42,
            ProtocolBody::Pursue {
                agent: "scout".into(),
                goal: "Patrol".into(),
                message: None,
                persistent: false,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Pursue");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["payload"]["goal"], "Patrol");
        assert_eq!(json["senderNode"].as_str().unwrap().len(), 32);
    }

    #[test]
    fn test_round_trip() {
        let event = ProtocolEvent::new(
            UniqueId::random(),
            7,
            ProtocolBody::BdiLog {
                level: BdiLogLevel::Normal,
                agent: "a".into(),
                goal: "g".into(),
                goal_id: "00".into(),
                intention_id: "01".into(),
                plan: "p".into(),
                task_id: "02".into(),
                message: "condition passed".into(),
            },
        );
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains("\"BDILog\""));
        let back: ProtocolEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_message_payload_round_trip() {
        let msg = Message::new("CellInfo").with("alive", true);
        let json = message_to_json(&msg);
        assert_eq!(message_from_json(&json), Some(msg));
    }
}
