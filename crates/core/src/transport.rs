//! Client-facing events and the real-time transport trait.
//!
//! The transport pushes incremental message state to subscribers. From the
//! core's perspective delivery is fire-and-forget, at most once; delivery
//! guarantees are the transport's concern. All payloads round-trip through
//! JSON for the wire.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;
use crate::planner::PlanState;

/// Events pushed to clients during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// A message was created (user or bot, including empty streaming shells).
    MessageCreated { message: ChatMessage },

    /// A message's content or metadata changed.
    MessageUpdated { message: ChatMessage },

    /// Coarse progress while a turn assembles or generates.
    StatusUpdate { status: String },

    /// A plan message changed lifecycle state.
    PlanStateChanged { message_id: String, state: PlanState },
}

impl ClientEvent {
    /// Wire event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message-created",
            Self::MessageUpdated { .. } => "message-updated",
            Self::StatusUpdate { .. } => "status-update",
            Self::PlanStateChanged { .. } => "plan-state-changed",
        }
    }
}

/// The real-time transport trait. Groups are chat IDs; implementations log
/// their own delivery failures rather than surfacing them to the turn.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn broadcast(&self, group: &str, event: ClientEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatId;

    #[test]
    fn event_serialization_message_created() {
        let event = ClientEvent::MessageCreated {
            message: ChatMessage::user(&ChatId::from("c1"), "u1", "Alice", "hi"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"message-created""#));
        assert!(json.contains(r#""content":"hi""#));
    }

    #[test]
    fn event_serialization_status_update() {
        let event = ClientEvent::StatusUpdate {
            status: "generating response".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"status-update""#));
    }

    #[test]
    fn event_serialization_plan_state() {
        let event = ClientEvent::PlanStateChanged {
            message_id: "m1".into(),
            state: PlanState::Proposed,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"plan-state-changed""#));
        assert!(json.contains(r#""proposed""#));
    }

    #[test]
    fn event_type_names() {
        let msg = ChatMessage::user(&ChatId::from("c1"), "u1", "Alice", "hi");
        assert_eq!(
            ClientEvent::MessageCreated {
                message: msg.clone()
            }
            .event_type(),
            "message-created"
        );
        assert_eq!(
            ClientEvent::MessageUpdated { message: msg }.event_type(),
            "message-updated"
        );
        assert_eq!(
            ClientEvent::StatusUpdate { status: "x".into() }.event_type(),
            "status-update"
        );
        assert_eq!(
            ClientEvent::PlanStateChanged {
                message_id: "m".into(),
                state: PlanState::Executed
            }
            .event_type(),
            "plan-state-changed"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"status-update","status":"assembling context"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::StatusUpdate { status } => assert_eq!(status, "assembling context"),
            _ => panic!("Wrong variant"),
        }
    }
}
