//! Events pushed from sessions to the UI bridge.
//!
//! Serialized as tagged JSON, matching how the frontend channel consumes
//! them.

use serde::Serialize;

use crate::session::SlotId;

/// Events sent from the session layer to the UI bridge.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A session was attached to a slot.
    Created { slot: SlotId },
    /// Filtered output ready for display.
    Output { slot: SlotId, data: String },
    /// The session was killed and its slot retired.
    Closed { slot: SlotId },
}

/// Sender half of the bridge event channel.
pub type SessionEventSender = tokio::sync::mpsc::UnboundedSender<SessionEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tagged() {
        let event = SessionEvent::Output {
            slot: 2,
            data: "hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Output\""));
        assert!(json.contains("\"slot\":2"));
    }
}
