//! Wire protocol between execution contexts and the privileged process.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shellbus_gate::Operation;
use shellbus_recorder::CapturedEvent;

/// Channel carrying the recording flag after every state change.
pub const STATE_CHANGED_CHANNEL: &str = "recording:on-state-changed";

/// Channel carrying every appended event.
pub const EVENT_CAPTURED_CHANNEL: &str = "recording:on-event-captured";

/// Operations of the recording API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RecordingOp {
    IsRecording,
    ToggleRecording,
    #[serde(rename_all = "camelCase")]
    SetRecordingState { is_recording: bool },
    ClearRecording,
    /// Persist `session_data` as given, or the recorder's own session when absent.
    #[serde(rename_all = "camelCase")]
    ExportRecording {
        #[serde(default)]
        session_data: Option<String>,
    },
    CaptureEvent { event: CapturedEvent },
    #[serde(rename_all = "camelCase")]
    OnRecordingStateChanged { listener_id: String },
    #[serde(rename_all = "camelCase")]
    OnEventCaptured { listener_id: String },
}

impl RecordingOp {
    /// Every operation name, for exhaustive permission checks.
    pub const NAMES: [&'static str; 8] = [
        "isRecording",
        "toggleRecording",
        "setRecordingState",
        "clearRecording",
        "exportRecording",
        "captureEvent",
        "onRecordingStateChanged",
        "onEventCaptured",
    ];
}

impl Operation for RecordingOp {
    fn name(&self) -> &'static str {
        match self {
            Self::IsRecording => "isRecording",
            Self::ToggleRecording => "toggleRecording",
            Self::SetRecordingState { .. } => "setRecordingState",
            Self::ClearRecording => "clearRecording",
            Self::ExportRecording { .. } => "exportRecording",
            Self::CaptureEvent { .. } => "captureEvent",
            Self::OnRecordingStateChanged { .. } => "onRecordingStateChanged",
            Self::OnEventCaptured { .. } => "onEventCaptured",
        }
    }
}

/// Successful result of a recording operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    /// Current recording flag.
    Recording(bool),
    /// Where an export was persisted.
    Exported(String),
    /// Operation completed with nothing to report.
    Done,
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    NoActiveSession,
    ExportWriteFailed,
    UnknownListener,
    InvalidMessage,
}

/// Message from a context to the privileged process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Invoke an operation. Without an id the call is fire-and-forget.
    Call {
        #[serde(default)]
        id: Option<u64>,
        operation: RecordingOp,
    },
    /// Drop a listener this context registered.
    RemoveListener { channel: String, listener_id: String },
    /// Ping for keepalive.
    Ping,
}

/// Message from the privileged process to a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Result of a call that carried an id.
    Response { id: u64, result: Reply },
    /// Failed call, or a message that could not be parsed.
    Error {
        id: Option<u64>,
        kind: ErrorKind,
        message: String,
    },
    /// Delivery on a subscribed channel.
    Event { channel: String, payload: Value },
    /// Pong response.
    Pong,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shellbus_recorder::RecordedEventType;

    use super::*;

    #[test]
    fn test_call_parsing() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "call",
            "id": 4,
            "operation": { "op": "setRecordingState", "isRecording": true }
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Call {
                id: Some(4),
                operation: RecordingOp::SetRecordingState { is_recording: true },
            }
        );

        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "call",
            "operation": {
                "op": "captureEvent",
                "event": { "type": "scroll", "tabId": 0, "url": "https://a.test", "scrollY": 40 }
            }
        }))
        .unwrap();
        let ClientMessage::Call { id: None, operation: RecordingOp::CaptureEvent { event } } = msg
        else {
            panic!("Wrong message type");
        };
        assert_eq!(event.kind, RecordedEventType::Scroll);
        assert_eq!(event.scroll_y, Some(40));
    }

    #[test]
    fn test_names_match_serialized_tags() {
        let ops = [
            RecordingOp::IsRecording,
            RecordingOp::ToggleRecording,
            RecordingOp::SetRecordingState { is_recording: false },
            RecordingOp::ClearRecording,
            RecordingOp::ExportRecording { session_data: None },
            RecordingOp::CaptureEvent {
                event: CapturedEvent::new(RecordedEventType::Click, 0, "https://a.test"),
            },
            RecordingOp::OnRecordingStateChanged { listener_id: "l".into() },
            RecordingOp::OnEventCaptured { listener_id: "l".into() },
        ];
        for (op, name) in ops.iter().zip(RecordingOp::NAMES) {
            let value = serde_json::to_value(op).unwrap();
            assert_eq!(value["op"], name);
            assert_eq!(op.name(), name);
        }
    }

    #[test]
    fn test_reply_shapes() {
        let msg = ServerMessage::Response { id: 1, result: Reply::Done };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "response", "id": 1, "result": null })
        );
        let msg = ServerMessage::Response { id: 2, result: Reply::Recording(true) };
        assert_eq!(serde_json::to_value(&msg).unwrap()["result"], json!(true));
    }
}
