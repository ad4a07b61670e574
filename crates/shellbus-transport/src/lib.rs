//! Recording service and wire transport for execution contexts.
//!
//! Provides:
//! - Wire protocol (JSON, tagged messages)
//! - `RecordingService` - the gated recording API over the channel registry
//! - WebSocket transport (feature: websocket)

pub mod protocol;
pub mod service;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{
    ClientMessage, EVENT_CAPTURED_CHANNEL, ErrorKind, RecordingOp, Reply, STATE_CHANGED_CHANNEL,
    ServerMessage,
};
pub use service::{RecordingService, ServiceError, recording_permissions};
