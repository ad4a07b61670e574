//! Recording service: the privileged-process handlers for the recording API.
//!
//! Every call goes through the permission gate first. Handlers mutate the
//! recorder, which releases its own lock and notifies its listeners before
//! the handler publishes the change on the channel registry. State changes
//! and their publishes are serialized, so the last flag a subscriber
//! receives is always the recorder's current state.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use shellbus_core::{ChannelRegistry, ExecutionContext, ExportError, SessionSink};
use shellbus_gate::{Api, Gated, PermissionClass, PermissionDenied, PermissionTable};
use shellbus_recorder::{CapturedEvent, Recorder};
use thiserror::Error;

use crate::protocol::{
    ClientMessage, EVENT_CAPTURED_CHANNEL, ErrorKind, RecordingOp, Reply, STATE_CHANGED_CHANNEL,
    ServerMessage,
};

/// Namespace the recording operations are exposed under.
pub const NAMESPACE: &str = "recording";

/// Service error.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),
    #[error("No recording session to export")]
    NoActiveSession,
    #[error("Export failed: {0}")]
    ExportWriteFailed(#[source] ExportError),
    #[error("Listener {listener_id} is not registered on {channel}")]
    UnknownListener { channel: String, listener_id: String },
}

impl ServiceError {
    /// Wire category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NoActiveSession => ErrorKind::NoActiveSession,
            Self::ExportWriteFailed(_) => ErrorKind::ExportWriteFailed,
            Self::UnknownListener { .. } => ErrorKind::UnknownListener,
        }
    }
}

/// Permission table of the recording API.
///
/// Browser UI only, except `captureEvent`, which page instrumentation in
/// untrusted contexts must be able to call.
#[must_use]
pub fn recording_permissions() -> PermissionTable {
    PermissionTable::new(PermissionClass::PrivilegedBrowserUi)
        .with_override("captureEvent", PermissionClass::All)
}

/// Ungated handlers. Only reachable through [`RecordingService`].
pub struct RecordingHandlers {
    registry: Arc<ChannelRegistry>,
    recorder: Arc<Recorder>,
    sink: Arc<dyn SessionSink>,
    /// Held across a state change and its publish so subscribers see
    /// changes in the order they were applied.
    transitions: Mutex<()>,
}

impl RecordingHandlers {
    /// Apply a state change and publish the flag it produced.
    fn change_state(&self, apply: impl FnOnce(&Recorder) -> bool) -> bool {
        let _guard = self
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let recording = apply(&self.recorder);
        let delivered = self
            .registry
            .publish(STATE_CHANGED_CHANNEL, &serde_json::Value::Bool(recording));
        tracing::debug!(recording, delivered, "Published recording state");
        recording
    }

    fn capture(&self, event: CapturedEvent) {
        let Some(recorded) = self.recorder.add_event(event) else {
            return;
        };
        match serde_json::to_value(&recorded) {
            Ok(payload) => {
                self.registry.publish(EVENT_CAPTURED_CHANNEL, &payload);
            }
            Err(e) => tracing::error!("Failed to serialize captured event: {e}"),
        }
    }

    async fn export(&self, session_data: Option<String>) -> Result<Reply, ServiceError> {
        let contents = match session_data {
            Some(contents) => contents,
            None => self
                .recorder
                .export()
                .ok_or(ServiceError::NoActiveSession)?
                .to_json()
                .map_err(|e| ServiceError::ExportWriteFailed(e.into()))?,
        };

        match self.sink.persist(&contents).await {
            Ok(location) => Ok(Reply::Exported(location)),
            Err(e) => {
                tracing::warn!("Failed to export recording: {e}");
                Err(ServiceError::ExportWriteFailed(e))
            }
        }
    }
}

#[async_trait]
impl Api for RecordingHandlers {
    type Operation = RecordingOp;
    type Output = Reply;
    type Error = ServiceError;

    async fn call(
        &self,
        caller: &ExecutionContext,
        operation: RecordingOp,
    ) -> Result<Reply, ServiceError> {
        match operation {
            RecordingOp::IsRecording => Ok(Reply::Recording(self.recorder.is_recording())),
            RecordingOp::ToggleRecording => {
                Ok(Reply::Recording(self.change_state(Recorder::toggle)))
            }
            RecordingOp::SetRecordingState { is_recording } => Ok(Reply::Recording(
                self.change_state(|recorder| recorder.set_recording(is_recording)),
            )),
            RecordingOp::ClearRecording => {
                self.recorder.clear();
                Ok(Reply::Done)
            }
            RecordingOp::ExportRecording { session_data } => self.export(session_data).await,
            RecordingOp::CaptureEvent { event } => {
                self.capture(event);
                Ok(Reply::Done)
            }
            RecordingOp::OnRecordingStateChanged { listener_id } => {
                self.registry
                    .subscribe(STATE_CHANGED_CHANNEL, listener_id, caller);
                Ok(Reply::Done)
            }
            RecordingOp::OnEventCaptured { listener_id } => {
                self.registry
                    .subscribe(EVENT_CAPTURED_CHANNEL, listener_id, caller);
                Ok(Reply::Done)
            }
        }
    }
}

/// The recording API as exposed to execution contexts.
pub struct RecordingService {
    api: Gated<RecordingHandlers>,
}

impl RecordingService {
    /// Bind the registry, recorder and export sink behind the gate.
    #[must_use]
    pub fn new(
        registry: Arc<ChannelRegistry>,
        recorder: Arc<Recorder>,
        sink: Arc<dyn SessionSink>,
    ) -> Self {
        let handlers = RecordingHandlers {
            registry,
            recorder,
            sink,
            transitions: Mutex::new(()),
        };
        Self {
            api: Gated::wrap(NAMESPACE, handlers, recording_permissions()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.api.inner().registry
    }

    #[must_use]
    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.api.inner().recorder
    }

    /// Whether `caller` may invoke the named operation.
    #[must_use]
    pub fn permits(&self, caller: &ExecutionContext, operation: &'static str) -> bool {
        self.api.permits(caller, operation)
    }

    /// Invoke an operation on behalf of `caller`.
    ///
    /// # Errors
    /// Returns [`ServiceError::PermissionDenied`] when the caller's origin
    /// does not satisfy the operation, or the handler's own failure.
    pub async fn call(
        &self,
        caller: &ExecutionContext,
        operation: RecordingOp,
    ) -> Result<Reply, ServiceError> {
        self.api.call(caller, operation).await
    }

    /// Drop a listener the caller registered. Not gated: a context can only
    /// remove its own registrations.
    ///
    /// # Errors
    /// Returns [`ServiceError::UnknownListener`] if the caller owns no such listener.
    pub fn remove_listener(
        &self,
        caller: &ExecutionContext,
        channel: &str,
        listener_id: &str,
    ) -> Result<(), ServiceError> {
        if self
            .registry()
            .unsubscribe_owned(channel, listener_id, caller.id())
        {
            Ok(())
        } else {
            Err(ServiceError::UnknownListener {
                channel: channel.to_string(),
                listener_id: listener_id.to_string(),
            })
        }
    }

    /// Dispatch one wire message. Returns the reply to send back, if any.
    pub async fn handle(
        &self,
        caller: &ExecutionContext,
        message: ClientMessage,
    ) -> Option<ServerMessage> {
        match message {
            ClientMessage::Call { id, operation } => {
                let result = self.call(caller, operation).await;
                let Some(id) = id else {
                    if let Err(e) = result {
                        tracing::debug!(context = %caller.id(), "Dropped fire-and-forget failure: {e}");
                    }
                    return None;
                };
                Some(match result {
                    Ok(result) => ServerMessage::Response { id, result },
                    Err(e) => ServerMessage::Error {
                        id: Some(id),
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                })
            }
            ClientMessage::RemoveListener {
                channel,
                listener_id,
            } => {
                if let Err(e) = self.remove_listener(caller, &channel, &listener_id) {
                    tracing::debug!(context = %caller.id(), "{e}");
                }
                None
            }
            ClientMessage::Ping => Some(ServerMessage::Pong),
        }
    }
}
