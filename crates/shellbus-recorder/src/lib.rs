//! Interaction recording for browser shells.
//!
//! Provides:
//! - `Recorder` - Idle/recording state machine with an ordered event log
//! - `RecordedEvent` / `RecordingSession` - the event and export model
//! - `RecorderConfig` - TOML-loadable configuration
//! - Session sinks (memory, filesystem)

pub mod config;
pub mod event;
pub mod recorder;
pub mod session;
pub mod storage;

pub use config::{ConfigError, RecorderConfig};
pub use event::{CapturedEvent, RecordedEvent, RecordedEventType};
pub use recorder::{Recorder, Subscription};
pub use session::{RecordingSession, RecordingState, SessionMetadata};
