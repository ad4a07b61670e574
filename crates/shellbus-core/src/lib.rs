//! Core abstractions for cross-context event distribution.
//!
//! This crate provides the fundamental building blocks:
//! - `ExecutionContext` - Handle to an isolated runtime with an origin
//! - `ChannelRegistry` - Named channel subscriptions with per-context cleanup
//! - `SessionSink` - Export backend trait

pub mod context;
pub mod registry;
pub mod traits;

pub use context::{ContextId, ContextReceiver, Delivery, ExecutionContext, Origin};
pub use registry::{ChannelRegistry, ListenerId};
pub use traits::{ExportError, ExportLocation, SessionSink};
