//! Export sink trait and its error type.

use async_trait::async_trait;
use thiserror::Error;

/// Identifier a sink hands back for a persisted session (a path, a key).
pub type ExportLocation = String;

/// Export error.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Export rejected: {0}")]
    Rejected(String),
}

/// Trait for session export backends.
///
/// A sink receives an already serialized session and either persists all
/// of it or reports failure; it must not leave partial output behind.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Persist a serialized session.
    async fn persist(&self, contents: &str) -> Result<ExportLocation, ExportError>;
}
