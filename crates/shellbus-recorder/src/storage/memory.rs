//! In-memory session sink.

use std::sync::{
    RwLock,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use shellbus_core::{ExportError, ExportLocation, SessionSink};

/// In-memory sink.
///
/// Useful for tests and embedding hosts that ship exports elsewhere.
/// Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemorySink {
    exports: RwLock<Vec<String>>,
    failing: AtomicBool,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail, to exercise error paths.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything persisted so far, oldest first.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn exports(&self) -> Result<Vec<String>, ExportError> {
        Ok(self
            .exports
            .read()
            .map_err(|e| ExportError::Rejected(e.to_string()))?
            .clone())
    }
}

#[async_trait]
impl SessionSink for MemorySink {
    async fn persist(&self, contents: &str) -> Result<ExportLocation, ExportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExportError::Rejected("sink is failing".to_string()));
        }

        let mut exports = self
            .exports
            .write()
            .map_err(|e| ExportError::Rejected(e.to_string()))?;
        exports.push(contents.to_string());

        Ok(format!("memory://{}", exports.len() - 1))
    }
}
