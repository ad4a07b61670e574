//! Filesystem session sink.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::Utc;
use shellbus_core::{ExportError, ExportLocation, SessionSink};

use crate::{config::RecorderConfig, session::export_file_name};

/// Collision suffixes tried before giving up on a timestamped name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Writes each export to `<dir>/recording-<timestamp>.json`.
///
/// Content goes to a uniquely named temporary file in the same directory
/// and is then moved to a name nobody else holds, so concurrent exports
/// never share a file and a failed write never leaves a partial recording.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Create a sink writing into `dir`. The directory is created lazily.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Sink for the configured recordings directory.
    #[must_use]
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self::new(config.recordings_dir())
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Write `contents` and claim a fresh export name for it.
fn write_export(dir: &Path, contents: &str) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(dir)?;

    // Dropped (and removed) on every early return.
    let mut file = tempfile::Builder::new()
        .prefix(".recording-")
        .suffix(".partial")
        .tempfile_in(dir)?;
    file.write_all(contents.as_bytes())?;
    file.as_file().sync_all()?;

    let name = export_file_name(Utc::now());
    let stem = name.trim_end_matches(".json");
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = if attempt == 0 {
            dir.join(&name)
        } else {
            dir.join(format!("{stem}-{attempt}.json"))
        };
        match file.persist_noclobber(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => file = e.file,
            Err(e) => return Err(e.error.into()),
        }
    }
    Err(ExportError::Rejected(format!(
        "no free export name for {name} in {}",
        dir.display()
    )))
}

#[async_trait]
impl SessionSink for FileSink {
    async fn persist(&self, contents: &str) -> Result<ExportLocation, ExportError> {
        let dir = self.dir.clone();
        let body = contents.to_owned();
        let path = tokio::task::spawn_blocking(move || write_export(&dir, &body))
            .await
            .map_err(|e| ExportError::Rejected(format!("export task failed: {e}")))??;

        tracing::info!(path = %path.display(), bytes = contents.len(), "Exported recording");
        Ok(path.to_string_lossy().into_owned())
    }
}
