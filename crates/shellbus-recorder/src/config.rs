//! Recorder configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{event::DEFAULT_INNER_TEXT_LIMIT, session::SessionMetadata};

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Recorder configuration, loadable from TOML.
///
/// ```toml
/// user_agent = "Mozilla/5.0 (X11; Linux x86_64)"
/// recordings_dir = "/var/lib/shellbus/recordings"
/// inner_text_limit = 50
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// User agent reported in session metadata.
    pub user_agent: String,
    /// Application version reported in session metadata.
    pub app_version: String,
    /// Where the file sink writes exports. `None` uses the platform data dir.
    pub recordings_dir: Option<PathBuf>,
    /// Maximum characters of captured element text.
    pub inner_text_limit: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("shellbus/{}", env!("CARGO_PKG_VERSION")),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            recordings_dir: None,
            inner_text_limit: DEFAULT_INNER_TEXT_LIMIT,
        }
    }
}

impl RecorderConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse from TOML text.
    ///
    /// # Errors
    /// Returns error if the text is not valid configuration.
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Metadata for exported sessions.
    #[must_use]
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            user_agent: self.user_agent.clone(),
            app_version: self.app_version.clone(),
        }
    }

    /// Resolved export directory.
    #[must_use]
    pub fn recordings_dir(&self) -> PathBuf {
        self.recordings_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("shellbus")
                .join("recordings")
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RecorderConfig::from_toml("inner_text_limit = 20\n").unwrap();
        assert_eq!(config.inner_text_limit, 20);
        assert_eq!(config.app_version, RecorderConfig::default().app_version);
        assert!(config.recordings_dir.is_none());
        assert!(config.recordings_dir().ends_with("shellbus/recordings"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user_agent = \"test-agent\"").unwrap();
        writeln!(file, "recordings_dir = \"/tmp/rec\"").unwrap();

        let config = RecorderConfig::load(file.path()).unwrap();
        assert_eq!(config.metadata().user_agent, "test-agent");
        assert_eq!(config.recordings_dir(), PathBuf::from("/tmp/rec"));
    }

    #[test]
    fn test_load_errors() {
        let missing = RecorderConfig::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "inner_text_limit = \"lots\"").unwrap();
        assert!(matches!(
            RecorderConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
