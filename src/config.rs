//! Tracker configuration.
//!
//! Ignore list, digest algorithm and the other knobs live on
//! [`TrackerConfig`] rather than in globals, so several detectors with
//! different ids can coexist in one project without sharing state.

use crate::enumerate::FileSelector;
use crate::hasher::{ContentHasher, HashAlgorithm};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Upper bound for automatically chosen hashing parallelism.
const MAX_AUTO_PARALLELISM: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid detector id {0:?} (use ASCII letters, digits, '-', '_' or '.')")]
    InvalidDetectorId(String),
    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Names the logical tracker; also names its state file.
    pub detector_id: String,
    pub hash_algorithm: HashAlgorithm,
    /// Rewrite CRLF to LF before hashing.
    pub normalize_line_endings: bool,
    /// Inclusion patterns. Empty means every file under the root.
    pub watch_patterns: Vec<String>,
    pub ignore_patterns: Vec<String>,
    /// Number of files hashed concurrently. 0 picks a value from the number
    /// of available cores.
    pub max_parallelism: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            detector_id: "default".to_string(),
            hash_algorithm: HashAlgorithm::Sha256,
            normalize_line_endings: true,
            watch_patterns: Vec::new(),
            ignore_patterns: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "target".to_string(),
            ],
            max_parallelism: 0,
        }
    }
}

impl TrackerConfig {
    /// Parse and validate a TOML configuration. Missing keys take their
    /// default values.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig = toml::from_str(content)?;
        validate_detector_id(&config.detector_id)?;
        FileSelector::from_config(&config)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ConfigError::PermissionDenied(path.to_path_buf())
            } else {
                ConfigError::Io(e)
            }
        })?;

        Self::from_toml(&content)
    }

    pub fn with_detector_id(mut self, detector_id: &str) -> Result<Self, ConfigError> {
        validate_detector_id(detector_id)?;
        self.detector_id = detector_id.to_string();
        Ok(self)
    }

    pub fn hasher(&self) -> ContentHasher {
        ContentHasher::new(self.hash_algorithm, self.normalize_line_endings)
    }

    /// Effective number of hashing workers, always at least one.
    pub fn parallelism(&self) -> usize {
        if self.max_parallelism > 0 {
            return self.max_parallelism;
        }
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
            .min(MAX_AUTO_PARALLELISM)
    }
}

/// Detector ids end up in file names, so keep them to a portable subset.
pub fn validate_detector_id(id: &str) -> Result<(), ConfigError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidDetectorId(id.to_string()))
    }
}
