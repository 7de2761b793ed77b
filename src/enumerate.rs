//! Recursive file listing used by the binary to feed the snapshotter.
//!
//! Only regular files are listed; symlinks are neither followed nor listed.
//! The `.treeproof` directory at the root is always skipped.
//!
//! Patterns are globs. A pattern without `/` matches any single path
//! component (`.git`, `*.log`). A pattern with `/` matches a leading run of
//! components (`docs/drafts`, `src/*/generated`). Everything below a matched
//! directory matches too. `*` and `?` never cross a `/`.

use crate::config::{ConfigError, TrackerConfig};
use crate::store::STATE_DIR;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum EnumerateError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Watch/ignore filter over forward-slash relative paths.
#[derive(Debug, Clone)]
pub struct FileSelector {
    /// `None` watches everything.
    watch: Option<GlobSet>,
    ignore: GlobSet,
}

impl FileSelector {
    pub fn new(watch: &[String], ignore: &[String]) -> Result<Self, ConfigError> {
        let watch = if watch.is_empty() {
            None
        } else {
            Some(compile_patterns(watch)?)
        };

        Ok(FileSelector {
            watch,
            ignore: compile_patterns(ignore)?,
        })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self, ConfigError> {
        Self::new(&config.watch_patterns, &config.ignore_patterns)
    }

    pub fn is_ignored(&self, relative: &str) -> bool {
        self.ignore.is_match(relative)
    }

    pub fn is_watched(&self, relative: &str) -> bool {
        self.watch.as_ref().is_none_or(|set| set.is_match(relative))
    }
}

fn compile_patterns(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns {
        let invalid = |reason: String| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            reason,
        };

        let trimmed = pattern.trim_matches('/');
        if trimmed.is_empty() {
            return Err(invalid("pattern is empty".to_string()));
        }

        let base = if trimmed.contains('/') {
            trimmed.to_string()
        } else {
            format!("**/{trimmed}")
        };

        for glob in [base.clone(), format!("{base}/**")] {
            let glob = GlobBuilder::new(&glob)
                .literal_separator(true)
                .build()
                .map_err(|e| invalid(e.kind().to_string()))?;
            builder.add(glob);
        }
    }

    builder.build().map_err(|e| ConfigError::InvalidPattern {
        pattern: patterns.join(", "),
        reason: e.to_string(),
    })
}

/// Lists the absolute paths of all selected regular files below `root`,
/// sorted.
///
/// Failing to read `root` itself is an error. Subdirectories that cannot be
/// read are logged and skipped, so their files drop out of the listing.
pub fn list_files(root: &Path, selector: &FileSelector) -> Result<Vec<PathBuf>, EnumerateError> {
    let mut files = Vec::new();
    let entries = read_dir_sorted(root)?;
    walk("", entries, selector, &mut files);
    files.sort();
    Ok(files)
}

fn walk(
    prefix: &str,
    entries: Vec<PathBuf>,
    selector: &FileSelector,
    files: &mut Vec<PathBuf>,
) {
    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!("Skipping non UTF-8 path {}", path.display());
            continue;
        };

        if prefix.is_empty() && name == STATE_DIR {
            continue;
        }

        let relative = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        };

        if selector.is_ignored(&relative) {
            debug!("Ignoring {relative}");
            continue;
        }

        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let file_type = metadata.file_type();

        if file_type.is_symlink() {
            debug!("Not following symlink {relative}");
        } else if file_type.is_dir() {
            match read_dir_sorted(&path) {
                Ok(children) => walk(&relative, children, selector, files),
                Err(e) => warn!("Skipping directory {}: {}", path.display(), e),
            }
        } else if file_type.is_file() && selector.is_watched(&relative) {
            files.push(path);
        }
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, EnumerateError> {
    let map_err = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            EnumerateError::PermissionDenied(dir.to_path_buf())
        } else {
            EnumerateError::Io(e)
        }
    };

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(map_err)? {
        entries.push(entry.map_err(map_err)?.path());
    }
    entries.sort();
    Ok(entries)
}
