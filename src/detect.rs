use crate::config::TrackerConfig;
use crate::diff::{ChangeRecord, change_fingerprint, diff};
use crate::enumerate::{EnumerateError, FileSelector, list_files};
use crate::snapshot::{SkippedFile, SnapshotBuild, StateSnapshot, build_snapshot};
use crate::store::{FileStorage, SnapshotStore, StateLock, StateOrigin, StoreError, state_path};
use std::path::Path;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("File listing error: {0}")]
    Enumerate(#[from] EnumerateError),
    #[error("State error: {0}")]
    Store(#[from] StoreError),
    #[error("Fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

pub struct DetectOptions {
    /// Persist the new snapshot as the baseline for the next run.
    pub commit: bool,
    pub dry_run: bool,
    /// Only commit if the detected changes have this fingerprint.
    pub fingerprint: Option<String>,
}

#[derive(Debug)]
pub enum CommitStatus {
    NotRequested,
    DryRun,
    Committed,
    /// The comparison is valid but the new state is not durable; the next run
    /// will diff against the old state and report these changes again.
    Failed(StoreError),
}

#[derive(Debug)]
pub struct Detection {
    pub previous_origin: StateOrigin,
    pub snapshot: StateSnapshot,
    pub changes: Vec<ChangeRecord>,
    pub fingerprint: String,
    pub skipped: Vec<SkippedFile>,
    pub commit: CommitStatus,
}

/// Lists and hashes the files `config` selects under `root`, leaving out
/// `exclude` if it is one of them.
pub fn scan(
    root: &Path,
    config: &TrackerConfig,
    exclude: Option<&Path>,
) -> Result<SnapshotBuild, EnumerateError> {
    let mut paths = list_files(root, &FileSelector::from_config(config)?)?;
    if let Some(exclude) = exclude {
        paths.retain(|path| path != exclude);
    }
    Ok(build_snapshot(&paths, root, config))
}

/// Runs one detection: load the previous snapshot, build the current one,
/// diff them and optionally commit the current one.
///
/// # Behavior
///
/// **Locking:** a committing run holds the detector's [`StateLock`] from
/// before the load until after the save, and fails with
/// [`StoreError::Locked`] if another run holds it. Read-only runs take no
/// lock; they may observe either the old or the new state, never a partial
/// one.
///
/// **Fingerprint validation:** if `options.fingerprint` is set and differs from
/// the fingerprint of the detected changes, nothing is written and
/// `FingerprintMismatch` is returned. This closes the window between reviewing
/// a status and committing it.
///
/// **Commit failure:** a failed save does not discard the comparison. The
/// result carries the changes together with [`CommitStatus::Failed`].
pub fn detect_changes(
    root: &Path,
    config: &TrackerConfig,
    options: DetectOptions,
) -> Result<Detection, DetectError> {
    let state_path = state_path(root, &config.detector_id);

    let lock = if options.commit && !options.dry_run {
        Some(StateLock::acquire(&state_path)?)
    } else {
        None
    };

    let store = SnapshotStore::new(FileStorage::new(state_path));
    let previous = store.load(config);

    let build = scan(root, config, None)?;
    let changes = diff(&previous.snapshot, &build.snapshot);
    let fingerprint = change_fingerprint(&changes);

    info!(
        "Detector {}: {} files, {} changes",
        config.detector_id,
        build.snapshot.files.len(),
        changes.len()
    );

    if let Some(expected) = &options.fingerprint
        && expected != &fingerprint
    {
        return Err(DetectError::FingerprintMismatch {
            expected: expected.clone(),
            actual: fingerprint,
        });
    }

    let commit = if !options.commit {
        CommitStatus::NotRequested
    } else if options.dry_run {
        CommitStatus::DryRun
    } else {
        match store.save(&build.snapshot) {
            Ok(()) => {
                if let Some(lock) = &lock {
                    debug!("Saved state while holding {}", lock.path().display());
                }
                CommitStatus::Committed
            }
            Err(e) => {
                error!("Failed to save state for detector {}: {e}", config.detector_id);
                CommitStatus::Failed(e)
            }
        }
    };

    Ok(Detection {
        previous_origin: previous.origin,
        snapshot: build.snapshot,
        changes,
        fingerprint,
        skipped: build.skipped,
        commit,
    })
}
