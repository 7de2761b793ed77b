use crate::config::TrackerConfig;
use crate::hasher::{ContentHasher, FileDigest, HashAlgorithm, HashError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

/// One tracked file. The relative path is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileRecord {
    /// Only known while building; never persisted.
    #[serde(skip)]
    #[allow(dead_code)]
    pub absolute_path: Option<PathBuf>,
    pub size: u64,
    /// Informational only. Never used to classify changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    /// Hex encoded digest of the normalized content. Absent for an empty
    /// file, so a digest always stands for real bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl FileRecord {
    fn from_digest(absolute_path: PathBuf, digest: FileDigest) -> Self {
        FileRecord {
            absolute_path: Some(absolute_path),
            size: digest.size,
            modified_at: Some(DateTime::<Utc>::from(digest.mtime)),
            content_hash: digest.content_hash,
        }
    }
}

/// Point-in-time view of one tracker's file set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSnapshot {
    pub taken_at: DateTime<Utc>,
    pub detector_id: String,
    pub hash_algorithm: HashAlgorithm,
    pub normalize_line_endings: bool,
    /// Recorded for audit, never re-evaluated.
    #[serde(default)]
    pub watch_patterns: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
}

impl StateSnapshot {
    /// A snapshot with no files, used for first runs and unusable state.
    pub fn empty(config: &TrackerConfig) -> Self {
        Self::from_files(config, DateTime::<Utc>::from(UNIX_EPOCH), BTreeMap::new())
    }

    pub fn from_files(
        config: &TrackerConfig,
        taken_at: DateTime<Utc>,
        files: BTreeMap<String, FileRecord>,
    ) -> Self {
        StateSnapshot {
            taken_at,
            detector_id: config.detector_id.clone(),
            hash_algorithm: config.hash_algorithm,
            normalize_line_endings: config.normalize_line_endings,
            watch_patterns: config.watch_patterns.clone(),
            ignore_patterns: config.ignore_patterns.clone(),
            files,
        }
    }

    pub fn hasher(&self) -> ContentHasher {
        ContentHasher::new(self.hash_algorithm, self.normalize_line_endings)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SkipReason {
    #[error("not under root {0}")]
    OutsideRoot(PathBuf),
    #[error("path is not valid UTF-8")]
    NonUtf8,
    #[error(transparent)]
    Hash(#[from] HashError),
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Result of a snapshot run: the snapshot plus every input that was left out.
#[derive(Debug)]
pub struct SnapshotBuild {
    pub snapshot: StateSnapshot,
    pub skipped: Vec<SkippedFile>,
}

impl SnapshotBuild {
    /// Number of warnings emitted while building. Callers that must fail hard
    /// on unreadable files check this.
    pub fn warning_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Builds a snapshot of `paths`, keyed by their path relative to `root`.
///
/// # Behavior
///
/// - Every input is hashed with the configured algorithm and normalization.
/// - Inputs that cannot be read (permission denied, vanished since they were
///   listed, modified while hashing) are left out of the snapshot and logged
///   at warn level. On the next diff such a file looks deleted, and a later
///   scan that can read it again reports it as added.
/// - Inputs outside `root` or with non UTF-8 names are skipped the same way.
/// - Two inputs naming the same relative path are hashed once.
/// - Up to `config.parallelism()` files are hashed concurrently. The result is
///   keyed strictly by relative path, so neither input order nor completion
///   order affects it.
pub fn build_snapshot(paths: &[PathBuf], root: &Path, config: &TrackerConfig) -> SnapshotBuild {
    let taken_at = Utc::now();
    let mut skipped = Vec::new();

    let mut targets: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in paths {
        match relative_key(path, root) {
            Ok(key) => {
                targets.entry(key).or_insert_with(|| path.clone());
            }
            Err(reason) => skipped.push(SkippedFile {
                path: path.clone(),
                reason,
            }),
        }
    }

    let jobs: Vec<(String, PathBuf)> = targets.into_iter().collect();
    let workers = config.parallelism().min(jobs.len()).max(1);
    debug!("Hashing {} files with {} workers", jobs.len(), workers);

    let hashed = hash_all(&jobs, config.hasher(), workers);

    let mut files = BTreeMap::new();
    for (index, result) in hashed {
        let (key, path) = &jobs[index];
        match result {
            Ok(digest) => {
                files.insert(key.clone(), FileRecord::from_digest(path.clone(), digest));
            }
            Err(e) => skipped.push(SkippedFile {
                path: path.clone(),
                reason: SkipReason::Hash(e),
            }),
        }
    }

    skipped.sort_by(|a, b| a.path.cmp(&b.path));
    for skip in &skipped {
        warn!("Skipping {}: {}", skip.path.display(), skip.reason);
    }

    info!(
        "Snapshot of {} files taken for detector {}",
        files.len(),
        config.detector_id
    );

    SnapshotBuild {
        snapshot: StateSnapshot::from_files(config, taken_at, files),
        skipped,
    }
}

/// Hashes every job on `workers` scoped threads. Each worker claims the next
/// unclaimed index, so results come back tagged with their job index rather
/// than in any particular order.
fn hash_all(
    jobs: &[(String, PathBuf)],
    hasher: ContentHasher,
    workers: usize,
) -> Vec<(usize, Result<FileDigest, HashError>)> {
    let next = AtomicUsize::new(0);
    let next = &next;

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some((_, path)) = jobs.get(index) else {
                            break;
                        };
                        done.push((index, hasher.hash_file(path)));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
}

/// Forward-slash path of `path` relative to `root`.
fn relative_key(path: &Path, root: &Path) -> Result<String, SkipReason> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| SkipReason::OutsideRoot(root.to_path_buf()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or(SkipReason::NonUtf8)?),
            Component::CurDir => {}
            _ => return Err(SkipReason::OutsideRoot(root.to_path_buf())),
        }
    }

    if parts.is_empty() {
        return Err(SkipReason::OutsideRoot(root.to_path_buf()));
    }

    Ok(parts.join("/"))
}
