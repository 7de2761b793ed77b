//! Portable proof documents.
//!
//! A proof records every file hash of a snapshot plus an aggregate hash over
//! the sorted hash multiset. A third party rebuilds a snapshot of the same
//! file set and calls [`verify_proof`]; when the aggregates and file counts
//! match nothing further is inspected.

use crate::config::ConfigError;
use crate::diff::{ChangeKind, diff};
use crate::enumerate::FileSelector;
use crate::hasher::{ContentHasher, HashAlgorithm, UnsupportedAlgorithm};
use crate::snapshot::{FileRecord, StateSnapshot};
use crate::store::{BlobStorage, FileStorage, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Cannot write proof: {0}")]
    Store(#[from] StoreError),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Unsupported proof format version: {0}")]
    UnsupportedVersion(u32),
    #[error(transparent)]
    UnsupportedAlgorithm(#[from] UnsupportedAlgorithm),
    #[error("Proof uses {proof} but the snapshot was hashed with {snapshot}")]
    AlgorithmMismatch {
        proof: HashAlgorithm,
        snapshot: HashAlgorithm,
    },
    #[error(
        "Proof has normalize_line_endings = {proof} but the snapshot has normalize_line_endings = {snapshot}"
    )]
    NormalizationMismatch { proof: bool, snapshot: bool },
    #[error("Proof is internally inconsistent: {0}")]
    Inconsistent(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Hashing and selection settings a proof was generated under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProofConfig {
    pub hash_algorithm: HashAlgorithm,
    pub normalize_line_endings: bool,
    #[serde(default)]
    pub watch_patterns: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProofDocument {
    pub format_version: u32,
    pub detector_id: String,
    pub generated_at: DateTime<Utc>,
    /// Opaque name for the project; never an absolute path.
    pub project_root_label: String,
    pub file_count: u64,
    pub aggregate_hash: String,
    pub config: ProofConfig,
    pub files: BTreeMap<String, FileRecord>,
}

/// Just enough of a proof to decide whether the rest can be interpreted.
#[derive(Debug, Deserialize)]
struct ProofHeader {
    format_version: u32,
    config: HeaderConfig,
}

#[derive(Debug, Deserialize)]
struct HeaderConfig {
    hash_algorithm: String,
}

impl ProofDocument {
    pub const FORMAT_VERSION: u32 = 1;

    /// Parse a proof, checking format version and hash algorithm before the
    /// rest of the document so that a proof from a newer release is reported
    /// as such rather than as a parse error.
    pub fn from_toml(content: &str) -> Result<Self, ProofError> {
        let header: ProofHeader = toml::from_str(content)?;

        if header.format_version != Self::FORMAT_VERSION {
            return Err(ProofError::UnsupportedVersion(header.format_version));
        }
        header.config.hash_algorithm.parse::<HashAlgorithm>()?;

        let proof: ProofDocument = toml::from_str(content)?;
        FileSelector::new(&proof.config.watch_patterns, &proof.config.ignore_patterns)?;
        Ok(proof)
    }

    pub fn to_toml(&self) -> Result<String, ProofError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, ProofError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ProofError::PermissionDenied(path.to_path_buf())
            } else {
                ProofError::Io(e)
            }
        })?;

        Self::from_toml(&content)
    }

    /// Write the proof atomically.
    pub fn save(&self, path: &Path) -> Result<(), ProofError> {
        let content = self.to_toml()?;
        FileStorage::new(path.to_path_buf()).write_atomic(content.as_bytes())?;
        Ok(())
    }

    pub fn hasher(&self) -> ContentHasher {
        ContentHasher::new(self.config.hash_algorithm, self.config.normalize_line_endings)
    }

    /// Checks that the document agrees with itself: known version, a file
    /// count matching the file table, well formed file hashes, and an
    /// aggregate hash matching them.
    pub fn check_consistency(&self) -> Result<(), ProofError> {
        if self.format_version != Self::FORMAT_VERSION {
            return Err(ProofError::UnsupportedVersion(self.format_version));
        }

        if self.file_count != self.files.len() as u64 {
            return Err(ProofError::Inconsistent(format!(
                "file_count is {} but {} files are listed",
                self.file_count,
                self.files.len()
            )));
        }

        if let Some((path, _)) = self.files.iter().find(|(_, record)| {
            record
                .content_hash
                .as_deref()
                .is_some_and(|hash| !self.config.hash_algorithm.is_digest(hash))
        }) {
            return Err(ProofError::Inconsistent(format!(
                "content_hash of {path:?} is not a {} digest",
                self.config.hash_algorithm
            )));
        }

        let recomputed = aggregate_of(self.files.values(), self.hasher());
        if recomputed != self.aggregate_hash {
            return Err(ProofError::Inconsistent(
                "aggregate_hash does not match the listed file hashes".to_string(),
            ));
        }

        Ok(())
    }

    /// The proof's file table viewed as a snapshot, for comparison.
    fn as_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            taken_at: self.generated_at,
            detector_id: self.detector_id.clone(),
            hash_algorithm: self.config.hash_algorithm,
            normalize_line_endings: self.config.normalize_line_endings,
            watch_patterns: self.config.watch_patterns.clone(),
            ignore_patterns: self.config.ignore_patterns.clone(),
            files: self.files.clone(),
        }
    }
}

/// Aggregate hash of a snapshot.
///
/// Present content hashes are sorted, concatenated and hashed with the
/// snapshot's algorithm. Paths, timestamps and enumeration order do not
/// contribute, and files without a hash are left out.
pub fn aggregate_hash(snapshot: &StateSnapshot) -> String {
    aggregate_of(snapshot.files.values(), snapshot.hasher())
}

fn aggregate_of<'a>(
    records: impl Iterator<Item = &'a FileRecord>,
    hasher: ContentHasher,
) -> String {
    let mut hashes: Vec<&str> = records.filter_map(|r| r.content_hash.as_deref()).collect();
    hashes.sort_unstable();
    hasher.hash_raw(hashes.concat().as_bytes())
}

/// Packages `snapshot` into a proof labelled `project_root_label`.
pub fn generate_proof(snapshot: &StateSnapshot, project_root_label: &str) -> ProofDocument {
    let files: BTreeMap<String, FileRecord> = snapshot
        .files
        .iter()
        .map(|(path, record)| {
            let mut record = record.clone();
            record.absolute_path = None;
            (path.clone(), record)
        })
        .collect();

    let aggregate_hash = aggregate_hash(snapshot);
    info!(
        "Generated proof over {} files for detector {}: {}",
        files.len(),
        snapshot.detector_id,
        aggregate_hash
    );

    ProofDocument {
        format_version: ProofDocument::FORMAT_VERSION,
        detector_id: snapshot.detector_id.clone(),
        generated_at: Utc::now(),
        project_root_label: project_root_label.to_string(),
        file_count: files.len() as u64,
        aggregate_hash,
        config: ProofConfig {
            hash_algorithm: snapshot.hash_algorithm,
            normalize_line_endings: snapshot.normalize_line_endings,
            watch_patterns: snapshot.watch_patterns.clone(),
            ignore_patterns: snapshot.ignore_patterns.clone(),
        },
        files,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscrepancyKind {
    /// Listed in the proof, absent now.
    Missing { expected: Option<String> },
    /// Present in both with different hashes.
    Modified {
        expected: Option<String>,
        actual: Option<String>,
    },
    /// Present now, not listed in the proof.
    Added { actual: Option<String> },
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscrepancyKind::Missing { .. } => "missing",
            DiscrepancyKind::Modified { .. } => "modified",
            DiscrepancyKind::Added { .. } => "added",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub relative_path: String,
    pub kind: DiscrepancyKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub verified: bool,
    /// Sorted by path. Empty when verified.
    pub discrepancies: Vec<Discrepancy>,
}

/// Verifies `proof` against a freshly built snapshot.
///
/// # Errors
///
/// An `Err` means the proof *cannot be verified* (unknown format, different
/// hash configuration, self-contradicting document). That is not evidence of
/// tampering with the files, which is reported as `verified == false`.
pub fn verify_proof(
    proof: &ProofDocument,
    current: &StateSnapshot,
) -> Result<Verification, ProofError> {
    proof.check_consistency()?;

    if proof.config.hash_algorithm != current.hash_algorithm {
        return Err(ProofError::AlgorithmMismatch {
            proof: proof.config.hash_algorithm,
            snapshot: current.hash_algorithm,
        });
    }
    if proof.config.normalize_line_endings != current.normalize_line_endings {
        return Err(ProofError::NormalizationMismatch {
            proof: proof.config.normalize_line_endings,
            snapshot: current.normalize_line_endings,
        });
    }

    // Files without a hash do not move the aggregate, so the count has to
    // agree as well before skipping the per-file comparison.
    let actual = aggregate_hash(current);
    if actual == proof.aggregate_hash && current.files.len() == proof.files.len() {
        debug!("Aggregate hash {actual} matches proof");
        return Ok(Verification {
            verified: true,
            discrepancies: Vec::new(),
        });
    }

    debug!(
        "Aggregate hash {actual} ({} files) differs from proof {} ({} files), comparing files",
        current.files.len(),
        proof.aggregate_hash,
        proof.files.len()
    );

    let discrepancies = diff(&proof.as_snapshot(), current)
        .into_iter()
        .map(|change| {
            let expected = change.previous.and_then(|r| r.content_hash);
            let actual = change.current.and_then(|r| r.content_hash);
            let kind = match change.kind {
                ChangeKind::Deleted => DiscrepancyKind::Missing { expected },
                ChangeKind::Modified => DiscrepancyKind::Modified { expected, actual },
                ChangeKind::Added => DiscrepancyKind::Added { actual },
            };
            Discrepancy {
                relative_path: change.relative_path,
                kind,
            }
        })
        .collect();

    Ok(Verification {
        verified: false,
        discrepancies,
    })
}
