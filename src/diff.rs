use crate::snapshot::{FileRecord, StateSnapshot};
use crate::util::hashing::{hash_field, hash_optional_field, hash_u64_field};
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Short status code, as printed in front of a path.
    pub fn code(&self) -> &'static str {
        match self {
            ChangeKind::Added => "A",
            ChangeKind::Modified => "M",
            ChangeKind::Deleted => "D",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// One difference between two snapshots.
///
/// `current` is set for added and modified files, `previous` for modified and
/// deleted ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub relative_path: String,
    pub current: Option<FileRecord>,
    pub previous: Option<FileRecord>,
    #[allow(dead_code)]
    pub detected_at: DateTime<Utc>,
}

/// Classifies every path that differs between `previous` and `current`.
///
/// * `Added` - path only in `current`
/// * `Deleted` - path only in `previous`
/// * `Modified` - path in both with different content hashes. A missing hash
///   never equals a real one, so a file that was emptied or filled is
///   surfaced. Size and timestamp are ignored.
///
/// Paths with equal hashes produce nothing, so `diff(s, s)` is empty. The
/// result is sorted by path; no path appears twice. Every change is stamped
/// with `current.taken_at`.
pub fn diff(previous: &StateSnapshot, current: &StateSnapshot) -> Vec<ChangeRecord> {
    let detected_at = current.taken_at;
    let mut changes = Vec::new();

    for (path, record) in &current.files {
        match previous.files.get(path) {
            None => changes.push(ChangeRecord {
                kind: ChangeKind::Added,
                relative_path: path.clone(),
                current: Some(record.clone()),
                previous: None,
                detected_at,
            }),
            Some(old) if old.content_hash != record.content_hash => {
                changes.push(ChangeRecord {
                    kind: ChangeKind::Modified,
                    relative_path: path.clone(),
                    current: Some(record.clone()),
                    previous: Some(old.clone()),
                    detected_at,
                })
            }
            Some(_) => {}
        }
    }

    for (path, record) in &previous.files {
        if !current.files.contains_key(path) {
            changes.push(ChangeRecord {
                kind: ChangeKind::Deleted,
                relative_path: path.clone(),
                current: None,
                previous: Some(record.clone()),
                detected_at,
            });
        }
    }

    changes.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    changes
}

/// A fingerprint identifying a set of changes.
///
/// Currently a base64 encoded SHA-256 over the path-sorted changes, covering
/// path, kind and both content hashes. It does not depend on `detected_at`,
/// sizes or timestamps, so re-running detection over an untouched tree gives
/// the same fingerprint, while any further content change alters it.
pub fn change_fingerprint(changes: &[ChangeRecord]) -> String {
    let mut sorted: Vec<&ChangeRecord> = changes.iter().collect();
    sorted.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let mut hasher = Sha256::new();
    hash_u64_field(&mut hasher, sorted.len() as u64);

    for change in sorted {
        hash_field(&mut hasher, change.relative_path.as_bytes());
        hash_field(&mut hasher, change.kind.code().as_bytes());
        hash_optional_field(&mut hasher, content_hash(&change.previous));
        hash_optional_field(&mut hasher, content_hash(&change.current));
    }

    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn content_hash(record: &Option<FileRecord>) -> Option<&[u8]> {
    record
        .as_ref()
        .and_then(|r| r.content_hash.as_deref())
        .map(str::as_bytes)
}
