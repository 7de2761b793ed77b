//! Persistence of the most recent snapshot per detector.
//!
//! The byte I/O sits behind [`BlobStorage`]; [`SnapshotStore`] owns the
//! versioned TOML encoding and the rule that missing or unusable state reads
//! back as an empty snapshot.
//!
//! The store assumes a single writer per state blob. The binary enforces that
//! with a [`StateLock`] held for the whole load, diff, save sequence.

use crate::config::TrackerConfig;
use crate::hasher::HashAlgorithm;
use crate::snapshot::StateSnapshot;
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory under the project root holding state, locks and configuration.
pub const STATE_DIR: &str = ".treeproof";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("State is locked by another run: {0}")]
    Locked(PathBuf),
}

#[derive(Debug, thiserror::Error)]
enum DecodeError {
    #[error("state is not valid UTF-8")]
    NotUtf8,
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("unsupported state version {0}")]
    UnsupportedVersion(u32),
    #[error("content_hash of {0:?} is not a {1} digest")]
    MalformedHash(String, HashAlgorithm),
}

/// Load/save of one opaque blob.
pub trait BlobStorage {
    /// Returns `None` when nothing has been stored yet.
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replaces the stored blob. A concurrent reader sees either the old or
    /// the new blob, never a mix.
    fn write_atomic(&self, bytes: &[u8]) -> Result<(), StoreError>;

    /// Human readable location, for log messages.
    fn describe(&self) -> String;
}

/// Blob stored as a single file, replaced via temp file and rename.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        FileStorage { path }
    }
}

impl BlobStorage for FileStorage {
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e, &self.path)),
        }
    }

    /// Writes to a temporary file in the target directory, fsyncs it, then
    /// renames it into place.
    fn write_atomic(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let parent = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| io_error(e, parent))?;

        let mut temp_file =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| io_error(e, parent))?;
        temp_file
            .write_all(bytes)
            .map_err(|e| io_error(e, &self.path))?;
        temp_file.as_file().sync_all().map_err(StoreError::Io)?;
        temp_file
            .persist(&self.path)
            .map_err(|e| io_error(e.error, &self.path))?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Blob kept in memory, for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
    blob: std::cell::RefCell<Option<Vec<u8>>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn with_blob(bytes: &[u8]) -> Self {
        MemoryStorage {
            blob: std::cell::RefCell::new(Some(bytes.to_vec())),
        }
    }
}

#[cfg(test)]
impl BlobStorage for MemoryStorage {
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blob.borrow().clone())
    }

    fn write_atomic(&self, bytes: &[u8]) -> Result<(), StoreError> {
        *self.blob.borrow_mut() = Some(bytes.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Metadata {
    version: u32,
}

/// Only the metadata section, so the version can be checked before the rest
/// of the document is interpreted.
#[derive(Debug, Deserialize)]
struct MetadataOnly {
    metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StateFile {
    metadata: Metadata,
    snapshot: StateSnapshot,
}

/// Where a loaded snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateOrigin {
    Stored,
    /// Nothing stored yet (first run).
    Missing,
    /// Stored state existed but could not be used; a warning was emitted.
    Unusable,
}

#[derive(Debug)]
pub struct LoadedState {
    pub snapshot: StateSnapshot,
    pub origin: StateOrigin,
}

pub struct SnapshotStore<S: BlobStorage> {
    storage: S,
}

impl<S: BlobStorage> SnapshotStore<S> {
    const SUPPORTED_VERSION: u32 = 1;

    pub fn new(storage: S) -> Self {
        SnapshotStore { storage }
    }

    /// Loads the previous snapshot for `config`'s detector.
    ///
    /// Never fails: a missing blob, an unreadable or corrupt blob, an
    /// unsupported version, or a snapshot taken by another detector or with
    /// another hash configuration all yield an empty snapshot. Everything
    /// except the first-run case is logged at warn level.
    pub fn load(&self, config: &TrackerConfig) -> LoadedState {
        let location = self.storage.describe();

        let bytes = match self.storage.read() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!("No stored state at {location}, starting from an empty snapshot");
                return Self::empty(config, StateOrigin::Missing);
            }
            Err(e) => {
                warn!("Cannot read stored state at {location}: {e}; treating as empty");
                return Self::empty(config, StateOrigin::Unusable);
            }
        };

        let snapshot = match Self::decode(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring corrupt state at {location}: {e}; treating as empty");
                return Self::empty(config, StateOrigin::Unusable);
            }
        };

        if snapshot.detector_id != config.detector_id {
            warn!(
                "State at {location} belongs to detector {}, not {}; treating as empty",
                snapshot.detector_id, config.detector_id
            );
            return Self::empty(config, StateOrigin::Unusable);
        }

        if snapshot.hash_algorithm != config.hash_algorithm
            || snapshot.normalize_line_endings != config.normalize_line_endings
        {
            warn!(
                "State at {location} was hashed with {} (normalize_line_endings = {}); treating as empty",
                snapshot.hash_algorithm, snapshot.normalize_line_endings
            );
            return Self::empty(config, StateOrigin::Unusable);
        }

        debug!(
            "Loaded {} files from state at {location}",
            snapshot.files.len()
        );

        LoadedState {
            snapshot,
            origin: StateOrigin::Stored,
        }
    }

    /// Persists `snapshot` atomically, replacing whatever was stored.
    pub fn save(&self, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        let content = Self::encode(snapshot)?;
        self.storage.write_atomic(content.as_bytes())?;
        debug!(
            "Saved {} files to state at {}",
            snapshot.files.len(),
            self.storage.describe()
        );
        Ok(())
    }

    fn encode(snapshot: &StateSnapshot) -> Result<String, StoreError> {
        let state_file = StateFile {
            metadata: Metadata {
                version: Self::SUPPORTED_VERSION,
            },
            snapshot: snapshot.clone(),
        };
        Ok(toml::to_string_pretty(&state_file)?)
    }

    fn decode(bytes: &[u8]) -> Result<StateSnapshot, DecodeError> {
        let content = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;

        let metadata_only: MetadataOnly = toml::from_str(content)?;
        if metadata_only.metadata.version != Self::SUPPORTED_VERSION {
            return Err(DecodeError::UnsupportedVersion(
                metadata_only.metadata.version,
            ));
        }

        let state_file: StateFile = toml::from_str(content)?;
        let snapshot = state_file.snapshot;

        let algorithm = snapshot.hash_algorithm;
        for (path, record) in &snapshot.files {
            if let Some(hash) = &record.content_hash
                && !algorithm.is_digest(hash)
            {
                return Err(DecodeError::MalformedHash(path.clone(), algorithm));
            }
        }

        Ok(snapshot)
    }

    fn empty(config: &TrackerConfig, origin: StateOrigin) -> LoadedState {
        LoadedState {
            snapshot: StateSnapshot::empty(config),
            origin,
        }
    }
}

/// Location of the state file for `detector_id` under `root`.
pub fn state_path(root: &Path, detector_id: &str) -> PathBuf {
    root.join(STATE_DIR)
        .join(format!("{detector_id}.state.toml"))
}

/// Exclusive advisory lock on a state file, released on drop.
///
/// The lock lives on a sibling `.lock` file so that the atomic rename of the
/// state file itself does not drop it.
#[derive(Debug)]
pub struct StateLock {
    _file: File,
    path: PathBuf,
}

impl StateLock {
    /// Takes the lock without waiting. Fails with [`StoreError::Locked`] if
    /// another run holds it.
    pub fn acquire(state_path: &Path) -> Result<Self, StoreError> {
        let mut lock_name = state_path.as_os_str().to_owned();
        lock_name.push(".lock");
        let path = PathBuf::from(lock_name);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(e, parent))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| io_error(e, &path))?;

        if !try_lock_exclusive(&file).map_err(|e| io_error(e, &path))? {
            return Err(StoreError::Locked(path));
        }

        debug!("Acquired state lock {}", path.display());
        Ok(StateLock { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    match FileExt::try_lock_exclusive(file) {
        Ok(()) => Ok(true),
        Err(e) if e.raw_os_error() == fs4::lock_contended_error().raw_os_error() => Ok(false),
        Err(e) => Err(e),
    }
}

fn io_error(e: std::io::Error, path: &Path) -> StoreError {
    if e.kind() == ErrorKind::PermissionDenied {
        StoreError::PermissionDenied(path.to_path_buf())
    } else {
        StoreError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::FileRecord;
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample_snapshot(config: &TrackerConfig) -> StateSnapshot {
        let mut files = BTreeMap::new();
        files.insert(
            "docs/readme.md".to_string(),
            FileRecord {
                absolute_path: None,
                size: 12,
                modified_at: Some(fixed_time()),
                content_hash: Some("aa".repeat(32)),
            },
        );
        files.insert(
            "locked.bin".to_string(),
            FileRecord {
                absolute_path: None,
                size: 3,
                modified_at: None,
                content_hash: None,
            },
        );
        StateSnapshot::from_files(config, fixed_time(), files)
    }

    #[test]
    fn test_missing_state_loads_empty() {
        let config = TrackerConfig::default();
        let store = SnapshotStore::new(MemoryStorage::default());

        let loaded = store.load(&config);

        assert_eq!(loaded.origin, StateOrigin::Missing);
        assert!(loaded.snapshot.files.is_empty());
        assert_eq!(loaded.snapshot.detector_id, "default");
    }

    #[test]
    fn test_round_trip() {
        let config = TrackerConfig::default();
        let store = SnapshotStore::new(MemoryStorage::default());
        let snapshot = sample_snapshot(&config);

        store.save(&snapshot).unwrap();
        let loaded = store.load(&config);

        assert_eq!(loaded.origin, StateOrigin::Stored);
        assert_eq!(loaded.snapshot, snapshot);
    }

    #[test]
    fn test_absolute_paths_are_not_persisted() {
        let config = TrackerConfig::default();
        let mut snapshot = sample_snapshot(&config);
        snapshot
            .files
            .get_mut("docs/readme.md")
            .unwrap()
            .absolute_path = Some(PathBuf::from("/home/someone/project/docs/readme.md"));

        let encoded = SnapshotStore::<MemoryStorage>::encode(&snapshot).unwrap();

        assert!(!encoded.contains("/home/someone"));
        assert!(encoded.contains("[metadata]"));
        assert!(encoded.contains("version = 1"));
        assert!(encoded.contains("docs/readme.md"));
    }

    #[test]
    fn test_corrupt_state_loads_empty() {
        let config = TrackerConfig::default();
        let store = SnapshotStore::new(MemoryStorage::with_blob(b"[metadata\nversion = "));

        let loaded = store.load(&config);

        assert_eq!(loaded.origin, StateOrigin::Unusable);
        assert!(loaded.snapshot.files.is_empty());
    }

    #[test]
    fn test_non_utf8_state_loads_empty() {
        let store = SnapshotStore::new(MemoryStorage::with_blob(&[0xff, 0xfe, 0x00]));
        let loaded = store.load(&TrackerConfig::default());
        assert_eq!(loaded.origin, StateOrigin::Unusable);
    }

    #[test]
    fn test_unsupported_version_loads_empty() {
        let blob = br#"
[metadata]
version = 999

[snapshot]
whatever = "future format"
"#;
        let store = SnapshotStore::new(MemoryStorage::with_blob(blob));

        let loaded = store.load(&TrackerConfig::default());

        assert_eq!(loaded.origin, StateOrigin::Unusable);
        assert!(loaded.snapshot.files.is_empty());
    }

    #[test]
    fn test_unknown_field_is_corrupt() {
        let config = TrackerConfig::default();
        let store = SnapshotStore::new(MemoryStorage::default());
        store.save(&sample_snapshot(&config)).unwrap();

        let mut text = String::from_utf8(store.storage.read().unwrap().unwrap()).unwrap();
        text = text.replace("size = 3", "size = 3\nsurprise = true");
        let store = SnapshotStore::new(MemoryStorage::with_blob(text.as_bytes()));

        assert_eq!(store.load(&config).origin, StateOrigin::Unusable);
    }

    #[test]
    fn test_malformed_hash_is_corrupt() {
        let config = TrackerConfig::default();
        let store = SnapshotStore::new(MemoryStorage::default());
        store.save(&sample_snapshot(&config)).unwrap();
        let text = String::from_utf8(store.storage.read().unwrap().unwrap()).unwrap();

        for forged in ["\u{e9}".repeat(32), "AA".repeat(32), "aa".repeat(31)] {
            let edited = text.replace(&"aa".repeat(32), &forged);
            let store = SnapshotStore::new(MemoryStorage::with_blob(edited.as_bytes()));

            let loaded = store.load(&config);

            assert_eq!(loaded.origin, StateOrigin::Unusable, "{forged:?}");
            assert!(loaded.snapshot.files.is_empty());
        }
    }

    #[test]
    fn test_other_detector_state_is_ignored() {
        let docs = TrackerConfig::default().with_detector_id("docs").unwrap();
        let store = SnapshotStore::new(MemoryStorage::default());
        store.save(&sample_snapshot(&docs)).unwrap();

        let loaded = store.load(&TrackerConfig::default());

        assert_eq!(loaded.origin, StateOrigin::Unusable);
        assert!(loaded.snapshot.files.is_empty());
    }

    #[test]
    fn test_other_hash_configuration_is_ignored() {
        let sha256 = TrackerConfig::default();
        let sha512 = TrackerConfig {
            hash_algorithm: HashAlgorithm::Sha512,
            ..TrackerConfig::default()
        };
        let store = SnapshotStore::new(MemoryStorage::default());
        store.save(&sample_snapshot(&sha256)).unwrap();

        assert_eq!(store.load(&sha512).origin, StateOrigin::Unusable);
        assert_eq!(store.load(&sha256).origin, StateOrigin::Stored);
    }

    #[test]
    fn test_file_storage_save_creates_directory_and_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let config = TrackerConfig::default();
        let path = state_path(temp.path(), &config.detector_id);
        let store = SnapshotStore::new(FileStorage::new(path.clone()));

        store.save(&sample_snapshot(&config)).unwrap();
        store.save(&sample_snapshot(&config)).unwrap();

        let names: Vec<String> = std::fs::read_dir(temp.path().join(STATE_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["default.state.toml".to_string()]);
        assert_eq!(store.load(&config).snapshot, sample_snapshot(&config));
    }

    #[test]
    fn test_file_storage_missing_file_reads_none() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path().join("absent.toml"));
        assert!(storage.read().unwrap().is_none());
    }

    #[test]
    fn test_file_storage_write_failure_is_reported() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file in the way").unwrap();
        let store = SnapshotStore::new(FileStorage::new(blocker.join("state.toml")));

        let result = store.save(&sample_snapshot(&TrackerConfig::default()));

        assert!(result.is_err());
    }

    #[test]
    fn test_state_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let path = state_path(temp.path(), "default");

        let first = StateLock::acquire(&path).unwrap();
        assert!(first.path().ends_with("default.state.toml.lock"));

        match StateLock::acquire(&path) {
            Err(StoreError::Locked(_)) => {}
            other => panic!("Expected Locked error, got {other:?}"),
        }

        drop(first);
        assert!(StateLock::acquire(&path).is_ok());
    }
}
