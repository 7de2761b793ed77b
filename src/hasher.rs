use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("File modified during hashing: {0}")]
    ConcurrentModification(PathBuf),
}

/// Digest algorithm used for content and aggregate hashes.
///
/// The identifier is recorded in every snapshot and proof so that two hashes
/// produced by different algorithms are never compared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported hash algorithm: {0}")]
pub struct UnsupportedAlgorithm(pub String);

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of a hex encoded digest.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }

    /// Whether `hex` looks like a digest this algorithm produces: lowercase
    /// hex of the right length.
    pub fn is_digest(&self, hex: &str) -> bool {
        hex.len() == self.hex_len() && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = UnsupportedAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(UnsupportedAlgorithm(other.to_string())),
        }
    }
}

enum DigestState {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl DigestState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => DigestState::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            DigestState::Sha256(h) => h.update(bytes),
            DigestState::Sha512(h) => h.update(bytes),
        }
    }

    fn finish(self) -> String {
        match self {
            DigestState::Sha256(h) => format!("{:x}", h.finalize()),
            DigestState::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Streaming digest that optionally rewrites CRLF to LF.
///
/// A trailing CR is held back until the next chunk arrives so that a CRLF pair
/// split across two reads is still collapsed.
struct NormalizingDigest {
    inner: DigestState,
    normalize: bool,
    pending_cr: bool,
    seen_content: bool,
}

impl NormalizingDigest {
    fn new(algorithm: HashAlgorithm, normalize: bool) -> Self {
        NormalizingDigest {
            inner: DigestState::new(algorithm),
            normalize,
            pending_cr: false,
            seen_content: false,
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        self.seen_content |= !chunk.is_empty();
        if !self.normalize {
            self.inner.update(chunk);
            return;
        }
        if chunk.is_empty() {
            return;
        }

        if self.pending_cr {
            self.pending_cr = false;
            if chunk[0] != b'\n' {
                self.inner.update(b"\r");
            }
        }

        let mut start = 0;
        let mut pos = 0;
        while let Some(offset) = chunk[pos..].iter().position(|&b| b == b'\r') {
            let cr = pos + offset;
            if cr + 1 == chunk.len() {
                self.inner.update(&chunk[start..cr]);
                self.pending_cr = true;
                return;
            }
            if chunk[cr + 1] == b'\n' {
                self.inner.update(&chunk[start..cr]);
                start = cr + 1;
            }
            pos = cr + 1;
        }
        self.inner.update(&chunk[start..]);
    }

    /// `None` if no content was fed in.
    fn finish(mut self) -> Option<String> {
        if !self.seen_content {
            return None;
        }
        if self.pending_cr {
            self.inner.update(b"\r");
        }
        Some(self.inner.finish())
    }
}

pub struct FileDigest {
    /// Hex encoded; `None` for an empty file.
    pub content_hash: Option<String>,
    /// Modification time captured after hashing.
    pub mtime: SystemTime,
    /// File size in bytes, as stored on disk (before normalization).
    pub size: u64,
}

/// Content hasher for one tracker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
    normalize_line_endings: bool,
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm, normalize_line_endings: bool) -> Self {
        ContentHasher {
            algorithm,
            normalize_line_endings,
        }
    }

    /// Hashes content that may be absent, streaming it in 8 KiB chunks.
    ///
    /// Absent and empty content both have no digest. No sentinel is ever
    /// hashed in their place, so a digest always stands for real bytes.
    pub fn hash<R: Read>(&self, content: Option<R>) -> std::io::Result<Option<String>> {
        let Some(mut reader) = content else {
            return Ok(None);
        };

        let mut digest = NormalizingDigest::new(self.algorithm, self.normalize_line_endings);
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            digest.update(&buffer[..bytes_read]);
        }

        Ok(digest.finish())
    }

    /// Hashes bytes exactly as given, never normalizing. Empty input gets the
    /// ordinary digest of zero bytes.
    pub fn hash_raw(&self, content: &[u8]) -> String {
        let mut digest = DigestState::new(self.algorithm);
        digest.update(content);
        digest.finish()
    }

    /// Hashes a file with concurrent modification detection.
    ///
    /// # Behavior
    /// - Records the file's modification time before reading
    /// - Streams the content through the (optionally normalizing) digest
    /// - Verifies the modification time hasn't changed after reading
    ///
    /// # Errors
    /// - `HashError::Io`: File doesn't exist or other I/O errors
    /// - `HashError::PermissionDenied`: Insufficient permissions to read the file
    /// - `HashError::ConcurrentModification`: File was detected as being modified
    ///   while hashing. The absence of this error is *not* a guarantee that the
    ///   file was not modified.
    pub fn hash_file(&self, path: &Path) -> Result<FileDigest, HashError> {
        info!("Hashing {}", path.display());

        let metadata_before = std::fs::metadata(path).map_err(|e| io_error(e, path))?;
        let mtime_before = metadata_before.modified().map_err(HashError::Io)?;

        let file = File::open(path).map_err(|e| io_error(e, path))?;
        let content_hash = self.hash(Some(file)).map_err(|e| io_error(e, path))?;

        let metadata_after = std::fs::metadata(path).map_err(|e| io_error(e, path))?;
        let mtime_after = metadata_after.modified().map_err(HashError::Io)?;

        if mtime_before != mtime_after {
            return Err(HashError::ConcurrentModification(path.to_path_buf()));
        }

        debug!(
            "{} of {} is {}",
            self.algorithm,
            path.display(),
            content_hash.as_deref().unwrap_or("empty")
        );

        Ok(FileDigest {
            content_hash,
            mtime: mtime_after,
            size: metadata_after.len(),
        })
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        ContentHasher::new(HashAlgorithm::default(), true)
    }
}

fn io_error(e: std::io::Error, path: &Path) -> HashError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        HashError::PermissionDenied(path.to_path_buf())
    } else {
        HashError::Io(e)
    }
}
