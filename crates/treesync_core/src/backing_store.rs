//! Persistence for directory snapshots.
//!
//! A snapshot is the whole directory state: share info, every entry
//! (tombstones included) and the unapplied-update queue. It is framed as:
//!
//! ```text
//! | magic "TSNP" (4) | format version u16 LE (2) | SHA-256 of body (32) | CBOR body |
//! ```
//!
//! File-backed stores use this layout on disk:
//!
//! ```text
//! <dir>/
//! ├─ LOCK              # Advisory lock, one opener at a time
//! └─ SNAPSHOT          # Latest committed snapshot
//! ```

use crate::entry::{EntryKernel, Update};
use crate::error::{CoreError, CoreResult};
use crate::kernel::ShareInfo;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Magic bytes at the start of every snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"TSNP";

/// Current snapshot format version.
pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 32;
const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "SNAPSHOT";
const SNAPSHOT_TEMP: &str = "SNAPSHOT.tmp";

/// Full persisted state of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version the snapshot was written with.
    pub format_version: u16,
    /// Share bookkeeping.
    pub info: ShareInfo,
    /// Every entry, sorted by id.
    pub entries: Vec<EntryKernel>,
    /// Updates carried over to the next sync cycle.
    pub unapplied: Vec<Update>,
}

impl Snapshot {
    /// Encodes the snapshot with its header.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if CBOR serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut body = Vec::new();
        ciborium::into_writer(self, &mut body).map_err(|e| CoreError::Codec(e.to_string()))?;

        let digest = Sha256::digest(&body);
        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(&SNAPSHOT_MAGIC);
        buf.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&digest);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decodes and verifies a framed snapshot.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` for a wrong magic or unsupported version
    /// - `Corrupted` for a truncated buffer, checksum mismatch or bad body
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(CoreError::corrupted(format!(
                "snapshot truncated: {} bytes",
                data.len()
            )));
        }
        if data[0..4] != SNAPSHOT_MAGIC {
            return Err(CoreError::invalid_format("bad snapshot magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != SNAPSHOT_FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported snapshot version {version}"
            )));
        }

        let body = &data[HEADER_LEN..];
        let digest = Sha256::digest(body);
        if digest.as_slice() != &data[6..HEADER_LEN] {
            return Err(CoreError::corrupted("snapshot checksum mismatch"));
        }

        ciborium::from_reader(body).map_err(|e| CoreError::corrupted(e.to_string()))
    }
}

/// Where a directory keeps its snapshots.
pub trait BackingStore: Send {
    /// Loads the latest snapshot, or `None` for a fresh store.
    fn load(&mut self) -> CoreResult<Option<Snapshot>>;

    /// Replaces the stored snapshot.
    fn save(&mut self, snapshot: &Snapshot) -> CoreResult<()>;
}

/// Backing store kept in memory.
///
/// Clones share the same buffer, so a test can keep a handle, drop the
/// directory and reopen it from the same bytes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackingStore {
    data: Arc<Mutex<Option<Vec<u8>>>>,
}

impl InMemoryBackingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once a snapshot has been saved.
    #[must_use]
    pub fn has_snapshot(&self) -> bool {
        self.data.lock().is_some()
    }

    /// Overwrites the raw stored bytes.
    pub fn set_raw(&self, bytes: Vec<u8>) {
        *self.data.lock() = Some(bytes);
    }
}

impl BackingStore for InMemoryBackingStore {
    fn load(&mut self) -> CoreResult<Option<Snapshot>> {
        match self.data.lock().as_deref() {
            Some(bytes) => Snapshot::decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn save(&mut self, snapshot: &Snapshot) -> CoreResult<()> {
        let bytes = snapshot.encode()?;
        *self.data.lock() = Some(bytes);
        Ok(())
    }
}

/// Backing store in a file-system directory.
///
/// Holds an exclusive advisory lock on the directory for its lifetime.
#[derive(Debug)]
pub struct FileBackingStore {
    path: PathBuf,
    _lock_file: File,
}

impl FileBackingStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the path is missing (and `create_if_missing` is
    ///   false) or is not a directory
    /// - `DirectoryLocked` if another opener holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

impl BackingStore for FileBackingStore {
    fn load(&mut self) -> CoreResult<Option<Snapshot>> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        if data.is_empty() {
            return Ok(None);
        }
        Snapshot::decode(&data).map(Some)
    }

    fn save(&mut self, snapshot: &Snapshot) -> CoreResult<()> {
        let data = snapshot.encode()?;
        let temp_path = self.path.join(SNAPSHOT_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.snapshot_path())?;
        self.sync_directory()
    }
}
