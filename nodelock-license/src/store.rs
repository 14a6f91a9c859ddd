//! Binding record persistence.
//!
//! One record per installation, stored as JSON in `<storage_root>/.linked`.
//! Writers hold an advisory exclusive lock on `<storage_root>/.linked.lock`
//! (flock on Unix, LockFileEx on Windows) and replace the record atomically
//! through a temp file in the same directory, so readers never observe a
//! half-written record and need no lock of their own.

use crate::error::{LicenseError, LicenseResult};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the binding record.
pub const RECORD_FILE: &str = ".linked";

/// File name of the writer lock.
pub const LOCK_FILE: &str = ".linked.lock";

/// Proof that this installation accepted a serial for a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRecord {
    /// Canonical host the serial was bound to.
    pub bound_ip: String,
    /// The bound serial string.
    pub bound_serial: String,
    /// Expiration carried by the serial.
    pub expiration: DateTime<Utc>,
    /// When the binding was written.
    pub bound_at: DateTime<Utc>,
    /// Machine name at bind time (informational).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Exclusive writer lock on a storage root, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // Closing the handle releases the lock anyway
        let _ = FileExt::unlock(&self.file);
    }
}

/// Reads and writes the binding record of one storage root.
#[derive(Debug, Clone)]
pub struct BindingStore {
    root: PathBuf,
}

impl BindingStore {
    /// Opens the store at `root`, creating the directory if needed and
    /// checking that it is writable.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidParams`] if the directory cannot be
    /// created or written to.
    pub fn open(root: impl Into<PathBuf>) -> LicenseResult<Self> {
        let root = root.into();

        fs::create_dir_all(&root).map_err(|e| {
            LicenseError::InvalidParams(format!(
                "cannot create storage root {}: {e}",
                root.display()
            ))
        })?;

        tempfile::NamedTempFile::new_in(&root).map_err(|e| {
            LicenseError::InvalidParams(format!(
                "storage root {} is not writable: {e}",
                root.display()
            ))
        })?;

        Ok(Self { root })
    }

    /// The storage root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the binding record.
    #[must_use]
    pub fn record_path(&self) -> PathBuf {
        self.root.join(RECORD_FILE)
    }

    /// Blocks until the exclusive writer lock is acquired.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Storage`] if the lock file cannot be opened or locked.
    pub fn lock(&self) -> LicenseResult<StoreLock> {
        let path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| LicenseError::Storage(format!("cannot open {}: {e}", path.display())))?;

        file.lock_exclusive()
            .map_err(|e| LicenseError::Storage(format!("cannot lock {}: {e}", path.display())))?;

        debug!(path = %path.display(), "Acquired binding lock");
        Ok(StoreLock { file })
    }

    /// Loads the binding record.
    ///
    /// Returns `Ok(None)` when no record exists.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Storage`] if the record cannot be read and
    /// [`LicenseError::CorruptRecord`] if it cannot be parsed.
    pub fn load(&self) -> LicenseResult<Option<BindingRecord>> {
        let path = self.record_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LicenseError::Storage(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Binding record is corrupt");
            LicenseError::CorruptRecord(e.to_string())
        })
    }

    /// Atomically replaces the binding record.
    ///
    /// The caller must hold the writer lock; the previous record stays in
    /// place if any step fails.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::BindFailed`] if the record cannot be written.
    pub fn save(&self, record: &BindingRecord, _lock: &StoreLock) -> LicenseResult<()> {
        let path = self.record_path();
        let fail = |e: &dyn std::fmt::Display| {
            LicenseError::BindFailed(format!("cannot write {}: {e}", path.display()))
        };

        let json = serde_json::to_vec_pretty(record)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(|e| fail(&e))?;
        tmp.write_all(&json).map_err(|e| fail(&e))?;
        tmp.as_file().sync_all().map_err(|e| fail(&e))?;
        tmp.persist(&path).map_err(|e| fail(&e.error))?;

        sync_dir(&self.root);
        debug!(path = %path.display(), bound_ip = %record.bound_ip, "Binding record written");
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    // Makes the rename durable; the record itself is already synced
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(ip: &str) -> BindingRecord {
        BindingRecord {
            bound_ip: ip.into(),
            bound_serial: "serial".into(),
            expiration: DateTime::from_timestamp(1_800_000_000, 0).unwrap(),
            bound_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            hostname: Some("node-1".into()),
        }
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = BindingStore::open(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = BindingStore::open(dir.path()).unwrap();
        let lock = store.lock().unwrap();

        store.save(&record("203.0.113.7"), &lock).unwrap();
        assert_eq!(store.load().unwrap(), Some(record("203.0.113.7")));
    }

    #[test]
    fn save_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = BindingStore::open(dir.path()).unwrap();
        let lock = store.lock().unwrap();

        store.save(&record("203.0.113.7"), &lock).unwrap();
        store.save(&record("198.51.100.9"), &lock).unwrap();
        assert_eq!(store.load().unwrap().unwrap().bound_ip, "198.51.100.9");

        // Only the record and the lock file remain; no stray temp files
        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec![RECORD_FILE.to_string(), LOCK_FILE.to_string()]);
    }

    #[test]
    fn corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = BindingStore::open(dir.path()).unwrap();
        fs::write(store.record_path(), b"{\"bound_ip\": ").unwrap();

        assert!(matches!(store.load(), Err(LicenseError::CorruptRecord(_))));
    }

    #[test]
    fn open_creates_nested_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = BindingStore::open(&nested).unwrap();
        assert!(store.root().is_dir());
    }

    #[test]
    fn open_rejects_file_as_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            BindingStore::open(&file),
            Err(LicenseError::InvalidParams(_))
        ));
    }
}
