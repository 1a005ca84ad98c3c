//! Snapshot stores.
//!
//! Both stores implement compare-and-swap on a per-document revision: a save
//! only succeeds if the stored revision still equals the one the writer read.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborators::{SnapshotStore, StoredBlob};
use crate::error::{EscalationError, Result};
use crate::types::AlertGroupId;

fn check_revision(
    alert_group_id: &AlertGroupId,
    expected: Option<u64>,
    found: Option<u64>,
) -> Result<u64> {
    if expected != found {
        return Err(EscalationError::WriteConflict {
            id: alert_group_id.to_string(),
            expected,
            found,
        });
    }
    Ok(found.map_or(1, |revision| revision + 1))
}

/// Store keeping documents in a map.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<AlertGroupId, StoredBlob>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a document without a revision check.
    ///
    /// Bumps the revision so concurrent writers still see a conflict.
    pub fn put_raw(&self, alert_group_id: &AlertGroupId, blob: impl Into<String>) -> u64 {
        let mut documents = self.documents.write();
        let revision = documents.get(alert_group_id).map_or(1, |d| d.revision + 1);
        documents.insert(
            alert_group_id.clone(),
            StoredBlob {
                revision,
                blob: blob.into(),
            },
        );
        revision
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

impl SnapshotStore for InMemoryStore {
    fn load(&self, alert_group_id: &AlertGroupId) -> Result<Option<StoredBlob>> {
        Ok(self.documents.read().get(alert_group_id).cloned())
    }

    fn save(
        &self,
        alert_group_id: &AlertGroupId,
        blob: &str,
        expected_revision: Option<u64>,
    ) -> Result<u64> {
        let mut documents = self.documents.write();
        let found = documents.get(alert_group_id).map(|d| d.revision);
        let revision = check_revision(alert_group_id, expected_revision, found)?;
        documents.insert(
            alert_group_id.clone(),
            StoredBlob {
                revision,
                blob: blob.to_string(),
            },
        );
        Ok(revision)
    }
}

/// On-disk form of a stored document.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    revision: u64,
    document: serde_json::Value,
}

/// Store keeping one JSON file per alert group.
///
/// Writes go to a temporary file that is renamed over the target. Revision
/// checks are serialized by an in-process lock, so the directory must not be
/// shared between processes.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens a store in `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `EscalationError::Storage` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| storage_error("create", &dir, &e))?;
        debug!(path = %dir.display(), "opened escalation store");
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, alert_group_id: &AlertGroupId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(alert_group_id.as_str())))
    }

    fn read_record(path: &Path) -> Result<Option<FileRecord>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(storage_error("read", path, &err)),
        }
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self, alert_group_id: &AlertGroupId) -> Result<Option<StoredBlob>> {
        let _guard = self.lock.lock();
        let Some(record) = Self::read_record(&self.path_for(alert_group_id))? else {
            return Ok(None);
        };
        Ok(Some(StoredBlob {
            revision: record.revision,
            blob: serde_json::to_string(&record.document)?,
        }))
    }

    fn save(
        &self,
        alert_group_id: &AlertGroupId,
        blob: &str,
        expected_revision: Option<u64>,
    ) -> Result<u64> {
        let document: serde_json::Value = serde_json::from_str(blob)?;
        let _guard = self.lock.lock();
        let path = self.path_for(alert_group_id);
        let found = Self::read_record(&path)?.map(|r| r.revision);
        let revision = check_revision(alert_group_id, expected_revision, found)?;

        let contents = serde_json::to_string_pretty(&FileRecord { revision, document })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(|e| storage_error("write", &tmp, &e))?;
        fs::rename(&tmp, &path).map_err(|e| storage_error("rename", &tmp, &e))?;
        debug!(alert_group_id = %alert_group_id, revision, "saved escalation document");
        Ok(revision)
    }
}

fn storage_error(op: &str, path: &Path, err: &std::io::Error) -> EscalationError {
    EscalationError::Storage(format!("{op} {}: {err}", path.display()))
}

/// Percent-encodes everything but `[A-Za-z0-9_-]` so ids map to distinct file names.
fn file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "%{byte:02X}");
        }
    }
    stem
}
