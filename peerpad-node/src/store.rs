//! On-disk store backend: one JSON record per code, file payloads as blobs beside them.
//!
//! Layout under the root: `<CODE>.json`, `blobs/<uuid>` and `tmp/` for records being
//! written. Blob URLs are `file://` URLs pointing into `blobs/`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use peerpad_core::store::{BackendError, StoreBackend};
use peerpad_core::{StoreCode, StoredItem};
use tracing::{debug, warn};

const BLOB_DIR: &str = "blobs";
const TMP_DIR: &str = "tmp";
const FILE_URL_PREFIX: &str = "file://";

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Use `root`, creating it and its blob directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root: PathBuf = root.into();
        fs::create_dir_all(root.join(BLOB_DIR))?;
        fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    fn record_path(&self, code: &StoreCode) -> PathBuf {
        self.root.join(format!("{}.json", code.as_str()))
    }

    fn blob_path(&self, url: &str) -> Result<PathBuf, BackendError> {
        let path = url
            .strip_prefix(FILE_URL_PREFIX)
            .map(PathBuf::from)
            .ok_or_else(|| BackendError::MissingBlob(url.to_string()))?;
        // Only blobs this store wrote.
        if path.parent() != Some(self.root.join(BLOB_DIR).as_path()) {
            return Err(BackendError::MissingBlob(url.to_string()));
        }
        Ok(path)
    }
}

impl StoreBackend for FsStore {
    fn insert(&mut self, item: &StoredItem) -> Result<(), BackendError> {
        let json = serde_json::to_vec_pretty(item).map_err(|e| BackendError::Serialize(e.to_string()))?;
        let path = self.record_path(&item.code);
        let tmp = self
            .root
            .join(TMP_DIR)
            .join(format!("{}.{}", item.code.as_str(), uuid::Uuid::new_v4()));
        // The record only appears under its code once it is complete.
        let linked = write_synced(&tmp, &json).and_then(|()| fs::hard_link(&tmp, &path));
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "could not remove temporary record");
            }
        }
        match linked {
            Ok(()) => {
                debug!(path = %path.display(), "record written");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(BackendError::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, code: &StoreCode) -> Result<Option<StoredItem>, BackendError> {
        let bytes = match fs::read(self.record_path(code)) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let item = serde_json::from_slice(&bytes).map_err(|e| BackendError::Serialize(e.to_string()))?;
        Ok(Some(item))
    }

    fn put_blob(&mut self, bytes: &[u8]) -> Result<String, BackendError> {
        let path = self.root.join(BLOB_DIR).join(uuid::Uuid::new_v4().to_string());
        fs::write(&path, bytes)?;
        Ok(format!("{FILE_URL_PREFIX}{}", path.display()))
    }

    fn get_blob(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        let path = self.blob_path(url)?;
        match fs::read(&path) {
            Ok(b) => Ok(b),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackendError::MissingBlob(url.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_blob(&mut self, url: &str) -> Result<(), BackendError> {
        let path = self.blob_path(url)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "blob removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
