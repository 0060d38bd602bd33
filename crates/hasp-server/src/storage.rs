//! Restore state persisted in the `.storage/` directory
//!
//! All plates share one versioned JSON file:
//!
//! ```json
//! {
//!   "version": 1,
//!   "minor_version": 1,
//!   "key": "openhasp.restore_state",
//!   "data": { "hall": { "page": 2, "dim": 80, "backlight": true } }
//! }
//! ```

use async_trait::async_trait;
use hasp_plate::{PlateSnapshot, RestoreStore, TransportError, TransportResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch for {key}: expected {expected}, found {found}")]
    VersionMismatch {
        key: String,
        expected: u32,
        found: u32,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage file wrapper with version tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

/// The `.storage/` directory under the config dir
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Load a storage file, `None` if it does not exist yet
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<StorageFile<T>>> {
        let path = self.file_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(key, "Storage file not found");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let file: StorageFile<T> = serde_json::from_str(&content)?;
        debug!(key, version = file.version, minor_version = file.minor_version, "Loaded storage file");
        Ok(Some(file))
    }

    /// Write atomically through a temp file and a rename
    pub async fn save<T: Serialize>(&self, file: &StorageFile<T>) -> StorageResult<()> {
        fs::create_dir_all(&self.storage_dir).await?;

        let path = self.file_path(&file.key);
        let temp_path = self.file_path(&format!("{}.tmp", file.key));

        let content = serde_json::to_string_pretty(file)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key = %file.key, "Saved storage file");
        Ok(())
    }
}

pub const RESTORE_STATE_KEY: &str = "openhasp.restore_state";
const VERSION: u32 = 1;
const MINOR_VERSION: u32 = 1;

type Snapshots = BTreeMap<String, PlateSnapshot>;

/// [`RestoreStore`] over the shared restore-state file
///
/// The file is read once, on first use; every save rewrites it whole.
pub struct RestoreStateStore {
    storage: Storage,
    snapshots: Mutex<Option<Snapshots>>,
}

impl RestoreStateStore {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage: Storage::new(config_dir),
            snapshots: Mutex::new(None),
        }
    }

    async fn read(&self) -> StorageResult<Snapshots> {
        match self.storage.load::<Snapshots>(RESTORE_STATE_KEY).await? {
            None => Ok(Snapshots::new()),
            Some(file) if file.version != VERSION => Err(StorageError::VersionMismatch {
                key: RESTORE_STATE_KEY.to_string(),
                expected: VERSION,
                found: file.version,
            }),
            Some(file) => Ok(file.data),
        }
    }
}

fn storage_error(err: StorageError) -> TransportError {
    TransportError::Storage(err.to_string())
}

#[async_trait]
impl RestoreStore for RestoreStateStore {
    async fn load(&self, plate: &str) -> TransportResult<Option<PlateSnapshot>> {
        let mut guard = self.snapshots.lock().await;
        if guard.is_none() {
            *guard = Some(self.read().await.map_err(storage_error)?);
        }
        Ok(guard.as_ref().and_then(|snapshots| snapshots.get(plate).copied()))
    }

    async fn save(&self, plate: &str, snapshot: &PlateSnapshot) -> TransportResult<()> {
        let mut guard = self.snapshots.lock().await;
        if guard.is_none() {
            let existing = match self.read().await {
                Ok(existing) => existing,
                Err(err) => {
                    warn!(%err, "Discarding unreadable restore state");
                    Snapshots::new()
                }
            };
            *guard = Some(existing);
        }
        let snapshots = guard.get_or_insert_with(Snapshots::new);

        if snapshots.get(plate) == Some(snapshot) {
            return Ok(());
        }
        snapshots.insert(plate.to_string(), *snapshot);

        let file = StorageFile::new(RESTORE_STATE_KEY, snapshots.clone(), VERSION, MINOR_VERSION);
        self.storage.save(&file).await.map_err(storage_error)
    }
}
