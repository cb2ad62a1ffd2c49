pub mod keys;
pub mod migrate;
pub mod operations;
pub mod trees;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use thiserror::Error;

#[derive(Debug)]
pub struct Store {
    db: Db,
    /// Pending sampled views, keyed by a monotonically increasing id.
    pub view_queue: sled::Tree,
    /// Claim leases: queue key -> lease expiry (epoch millis, big-endian).
    pub view_queue_leases: sled::Tree,
    /// `YYYY-MM-DD|path` -> weighted view count (big-endian u64).
    pub page_views_daily: sled::Tree,
    pub meta: sled::Tree,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CAS retry exhausted after {attempts} attempts: entity={entity}, key={key}")]
    CasRetryExhausted {
        entity: String,
        key: String,
        attempts: u32,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("migration error at version {version}: {message}")]
    Migration { version: u32, message: String },
    #[error("corrupt value in {tree}: {key}")]
    CorruptValue { tree: &'static str, key: String },
}

impl StoreError {
    /// Storage-level failures; retrying other keys in the same pass is pointless.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Sled(_))
    }
}

impl Store {
    pub fn open(sled_path: &str) -> Result<Self, StoreError> {
        Self::from_db(sled::open(sled_path)?)
    }

    /// In-memory store; nothing touches disk.
    pub fn open_temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let view_queue = db.open_tree(trees::VIEW_QUEUE)?;
        let view_queue_leases = db.open_tree(trees::VIEW_QUEUE_LEASES)?;
        let page_views_daily = db.open_tree(trees::PAGE_VIEWS_DAILY)?;
        let meta = db.open_tree(trees::META)?;

        Ok(Self {
            db,
            view_queue,
            view_queue_leases,
            page_views_daily,
            meta,
        })
    }

    pub fn run_migrations(&self) -> Result<(), StoreError> {
        migrate::run(self)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn raw_db(&self) -> &Db {
        &self.db
    }

    pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(value)?)
    }

    pub(crate) fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
