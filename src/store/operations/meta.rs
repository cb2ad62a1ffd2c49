use chrono::{DateTime, Utc};

use crate::store::keys;
use crate::store::{Store, StoreError};

impl Store {
    pub fn record_worker_run(&self, worker: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let key = keys::worker_last_run_key(worker);
        self.meta.insert(key.as_bytes(), Self::serialize(&at)?)?;
        Ok(())
    }

    pub fn last_worker_run(&self, worker: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let key = keys::worker_last_run_key(worker);
        match self.meta.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }
}
