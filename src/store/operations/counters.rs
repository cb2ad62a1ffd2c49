use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::constants::{DELETE_BATCH_SIZE, MAX_CAS_RETRIES};
use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCounter {
    pub path: String,
    pub date: NaiveDate,
    pub view_count: u64,
}

impl Store {
    /// Adds `increment` to the counter for `(date, path)`, creating it at
    /// `increment` when absent. Returns the new count.
    pub fn upsert_add_daily(
        &self,
        date: NaiveDate,
        path: &str,
        increment: u64,
    ) -> Result<u64, StoreError> {
        let key = keys::daily_counter_key(date, path);

        for _ in 0..MAX_CAS_RETRIES {
            let current = self.page_views_daily.get(key.as_bytes())?;
            let base = match &current {
                Some(raw) => keys::decode_u64(raw).ok_or_else(|| StoreError::CorruptValue {
                    tree: "page_views_daily",
                    key: key.clone(),
                })?,
                None => 0,
            };
            let next = base.saturating_add(increment);

            let swapped = self.page_views_daily.compare_and_swap(
                key.as_bytes(),
                current.as_ref(),
                Some(keys::encode_u64(next).to_vec()),
            )?;
            if swapped.is_ok() {
                return Ok(next);
            }
        }

        Err(StoreError::CasRetryExhausted {
            entity: "page_views_daily".to_string(),
            key,
            attempts: MAX_CAS_RETRIES,
        })
    }

    pub fn get_daily_count(&self, date: NaiveDate, path: &str) -> Result<u64, StoreError> {
        let key = keys::daily_counter_key(date, path);
        match self.page_views_daily.get(key.as_bytes())? {
            Some(raw) => keys::decode_u64(&raw).ok_or(StoreError::CorruptValue {
                tree: "page_views_daily",
                key,
            }),
            None => Ok(0),
        }
    }

    /// Visits every well-formed counter dated `from..=to`; malformed rows are
    /// skipped with a warning.
    fn scan_daily(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        mut visit: impl FnMut(NaiveDate, String, u64),
    ) -> Result<(), StoreError> {
        if from > to {
            return Ok(());
        }
        let (start, end) = keys::daily_counter_range(from, to);
        for item in self.page_views_daily.range(start.as_bytes()..end.as_bytes()) {
            let (key, raw) = item?;
            match (keys::parse_daily_counter_key(&key), keys::decode_u64(&raw)) {
                (Some((date, path)), Some(count)) => visit(date, path, count),
                _ => tracing::warn!(
                    key = %String::from_utf8_lossy(&key),
                    "Skipping malformed daily counter row"
                ),
            }
        }
        Ok(())
    }

    /// Per-path totals over `from..=to`, ordered by total descending then path.
    /// `filter` is a case-insensitive substring match on the path.
    pub fn sum_views_by_path(
        &self,
        filter: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
        limit: Option<usize>,
    ) -> Result<Vec<(String, u64)>, StoreError> {
        let needle = filter.map(str::to_lowercase);
        let mut totals: HashMap<String, u64> = HashMap::new();

        self.scan_daily(from, to, |_, path, count| {
            if let Some(needle) = &needle {
                if !path.to_lowercase().contains(needle.as_str()) {
                    return;
                }
            }
            let total = totals.entry(path).or_insert(0);
            *total = total.saturating_add(count);
        })?;

        let mut ranked: Vec<(String, u64)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(limit) = limit {
            ranked.truncate(limit);
        }
        Ok(ranked)
    }

    /// Counters for the given paths over `from..=to`, in date order.
    pub fn daily_series(
        &self,
        paths: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyCounter>, StoreError> {
        let wanted: BTreeSet<&str> = paths.iter().map(String::as_str).collect();
        let mut series = Vec::new();
        self.scan_daily(from, to, |date, path, view_count| {
            if wanted.contains(path.as_str()) {
                series.push(DailyCounter {
                    path,
                    date,
                    view_count,
                });
            }
        })?;
        Ok(series)
    }

    pub fn distinct_counter_paths(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut paths = BTreeSet::new();
        for key in self.page_views_daily.iter().keys() {
            let key = key?;
            if let Some((_, path)) = keys::parse_daily_counter_key(&key) {
                paths.insert(path);
            }
        }
        Ok(paths)
    }

    /// Deletes every row whose path is in `paths`, applying removals in
    /// batches of [`DELETE_BATCH_SIZE`] keys. Returns the number of rows removed.
    pub fn delete_counters_for_paths(&self, paths: &BTreeSet<String>) -> Result<usize, StoreError> {
        if paths.is_empty() {
            return Ok(0);
        }

        let mut doomed = Vec::new();
        for key in self.page_views_daily.iter().keys() {
            let key = key?;
            if let Some((_, path)) = keys::parse_daily_counter_key(&key) {
                if paths.contains(&path) {
                    doomed.push(key);
                }
            }
        }

        for chunk in doomed.chunks(DELETE_BATCH_SIZE) {
            let mut batch = sled::Batch::default();
            for key in chunk {
                batch.remove(key.clone());
            }
            self.page_views_daily.apply_batch(batch)?;
        }

        Ok(doomed.len())
    }

    /// Removes every counter row. Returns how many rows existed.
    pub fn truncate_counters(&self) -> Result<usize, StoreError> {
        let removed = self.page_views_daily.len();
        self.page_views_daily.clear()?;
        Ok(removed)
    }

    pub fn count_counter_rows(&self) -> usize {
        self.page_views_daily.len()
    }

    /// Deletes rows dated strictly before `cutoff`.
    pub fn prune_counters_before(&self, cutoff: NaiveDate) -> Result<usize, StoreError> {
        let end = keys::daily_counter_prefix_before(cutoff);
        let mut removed = 0;
        let mut batch = sled::Batch::default();
        let mut pending = 0;

        for key in self.page_views_daily.range(..end.as_bytes()).keys() {
            batch.remove(key?);
            pending += 1;
            if pending == DELETE_BATCH_SIZE {
                self.page_views_daily
                    .apply_batch(std::mem::take(&mut batch))?;
                removed += pending;
                pending = 0;
            }
        }
        if pending > 0 {
            self.page_views_daily.apply_batch(batch)?;
            removed += pending;
        }

        Ok(removed)
    }
}
