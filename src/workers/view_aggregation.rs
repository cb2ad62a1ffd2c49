//! Drains the view queue into the daily counters.
//!
//! One batch claims up to `batch_size` items under a lease, sums weights per
//! `(date, path)` in memory and issues a single additive upsert per key.
//! Merged and malformed items are deleted; items whose key failed to merge
//! stay leased and are redelivered once the lease expires.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use sled::IVec;

use crate::analytics::clock::Clock;
use crate::analytics::event::ViewEvent;
use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_DRAIN_SECS, DEFAULT_LEASE_SECS};
use crate::store::operations::queue::ClaimedItem;
use crate::store::{Store, StoreError};
use crate::workers::WorkerName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationConfig {
    /// Items per batch, seed included.
    pub batch_size: usize,
    pub lease: chrono::Duration,
    /// Wall-clock budget for one [`drain`] call.
    pub drain_budget: std::time::Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            lease: chrono::Duration::seconds(DEFAULT_LEASE_SECS as i64),
            drain_budget: std::time::Duration::from_secs(DEFAULT_DRAIN_SECS),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub claimed: usize,
    pub malformed: usize,
    pub merged_keys: usize,
    pub failed_keys: usize,
    pub deleted: usize,
    /// The store became unavailable mid-batch; remaining keys were skipped.
    pub aborted: bool,
}

impl BatchOutcome {
    pub fn is_failure(&self) -> bool {
        self.aborted || self.failed_keys > 0
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    pub batches: usize,
    pub claimed: usize,
    pub malformed: usize,
    pub merged_keys: usize,
    pub failed_keys: usize,
    pub deleted: usize,
    pub aborted: bool,
}

impl DrainSummary {
    fn absorb(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        self.claimed += outcome.claimed;
        self.malformed += outcome.malformed;
        self.merged_keys += outcome.merged_keys;
        self.failed_keys += outcome.failed_keys;
        self.deleted += outcome.deleted;
        self.aborted |= outcome.aborted;
    }
}

#[derive(Default)]
struct PendingKey {
    total: u64,
    items: Vec<IVec>,
}

/// Processes one batch. `seed` is an item the caller already holds; the rest
/// of the batch is claimed here, stopping early when the queue runs dry.
pub fn process_batch(
    store: &Store,
    seed: Option<ClaimedItem>,
    cfg: &AggregationConfig,
    now: DateTime<Utc>,
) -> Result<BatchOutcome, StoreError> {
    let mut items: Vec<ClaimedItem> = seed.into_iter().collect();
    let wanted = cfg.batch_size.max(1).saturating_sub(items.len());
    items.extend(store.claim_view_items(wanted, now, cfg.lease)?);

    let mut outcome = BatchOutcome {
        claimed: items.len(),
        ..BatchOutcome::default()
    };
    if items.is_empty() {
        return Ok(outcome);
    }

    let mut pending: BTreeMap<(NaiveDate, String), PendingKey> = BTreeMap::new();
    let mut garbage = Vec::new();
    for item in items {
        match ViewEvent::from_wire(&item.payload) {
            Some(event) => {
                let entry = pending.entry((event.date, event.path)).or_default();
                entry.total = entry.total.saturating_add(u64::from(event.weight));
                entry.items.push(item.key);
            }
            None => {
                tracing::debug!(item_id = ?item.id(), "Dropping malformed queue item");
                garbage.push(item.key);
            }
        }
    }

    outcome.malformed = garbage.len();
    if outcome.malformed > 0 {
        tracing::info!(malformed = outcome.malformed, "Discarded malformed queue items");
    }
    for key in &garbage {
        store.delete_view_item(key)?;
        outcome.deleted += 1;
    }

    for ((date, path), key) in pending {
        match store.upsert_add_daily(date, &path, key.total) {
            Ok(_) => {
                outcome.merged_keys += 1;
                for item_key in &key.items {
                    store.delete_view_item(item_key)?;
                    outcome.deleted += 1;
                }
            }
            Err(e) if e.is_unavailable() => {
                tracing::error!(error = %e, %date, path = %path, "Store unavailable, aborting batch");
                outcome.aborted = true;
                break;
            }
            Err(e) => {
                // 保留条目，租约到期后重新投递
                tracing::error!(error = %e, %date, path = %path, "Daily counter merge failed");
                outcome.failed_keys += 1;
            }
        }
    }

    Ok(outcome)
}

/// Runs batches until the queue is empty, a batch fails, or the budget elapses.
pub fn drain(
    store: &Store,
    clock: &dyn Clock,
    cfg: &AggregationConfig,
) -> Result<DrainSummary, StoreError> {
    let started = Instant::now();
    let mut summary = DrainSummary::default();

    loop {
        let outcome = process_batch(store, None, cfg, clock.now())?;
        if outcome.claimed == 0 {
            break;
        }
        summary.absorb(&outcome);
        if outcome.is_failure() {
            break;
        }
        if started.elapsed() >= cfg.drain_budget {
            tracing::info!(
                budget_secs = cfg.drain_budget.as_secs(),
                remaining = store.queue_depth(),
                "Drain budget exhausted"
            );
            break;
        }
    }

    Ok(summary)
}

pub async fn run(store: Arc<Store>, clock: Arc<dyn Clock>, cfg: AggregationConfig) {
    tracing::debug!("view_aggregation: start");
    let task_store = store.clone();
    let task_clock = clock.clone();
    let result =
        tokio::task::spawn_blocking(move || drain(&task_store, task_clock.as_ref(), &cfg)).await;

    match result {
        Ok(Ok(summary)) => {
            tracing::info!(
                batches = summary.batches,
                claimed = summary.claimed,
                merged = summary.merged_keys,
                malformed = summary.malformed,
                failed = summary.failed_keys,
                "view_aggregation: done"
            );
            if let Err(e) = store.record_worker_run(WorkerName::ViewAggregation.as_str(), clock.now())
            {
                tracing::warn!(error = %e, "Failed to record view_aggregation run");
            }
        }
        Ok(Err(e)) => tracing::error!(error = %e, "view_aggregation failed"),
        Err(e) => tracing::error!(error = %e, "view_aggregation task panicked"),
    }
}
