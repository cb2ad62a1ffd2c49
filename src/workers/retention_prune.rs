use std::sync::Arc;

use chrono::{Days, NaiveDate};

use crate::analytics::clock::Clock;
use crate::analytics::settings::SettingsHandle;
use crate::store::{Store, StoreError};
use crate::workers::WorkerName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneSummary {
    pub cutoff: NaiveDate,
    pub rows_removed: usize,
    pub leases_removed: usize,
}

/// Deletes counters dated before `today - retention_days` plus leases whose
/// queue item no longer exists.
pub fn prune(
    store: &Store,
    retention_days: u32,
    clock: &dyn Clock,
) -> Result<PruneSummary, StoreError> {
    let today = clock.today();
    let cutoff = today
        .checked_sub_days(Days::new(u64::from(retention_days.max(1))))
        .ok_or_else(|| {
            StoreError::Validation(format!(
                "retention of {retention_days} days before {today} is out of range"
            ))
        })?;
    let rows_removed = store.prune_counters_before(cutoff)?;
    let leases_removed = store.purge_orphan_leases(clock.now())?;
    Ok(PruneSummary {
        cutoff,
        rows_removed,
        leases_removed,
    })
}

pub async fn run(store: Arc<Store>, settings: SettingsHandle, clock: Arc<dyn Clock>) {
    tracing::debug!("retention_prune: start");
    let retention_days = settings.current().settings.retention_days;

    match prune(&store, retention_days, clock.as_ref()) {
        Ok(summary) => {
            tracing::info!(
                cutoff = %summary.cutoff,
                rows = summary.rows_removed,
                leases = summary.leases_removed,
                "retention_prune: done"
            );
            if let Err(e) = store.record_worker_run(WorkerName::RetentionPrune.as_str(), clock.now())
            {
                tracing::warn!(error = %e, "Failed to record retention_prune run");
            }
        }
        Err(e) => tracing::error!(error = %e, "retention_prune failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::clock::FixedClock;
    use crate::analytics::settings::AnalyticsSettings;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn keeps_exactly_retention_window() {
        let store = Store::open_temporary().unwrap();
        let clock = FixedClock::at_date(d(2024, 5, 17));
        store.upsert_add_daily(d(2024, 5, 6), "/old", 1).unwrap();
        store.upsert_add_daily(d(2024, 5, 7), "/edge", 1).unwrap();
        store.upsert_add_daily(d(2024, 5, 17), "/new", 1).unwrap();

        let summary = prune(&store, 10, &clock).unwrap();
        assert_eq!(summary.cutoff, d(2024, 5, 7));
        assert_eq!(summary.rows_removed, 1);
        assert_eq!(store.get_daily_count(d(2024, 5, 7), "/edge").unwrap(), 1);
        assert_eq!(store.get_daily_count(d(2024, 5, 6), "/old").unwrap(), 0);
    }

    #[test]
    fn out_of_range_cutoff_is_an_error() {
        let store = Store::open_temporary().unwrap();
        store.upsert_add_daily(d(2024, 5, 17), "/a", 1).unwrap();
        let clock = FixedClock::at_date(d(2024, 5, 17));

        let err = prune(&store, u32::MAX, &clock).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.count_counter_rows(), 1);
    }

    #[tokio::test]
    async fn run_uses_current_settings() {
        let store = Arc::new(Store::open_temporary().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_date(d(2024, 5, 17)));
        store.upsert_add_daily(d(2024, 5, 1), "/a", 1).unwrap();
        store.upsert_add_daily(d(2024, 5, 16), "/a", 1).unwrap();

        let handle = SettingsHandle::new(AnalyticsSettings::with_defaults(1, 7));
        run(store.clone(), handle, clock.clone()).await;

        assert_eq!(store.count_counter_rows(), 1);
        assert_eq!(
            store
                .last_worker_run(WorkerName::RetentionPrune.as_str())
                .unwrap(),
            Some(clock.now())
        );
    }
}
