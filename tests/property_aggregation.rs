use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use page_analytics::analytics::event::ViewEvent;
use page_analytics::analytics::sampling;
use page_analytics::store::Store;
use page_analytics::workers::view_aggregation::{process_batch, AggregationConfig};

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap()
}

fn event_strategy() -> impl Strategy<Value = (usize, u32, u32)> {
    // (path index, day offset, weight)
    (0usize..5, 0u32..4, 1u32..10)
}

fn expected_totals(events: &[(usize, u32, u32)]) -> HashMap<(NaiveDate, String), u64> {
    let mut totals = HashMap::new();
    for (path, offset, weight) in events {
        let key = (
            base_day() + chrono::Duration::days(i64::from(*offset)),
            format!("/p{path}"),
        );
        *totals.entry(key).or_insert(0) += u64::from(*weight);
    }
    totals
}

fn aggregate(events: &[(usize, u32, u32)], batch_size: usize) -> Store {
    let store = Store::open_temporary().unwrap();
    for (path, offset, weight) in events {
        let date = base_day() + chrono::Duration::days(i64::from(*offset));
        store
            .enqueue_view(&ViewEvent::new(&format!("/p{path}"), date, *weight))
            .unwrap();
    }
    let cfg = AggregationConfig {
        batch_size,
        ..AggregationConfig::default()
    };
    while store.queue_depth() > 0 {
        let outcome = process_batch(&store, None, &cfg, now()).unwrap();
        assert!(!outcome.is_failure());
    }
    store
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn pt_merge_is_additive(
        events in prop::collection::vec(event_strategy(), 0..60),
        batch_size in 1usize..20,
    ) {
        let store = aggregate(&events, batch_size);
        let expected = expected_totals(&events);
        for ((date, path), total) in &expected {
            prop_assert_eq!(store.get_daily_count(*date, path).unwrap(), *total);
        }
        prop_assert_eq!(store.count_counter_rows(), expected.len());
    }

    #[test]
    fn pt_merge_is_order_independent(
        events in prop::collection::vec(event_strategy(), 1..40),
        batch_a in 1usize..10,
        batch_b in 1usize..10,
    ) {
        let mut reversed = events.clone();
        reversed.reverse();

        let a = aggregate(&events, batch_a);
        let b = aggregate(&reversed, batch_b);
        for (date, path) in expected_totals(&events).keys() {
            prop_assert_eq!(
                a.get_daily_count(*date, path).unwrap(),
                b.get_daily_count(*date, path).unwrap()
            );
        }
    }
}

#[test]
fn sampling_estimate_is_unbiased() {
    let mut rng = StdRng::seed_from_u64(42);
    let views = 200_000u64;
    for rate in [2u32, 3, 10] {
        let estimate: u64 = (0..views)
            .map(|_| sampling::decide(rate, &mut rng))
            .filter(|d| d.accepted)
            .map(|d| u64::from(d.weight))
            .sum();
        let error = (estimate as f64 - views as f64).abs() / views as f64;
        assert!(error < 0.03, "rate {rate}: estimate {estimate}, error {error}");
    }
}

#[test]
fn redelivered_duplicate_over_counts_never_under_counts() {
    let store = Store::open_temporary().unwrap();
    let day = base_day();
    let event = ViewEvent::new("/dup", day, 3);
    store.enqueue_view(&event).unwrap();

    // 租约到期后同一条目被再次领取：第一次合并后未能删除
    let cfg = AggregationConfig::default();
    let first = store.claim_view_items(1, now(), cfg.lease).unwrap();
    let key = first[0].key.clone();
    store.upsert_add_daily(day, "/dup", 3).unwrap();

    let later = now() + cfg.lease + chrono::Duration::seconds(1);
    let outcome = process_batch(&store, None, &cfg, later).unwrap();
    assert_eq!(outcome.claimed, 1);
    assert_eq!(store.get_daily_count(day, "/dup").unwrap(), 6);
    assert!(store.view_queue.get(&key).unwrap().is_none());
}
