use std::time::Duration;

use chrono::NaiveDate;

use page_analytics::store::Store;

pub fn seed_counters(store: &Store, rows: &[(NaiveDate, &str, u64)]) {
    for (date, path, count) in rows {
        store
            .upsert_add_daily(*date, path, *count)
            .expect("seed counter");
    }
}

/// Enqueue runs on a detached task; poll until the queue reaches `expected`.
pub async fn wait_for_queue_depth(store: &Store, expected: usize) -> usize {
    for _ in 0..100 {
        if store.queue_depth() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    store.queue_depth()
}

/// Gives detached enqueue tasks a chance to run before asserting nothing happened.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
