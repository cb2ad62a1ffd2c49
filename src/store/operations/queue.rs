use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sled::IVec;

use crate::analytics::event::ViewEvent;
use crate::store::keys;
use crate::store::{Store, StoreError};

/// A queue item held under lease by the caller.
#[derive(Debug, Clone)]
pub struct ClaimedItem {
    pub key: IVec,
    /// `Value::Null` when the stored bytes were not JSON.
    pub payload: Value,
}

impl ClaimedItem {
    pub fn id(&self) -> Option<u64> {
        keys::queue_id(&self.key)
    }
}

impl Store {
    pub fn enqueue_view(&self, event: &ViewEvent) -> Result<u64, StoreError> {
        let bytes = Self::serialize(&event.to_payload())?;
        self.enqueue_raw(&bytes)
    }

    /// Appends an arbitrary wire document; the worker validates on drain.
    pub fn enqueue_payload(&self, payload: &Value) -> Result<u64, StoreError> {
        let bytes = Self::serialize(payload)?;
        self.enqueue_raw(&bytes)
    }

    fn enqueue_raw(&self, bytes: &[u8]) -> Result<u64, StoreError> {
        let id = self.raw_db().generate_id()?;
        self.view_queue.insert(keys::queue_key(id), bytes)?;
        Ok(id)
    }

    /// Claims up to `max` items not currently leased, in queue order.
    ///
    /// A lease is taken with compare-and-swap against the value observed in
    /// the lease tree, so two consumers never hold the same item within one
    /// lease window. Items whose lease has expired are reclaimable.
    pub fn claim_view_items(
        &self,
        max: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<ClaimedItem>, StoreError> {
        let mut claimed = Vec::new();
        if max == 0 {
            return Ok(claimed);
        }
        let now_ms = epoch_ms(now);
        let expiry = keys::encode_u64(epoch_ms(now + lease));

        for item in self.view_queue.iter() {
            let (key, value) = item?;

            let current = self.view_queue_leases.get(&key)?;
            if let Some(raw) = &current {
                if keys::decode_u64(raw).is_some_and(|until| until > now_ms) {
                    continue;
                }
            }

            let swapped = self.view_queue_leases.compare_and_swap(
                &key,
                current.as_ref(),
                Some(expiry.to_vec()),
            )?;
            if swapped.is_err() {
                // 其他消费者抢先续租
                continue;
            }

            // 读取之后可能已被其他消费者处理并删除
            if !self.view_queue.contains_key(&key)? {
                self.view_queue_leases.remove(&key)?;
                continue;
            }

            let payload = serde_json::from_slice(&value).unwrap_or(Value::Null);
            claimed.push(ClaimedItem { key, payload });
            if claimed.len() >= max {
                break;
            }
        }

        Ok(claimed)
    }

    pub fn claim_view_item(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<ClaimedItem>, StoreError> {
        Ok(self.claim_view_items(1, now, lease)?.into_iter().next())
    }

    /// Removes the item before its lease so a concurrent claimer never
    /// observes an unleased live item.
    pub fn delete_view_item(&self, key: &[u8]) -> Result<(), StoreError> {
        self.view_queue.remove(key)?;
        self.view_queue_leases.remove(key)?;
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.view_queue.len()
    }

    /// Items currently held under an unexpired lease.
    pub fn leased_items(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let now_ms = epoch_ms(now);
        let mut count = 0;
        for item in self.view_queue_leases.iter() {
            let (key, raw) = item?;
            let live = keys::decode_u64(&raw).is_some_and(|until| until > now_ms);
            if live && self.view_queue.contains_key(&key)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Drops expired leases whose item is already gone (a crash between the
    /// two removes in [`Store::delete_view_item`]).
    pub fn purge_orphan_leases(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let now_ms = epoch_ms(now);
        let mut removed = 0;
        for item in self.view_queue_leases.iter() {
            let (key, raw) = item?;
            let expired = keys::decode_u64(&raw).map_or(true, |until| until <= now_ms);
            if expired && !self.view_queue.contains_key(&key)? {
                self.view_queue_leases.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn epoch_ms(at: DateTime<Utc>) -> u64 {
    at.timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap()
    }

    fn event(path: &str) -> ViewEvent {
        ViewEvent::new(path, NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(), 1)
    }

    #[test]
    fn enqueue_preserves_order_and_wire_format() {
        let store = Store::open_temporary().unwrap();
        let a = store.enqueue_view(&event("/a")).unwrap();
        let b = store.enqueue_view(&event("/b")).unwrap();
        assert!(a < b);
        assert_eq!(store.queue_depth(), 2);

        let items = store.claim_view_items(10, now(), Duration::seconds(60)).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id(), Some(a));
        assert_eq!(
            items[0].payload,
            json!({"path": "/a", "date": "2024-05-17", "sampling_rate": 1})
        );
    }

    #[test]
    fn leased_items_are_not_claimed_twice() {
        let store = Store::open_temporary().unwrap();
        for path in ["/a", "/b", "/c"] {
            store.enqueue_view(&event(path)).unwrap();
        }
        let lease = Duration::seconds(60);

        let first = store.claim_view_items(2, now(), lease).unwrap();
        let second = store.claim_view_items(10, now(), lease).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(store.claim_view_items(10, now(), lease).unwrap().len(), 0);
        assert_eq!(store.leased_items(now()).unwrap(), 3);
    }

    #[test]
    fn expired_lease_is_reclaimable() {
        let store = Store::open_temporary().unwrap();
        store.enqueue_view(&event("/a")).unwrap();
        let lease = Duration::seconds(60);

        assert!(store.claim_view_item(now(), lease).unwrap().is_some());
        assert!(store
            .claim_view_item(now() + Duration::seconds(59), lease)
            .unwrap()
            .is_none());
        assert!(store
            .claim_view_item(now() + Duration::seconds(61), lease)
            .unwrap()
            .is_some());
    }

    #[test]
    fn delete_removes_item_and_lease() {
        let store = Store::open_temporary().unwrap();
        store.enqueue_view(&event("/a")).unwrap();
        let item = store
            .claim_view_item(now(), Duration::seconds(60))
            .unwrap()
            .unwrap();
        store.delete_view_item(&item.key).unwrap();
        assert_eq!(store.queue_depth(), 0);
        assert!(store.view_queue_leases.is_empty());
    }

    #[test]
    fn non_json_items_surface_as_null() {
        let store = Store::open_temporary().unwrap();
        store.enqueue_raw(b"not json").unwrap();
        let item = store
            .claim_view_item(now(), Duration::seconds(60))
            .unwrap()
            .unwrap();
        assert_eq!(item.payload, Value::Null);
    }

    #[test]
    fn orphan_leases_are_purged_once_expired() {
        let store = Store::open_temporary().unwrap();
        store
            .view_queue_leases
            .insert(keys::queue_key(99), &keys::encode_u64(0))
            .unwrap();
        assert_eq!(store.purge_orphan_leases(now()).unwrap(), 1);
        assert!(store.view_queue_leases.is_empty());
    }
}
