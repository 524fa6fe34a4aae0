//! Shared payload store: reference-counted regions with a byte budget.
//!
//! Every payload that crosses the caller/worker boundary lives in a
//! [`PayloadRegion`]. Regions are immutable once allocated and are shared
//! through `Arc`, so the last handle, message or worker holding a region
//! releases its bytes back to the budget when it drops.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use job_core::{DispatchError, RegionId};
use serde::de::DeserializeOwned;

/// Budget accounting shared between the store and its regions.
#[derive(Debug, Default)]
struct Usage {
    bytes: AtomicUsize,
    regions: AtomicUsize,
}

/// Allocator for payload regions.
#[derive(Debug)]
pub struct PayloadStore {
    max_payload_bytes: usize,
    budget_bytes: usize,
    next_id: AtomicU64,
    usage: Arc<Usage>,
}

impl PayloadStore {
    pub fn new(max_payload_bytes: usize, budget_bytes: usize) -> Self {
        Self {
            max_payload_bytes,
            budget_bytes,
            next_id: AtomicU64::new(1),
            usage: Arc::new(Usage::default()),
        }
    }

    /// Largest payload accepted for a single region.
    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Allocate a region holding `value`.
    ///
    /// Fails with `PayloadTooLarge` if the encoded value is above the
    /// per-payload limit, and with `CapacityExceeded` if the live regions
    /// already use up the budget.
    pub fn allocate(&self, value: serde_json::Value) -> Result<Arc<PayloadRegion>, DispatchError> {
        let size = encoded_len(&value)?;
        if size > self.max_payload_bytes {
            return Err(DispatchError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }

        let budget = self.budget_bytes;
        self.usage
            .bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= budget)
            })
            .map_err(|used| {
                tracing::debug!(size, used, budget, "shared payload budget exhausted");
                DispatchError::CapacityExceeded
            })?;
        self.usage.regions.fetch_add(1, Ordering::AcqRel);

        let id = RegionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Ok(Arc::new(PayloadRegion {
            id,
            data: value,
            size,
            usage: self.usage.clone(),
        }))
    }

    /// Bytes currently held by live regions.
    pub fn bytes_in_use(&self) -> usize {
        self.usage.bytes.load(Ordering::Acquire)
    }

    /// Number of live regions.
    pub fn live_regions(&self) -> usize {
        self.usage.regions.load(Ordering::Acquire)
    }
}

/// Immutable block holding one payload.
#[derive(Debug)]
pub struct PayloadRegion {
    id: RegionId,
    data: serde_json::Value,
    size: usize,
    usage: Arc<Usage>,
}

impl PayloadRegion {
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Encoded size charged against the budget.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Borrow the payload without copying it.
    pub fn value(&self) -> &serde_json::Value {
        &self.data
    }

    /// Copy the payload out of the region.
    pub fn to_value(&self) -> serde_json::Value {
        self.data.clone()
    }

    /// Copy the payload out as a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

impl Drop for PayloadRegion {
    fn drop(&mut self) {
        self.usage.bytes.fetch_sub(self.size, Ordering::AcqRel);
        self.usage.regions.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Read-only region shared by every variant of a broadcast.
#[derive(Debug, Clone)]
pub struct SharedPayload(Arc<PayloadRegion>);

impl SharedPayload {
    pub(crate) fn new(region: Arc<PayloadRegion>) -> Self {
        Self(region)
    }

    pub fn region_id(&self) -> RegionId {
        self.0.id()
    }

    pub fn region(&self) -> &Arc<PayloadRegion> {
        &self.0
    }

    /// Number of holders currently referencing the region.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

fn encoded_len(value: &serde_json::Value) -> Result<usize, DispatchError> {
    struct Counter(usize);

    impl io::Write for Counter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0 += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let mut counter = Counter(0);
    serde_json::to_writer(&mut counter, value)?;
    Ok(counter.0)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use serde_json::json;

    use super::*;

    #[test]
    fn regions_release_budget_on_drop() -> Result<(), DispatchError> {
        let store = PayloadStore::new(1024, 4096);
        let region = store.allocate(json!({"numbers": [1, 2, 3]}))?;
        let size = region.size();
        assert_eq!(size, r#"{"numbers":[1,2,3]}"#.len());
        assert_eq!(store.bytes_in_use(), size);
        assert_eq!(store.live_regions(), 1);

        let clone = region.clone();
        drop(region);
        assert_eq!(store.bytes_in_use(), size);

        drop(clone);
        assert_eq!(store.bytes_in_use(), 0);
        assert_eq!(store.live_regions(), 0);
        Ok(())
    }

    #[test]
    fn oversized_payload_is_rejected_not_truncated() {
        let store = PayloadStore::new(16, 4096);
        let result = store.allocate(json!("a string well beyond sixteen bytes"));
        assert!(matches!(
            result,
            Err(DispatchError::PayloadTooLarge { limit: 16, .. })
        ));
        assert_eq!(store.bytes_in_use(), 0);
    }

    #[test]
    fn budget_exhaustion_is_recoverable() -> Result<(), DispatchError> {
        let store = PayloadStore::new(64, 40);
        let first = store.allocate(json!("0123456789012345678901234567"))?;
        let second = store.allocate(json!("0123456789012345678901234567"));
        assert_eq!(second.unwrap_err(), DispatchError::CapacityExceeded);

        drop(first);
        let third = store.allocate(json!("0123456789012345678901234567"))?;
        assert_eq!(store.live_regions(), 1);
        assert_ne!(third.id(), RegionId(1));
        Ok(())
    }

    #[test]
    fn decode_copies_into_typed_value() -> Result<(), Box<dyn std::error::Error>> {
        let store = PayloadStore::new(1024, 1024);
        let region = store.allocate(json!([4, 5, 6]))?;
        let numbers: Vec<u32> = region.decode()?;
        assert_eq!(numbers, vec![4, 5, 6]);
        assert_eq!(region.value(), &json!([4, 5, 6]));
        Ok(())
    }
}
