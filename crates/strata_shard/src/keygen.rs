//! Surrogate key allocation for sharded tables. Each shard's native
//! auto-increment is independent, so inserts take their primary key from a
//! single shared counter instead. The counter store must be durable and
//! visible across processes; the allocator amortizes round trips by
//! reserving contiguous ranges.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use strata_common::ShardError;

/// The shared counter store. `reserve` must be atomic and serializable at
/// the store: two concurrent reservations never overlap. A reservation has
/// no partial side effects, so callers may safely retry on failure.
pub trait CounterStore: Send + Sync {
    /// Atomically advance the counter for `table` by `count` and return the
    /// first id of the reserved range.
    fn reserve(&self, table: &str, count: u64) -> Result<i64, ShardError>;
}

/// Hands out globally unique, strictly increasing ids for sharded-table
/// inserts, serving from per-table reserved ranges. An unused range tail is
/// abandoned on drop: gaps are acceptable, duplicates are not.
pub struct KeyAllocator {
    store: Arc<dyn CounterStore>,
    batch_size: u64,
    ranges: Mutex<HashMap<String, Range<i64>>>,
}

impl KeyAllocator {
    pub fn new(store: Arc<dyn CounterStore>, batch_size: u64) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            ranges: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve one id for an insert into `table`.
    pub fn reserve(&self, table: &str) -> Result<i64, ShardError> {
        let mut ranges = self.ranges.lock();
        let range = ranges.entry(table.to_string()).or_insert(0..0);
        if range.is_empty() {
            let first = self.store.reserve(table, self.batch_size)?;
            tracing::debug!(table, first, count = self.batch_size, "reserved key range");
            *range = first..first + self.batch_size as i64;
        }
        let id = range.start;
        range.start += 1;
        Ok(id)
    }

    /// Reserve `count` ids at once. Drains the current range first, then
    /// reserves the remainder in one store round trip.
    pub fn reserve_many(&self, table: &str, count: usize) -> Result<Vec<i64>, ShardError> {
        let mut out = Vec::with_capacity(count);
        let mut ranges = self.ranges.lock();
        let range = ranges.entry(table.to_string()).or_insert(0..0);
        while out.len() < count && !range.is_empty() {
            out.push(range.start);
            range.start += 1;
        }
        let missing = count - out.len();
        if missing > 0 {
            let ask = (missing as u64).max(self.batch_size);
            let first = self.store.reserve(table, ask)?;
            tracing::debug!(table, first, count = ask, "reserved key range");
            *range = first..first + ask as i64;
            for _ in 0..missing {
                out.push(range.start);
                range.start += 1;
            }
        }
        Ok(out)
    }
}

/// Process-local atomic counter store. Suitable for tests and for
/// single-process embedded use; production deployments back this trait with
/// a shared database table or sequence.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, i64>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter value, for asserting allocation order in tests.
    pub fn current(&self, table: &str) -> i64 {
        *self.counters.lock().get(table).unwrap_or(&0)
    }
}

impl CounterStore for MemoryCounterStore {
    fn reserve(&self, table: &str, count: u64) -> Result<i64, ShardError> {
        let mut counters = self.counters.lock();
        let next = counters.entry(table.to_string()).or_insert(1);
        let first = *next;
        *next += count as i64;
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn single_reservations_are_increasing() {
        let store = Arc::new(MemoryCounterStore::new());
        let alloc = KeyAllocator::new(store, 5);
        let mut last = 0;
        for _ in 0..17 {
            let id = alloc.reserve("filecache").unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn batch_reservation_amortizes_round_trips() {
        struct Counting {
            inner: MemoryCounterStore,
            calls: Mutex<u32>,
        }
        impl CounterStore for Counting {
            fn reserve(&self, table: &str, count: u64) -> Result<i64, ShardError> {
                *self.calls.lock() += 1;
                self.inner.reserve(table, count)
            }
        }
        let store = Arc::new(Counting {
            inner: MemoryCounterStore::new(),
            calls: Mutex::new(0),
        });
        let alloc = KeyAllocator::new(store.clone(), 10);
        for _ in 0..10 {
            alloc.reserve("t").unwrap();
        }
        assert_eq!(*store.calls.lock(), 1);
        alloc.reserve("t").unwrap();
        assert_eq!(*store.calls.lock(), 2);
    }

    #[test]
    fn reserve_many_is_contiguous_per_call_and_unique() {
        let store = Arc::new(MemoryCounterStore::new());
        let alloc = KeyAllocator::new(store, 4);
        let a = alloc.reserve_many("t", 6).unwrap();
        let b = alloc.reserve_many("t", 3).unwrap();
        let all: HashSet<i64> = a.iter().chain(b.iter()).copied().collect();
        assert_eq!(all.len(), 9);
        for w in a.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn abandoned_tail_leaves_gap_not_duplicate() {
        let store = Arc::new(MemoryCounterStore::new());
        let first = {
            let alloc = KeyAllocator::new(store.clone(), 10);
            alloc.reserve("t").unwrap()
        };
        // Simulated process restart: a new allocator must skip the old
        // allocator's unused tail.
        let alloc = KeyAllocator::new(store, 10);
        let next = alloc.reserve("t").unwrap();
        assert!(next > first);
        assert_eq!(next, first + 10);
    }

    #[test]
    fn concurrent_processes_never_overlap() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            // Each thread gets its own allocator: simulated independent
            // processes sharing only the counter store.
            let alloc = KeyAllocator::new(store.clone(), 7);
            handles.push(thread::spawn(move || {
                (0..100)
                    .map(|_| alloc.reserve("filecache").unwrap())
                    .collect::<Vec<i64>>()
            }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate surrogate key {}", id);
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[test]
    fn store_failure_fails_fast() {
        struct DownStore;
        impl CounterStore for DownStore {
            fn reserve(&self, _table: &str, _count: u64) -> Result<i64, ShardError> {
                Err(ShardError::CounterUnavailable("store offline".into()))
            }
        }
        let alloc = KeyAllocator::new(Arc::new(DownStore), 10);
        let err = alloc.reserve("t").unwrap_err();
        assert!(err.is_retryable());
    }
}
