//! Capacity-bounded in-memory record store.
//!
//! `BoundedStore<T>` holds a window of the most recent records of one kind.
//! When the store is full the oldest entry is evicted after the new one is
//! appended (ring-buffer semantics backed by `VecDeque`).
//!
//! Unlike a plain `VecDeque`, the store is `Sync`: it owns a
//! `tokio::sync::RwLock` so listeners and HTTP handlers share it through an
//! `Arc` without extra wrapping. Inserts and clears take the write lock;
//! listing and stats take the read lock. The stats tracker lives under the
//! same lock, so readers never see a half-applied insert or clear.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::model::{Alert, Email, Record, Stored};
use crate::stats::{StatsSnapshot, StatsTracker};

/// Default number of records retained per store.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default page size for `list` when the caller does not give one.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

pub type AlertStore = BoundedStore<Alert>;
pub type EmailStore = BoundedStore<Email>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Insertion order.
    #[default]
    OldestFirst,
    NewestFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
    pub order: SortOrder,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            order: SortOrder::OldestFirst,
        }
    }
}

/// One page of records plus the number of records matching the filter.
#[derive(Debug, Clone, Serialize)]
pub struct Listing<T> {
    pub total: usize,
    pub records: Vec<Stored<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    records: VecDeque<Stored<T>>,
    next_id: u64,
    stats: StatsTracker,
}

#[derive(Debug)]
pub struct BoundedStore<T: Record> {
    inner: RwLock<Inner<T>>,
    /// Mirror of `records.len()` for readers that must not wait on the lock.
    live: AtomicUsize,
    capacity: usize,
}

impl<T: Record> BoundedStore<T> {
    /// Create an empty store. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(Inner {
                records: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                next_id: 1,
                stats: StatsTracker::new(T::DIMENSIONS),
            }),
            live: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest entries beyond capacity.
    /// Returns the id assigned to the new record.
    pub async fn insert(&self, record: T) -> u64 {
        let categories = record.categories();
        let mut inner = self.inner.write().await;

        let id = inner.next_id;
        inner.next_id += 1;
        let received_at = Utc::now();

        inner.stats.record_insert(&categories, received_at);
        inner.records.push_back(Stored {
            id,
            received_at,
            record,
        });

        while inner.records.len() > self.capacity {
            let Some(evicted) = inner.records.pop_front() else {
                break;
            };
            tracing::debug!(id = evicted.id, "Evicted oldest record at capacity");
            inner.stats.record_eviction(&evicted.record.categories());
        }

        self.live.store(inner.records.len(), Ordering::Release);
        id
    }

    /// Return the records matching `filter`, paginated by `page`.
    pub async fn list(&self, filter: &T::Filter, page: Page) -> Listing<T> {
        let inner = self.inner.read().await;
        let matching = inner.records.iter().filter(|stored| stored.record.matches(filter));

        let (total, records) = match page.order {
            SortOrder::OldestFirst => paginate(matching, page),
            SortOrder::NewestFirst => paginate(matching.rev(), page),
        };

        Listing { total, records }
    }

    /// Remove every record and reset the derived stats. Ids keep counting.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.records.clear();
        inner.stats.reset();
        self.live.store(0, Ordering::Release);
    }

    pub async fn stats(&self) -> StatsSnapshot {
        self.inner.read().await.stats.snapshot()
    }

    /// Number of records currently held. Lock-free; may trail an insert that
    /// is still in progress.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn paginate<'a, T, I>(matching: I, page: Page) -> (usize, Vec<Stored<T>>)
where
    T: Clone + 'a,
    I: Iterator<Item = &'a Stored<T>>,
{
    let mut total = 0;
    let mut records = Vec::new();
    for stored in matching {
        if total >= page.offset && records.len() < page.limit {
            records.push(stored.clone());
        }
        total += 1;
    }
    (total, records)
}
