// Prepared tile cache
// Byte-budgeted in-memory map keyed by everything a build depends on.
// Eviction is strictly FIFO over insertion order; lookups never refresh an
// entry's position. A zero budget disables storage entirely.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::builder::PreparedNavMeshData;
use crate::geometry::{AgentBounds, Worldspace};
use crate::tile::TilePosition;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub agent: AgentBounds,
    pub worldspace: Worldspace,
    pub tile: TilePosition,
    pub input_digest: [u8; 20],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub get_count: u64,
    pub hit_count: u64,
    pub used_bytes: u64,
    pub entry_count: usize,
}

struct CacheInner {
    entries: HashMap<CacheKey, Arc<PreparedNavMeshData>>,
    order: VecDeque<CacheKey>,
    used_bytes: u64,
}

pub struct NavMeshTilesCache {
    max_bytes: u64,
    inner: Mutex<CacheInner>,
    get_count: AtomicU64,
    hit_count: AtomicU64,
}

impl NavMeshTilesCache {
    pub fn new(max_bytes: u64) -> Self {
        NavMeshTilesCache {
            max_bytes,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                used_bytes: 0,
            }),
            get_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<PreparedNavMeshData>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.lock();
        let value = inner.entries.get(key).cloned();
        if value.is_some() {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Counts a lookup that deliberately bypasses the stored entries.
    /// Update-type rebuilds go through here.
    pub fn record_get(&self) {
        self.get_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Stores the value unless it alone exceeds the budget. Returns the
    /// shared handle to the stored value, or None when storage is skipped.
    pub fn set(&self, key: CacheKey, value: PreparedNavMeshData) -> Option<Arc<PreparedNavMeshData>> {
        let size = value.size_bytes();
        if size > self.max_bytes {
            return None;
        }
        let value = Arc::new(value);
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.entries.remove(&key) {
            inner.used_bytes -= previous.size_bytes();
            inner.order.retain(|queued| *queued != key);
        }
        while inner.used_bytes + size > self.max_bytes {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.used_bytes -= evicted.size_bytes();
            }
        }
        inner.used_bytes += size;
        inner.order.push_back(key.clone());
        inner.entries.insert(key, value.clone());
        Some(value)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            get_count: self.get_count.load(Ordering::Relaxed),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            used_bytes: inner.used_bytes,
            entry_count: inner.entries.len(),
        }
    }
}
