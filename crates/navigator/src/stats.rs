// Updater statistics snapshot types.

use crate::cache::CacheStats;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobQueueStats {
    pub removing: usize,
    pub updating: usize,
    pub delayed: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DbStats {
    /// Number of store lookups attempted for cache misses.
    pub get_tile_count: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AsyncNavMeshUpdaterStats {
    /// Jobs known to the updater, queued or in flight.
    pub jobs: usize,
    pub waiting: JobQueueStats,
    /// Distinct keys with a queued job.
    pub pushed: usize,
    /// Keys currently locked by a worker.
    pub processing: usize,
    pub cache: CacheStats,
    pub db: Option<DbStats>,
    /// Store lookups that produced usable tile data.
    pub db_get_tile_hits: u64,
}
