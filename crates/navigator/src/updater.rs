// Async navmesh updater
// Owns the worker pool that turns changed-tile notifications into built,
// removed, or empty navmesh tiles. Scheduling rules:
// - one queued job per (agent bounds, tile) key; a later post for the same
//   key rewrites the queued job in place
// - removal jobs are popped before build jobs
// - build jobs are popped nearest to the player tile first, FIFO per tile
// - repeated update jobs for a key are delayed by the minimum update
//   interval
// - at most one worker processes a key at a time
// Every post stamps its key with a fresh sequence number; a write-back
// whose sequence is older than the latest stamp for the key is discarded.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::builder::{self, PreparedNavMeshData};
use crate::cache::{CacheKey, NavMeshTilesCache};
use crate::cache_item::{SharedNavMeshCacheItem, WeakNavMeshCacheItem};
use crate::db::{DbError, NavMeshDb, ShapeId, TileId, TileVersion};
use crate::dbutils;
use crate::geometry::{AgentBounds, RecastMesh, Worldspace};
use crate::mesh_manager::TileCachedRecastMeshManager;
use crate::offmesh::OffMeshConnectionsManager;
use crate::serialization::{self, NAV_MESH_FORMAT_VERSION};
use crate::settings::Settings;
use crate::stats::{AsyncNavMeshUpdaterStats, DbStats, JobQueueStats};
use crate::tile::{TilePosition, manhattan_distance, should_add_tile};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Update,
    Remove,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Add => f.write_str("add"),
            ChangeType::Update => f.write_str("update"),
            ChangeType::Remove => f.write_str("remove"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitConditionType {
    AllJobsDone,
    RequiredTilesPresent,
}

/// Receives progress updates while a wait condition blocks.
pub trait ProgressListener {
    fn set_label(&mut self, _label: &str) {}
    fn set_progress_range(&mut self, _range: usize) {}
    fn set_progress(&mut self, _progress: usize) {}
    fn increase_progress(&mut self, _increase: usize) {}
}

pub struct SilentListener;

impl ProgressListener for SilentListener {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct JobId(u64);

type JobKey = (AgentBounds, TilePosition);
type SequenceKey = (AgentBounds, Worldspace, TilePosition);

#[derive(Clone)]
struct Job {
    id: JobId,
    agent_bounds: AgentBounds,
    cache_item: WeakNavMeshCacheItem,
    worldspace: Worldspace,
    changed_tile: TilePosition,
    change_type: ChangeType,
    process_time: Instant,
    sequence: u64,
}

impl Job {
    fn key(&self) -> JobKey {
        (self.agent_bounds, self.changed_tile)
    }

    fn sequence_key(&self) -> SequenceKey {
        (self.agent_bounds, self.worldspace.clone(), self.changed_tile)
    }
}

/// Build jobs ordered nearest to the player, FIFO within a tile.
#[derive(Default)]
struct SpatialJobQueue {
    values: BTreeMap<TilePosition, VecDeque<JobId>>,
    size: usize,
}

impl SpatialJobQueue {
    fn push(&mut self, tile: TilePosition, id: JobId) {
        self.values.entry(tile).or_default().push_back(id);
        self.size += 1;
    }

    fn pop(&mut self, player_tile: TilePosition) -> Option<JobId> {
        let tile = self
            .values
            .keys()
            .min_by_key(|tile| manhattan_distance(**tile, player_tile))
            .copied()?;
        let queue = self.values.get_mut(&tile)?;
        let id = queue.pop_front();
        if queue.is_empty() {
            self.values.remove(&tile);
        }
        if id.is_some() {
            self.size -= 1;
        }
        id
    }

    fn take_out_of_range(&mut self, player_tile: TilePosition, max_tiles: i32) -> Vec<JobId> {
        let out: Vec<TilePosition> = self
            .values
            .keys()
            .copied()
            .filter(|tile| !should_add_tile(*tile, player_tile, max_tiles))
            .collect();
        let mut taken = Vec::new();
        for tile in out {
            if let Some(queue) = self.values.remove(&tile) {
                self.size -= queue.len();
                taken.extend(queue);
            }
        }
        taken
    }

    fn clear(&mut self) -> Vec<JobId> {
        let taken = self.values.values().flatten().copied().collect();
        self.values.clear();
        self.size = 0;
        taken
    }
}

/// Three-lane queue: removals first, then builds by distance, with not yet
/// ready delayed jobs parked aside ordered by process time.
#[derive(Default)]
struct JobQueue {
    removing: Vec<JobId>,
    updating: SpatialJobQueue,
    delayed: VecDeque<(Instant, TilePosition, JobId)>,
}

impl JobQueue {
    fn has_job(&self, now: Instant) -> bool {
        !self.removing.is_empty()
            || self.updating.size > 0
            || self.delayed.front().is_some_and(|(time, _, _)| *time <= now)
    }

    fn push(&mut self, job: &Job, now: Instant) {
        // The process time gates every lane, so re-pushed locked-key jobs
        // stay parked instead of being popped again immediately.
        if job.process_time > now {
            let index = self.delayed.partition_point(|(time, _, _)| *time <= job.process_time);
            self.delayed.insert(index, (job.process_time, job.changed_tile, job.id));
        } else if job.change_type == ChangeType::Remove {
            self.removing.push(job.id);
        } else {
            self.updating.push(job.changed_tile, job.id);
        }
    }

    fn pop(&mut self, player_tile: TilePosition, now: Instant) -> Option<JobId> {
        while let Some((time, tile, id)) = self.delayed.front().copied() {
            if time > now {
                break;
            }
            self.delayed.pop_front();
            self.updating.push(tile, id);
        }
        if let Some(id) = self.removing.pop() {
            return Some(id);
        }
        self.updating.pop(player_tile)
    }

    fn take_out_of_range(&mut self, player_tile: TilePosition, max_tiles: i32) -> Vec<JobId> {
        let mut taken = self.updating.take_out_of_range(player_tile, max_tiles);
        let mut kept = VecDeque::new();
        for (time, tile, id) in self.delayed.drain(..) {
            if should_add_tile(tile, player_tile, max_tiles) {
                kept.push_back((time, tile, id));
            } else {
                taken.push(id);
            }
        }
        self.delayed = kept;
        taken
    }

    fn drain(&mut self) -> Vec<JobId> {
        let mut taken = std::mem::take(&mut self.removing);
        taken.extend(self.updating.clear());
        taken.extend(self.delayed.drain(..).map(|(_, _, id)| id));
        taken
    }

    fn stats(&self) -> JobQueueStats {
        JobQueueStats {
            removing: self.removing.len(),
            updating: self.updating.size,
            delayed: self.delayed.len(),
        }
    }
}

struct QueueState {
    jobs: HashMap<JobId, Job>,
    waiting: JobQueue,
    pushed: HashMap<JobKey, JobId>,
    present: HashSet<JobKey>,
    last_updates: HashMap<JobKey, Instant>,
    sequences: HashMap<SequenceKey, u64>,
    next_job_id: u64,
}

impl QueueState {
    fn next_sequence(&mut self, key: SequenceKey) -> u64 {
        let counter = self.sequences.entry(key).or_insert(0);
        *counter += 1;
        *counter
    }
}

struct IdAllocators {
    next_tile_id: TileId,
    next_shape_id: ShapeId,
}

struct DbState {
    db: Arc<NavMeshDb>,
    write_enabled: bool,
    allocators: Mutex<IdAllocators>,
    get_tile_count: AtomicU64,
}

struct Shared {
    settings: Settings,
    mesh_manager: Arc<TileCachedRecastMeshManager>,
    off_mesh: Arc<OffMeshConnectionsManager>,
    cache: NavMeshTilesCache,
    db: Option<DbState>,
    db_get_tile_hits: AtomicU64,
    should_stop: AtomicBool,
    state: Mutex<QueueState>,
    has_job: Condvar,
    done: Condvar,
    player_tile: Mutex<TilePosition>,
    processing: Mutex<HashSet<JobKey>>,
    processed: Condvar,
}

pub struct AsyncNavMeshUpdater {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl AsyncNavMeshUpdater {
    pub fn new(
        settings: &Settings,
        mesh_manager: Arc<TileCachedRecastMeshManager>,
        off_mesh: Arc<OffMeshConnectionsManager>,
        db: Option<Arc<NavMeshDb>>,
    ) -> Result<Self, DbError> {
        let db = match db {
            Some(db) => {
                let next_tile_id = TileId(db.get_max_tile_id()?.0 + 1);
                let next_shape_id = db.get_max_shape_id()?;
                Some(DbState {
                    db,
                    write_enabled: settings.write_to_navmeshdb,
                    allocators: Mutex::new(IdAllocators { next_tile_id, next_shape_id }),
                    get_tile_count: AtomicU64::new(0),
                })
            }
            None => None,
        };
        let shared = Arc::new(Shared {
            settings: settings.clone(),
            mesh_manager,
            off_mesh,
            cache: NavMeshTilesCache::new(settings.max_nav_mesh_tiles_cache_size),
            db,
            db_get_tile_hits: AtomicU64::new(0),
            should_stop: AtomicBool::new(false),
            state: Mutex::new(QueueState {
                jobs: HashMap::new(),
                waiting: JobQueue::default(),
                pushed: HashMap::new(),
                present: HashSet::new(),
                last_updates: HashMap::new(),
                sequences: HashMap::new(),
                next_job_id: 1,
            }),
            has_job: Condvar::new(),
            done: Condvar::new(),
            player_tile: Mutex::new(TilePosition::default()),
            processing: Mutex::new(HashSet::new()),
            processed: Condvar::new(),
        });
        let threads = (0..settings.worker_threads.max(1))
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || worker(&shared))
            })
            .collect();
        Ok(AsyncNavMeshUpdater { shared, threads })
    }

    /// Schedules build, update, and remove jobs for the changed tiles of
    /// one agent configuration. Posts after `stop` are dropped.
    pub fn post(
        &self,
        agent_bounds: AgentBounds,
        cache_item: &SharedNavMeshCacheItem,
        player_tile: TilePosition,
        worldspace: &Worldspace,
        changed_tiles: &BTreeMap<TilePosition, ChangeType>,
    ) {
        if self.shared.should_stop.load(Ordering::Acquire) {
            return;
        }
        let player_changed = {
            let mut guard = self.shared.player_tile.lock();
            let changed = *guard != player_tile;
            *guard = player_tile;
            changed
        };
        if changed_tiles.is_empty() && !player_changed {
            return;
        }
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        if player_changed {
            let out = state
                .waiting
                .take_out_of_range(player_tile, self.shared.settings.max_tiles_number);
            for id in out {
                let Some((agent, changed_tile, sequence_key)) = state
                    .jobs
                    .get(&id)
                    .map(|job| (job.agent_bounds, job.changed_tile, job.sequence_key()))
                else {
                    continue;
                };
                let sequence = state.next_sequence(sequence_key);
                if let Some(job) = state.jobs.get_mut(&id) {
                    job.change_type = ChangeType::Remove;
                    job.sequence = sequence;
                }
                debug!(tile = %changed_tile, ?agent, "Converted out of range job to removal");
                state.waiting.removing.push(id);
            }
            // Tiles outside the window are slated for removal, so their
            // presence records go as well.
            let max_tiles = self.shared.settings.max_tiles_number;
            state.present.retain(|key| should_add_tile(key.1, player_tile, max_tiles));
        }
        for (&tile, &change) in changed_tiles {
            let key = (agent_bounds, tile);
            let sequence = state.next_sequence((agent_bounds, worldspace.clone(), tile));
            if let Some(&id) = state.pushed.get(&key) {
                if let Some(job) = state.jobs.get_mut(&id) {
                    job.change_type = change;
                    job.sequence = sequence;
                }
                continue;
            }
            let process_time = if change == ChangeType::Update {
                state
                    .last_updates
                    .get(&key)
                    .map_or(now, |last| *last + self.shared.settings.min_update_interval)
            } else {
                now
            };
            let id = JobId(state.next_job_id);
            state.next_job_id += 1;
            let job = Job {
                id,
                agent_bounds,
                cache_item: Arc::downgrade(cache_item),
                worldspace: worldspace.clone(),
                changed_tile: tile,
                change_type: change,
                process_time,
                sequence,
            };
            state.waiting.push(&job, now);
            state.jobs.insert(id, job);
            state.pushed.insert(key, id);
        }
        debug!(tiles = changed_tiles.len(), "Posted navmesh update jobs");
        if state.waiting.has_job(now) {
            self.shared.has_job.notify_all();
        }
    }

    pub fn wait(&self, listener: &mut dyn ProgressListener, condition: WaitConditionType) {
        match condition {
            WaitConditionType::AllJobsDone => {
                self.wait_until_jobs_done(listener);
                let mut processing = self.shared.processing.lock();
                while !processing.is_empty() {
                    self.shared.processed.wait_for(&mut processing, Duration::from_millis(20));
                }
            }
            WaitConditionType::RequiredTilesPresent => {
                self.wait_until_required_tiles_present(listener);
            }
        }
    }

    pub fn get_stats(&self) -> AsyncNavMeshUpdaterStats {
        let (jobs, waiting, pushed) = {
            let state = self.shared.state.lock();
            (state.jobs.len(), state.waiting.stats(), state.pushed.len())
        };
        AsyncNavMeshUpdaterStats {
            jobs,
            waiting,
            pushed,
            processing: self.shared.processing.lock().len(),
            cache: self.shared.cache.stats(),
            db: self.shared.db.as_ref().map(|db_state| DbStats {
                get_tile_count: db_state.get_tile_count.load(Ordering::Relaxed),
            }),
            db_get_tile_hits: self.shared.db_get_tile_hits.load(Ordering::Relaxed),
        }
    }

    /// Drops queued jobs, lets in-flight jobs finish, and joins the
    /// workers. Idempotent.
    pub fn stop(&mut self) {
        self.shared.should_stop.store(true, Ordering::Release);
        {
            let mut state = self.shared.state.lock();
            let dropped = state.waiting.drain();
            for id in dropped {
                if let Some(job) = state.jobs.remove(&id) {
                    state.pushed.remove(&job.key());
                }
            }
            if state.jobs.is_empty() {
                self.shared.done.notify_all();
            }
        }
        self.shared.has_job.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }

    fn wait_until_jobs_done(&self, listener: &mut dyn ProgressListener) {
        let mut state = self.shared.state.lock();
        let total = state.jobs.len();
        if total == 0 {
            return;
        }
        listener.set_label("Building navigation mesh");
        listener.set_progress_range(total);
        let mut max_total = total;
        let mut last_remaining = total;
        while !state.jobs.is_empty() {
            self.shared.done.wait_for(&mut state, Duration::from_millis(20));
            let remaining = state.jobs.len();
            if remaining > max_total {
                max_total = remaining;
                listener.set_progress_range(max_total);
            }
            if remaining < last_remaining {
                listener.increase_progress(last_remaining - remaining);
            }
            last_remaining = remaining;
        }
    }

    fn wait_until_required_tiles_present(&self, listener: &mut dyn ProgressListener) {
        let max_distance = self.shared.settings.wait_until_min_distance_to_player;
        if max_distance <= 0 {
            return;
        }
        let player_tile = *self.shared.player_tile.lock();
        let mut state = self.shared.state.lock();
        if state.jobs.is_empty() {
            return;
        }
        listener.set_label("Building navigation mesh around the player");
        let total = state.jobs.len();
        listener.set_progress_range(total);
        let mut max_total = total;
        let mut last_remaining = total;
        loop {
            if state.jobs.is_empty() {
                break;
            }
            let too_close = {
                let processing = self.shared.processing.lock();
                is_absent_tile_too_close(&state, &processing, player_tile, max_distance)
            };
            if !too_close {
                break;
            }
            self.shared.done.wait_for(&mut state, Duration::from_millis(20));
            let remaining = state.jobs.len();
            if remaining > max_total {
                max_total = remaining;
                listener.set_progress_range(max_total);
            }
            if remaining < last_remaining {
                listener.increase_progress(last_remaining - remaining);
            }
            last_remaining = remaining;
        }
    }
}

impl Drop for AsyncNavMeshUpdater {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_absent_tile_too_close(
    state: &QueueState,
    processing: &HashSet<JobKey>,
    player_tile: TilePosition,
    max_distance: i32,
) -> bool {
    state
        .pushed
        .keys()
        .chain(processing.iter())
        .any(|key| {
            !state.present.contains(key)
                && manhattan_distance(key.1, player_tile) < max_distance
        })
}

enum NextAction {
    Process(Job),
    Idle,
    Stop,
}

enum JobOutcome {
    Built,
    Removed,
    Ignored,
    /// The target navmesh was dropped before the result landed.
    Lost,
    Failed,
}

fn worker(shared: &Shared) {
    debug!("Start processing navmesh jobs");
    loop {
        match next_job(shared) {
            NextAction::Process(job) => {
                let outcome = process_job(shared, &job);
                finish_job(shared, &job, outcome);
            }
            NextAction::Idle => cleanup_last_updates(shared),
            NextAction::Stop => break,
        }
    }
    debug!("Stop processing navmesh jobs");
}

fn next_job(shared: &Shared) -> NextAction {
    let mut state = shared.state.lock();
    let mut now = Instant::now();
    while !shared.should_stop.load(Ordering::Acquire) && !state.waiting.has_job(now) {
        let result = shared.has_job.wait_for(&mut state, Duration::from_millis(10));
        now = Instant::now();
        if result.timed_out() {
            if state.jobs.is_empty() {
                shared.done.notify_all();
            }
            return NextAction::Idle;
        }
    }
    if shared.should_stop.load(Ordering::Acquire) {
        return NextAction::Stop;
    }
    let player_tile = *shared.player_tile.lock();
    let Some(id) = state.waiting.pop(player_tile, now) else {
        return NextAction::Idle;
    };
    let Some(job) = state.jobs.get(&id).cloned() else {
        return NextAction::Idle;
    };
    let key = job.key();
    let locked = shared.processing.lock().insert(key);
    if !locked {
        // Another worker holds this key; retry after a delay.
        let retry_delay = shared.settings.min_update_interval.max(Duration::from_millis(10));
        if let Some(job) = state.jobs.get_mut(&id) {
            job.process_time = now + retry_delay;
            let job = job.clone();
            state.waiting.push(&job, now);
        }
        return NextAction::Idle;
    }
    state.pushed.remove(&key);
    if job.change_type == ChangeType::Update {
        state.last_updates.insert(key, now);
    }
    NextAction::Process(job)
}

fn process_job(shared: &Shared, job: &Job) -> JobOutcome {
    let Some(item) = job.cache_item.upgrade() else {
        return JobOutcome::Lost;
    };
    let player_tile = *shared.player_tile.lock();
    let mut change_type = job.change_type;
    if change_type != ChangeType::Remove
        && !should_add_tile(job.changed_tile, player_tile, shared.settings.max_tiles_number)
    {
        change_type = ChangeType::Remove;
    }
    if change_type == ChangeType::Remove {
        if is_stale(shared, job) {
            return JobOutcome::Ignored;
        }
        let status = item.lock().remove_tile(job.changed_tile);
        if let Some(db_state) = &shared.db {
            if db_state.write_enabled {
                if let Err(err) = db_state.db.delete_tiles_at(&job.worldspace, job.changed_tile) {
                    warn!(%err, tile = %job.changed_tile, "Failed to delete stored tiles");
                }
            }
        }
        debug!(tile = %job.changed_tile, ?status, "Removed navmesh tile");
        return JobOutcome::Removed;
    }

    let recast_mesh = shared
        .mesh_manager
        .get_mesh(&job.worldspace, job.changed_tile)
        .filter(|mesh| !mesh.is_empty());
    let Some(recast_mesh) = recast_mesh else {
        if is_stale(shared, job) {
            return JobOutcome::Ignored;
        }
        item.lock().mark_as_empty(job.changed_tile);
        debug!(tile = %job.changed_tile, "Marked navmesh tile empty");
        return JobOutcome::Built;
    };

    let digest = serialization::build_input_digest(
        &shared.settings.recast,
        &job.agent_bounds,
        &recast_mesh,
    );
    let cache_key = CacheKey {
        agent: job.agent_bounds,
        worldspace: job.worldspace.clone(),
        tile: job.changed_tile,
        input_digest: digest,
    };

    let mut prepared: Option<Arc<PreparedNavMeshData>> = None;
    if change_type == ChangeType::Update {
        // Updates always rebuild; the previous content is suspect.
        shared.cache.record_get();
    } else {
        prepared = shared.cache.get(&cache_key);
    }

    let mut db_input: Option<Vec<u8>> = None;
    if prepared.is_none() && change_type != ChangeType::Update {
        if let Some(db_state) = &shared.db {
            db_state.get_tile_count.fetch_add(1, Ordering::Relaxed);
            match read_from_db(shared, db_state, job, &recast_mesh) {
                Ok((input, Some(data))) => {
                    db_input = input;
                    prepared = Some(Arc::new(data));
                    shared.db_get_tile_hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok((input, None)) => db_input = input,
                Err(err) => {
                    warn!(%err, tile = %job.changed_tile, "Failed to read stored tile")
                }
            }
        }
    }

    let mut generated = false;
    if prepared.is_none() {
        match builder::prepare_nav_mesh_tile_data(
            &recast_mesh,
            job.changed_tile,
            &job.agent_bounds,
            &shared.settings.recast,
        ) {
            Ok(Some(data)) => {
                generated = true;
                prepared = if change_type != ChangeType::Update {
                    match shared.cache.set(cache_key.clone(), data.clone()) {
                        Some(stored) => Some(stored),
                        None => Some(Arc::new(data)),
                    }
                } else {
                    Some(Arc::new(data))
                };
            }
            Ok(None) => {
                if is_stale(shared, job) {
                    return JobOutcome::Ignored;
                }
                item.lock().mark_as_empty(job.changed_tile);
                return JobOutcome::Built;
            }
            Err(err) => {
                error!(%err, tile = %job.changed_tile, "Failed to build navmesh tile");
                return JobOutcome::Failed;
            }
        }
    }
    let Some(prepared) = prepared else {
        return JobOutcome::Failed;
    };

    let connections = shared.off_mesh.get(job.changed_tile);
    let tile_data = builder::make_nav_mesh_tile_data(&prepared, &connections);
    if is_stale(shared, job) {
        debug!(tile = %job.changed_tile, "Discarding stale navmesh build result");
        return JobOutcome::Ignored;
    }
    let status = item.lock().update_tile(job.changed_tile, tile_data);
    if !status.is_success() {
        return JobOutcome::Ignored;
    }
    debug!(tile = %job.changed_tile, ?status, change = %change_type, "Updated navmesh tile");

    if generated && change_type != ChangeType::Update {
        if let Some(db_state) = &shared.db {
            if db_state.write_enabled {
                if let Err(err) =
                    write_to_db(shared, db_state, job, &recast_mesh, &prepared, db_input)
                {
                    warn!(%err, tile = %job.changed_tile, "Failed to store navmesh tile");
                }
            }
        }
    }
    JobOutcome::Built
}

fn read_from_db(
    shared: &Shared,
    db_state: &DbState,
    job: &Job,
    mesh: &RecastMesh,
) -> Result<(Option<Vec<u8>>, Option<PreparedNavMeshData>), DbError> {
    let objects = {
        let mut allocators = db_state.allocators.lock();
        let next_shape_id =
            db_state.write_enabled.then_some(&mut allocators.next_shape_id);
        dbutils::make_db_ref_geometry_objects(&db_state.db, mesh.mesh_sources(), next_shape_id)?
    };
    let Some(objects) = objects else {
        return Ok((None, None));
    };
    let input = serialization::serialize_build_input(
        &shared.settings.recast,
        &job.agent_bounds,
        mesh,
        &objects,
    );
    let row = db_state.db.get_tile_data(&job.worldspace, job.changed_tile, &input)?;
    let data = row
        .filter(|row| row.version.0 == NAV_MESH_FORMAT_VERSION)
        .and_then(|row| serialization::deserialize_prepared_nav_mesh_data(&row.data));
    Ok((Some(input), data))
}

fn write_to_db(
    shared: &Shared,
    db_state: &DbState,
    job: &Job,
    mesh: &RecastMesh,
    prepared: &PreparedNavMeshData,
    input: Option<Vec<u8>>,
) -> Result<(), DbError> {
    let mut allocators = db_state.allocators.lock();
    let input = match input {
        Some(input) => input,
        None => {
            let objects = dbutils::make_db_ref_geometry_objects(
                &db_state.db,
                mesh.mesh_sources(),
                Some(&mut allocators.next_shape_id),
            )?;
            let Some(objects) = objects else {
                return Ok(());
            };
            serialization::serialize_build_input(
                &shared.settings.recast,
                &job.agent_bounds,
                mesh,
                &objects,
            )
        }
    };
    let data = serialization::serialize_prepared_nav_mesh_data(prepared);
    match db_state.db.find_tile(&job.worldspace, job.changed_tile, &input)? {
        Some(existing) if existing.version.0 == NAV_MESH_FORMAT_VERSION => {}
        Some(existing) => {
            db_state.db.update_tile(
                existing.tile_id,
                TileVersion(NAV_MESH_FORMAT_VERSION),
                &data,
            )?;
        }
        None => {
            let tile_id = allocators.next_tile_id;
            let inserted = db_state.db.insert_tile(
                tile_id,
                &job.worldspace,
                job.changed_tile,
                TileVersion(NAV_MESH_FORMAT_VERSION),
                &input,
                &data,
            )?;
            if inserted > 0 {
                allocators.next_tile_id = TileId(tile_id.0 + 1);
            }
        }
    }
    Ok(())
}

fn finish_job(shared: &Shared, job: &Job, outcome: JobOutcome) {
    let key = job.key();
    {
        let mut state = shared.state.lock();
        state.jobs.remove(&job.id);
        // The last job of a key retires its sequence stamp; a later post
        // starts a fresh counter.
        if !state.pushed.contains_key(&key) {
            state.sequences.remove(&job.sequence_key());
        }
        match outcome {
            JobOutcome::Built => {
                state.present.insert(key);
            }
            JobOutcome::Removed | JobOutcome::Lost => {
                state.present.remove(&key);
            }
            JobOutcome::Ignored | JobOutcome::Failed => {}
        }
        shared.done.notify_all();
    }
    let mut processing = shared.processing.lock();
    processing.remove(&key);
    shared.processed.notify_all();
}

fn is_stale(shared: &Shared, job: &Job) -> bool {
    let state = shared.state.lock();
    state
        .sequences
        .get(&job.sequence_key())
        .is_some_and(|latest| job.sequence < *latest)
}

// Idle workers expire update timestamps older than the update interval.
fn cleanup_last_updates(shared: &Shared) {
    let now = Instant::now();
    let min_update_interval = shared.settings.min_update_interval;
    let mut state = shared.state.lock();
    state
        .last_updates
        .retain(|_, last| now.duration_since(*last) < min_update_interval);
}
