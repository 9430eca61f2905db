// End-to-end coverage of the async updater: posting, waiting, the
// prepared-tile cache, and the persistent store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use navigator::db::{MEMORY_DB_PATH, NavMeshDb, TileId};
use navmesh_shared::log::initialize_logging;
use navigator::dbutils::make_db_ref_geometry_objects;
use navigator::geometry::{
    Aabb, AgentBounds, AreaType, CollisionShape, CollisionShapeType, HeightfieldPlane,
    HeightfieldShape, ObjectId, ObjectTransform, ShapeKind, Worldspace,
};
use navigator::mesh_manager::TileCachedRecastMeshManager;
use navigator::offmesh::OffMeshConnectionsManager;
use navigator::serialization::{NAV_MESH_FORMAT_VERSION, serialize_build_input};
use navigator::settings::Settings;
use navigator::tile::TilePosition;
use navigator::updater::{
    AsyncNavMeshUpdater, ChangeType, ProgressListener, SilentListener, WaitConditionType,
};
use navigator::{NavMeshCacheItem, SharedNavMeshCacheItem};

fn make_settings() -> Settings {
    Settings {
        worker_threads: 1,
        min_update_interval: Duration::ZERO,
        wait_until_min_distance_to_player: 1,
        ..Settings::default()
    }
}

fn worldspace() -> Worldspace {
    Worldspace::new("sys::default")
}

fn agent() -> AgentBounds {
    AgentBounds { shape_type: CollisionShapeType::Aabb, half_extents: [0.29, 0.29, 0.66] }
}

fn make_manager(settings: &Settings) -> Arc<TileCachedRecastMeshManager> {
    Arc::new(TileCachedRecastMeshManager::new(settings.recast.clone(), worldspace()))
}

fn make_updater(
    settings: &Settings,
    manager: &Arc<TileCachedRecastMeshManager>,
    db: Option<Arc<NavMeshDb>>,
) -> AsyncNavMeshUpdater {
    static LOGGING: std::sync::Once = std::sync::Once::new();
    LOGGING.call_once(|| initialize_logging(None, "warn"));
    let off_mesh = Arc::new(OffMeshConnectionsManager::new(settings.recast.clone()));
    AsyncNavMeshUpdater::new(settings, manager.clone(), off_mesh, db).unwrap()
}

fn add_plane(manager: &TileCachedRecastMeshManager) {
    for cell in [(-1, -1), (-1, 0), (0, -1), (0, 0)] {
        manager.add_heightfield(cell, 8192, HeightfieldShape::Plane(HeightfieldPlane {
            height: 0.0,
        }));
    }
}

fn add_box_object(manager: &TileCachedRecastMeshManager) {
    let shape = Arc::new(CollisionShape {
        file_name: "test.nif".to_string(),
        file_hash: b"test_hash".to_vec(),
        kind: ShapeKind::Box { half_extents: [100.0, 100.0, 20.0] },
    });
    manager.add_object(
        ObjectId(1),
        shape,
        ObjectTransform { position: [0.1, 0.2, 0.3], rotation: [0.0, 0.0, 0.0], scale: 3.14 },
        Aabb { min: [-100.0, -100.0, -20.0], max: [100.0, 100.0, 20.0] },
        AreaType::Ground,
    );
}

fn changed(tile: TilePosition, change: ChangeType) -> BTreeMap<TilePosition, ChangeType> {
    BTreeMap::from([(tile, change)])
}

fn make_cache_item() -> SharedNavMeshCacheItem {
    NavMeshCacheItem::make_shared(1)
}

/// Reconstructs the store key of a built tile from the live geometry.
fn tile_input(
    settings: &Settings,
    manager: &TileCachedRecastMeshManager,
    db: &NavMeshDb,
    tile: TilePosition,
) -> Option<Vec<u8>> {
    let mesh = manager.get_mesh(&worldspace(), tile)?;
    let objects = make_db_ref_geometry_objects(db, mesh.mesh_sources(), None).unwrap()?;
    Some(serialize_build_input(&settings.recast, &agent(), &mesh, &objects))
}

#[derive(Default)]
struct RecordingListener {
    labels: Vec<String>,
    progress: usize,
}

impl ProgressListener for RecordingListener {
    fn set_label(&mut self, label: &str) {
        self.labels.push(label.to_string());
    }

    fn increase_progress(&mut self, increase: usize) {
        self.progress += increase;
    }
}

#[test]
fn wait_on_idle_updater_returns_for_both_conditions() {
    let settings = make_settings();
    let manager = make_manager(&settings);
    let mut updater = make_updater(&settings, &manager, None);
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    updater.wait(&mut SilentListener, WaitConditionType::RequiredTilesPresent);
    updater.stop();
}

#[test]
fn posted_add_produces_a_tile_with_non_zero_ref() {
    let settings = make_settings();
    let manager = make_manager(&settings);
    add_plane(&manager);
    let mut updater = make_updater(&settings, &manager, None);
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);
    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    assert_ne!(item.lock().tile_ref(tile), 0);
    updater.stop();
}

#[test]
fn repeated_add_post_hits_the_cache() {
    let settings = make_settings();
    let manager = make_manager(&settings);
    add_plane(&manager);
    let mut updater = make_updater(&settings, &manager, None);
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);
    for _ in 0..2 {
        updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
        updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    }
    let stats = updater.get_stats();
    assert_eq!(stats.cache.get_count, 2);
    assert_eq!(stats.cache.hit_count, 1);
    updater.stop();
}

#[test]
fn update_posts_never_hit_or_fill_the_cache() {
    let settings = make_settings();
    let manager = make_manager(&settings);
    add_plane(&manager);
    let mut updater = make_updater(&settings, &manager, None);
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);
    for _ in 0..2 {
        updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Update));
        updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    }
    let stats = updater.get_stats();
    assert_eq!(stats.cache.get_count, 2);
    assert_eq!(stats.cache.hit_count, 0);
    assert_eq!(stats.cache.entry_count, 0);
    assert_ne!(item.lock().tile_ref(tile), 0);
    updater.stop();
}

#[test]
fn built_tile_is_written_to_the_store_with_the_current_version() {
    let settings = make_settings();
    let manager = make_manager(&settings);
    add_plane(&manager);
    add_box_object(&manager);
    let db = Arc::new(NavMeshDb::new(MEMORY_DB_PATH, u64::MAX).unwrap());
    let mut updater = make_updater(&settings, &manager, Some(db.clone()));
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);
    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    updater.stop();

    let input = tile_input(&settings, &manager, &db, tile).expect("shapes are stored");
    let stored = db.find_tile(&worldspace(), tile, &input).unwrap().expect("tile is stored");
    assert_eq!(stored.tile_id, TileId(1));
    assert_eq!(stored.version.0, NAV_MESH_FORMAT_VERSION);
}

#[test]
fn disabled_writes_store_neither_tiles_nor_shapes() {
    let settings = Settings { write_to_navmeshdb: false, ..make_settings() };
    let manager = make_manager(&settings);
    add_plane(&manager);
    add_box_object(&manager);
    let db = Arc::new(NavMeshDb::new(MEMORY_DB_PATH, u64::MAX).unwrap());
    let mut updater = make_updater(&settings, &manager, Some(db.clone()));
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);
    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    updater.stop();

    assert_ne!(item.lock().tile_ref(tile), 0);
    assert_eq!(db.get_max_tile_id().unwrap(), TileId(0));
    assert_eq!(
        db.find_shape_id("test.nif", navigator::ShapeType::Collision, b"test_hash").unwrap(),
        None
    );
}

#[test]
fn zero_cache_budget_reads_the_store_on_every_post() {
    let settings = Settings { max_nav_mesh_tiles_cache_size: 0, ..make_settings() };
    let manager = make_manager(&settings);
    add_plane(&manager);
    let db = Arc::new(NavMeshDb::new(MEMORY_DB_PATH, u64::MAX).unwrap());
    let mut updater = make_updater(&settings, &manager, Some(db));
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);

    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    let stats = updater.get_stats();
    assert_eq!(stats.cache.get_count, 1);
    assert_eq!(stats.cache.hit_count, 0);
    assert_eq!(stats.db.unwrap().get_tile_count, 1);
    assert_eq!(stats.db_get_tile_hits, 0);

    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    let stats = updater.get_stats();
    assert_eq!(stats.cache.get_count, 2);
    assert_eq!(stats.cache.hit_count, 0);
    assert_eq!(stats.db.unwrap().get_tile_count, 2);
    assert_eq!(stats.db_get_tile_hits, 1);
    updater.stop();
}

#[test]
fn remove_clears_the_tile_and_the_stored_rows() {
    let settings = make_settings();
    let manager = make_manager(&settings);
    add_plane(&manager);
    let db = Arc::new(NavMeshDb::new(MEMORY_DB_PATH, u64::MAX).unwrap());
    let mut updater = make_updater(&settings, &manager, Some(db.clone()));
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);

    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    assert_ne!(item.lock().tile_ref(tile), 0);

    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Remove));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    assert_eq!(item.lock().tile_ref(tile), 0);
    updater.stop();

    let input = tile_input(&settings, &manager, &db, tile).expect("geometry is still live");
    assert!(db.find_tile(&worldspace(), tile, &input).unwrap().is_none());
}

#[test]
fn tile_out_of_range_of_the_player_is_removed() {
    let settings = Settings { max_tiles_number: 9, ..make_settings() };
    let manager = make_manager(&settings);
    add_plane(&manager);
    let mut updater = make_updater(&settings, &manager, None);
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);

    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    assert_ne!(item.lock().tile_ref(tile), 0);

    // The player moved far away; the rebuild turns into a removal.
    let far = TilePosition::new(100, 100);
    updater.post(agent(), &item, far, &worldspace(), &changed(tile, ChangeType::Update));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    assert_eq!(item.lock().tile_ref(tile), 0);
    updater.stop();
}

#[test]
fn store_byte_budget_keeps_the_newest_rows() {
    let budget = 20_000;
    let settings = make_settings();
    let manager = make_manager(&settings);
    add_plane(&manager);
    add_box_object(&manager);
    let db = Arc::new(NavMeshDb::new(MEMORY_DB_PATH, budget).unwrap());
    let mut updater = make_updater(&settings, &manager, Some(db.clone()));
    let item = make_cache_item();

    let mut tiles = BTreeMap::new();
    for x in -5..=5 {
        for y in -5..=5 {
            tiles.insert(TilePosition::new(x, y), ChangeType::Add);
        }
    }
    updater.post(agent(), &item, TilePosition::new(0, 0), &worldspace(), &tiles);
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    updater.stop();

    let mut surviving_ids = Vec::new();
    for tile in tiles.keys() {
        let input = tile_input(&settings, &manager, &db, *tile).expect("shapes are stored");
        if let Some(stored) = db.find_tile(&worldspace(), *tile, &input).unwrap() {
            surviving_ids.push(stored.tile_id.0);
        }
    }
    surviving_ids.sort();
    assert!(!surviving_ids.is_empty());
    assert!(surviving_ids.len() < tiles.len());
    // Eviction drops the smallest ids, so the survivors are the most
    // recently inserted contiguous range.
    let max = *surviving_ids.last().unwrap();
    let expected: Vec<i64> = (max - surviving_ids.len() as i64 + 1..=max).collect();
    assert_eq!(surviving_ids, expected);
    assert!(db.total_bytes().unwrap() <= budget);
}

#[test]
fn preexisting_rows_advance_the_next_tile_id() {
    let settings = make_settings();
    let manager = make_manager(&settings);
    add_plane(&manager);
    let db = Arc::new(NavMeshDb::new(MEMORY_DB_PATH, u64::MAX).unwrap());
    db.insert_tile(
        TileId(1),
        &worldspace(),
        TilePosition::new(100, 100),
        navigator::TileVersion(NAV_MESH_FORMAT_VERSION),
        b"unrelated input",
        b"unrelated data",
    )
    .unwrap();
    let mut updater = make_updater(&settings, &manager, Some(db.clone()));
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);
    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    updater.stop();

    let input = tile_input(&settings, &manager, &db, tile).expect("geometry is live");
    let stored = db.find_tile(&worldspace(), tile, &input).unwrap().expect("tile is stored");
    assert_eq!(stored.tile_id, TileId(2));
}

#[test]
fn repeated_updates_are_delayed_by_the_update_interval() {
    let settings = Settings { min_update_interval: Duration::from_millis(250), ..make_settings() };
    let manager = make_manager(&settings);
    add_plane(&manager);
    let mut updater = make_updater(&settings, &manager, None);
    let item = make_cache_item();

    let mut tiles = BTreeMap::new();
    for x in -3..=3 {
        for y in -3..=3 {
            tiles.insert(TilePosition::new(x, y), ChangeType::Update);
        }
    }
    updater.post(agent(), &item, TilePosition::new(0, 0), &worldspace(), &tiles);
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);

    updater.post(agent(), &item, TilePosition::new(0, 0), &worldspace(), &tiles);
    let stats = updater.get_stats();
    assert_eq!(stats.jobs, 49);
    assert_eq!(stats.waiting.delayed, 49);

    let mut listener = RecordingListener::default();
    updater.wait(&mut listener, WaitConditionType::AllJobsDone);
    assert_eq!(updater.get_stats().jobs, 0);
    assert_eq!(listener.labels, vec!["Building navigation mesh".to_string()]);
    assert_eq!(listener.progress, 49);
    updater.stop();
}

#[test]
fn add_followed_by_remove_leaves_the_tile_absent() {
    let settings = make_settings();
    let manager = make_manager(&settings);
    add_plane(&manager);
    let mut updater = make_updater(&settings, &manager, None);
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);
    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Remove));
    updater.wait(&mut SilentListener, WaitConditionType::AllJobsDone);
    assert_eq!(item.lock().tile_ref(tile), 0);
    updater.stop();
}

#[test]
fn posts_after_stop_are_dropped() {
    let settings = make_settings();
    let manager = make_manager(&settings);
    add_plane(&manager);
    let mut updater = make_updater(&settings, &manager, None);
    updater.stop();
    let item = make_cache_item();
    let tile = TilePosition::new(0, 0);
    updater.post(agent(), &item, tile, &worldspace(), &changed(tile, ChangeType::Add));
    assert_eq!(updater.get_stats().jobs, 0);
    assert_eq!(item.lock().tile_ref(tile), 0);
}
