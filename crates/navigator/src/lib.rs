// Navigator - asynchronous navigation mesh update pipeline
// Turns collision geometry changes into built navmesh tiles on background
// workers, with an in-memory prepared-tile cache and an optional SQLite
// store for built tiles.

pub mod builder;
pub mod cache;
pub mod cache_item;
pub mod db;
pub mod dbutils;
pub mod geometry;
pub mod mesh_manager;
pub mod offmesh;
pub mod serialization;
pub mod settings;
pub mod stats;
pub mod tile;
pub mod updater;

pub use builder::{NavMeshTileData, PreparedNavMeshData};
pub use cache::{CacheStats, NavMeshTilesCache};
pub use cache_item::{
    NavMeshCacheItem, SharedNavMeshCacheItem, UpdateNavMeshStatus, Version,
};
pub use db::{MEMORY_DB_PATH, NavMeshDb, ShapeId, ShapeType, TileId, TileVersion};
pub use geometry::{
    Aabb, AgentBounds, AreaType, CollisionShape, CollisionShapeType, HeightfieldPlane,
    HeightfieldShape, HeightfieldSurface, MeshSource, ObjectId, ObjectTransform, RecastMesh,
    Worldspace,
};
pub use mesh_manager::TileCachedRecastMeshManager;
pub use offmesh::{OffMeshConnection, OffMeshConnectionsManager};
pub use settings::{RecastSettings, Settings};
pub use stats::AsyncNavMeshUpdaterStats;
pub use tile::TilePosition;
pub use updater::{
    AsyncNavMeshUpdater, ChangeType, ProgressListener, SilentListener, WaitConditionType,
};
