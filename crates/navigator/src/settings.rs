// Navigator settings
// RecastSettings holds the tile baking parameters and can be loaded from a
// JSON file with per-field defaults. Settings holds the runtime knobs for
// the updater, cache, and persistent store, read from an INI Config.

use std::path::Path;
use std::time::Duration;

use navmesh_shared::config::Config;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tile baking parameters.
///
/// All fields are optional in the JSON representation and fall back to the
/// defaults below, so a partial override file stays valid across versions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecastSettings {
    /// Horizontal voxel size in world units.
    #[serde(default = "default_cell_size")]
    pub cell_size: f32,
    /// Vertical voxel size in world units.
    #[serde(default = "default_cell_height")]
    pub cell_height: f32,
    /// Tile edge length in cells.
    #[serde(default = "default_tile_size")]
    pub tile_size: i32,
    /// Extra cells baked around each tile to keep borders consistent.
    #[serde(default = "default_border_size")]
    pub border_size: i32,
    #[serde(default = "default_walkable_slope_angle")]
    pub walkable_slope_angle: f32,
    #[serde(default = "default_walkable_climb")]
    pub walkable_climb: i32,
    #[serde(default = "default_max_simplification_error")]
    pub max_simplification_error: f32,
    #[serde(default = "default_detail_sample_dist")]
    pub detail_sample_dist: f32,
    #[serde(default = "default_detail_sample_max_error")]
    pub detail_sample_max_error: f32,
    #[serde(default = "default_max_verts_per_poly")]
    pub max_verts_per_poly: i32,
    #[serde(default = "default_region_min_area")]
    pub region_min_area: i32,
    #[serde(default = "default_region_merge_area")]
    pub region_merge_area: i32,
}

fn default_cell_size() -> f32 {
    0.2
}
fn default_cell_height() -> f32 {
    0.2
}
fn default_tile_size() -> i32 {
    64
}
fn default_border_size() -> i32 {
    16
}
fn default_walkable_slope_angle() -> f32 {
    46.0
}
fn default_walkable_climb() -> i32 {
    4
}
fn default_max_simplification_error() -> f32 {
    1.3
}
fn default_detail_sample_dist() -> f32 {
    6.0
}
fn default_detail_sample_max_error() -> f32 {
    1.0
}
fn default_max_verts_per_poly() -> i32 {
    6
}
fn default_region_min_area() -> i32 {
    64
}
fn default_region_merge_area() -> i32 {
    400
}

impl Default for RecastSettings {
    fn default() -> Self {
        RecastSettings {
            cell_size: default_cell_size(),
            cell_height: default_cell_height(),
            tile_size: default_tile_size(),
            border_size: default_border_size(),
            walkable_slope_angle: default_walkable_slope_angle(),
            walkable_climb: default_walkable_climb(),
            max_simplification_error: default_max_simplification_error(),
            detail_sample_dist: default_detail_sample_dist(),
            detail_sample_max_error: default_detail_sample_max_error(),
            max_verts_per_poly: default_max_verts_per_poly(),
            region_min_area: default_region_min_area(),
            region_merge_area: default_region_merge_area(),
        }
    }
}

impl RecastSettings {
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SettingsError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// Runtime knobs for the updater, cache, and persistent store.
#[derive(Clone, Debug)]
pub struct Settings {
    pub recast: RecastSettings,
    /// Number of background build threads, at least 1.
    pub worker_threads: usize,
    /// Byte budget of the in-memory prepared-tile cache. Zero disables it.
    pub max_nav_mesh_tiles_cache_size: u64,
    /// Cap on the number of tiles kept around the player position.
    pub max_tiles_number: i32,
    /// Minimum delay between rebuilds of the same tile for update changes.
    pub min_update_interval: Duration,
    /// Distance within which absent tiles block the required-tiles wait.
    /// Non-positive disables the wait entirely.
    pub wait_until_min_distance_to_player: i32,
    /// Whether built tiles are written back to the store.
    pub write_to_navmeshdb: bool,
    /// Byte budget of the persistent store.
    pub max_navmeshdb_file_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            recast: RecastSettings::default(),
            worker_threads: 1,
            max_nav_mesh_tiles_cache_size: 64 * 1024 * 1024,
            max_tiles_number: 1024,
            min_update_interval: Duration::from_millis(250),
            wait_until_min_distance_to_player: 5,
            write_to_navmeshdb: true,
            max_navmeshdb_file_size: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Settings::default();
        let threads = std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(1);
        Settings {
            recast: RecastSettings::default(),
            worker_threads: config
                .get_int_default("AsyncNavMeshUpdaterThreads", threads as i32)
                .max(1) as usize,
            max_nav_mesh_tiles_cache_size: config.get_u64_default(
                "MaxNavMeshTilesCacheSize",
                defaults.max_nav_mesh_tiles_cache_size,
            ),
            max_tiles_number: config.get_int_default("MaxTilesNumber", defaults.max_tiles_number),
            min_update_interval: Duration::from_millis(config.get_u64_default(
                "MinUpdateInterval",
                defaults.min_update_interval.as_millis() as u64,
            )),
            wait_until_min_distance_to_player: config.get_int_default(
                "WaitUntilMinDistanceToPlayer",
                defaults.wait_until_min_distance_to_player,
            ),
            write_to_navmeshdb: config
                .get_bool_default("WriteToNavMeshDb", defaults.write_to_navmeshdb),
            max_navmeshdb_file_size: config
                .get_u64_default("MaxNavMeshDbFileSize", defaults.max_navmeshdb_file_size),
        }
    }
}
