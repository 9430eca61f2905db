// Tile grid math
// Navmesh tiles form a square grid per worldspace; positions are integer
// grid coordinates obtained by flooring world coordinates by the tile size.

use serde::{Deserialize, Serialize};

use crate::settings::RecastSettings;

/// Integer grid coordinate of a navmesh tile within a worldspace.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TilePosition {
    pub x: i32,
    pub y: i32,
}

impl TilePosition {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for TilePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Inclusive-exclusive rectangle of tile positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TilesPositionsRange {
    pub begin: TilePosition,
    pub end: TilePosition,
}

impl TilesPositionsRange {
    pub fn contains(&self, tile: TilePosition) -> bool {
        self.begin.x <= tile.x && tile.x < self.end.x && self.begin.y <= tile.y && tile.y < self.end.y
    }
}

pub fn manhattan_distance(lhs: TilePosition, rhs: TilePosition) -> i32 {
    (lhs.x - rhs.x).abs() + (lhs.y - rhs.y).abs()
}

/// World-space edge length of one tile.
pub fn tile_world_size(recast: &RecastSettings) -> f32 {
    recast.cell_size * recast.tile_size as f32
}

/// Tile containing a world-space XY position.
pub fn get_tile_position(recast: &RecastSettings, x: f32, y: f32) -> TilePosition {
    let size = tile_world_size(recast);
    TilePosition::new((x / size).floor() as i32, (y / size).floor() as i32)
}

/// Tiles overlapped by a world-space XY rectangle, expanded by the border.
pub fn get_tiles_range(
    recast: &RecastSettings,
    min: [f32; 2],
    max: [f32; 2],
) -> TilesPositionsRange {
    let border = recast.border_size as f32 * recast.cell_size;
    let begin = get_tile_position(recast, min[0] - border, min[1] - border);
    let last = get_tile_position(recast, max[0] + border, max[1] + border);
    TilesPositionsRange {
        begin,
        end: TilePosition::new(last.x + 1, last.y + 1),
    }
}

/// Whether a tile falls inside the square window of at most `max_tiles`
/// positions centered on the player tile.
pub fn should_add_tile(tile: TilePosition, player_tile: TilePosition, max_tiles: i32) -> bool {
    if max_tiles <= 0 {
        return false;
    }
    let side = (int_sqrt(max_tiles) - 1) / 2;
    (tile.x - player_tile.x).abs() <= side && (tile.y - player_tile.y).abs() <= side
}

fn int_sqrt(value: i32) -> i32 {
    (value as f64).sqrt().floor() as i32
}
