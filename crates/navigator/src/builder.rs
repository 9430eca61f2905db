// Tile builder
// Bakes a geometry snapshot into a walkable-area grid for one tile and one
// agent configuration. Baking is synchronous and deterministic: the same
// snapshot, tile, agent, and settings always produce identical output.

use thiserror::Error;

use crate::geometry::{AgentBounds, AreaType, RecastMesh};
use crate::offmesh::OffMeshConnection;
use crate::serialization::serialize_prepared_nav_mesh_data;
use crate::settings::RecastSettings;
use crate::tile::{TilePosition, tile_world_size};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid agent bounds: half extents must be positive and finite")]
    InvalidAgentBounds,
}

/// Intermediate baking result, cacheable and storable.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedNavMeshData {
    pub tile: TilePosition,
    pub cell_size: f32,
    pub cell_height: f32,
    pub width: i32,
    pub height: i32,
    pub poly_count: i32,
    /// Area id per cell, row-major `width * height`; 0 is unwalkable.
    pub walkable: Vec<u8>,
}

impl PreparedNavMeshData {
    /// Approximate heap footprint, used for cache and store budgets.
    pub fn size_bytes(&self) -> u64 {
        (self.walkable.len() + std::mem::size_of::<Self>()) as u64
    }
}

/// Final tile payload installed into a navmesh cache item.
#[derive(Clone, Debug, PartialEq)]
pub struct NavMeshTileData(pub Vec<u8>);

impl NavMeshTileData {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Bakes the snapshot into `PreparedNavMeshData`.
///
/// Returns Ok(None) when the snapshot holds no geometry or yields no
/// walkable surface; the caller marks the tile empty in that case.
pub fn prepare_nav_mesh_tile_data(
    mesh: &RecastMesh,
    tile: TilePosition,
    agent: &AgentBounds,
    recast: &RecastSettings,
) -> Result<Option<PreparedNavMeshData>, BuildError> {
    if !agent.is_valid() {
        return Err(BuildError::InvalidAgentBounds);
    }
    if mesh.is_empty() {
        return Ok(None);
    }

    let size = recast.tile_size.max(1) as usize;
    let tile_size = tile_world_size(recast);
    let origin_x = tile.x as f32 * tile_size;
    let origin_y = tile.y as f32 * tile_size;
    let mut walkable = vec![0u8; size * size];

    // Base pass: cells whose center lies on a heightfield are ground.
    for row in 0..size {
        for col in 0..size {
            let cx = origin_x + (col as f32 + 0.5) * recast.cell_size;
            let cy = origin_y + (row as f32 + 0.5) * recast.cell_size;
            let covered = mesh.heightfields().iter().any(|heightfield| {
                let bounds = heightfield.bounds();
                bounds.min[0] <= cx && cx < bounds.max[0] && bounds.min[1] <= cy && cy < bounds.max[1]
            });
            if covered {
                walkable[row * size + col] = AreaType::Ground as u8;
            }
        }
    }

    // Object pass: footprints override the base area, last writer wins in
    // registration order.
    for object in mesh.objects() {
        for row in 0..size {
            for col in 0..size {
                let cx = origin_x + (col as f32 + 0.5) * recast.cell_size;
                let cy = origin_y + (row as f32 + 0.5) * recast.cell_size;
                let aabb = &object.aabb;
                if aabb.min[0] <= cx && cx <= aabb.max[0] && aabb.min[1] <= cy && cy <= aabb.max[1] {
                    walkable[row * size + col] = object.area_type as u8;
                }
            }
        }
    }

    erode(&mut walkable, size, erosion_radius(agent, recast));

    if walkable.iter().all(|area| *area == 0) {
        return Ok(None);
    }

    let poly_count = count_regions(&walkable, size);
    Ok(Some(PreparedNavMeshData {
        tile,
        cell_size: recast.cell_size,
        cell_height: recast.cell_height,
        width: size as i32,
        height: size as i32,
        poly_count,
        walkable,
    }))
}

/// Merges off-mesh connections and serializes the installable tile bytes.
pub fn make_nav_mesh_tile_data(
    prepared: &PreparedNavMeshData,
    off_mesh_connections: &[OffMeshConnection],
) -> NavMeshTileData {
    use byteorder::{LittleEndian, WriteBytesExt};

    let mut bytes = serialize_prepared_nav_mesh_data(prepared);
    bytes.write_u32::<LittleEndian>(off_mesh_connections.len() as u32).unwrap();
    for connection in off_mesh_connections {
        for v in connection.start.iter().chain(connection.end.iter()) {
            bytes.write_f32::<LittleEndian>(*v).unwrap();
        }
        bytes.write_f32::<LittleEndian>(connection.radius).unwrap();
        bytes.write_u8(connection.bidirectional as u8).unwrap();
        bytes.write_u8(connection.area_type as u8).unwrap();
    }
    NavMeshTileData(bytes)
}

fn erosion_radius(agent: &AgentBounds, recast: &RecastSettings) -> usize {
    let radius = agent.half_extents[0].max(agent.half_extents[1]);
    (radius / recast.cell_size).ceil() as usize
}

// Peels walkable cells bordering an in-grid unwalkable cell, once per
// radius step. Grid edges do not count as unwalkable.
fn erode(walkable: &mut [u8], size: usize, radius: usize) {
    for _ in 0..radius {
        let mut peeled = Vec::new();
        for row in 0..size {
            for col in 0..size {
                if walkable[row * size + col] == 0 {
                    continue;
                }
                let blocked = [(0i32, 1i32), (0, -1), (1, 0), (-1, 0)].iter().any(|(dr, dc)| {
                    let r = row as i32 + dr;
                    let c = col as i32 + dc;
                    r >= 0
                        && c >= 0
                        && (r as usize) < size
                        && (c as usize) < size
                        && walkable[r as usize * size + c as usize] == 0
                });
                if blocked {
                    peeled.push(row * size + col);
                }
            }
        }
        if peeled.is_empty() {
            break;
        }
        for index in peeled {
            walkable[index] = 0;
        }
    }
}

// Counts 4-connected walkable regions.
fn count_regions(walkable: &[u8], size: usize) -> i32 {
    let mut seen = vec![false; walkable.len()];
    let mut regions = 0;
    let mut stack = Vec::new();
    for start in 0..walkable.len() {
        if walkable[start] == 0 || seen[start] {
            continue;
        }
        regions += 1;
        seen[start] = true;
        stack.push(start);
        while let Some(index) = stack.pop() {
            let row = (index / size) as i32;
            let col = (index % size) as i32;
            for (dr, dc) in [(0i32, 1i32), (0, -1), (1, 0), (-1, 0)] {
                let r = row + dr;
                let c = col + dc;
                if r < 0 || c < 0 || r as usize >= size || c as usize >= size {
                    continue;
                }
                let next = r as usize * size + c as usize;
                if walkable[next] != 0 && !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
    }
    regions
}
