// Binary formats
// Little-endian encodings of the build input (the cache and store key
// material) and of prepared tile data (the store payload). A magic prefix
// and a format version guard both; any mismatch on read is a miss.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha1::{Digest, Sha1};

use crate::builder::PreparedNavMeshData;
use crate::dbutils::DbRefGeometryObject;
use crate::geometry::{
    AgentBounds, CollisionShapeType, HeightfieldShape, RecastMesh,
};
use crate::settings::RecastSettings;
use crate::tile::TilePosition;

/// Version of the prepared tile data format stored in the tiles table.
pub const NAV_MESH_FORMAT_VERSION: i64 = 2;

const INPUT_MAGIC: &[u8; 4] = b"NVMI";
const DATA_MAGIC: &[u8; 4] = b"NVMD";

fn write_recast_settings(out: &mut Vec<u8>, recast: &RecastSettings) {
    out.write_f32::<LittleEndian>(recast.cell_size).unwrap();
    out.write_f32::<LittleEndian>(recast.cell_height).unwrap();
    out.write_i32::<LittleEndian>(recast.tile_size).unwrap();
    out.write_i32::<LittleEndian>(recast.border_size).unwrap();
    out.write_f32::<LittleEndian>(recast.walkable_slope_angle).unwrap();
    out.write_i32::<LittleEndian>(recast.walkable_climb).unwrap();
    out.write_f32::<LittleEndian>(recast.max_simplification_error).unwrap();
    out.write_f32::<LittleEndian>(recast.detail_sample_dist).unwrap();
    out.write_f32::<LittleEndian>(recast.detail_sample_max_error).unwrap();
    out.write_i32::<LittleEndian>(recast.max_verts_per_poly).unwrap();
    out.write_i32::<LittleEndian>(recast.region_min_area).unwrap();
    out.write_i32::<LittleEndian>(recast.region_merge_area).unwrap();
}

fn write_agent_bounds(out: &mut Vec<u8>, agent: &AgentBounds) {
    let shape_type: u8 = match agent.shape_type {
        CollisionShapeType::Aabb => 0,
        CollisionShapeType::Cylinder => 1,
    };
    out.write_u8(shape_type).unwrap();
    for v in agent.half_extents {
        out.write_f32::<LittleEndian>(v).unwrap();
    }
}

fn write_mesh_geometry(out: &mut Vec<u8>, mesh: &RecastMesh) {
    out.write_u32::<LittleEndian>(mesh.heightfields().len() as u32).unwrap();
    for heightfield in mesh.heightfields() {
        out.write_i32::<LittleEndian>(heightfield.cell_position.0).unwrap();
        out.write_i32::<LittleEndian>(heightfield.cell_position.1).unwrap();
        out.write_i32::<LittleEndian>(heightfield.cell_size).unwrap();
        match &heightfield.shape {
            HeightfieldShape::Plane(plane) => {
                out.write_u8(0).unwrap();
                out.write_f32::<LittleEndian>(plane.height).unwrap();
            }
            HeightfieldShape::Surface(surface) => {
                out.write_u8(1).unwrap();
                out.write_u32::<LittleEndian>(surface.size as u32).unwrap();
                out.write_f32::<LittleEndian>(surface.min_height).unwrap();
                out.write_f32::<LittleEndian>(surface.max_height).unwrap();
                for height in &surface.heights {
                    out.write_f32::<LittleEndian>(*height).unwrap();
                }
            }
        }
    }
    out.write_u32::<LittleEndian>(mesh.objects().len() as u32).unwrap();
    for object in mesh.objects() {
        for v in object.aabb.min.iter().chain(object.aabb.max.iter()) {
            out.write_f32::<LittleEndian>(*v).unwrap();
        }
        out.write_u8(object.area_type as u8).unwrap();
    }
}

/// Build input blob stored next to tile data in the tiles table. Object
/// identity is carried as shape ids resolved against the shapes table.
pub fn serialize_build_input(
    recast: &RecastSettings,
    agent: &AgentBounds,
    mesh: &RecastMesh,
    objects: &[DbRefGeometryObject],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_all(INPUT_MAGIC).unwrap();
    out.write_i64::<LittleEndian>(NAV_MESH_FORMAT_VERSION).unwrap();
    write_recast_settings(&mut out, recast);
    write_agent_bounds(&mut out, agent);
    write_mesh_geometry(&mut out, mesh);
    out.write_u32::<LittleEndian>(objects.len() as u32).unwrap();
    for object in objects {
        out.write_i64::<LittleEndian>(object.shape_id.0).unwrap();
        for v in object.object_transform.position.iter().chain(object.object_transform.rotation.iter())
        {
            out.write_f32::<LittleEndian>(*v).unwrap();
        }
        out.write_f32::<LittleEndian>(object.object_transform.scale).unwrap();
    }
    out
}

/// Content digest of everything a build depends on, used as the in-memory
/// cache key. Shape identity is carried by file name and content hash so
/// the digest does not depend on store state.
pub fn build_input_digest(
    recast: &RecastSettings,
    agent: &AgentBounds,
    mesh: &RecastMesh,
) -> [u8; 20] {
    let mut out = Vec::new();
    write_recast_settings(&mut out, recast);
    write_agent_bounds(&mut out, agent);
    write_mesh_geometry(&mut out, mesh);
    out.write_u32::<LittleEndian>(mesh.mesh_sources().len() as u32).unwrap();
    for source in mesh.mesh_sources() {
        out.write_u32::<LittleEndian>(source.shape.file_name.len() as u32).unwrap();
        out.write_all(source.shape.file_name.as_bytes()).unwrap();
        out.write_u32::<LittleEndian>(source.shape.file_hash.len() as u32).unwrap();
        out.write_all(&source.shape.file_hash).unwrap();
        for v in source
            .object_transform
            .position
            .iter()
            .chain(source.object_transform.rotation.iter())
        {
            out.write_f32::<LittleEndian>(*v).unwrap();
        }
        out.write_f32::<LittleEndian>(source.object_transform.scale).unwrap();
        out.write_u8(source.area_type as u8).unwrap();
    }
    let mut hasher = Sha1::new();
    hasher.update(&out);
    hasher.finalize().into()
}

pub fn serialize_prepared_nav_mesh_data(data: &PreparedNavMeshData) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_all(DATA_MAGIC).unwrap();
    out.write_i64::<LittleEndian>(NAV_MESH_FORMAT_VERSION).unwrap();
    out.write_i32::<LittleEndian>(data.tile.x).unwrap();
    out.write_i32::<LittleEndian>(data.tile.y).unwrap();
    out.write_f32::<LittleEndian>(data.cell_size).unwrap();
    out.write_f32::<LittleEndian>(data.cell_height).unwrap();
    out.write_i32::<LittleEndian>(data.width).unwrap();
    out.write_i32::<LittleEndian>(data.height).unwrap();
    out.write_i32::<LittleEndian>(data.poly_count).unwrap();
    out.write_u32::<LittleEndian>(data.walkable.len() as u32).unwrap();
    out.write_all(&data.walkable).unwrap();
    out
}

/// Returns None for a blob with the wrong magic, version, or layout.
pub fn deserialize_prepared_nav_mesh_data(bytes: &[u8]) -> Option<PreparedNavMeshData> {
    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).ok()?;
    if &magic != DATA_MAGIC {
        return None;
    }
    if cursor.read_i64::<LittleEndian>().ok()? != NAV_MESH_FORMAT_VERSION {
        return None;
    }
    let x = cursor.read_i32::<LittleEndian>().ok()?;
    let y = cursor.read_i32::<LittleEndian>().ok()?;
    let cell_size = cursor.read_f32::<LittleEndian>().ok()?;
    let cell_height = cursor.read_f32::<LittleEndian>().ok()?;
    let width = cursor.read_i32::<LittleEndian>().ok()?;
    let height = cursor.read_i32::<LittleEndian>().ok()?;
    let poly_count = cursor.read_i32::<LittleEndian>().ok()?;
    let len = cursor.read_u32::<LittleEndian>().ok()? as usize;
    let mut walkable = vec![0u8; len];
    cursor.read_exact(&mut walkable).ok()?;
    Some(PreparedNavMeshData {
        tile: TilePosition::new(x, y),
        cell_size,
        cell_height,
        width,
        height,
        poly_count,
        walkable,
    })
}
