// Store helpers
// Resolves mesh sources to shape ids and builds the object reference list
// serialized into the tile input blob. Shapes are content addressed by
// name, type, and file hash; in read-only mode unknown shapes stay
// unresolved and the tile cannot use the store.

use crate::db::{DbError, NavMeshDb, ShapeId, ShapeType};
use crate::geometry::{AreaType, MeshSource, ObjectTransform};

/// Object reference carried in the tile input blob.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DbRefGeometryObject {
    pub shape_id: ShapeId,
    pub object_transform: ObjectTransform,
}

fn shape_type_of(source: &MeshSource) -> ShapeType {
    match source.area_type {
        AreaType::Null => ShapeType::Avoid,
        _ => ShapeType::Collision,
    }
}

/// Finds the shape row for a source, inserting it when an allocator is
/// given. Returns None when the shape is unknown and writes are disabled.
pub fn resolve_mesh_source(
    db: &NavMeshDb,
    source: &MeshSource,
    next_shape_id: Option<&mut ShapeId>,
) -> Result<Option<ShapeId>, DbError> {
    let name = &source.shape.file_name;
    let shape_type = shape_type_of(source);
    let hash = &source.shape.file_hash;
    if let Some(shape_id) = db.find_shape_id(name, shape_type, hash)? {
        return Ok(Some(shape_id));
    }
    let Some(next_shape_id) = next_shape_id else {
        return Ok(None);
    };
    let shape_id = ShapeId(next_shape_id.0 + 1);
    db.insert_shape(shape_id, name, shape_type, hash)?;
    *next_shape_id = shape_id;
    Ok(Some(shape_id))
}

/// Builds the sorted object reference list for a tile. Returns None when
/// any source stays unresolved (read-only store with unknown shapes).
pub fn make_db_ref_geometry_objects(
    db: &NavMeshDb,
    sources: &[MeshSource],
    mut next_shape_id: Option<&mut ShapeId>,
) -> Result<Option<Vec<DbRefGeometryObject>>, DbError> {
    let mut objects = Vec::with_capacity(sources.len());
    for source in sources {
        let resolved =
            resolve_mesh_source(db, source, next_shape_id.as_mut().map(|id| &mut **id))?;
        let Some(shape_id) = resolved else {
            return Ok(None);
        };
        objects.push(DbRefGeometryObject { shape_id, object_transform: source.object_transform });
    }
    objects.sort_by_key(|object| object.shape_id);
    Ok(Some(objects))
}
