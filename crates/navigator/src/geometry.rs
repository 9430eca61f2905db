// Geometry model
// Collision shapes, heightfields, and the immutable per-tile snapshot the
// builder consumes. Snapshots are taken under the mesh manager lock and
// shared read-only with the worker threads.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Named, independently tiled navigable area.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Worldspace(Arc<str>);

impl Worldspace {
    pub fn new(name: &str) -> Self {
        Worldspace(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Worldspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Area classification attached to walkable geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AreaType {
    Null = 0,
    Water = 1,
    Door = 2,
    Pathgrid = 3,
    Ground = 63,
}

/// Identifier of a collision object registered with the mesh manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

/// Original placement of an object as authored in content files. Part of the
/// shape identity for the persistent store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectTransform {
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub scale: f32,
}

/// Geometric payload of a collision shape.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeKind {
    Box { half_extents: [f32; 3] },
    Cylinder { half_extents: [f32; 3] },
    TriMesh { vertices: Vec<[f32; 3]>, indices: Vec<[u32; 3]> },
}

/// Source collision shape with its content identity.
#[derive(Clone, Debug, PartialEq)]
pub struct CollisionShape {
    pub file_name: String,
    pub file_hash: Vec<u8>,
    pub kind: ShapeKind,
}

/// Shape instance contributing to a tile, carried for store identity.
#[derive(Clone, Debug)]
pub struct MeshSource {
    pub shape: Arc<CollisionShape>,
    pub object_transform: ObjectTransform,
    pub area_type: AreaType,
}

/// Axis-aligned world-space bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub fn intersects_xy(&self, other: &Aabb) -> bool {
        self.min[0] <= other.max[0]
            && other.min[0] <= self.max[0]
            && self.min[1] <= other.max[1]
            && other.min[1] <= self.max[1]
    }
}

/// Flat heightfield covering a whole cell at a fixed height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeightfieldPlane {
    pub height: f32,
}

/// Sampled heightfield surface for one cell, row-major `size * size` grid.
#[derive(Clone, Debug, PartialEq)]
pub struct HeightfieldSurface {
    pub heights: Vec<f32>,
    pub size: usize,
    pub min_height: f32,
    pub max_height: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum HeightfieldShape {
    Plane(HeightfieldPlane),
    Surface(HeightfieldSurface),
}

/// Heightfield registered for one cell of the worldspace.
#[derive(Clone, Debug)]
pub struct Heightfield {
    pub cell_position: (i32, i32),
    pub cell_size: i32,
    pub shape: HeightfieldShape,
}

impl Heightfield {
    /// World-space XY footprint of the cell.
    pub fn bounds(&self) -> Aabb {
        let size = self.cell_size as f32;
        let min_x = self.cell_position.0 as f32 * size;
        let min_y = self.cell_position.1 as f32 * size;
        Aabb {
            min: [min_x, min_y, f32::MIN],
            max: [min_x + size, min_y + size, f32::MAX],
        }
    }
}

/// World-space footprint of one object instance baked into a tile.
#[derive(Clone, Debug)]
pub struct ObjectGeometry {
    pub aabb: Aabb,
    pub area_type: AreaType,
}

/// Immutable snapshot of the geometry relevant to one tile.
#[derive(Clone, Debug, Default)]
pub struct RecastMesh {
    version: u64,
    heightfields: Vec<Heightfield>,
    objects: Vec<ObjectGeometry>,
    mesh_sources: Vec<MeshSource>,
}

impl RecastMesh {
    pub fn new(
        version: u64,
        heightfields: Vec<Heightfield>,
        objects: Vec<ObjectGeometry>,
        mesh_sources: Vec<MeshSource>,
    ) -> Self {
        RecastMesh { version, heightfields, objects, mesh_sources }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn heightfields(&self) -> &[Heightfield] {
        &self.heightfields
    }

    pub fn objects(&self) -> &[ObjectGeometry] {
        &self.objects
    }

    pub fn mesh_sources(&self) -> &[MeshSource] {
        &self.mesh_sources
    }

    pub fn is_empty(&self) -> bool {
        self.heightfields.is_empty() && self.objects.is_empty()
    }
}

/// Agent collision volume selecting which navmesh a job targets.
#[derive(Clone, Copy, Debug)]
pub struct AgentBounds {
    pub shape_type: CollisionShapeType,
    pub half_extents: [f32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CollisionShapeType {
    Aabb,
    Cylinder,
}

impl AgentBounds {
    pub fn is_valid(&self) -> bool {
        self.half_extents.iter().all(|v| *v > 0.0 && v.is_finite())
    }
}

// Half extents are compared and hashed bitwise so the bounds can key hash
// maps. -0.0 and 0.0 are distinct keys; NaN bounds are rejected by
// `is_valid` before they reach any map.
impl PartialEq for AgentBounds {
    fn eq(&self, other: &Self) -> bool {
        self.shape_type == other.shape_type
            && self.half_extents.map(f32::to_bits) == other.half_extents.map(f32::to_bits)
    }
}

impl Eq for AgentBounds {}

impl Hash for AgentBounds {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shape_type.hash(state);
        for v in self.half_extents {
            v.to_bits().hash(state);
        }
    }
}
