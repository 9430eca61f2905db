// Tile cached recast mesh manager
// Mutable registry of the collision geometry for the active worldspace.
// Mutations mark every overlapped tile changed; `take_changed_tiles`
// drains the accumulated changes for posting. `get_mesh` produces an
// immutable snapshot of the geometry relevant to one tile, so builds never
// observe later mutations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::geometry::{
    Aabb, AreaType, CollisionShape, Heightfield, HeightfieldShape, MeshSource, ObjectGeometry,
    ObjectId, ObjectTransform, RecastMesh, Worldspace,
};
use crate::settings::RecastSettings;
use crate::tile::{TilePosition, get_tiles_range, tile_world_size};
use crate::updater::ChangeType;

struct ObjectData {
    shape: Arc<CollisionShape>,
    object_transform: ObjectTransform,
    aabb: Aabb,
    area_type: AreaType,
}

struct ManagerState {
    worldspace: Worldspace,
    revision: u64,
    objects: HashMap<ObjectId, ObjectData>,
    heightfields: HashMap<(i32, i32), (i32, HeightfieldShape)>,
    changed_tiles: BTreeMap<TilePosition, ChangeType>,
}

pub struct TileCachedRecastMeshManager {
    recast: RecastSettings,
    state: Mutex<ManagerState>,
}

impl TileCachedRecastMeshManager {
    pub fn new(recast: RecastSettings, worldspace: Worldspace) -> Self {
        TileCachedRecastMeshManager {
            recast,
            state: Mutex::new(ManagerState {
                worldspace,
                revision: 0,
                objects: HashMap::new(),
                heightfields: HashMap::new(),
                changed_tiles: BTreeMap::new(),
            }),
        }
    }

    pub fn worldspace(&self) -> Worldspace {
        self.state.lock().worldspace.clone()
    }

    /// Switches the active worldspace, dropping all registered geometry.
    pub fn set_worldspace(&self, worldspace: Worldspace) {
        let mut state = self.state.lock();
        if state.worldspace == worldspace {
            return;
        }
        state.worldspace = worldspace;
        state.objects.clear();
        state.heightfields.clear();
        state.changed_tiles.clear();
        state.revision += 1;
    }

    /// Registers an object. Returns false when the id is already known.
    pub fn add_object(
        &self,
        id: ObjectId,
        shape: Arc<CollisionShape>,
        object_transform: ObjectTransform,
        aabb: Aabb,
        area_type: AreaType,
    ) -> bool {
        let mut state = self.state.lock();
        if state.objects.contains_key(&id) {
            return false;
        }
        state.objects.insert(id, ObjectData { shape, object_transform, aabb, area_type });
        state.revision += 1;
        mark_changed(&mut state, &self.recast, &aabb, ChangeType::Add);
        true
    }

    /// Moves or reclassifies an object. Both the old and the new footprint
    /// are marked changed.
    pub fn update_object(&self, id: ObjectId, aabb: Aabb, area_type: AreaType) -> bool {
        let mut state = self.state.lock();
        let Some(object) = state.objects.get_mut(&id) else {
            return false;
        };
        if object.aabb == aabb && object.area_type == area_type {
            return false;
        }
        let old_aabb = object.aabb;
        object.aabb = aabb;
        object.area_type = area_type;
        state.revision += 1;
        mark_changed(&mut state, &self.recast, &old_aabb, ChangeType::Update);
        mark_changed(&mut state, &self.recast, &aabb, ChangeType::Update);
        true
    }

    pub fn remove_object(&self, id: ObjectId) -> bool {
        let mut state = self.state.lock();
        let Some(object) = state.objects.remove(&id) else {
            return false;
        };
        state.revision += 1;
        let aabb = object.aabb;
        mark_changed(&mut state, &self.recast, &aabb, ChangeType::Update);
        true
    }

    pub fn add_heightfield(
        &self,
        cell_position: (i32, i32),
        cell_size: i32,
        shape: HeightfieldShape,
    ) -> bool {
        let mut state = self.state.lock();
        if state.heightfields.contains_key(&cell_position) {
            return false;
        }
        state.heightfields.insert(cell_position, (cell_size, shape));
        state.revision += 1;
        let bounds = heightfield_bounds(cell_position, cell_size);
        mark_changed(&mut state, &self.recast, &bounds, ChangeType::Add);
        true
    }

    pub fn remove_heightfield(&self, cell_position: (i32, i32)) -> bool {
        let mut state = self.state.lock();
        let Some((cell_size, _)) = state.heightfields.remove(&cell_position) else {
            return false;
        };
        state.revision += 1;
        let bounds = heightfield_bounds(cell_position, cell_size);
        mark_changed(&mut state, &self.recast, &bounds, ChangeType::Update);
        true
    }

    /// Drains the accumulated changed tiles.
    pub fn take_changed_tiles(&self) -> BTreeMap<TilePosition, ChangeType> {
        std::mem::take(&mut self.state.lock().changed_tiles)
    }

    /// Snapshot of the geometry overlapping the tile. None when the
    /// worldspace does not match the active one or nothing overlaps.
    pub fn get_mesh(&self, worldspace: &Worldspace, tile: TilePosition) -> Option<Arc<RecastMesh>> {
        let state = self.state.lock();
        if state.worldspace != *worldspace {
            return None;
        }
        let bounds = tile_bounds(&self.recast, tile);
        let heightfields: Vec<Heightfield> = state
            .heightfields
            .iter()
            .map(|(cell_position, (cell_size, shape))| Heightfield {
                cell_position: *cell_position,
                cell_size: *cell_size,
                shape: shape.clone(),
            })
            .filter(|heightfield| heightfield.bounds().intersects_xy(&bounds))
            .collect();
        let mut objects = Vec::new();
        let mut mesh_sources = Vec::new();
        let mut object_ids: Vec<ObjectId> = state.objects.keys().copied().collect();
        object_ids.sort();
        for id in object_ids {
            let object = &state.objects[&id];
            if !object.aabb.intersects_xy(&bounds) {
                continue;
            }
            objects.push(ObjectGeometry { aabb: object.aabb, area_type: object.area_type });
            mesh_sources.push(MeshSource {
                shape: object.shape.clone(),
                object_transform: object.object_transform,
                area_type: object.area_type,
            });
        }
        if heightfields.is_empty() && objects.is_empty() {
            return None;
        }
        Some(Arc::new(RecastMesh::new(state.revision, heightfields, objects, mesh_sources)))
    }
}

fn heightfield_bounds(cell_position: (i32, i32), cell_size: i32) -> Aabb {
    let size = cell_size as f32;
    let min_x = cell_position.0 as f32 * size;
    let min_y = cell_position.1 as f32 * size;
    Aabb { min: [min_x, min_y, f32::MIN], max: [min_x + size, min_y + size, f32::MAX] }
}

fn tile_bounds(recast: &RecastSettings, tile: TilePosition) -> Aabb {
    let size = tile_world_size(recast);
    let border = recast.border_size as f32 * recast.cell_size;
    Aabb {
        min: [tile.x as f32 * size - border, tile.y as f32 * size - border, f32::MIN],
        max: [(tile.x + 1) as f32 * size + border, (tile.y + 1) as f32 * size + border, f32::MAX],
    }
}

fn mark_changed(state: &mut ManagerState, recast: &RecastSettings, aabb: &Aabb, change: ChangeType) {
    let range = get_tiles_range(recast, [aabb.min[0], aabb.min[1]], [aabb.max[0], aabb.max[1]]);
    for x in range.begin.x..range.end.x {
        for y in range.begin.y..range.end.y {
            let tile = TilePosition::new(x, y);
            state
                .changed_tiles
                .entry(tile)
                .and_modify(|existing| {
                    if *existing != change {
                        *existing = ChangeType::Update;
                    }
                })
                .or_insert(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ShapeKind;

    fn manager() -> TileCachedRecastMeshManager {
        TileCachedRecastMeshManager::new(RecastSettings::default(), Worldspace::new("sys::default"))
    }

    fn box_shape() -> Arc<CollisionShape> {
        Arc::new(CollisionShape {
            file_name: "test.nif".to_string(),
            file_hash: b"hash".to_vec(),
            kind: ShapeKind::Box { half_extents: [1.0, 1.0, 1.0] },
        })
    }

    fn transform() -> ObjectTransform {
        ObjectTransform { position: [0.0, 0.0, 0.0], rotation: [0.0, 0.0, 0.0], scale: 1.0 }
    }

    #[test]
    fn add_object_marks_covered_tiles() {
        let manager = manager();
        let aabb = Aabb { min: [-1.0, -1.0, -1.0], max: [1.0, 1.0, 1.0] };
        assert!(manager.add_object(ObjectId(1), box_shape(), transform(), aabb, AreaType::Ground));
        let changed = manager.take_changed_tiles();
        assert!(changed.contains_key(&TilePosition::new(0, 0)));
        assert!(changed.contains_key(&TilePosition::new(-1, -1)));
        assert!(changed.values().all(|change| *change == ChangeType::Add));
        // Drained.
        assert!(manager.take_changed_tiles().is_empty());
    }

    #[test]
    fn duplicate_object_id_is_rejected() {
        let manager = manager();
        let aabb = Aabb { min: [0.0, 0.0, 0.0], max: [1.0, 1.0, 1.0] };
        assert!(manager.add_object(ObjectId(1), box_shape(), transform(), aabb, AreaType::Ground));
        assert!(!manager.add_object(ObjectId(1), box_shape(), transform(), aabb, AreaType::Ground));
    }

    #[test]
    fn get_mesh_returns_overlapping_geometry() {
        let manager = manager();
        let aabb = Aabb { min: [0.5, 0.5, -1.0], max: [1.5, 1.5, 1.0] };
        manager.add_object(ObjectId(1), box_shape(), transform(), aabb, AreaType::Ground);
        let mesh = manager.get_mesh(&Worldspace::new("sys::default"), TilePosition::new(0, 0));
        let mesh = mesh.expect("object overlaps the tile");
        assert_eq!(mesh.objects().len(), 1);
        assert_eq!(mesh.mesh_sources().len(), 1);
        assert!(
            manager.get_mesh(&Worldspace::new("sys::default"), TilePosition::new(50, 50)).is_none()
        );
    }

    #[test]
    fn get_mesh_for_other_worldspace_is_none() {
        let manager = manager();
        let aabb = Aabb { min: [0.0, 0.0, -1.0], max: [1.0, 1.0, 1.0] };
        manager.add_object(ObjectId(1), box_shape(), transform(), aabb, AreaType::Ground);
        assert!(manager.get_mesh(&Worldspace::new("other"), TilePosition::new(0, 0)).is_none());
    }

    #[test]
    fn set_worldspace_clears_geometry() {
        let manager = manager();
        let aabb = Aabb { min: [0.0, 0.0, -1.0], max: [1.0, 1.0, 1.0] };
        manager.add_object(ObjectId(1), box_shape(), transform(), aabb, AreaType::Ground);
        manager.set_worldspace(Worldspace::new("other"));
        assert!(manager.get_mesh(&Worldspace::new("other"), TilePosition::new(0, 0)).is_none());
        assert!(manager.take_changed_tiles().is_empty());
    }

    #[test]
    fn remove_object_marks_update() {
        let manager = manager();
        let aabb = Aabb { min: [0.0, 0.0, -1.0], max: [1.0, 1.0, 1.0] };
        manager.add_object(ObjectId(1), box_shape(), transform(), aabb, AreaType::Ground);
        manager.take_changed_tiles();
        assert!(manager.remove_object(ObjectId(1)));
        let changed = manager.take_changed_tiles();
        assert!(changed.values().all(|change| *change == ChangeType::Update));
        assert!(!manager.remove_object(ObjectId(1)));
    }
}
