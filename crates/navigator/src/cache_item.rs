// Navmesh cache item
// Per agent-configuration navmesh the updater writes results into. Each
// installed tile gets a non-zero ref; ref 0 means absent or empty. The
// version revision bumps on every applied change so consumers can detect
// staleness cheaply.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::builder::NavMeshTileData;
use crate::tile::TilePosition;

pub type SharedNavMeshCacheItem = Arc<Mutex<NavMeshCacheItem>>;
pub type WeakNavMeshCacheItem = Weak<Mutex<NavMeshCacheItem>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub generation: u64,
    pub revision: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateNavMeshStatus {
    Ignored,
    Added,
    Replaced,
    Removed,
    /// The target navmesh was dropped before the result landed.
    Lost,
}

impl UpdateNavMeshStatus {
    pub fn is_success(self) -> bool {
        matches!(self, UpdateNavMeshStatus::Added | UpdateNavMeshStatus::Replaced)
    }
}

enum TileState {
    Data { ref_id: u64, _data: NavMeshTileData },
    Empty,
}

pub struct NavMeshCacheItem {
    version: Version,
    next_tile_ref: u64,
    tiles: HashMap<TilePosition, TileState>,
}

impl NavMeshCacheItem {
    pub fn new(generation: u64) -> Self {
        NavMeshCacheItem {
            version: Version { generation, revision: 0 },
            next_tile_ref: 1,
            tiles: HashMap::new(),
        }
    }

    pub fn make_shared(generation: u64) -> SharedNavMeshCacheItem {
        Arc::new(Mutex::new(NavMeshCacheItem::new(generation)))
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Ref of the installed tile, 0 when absent or empty.
    pub fn tile_ref(&self, tile: TilePosition) -> u64 {
        match self.tiles.get(&tile) {
            Some(TileState::Data { ref_id, .. }) => *ref_id,
            Some(TileState::Empty) | None => 0,
        }
    }

    pub fn update_tile(&mut self, tile: TilePosition, data: NavMeshTileData) -> UpdateNavMeshStatus {
        let ref_id = self.next_tile_ref;
        self.next_tile_ref += 1;
        let previous = self.tiles.insert(tile, TileState::Data { ref_id, _data: data });
        self.version.revision += 1;
        match previous {
            Some(TileState::Data { .. }) | Some(TileState::Empty) => UpdateNavMeshStatus::Replaced,
            None => UpdateNavMeshStatus::Added,
        }
    }

    pub fn remove_tile(&mut self, tile: TilePosition) -> UpdateNavMeshStatus {
        match self.tiles.remove(&tile) {
            Some(_) => {
                self.version.revision += 1;
                UpdateNavMeshStatus::Removed
            }
            None => UpdateNavMeshStatus::Ignored,
        }
    }

    /// Records that the tile was built over empty geometry; the position is
    /// known but exposes no navmesh surface.
    pub fn mark_as_empty(&mut self, tile: TilePosition) -> UpdateNavMeshStatus {
        let previous = self.tiles.insert(tile, TileState::Empty);
        self.version.revision += 1;
        match previous {
            Some(TileState::Data { .. }) => UpdateNavMeshStatus::Replaced,
            Some(TileState::Empty) => UpdateNavMeshStatus::Ignored,
            None => UpdateNavMeshStatus::Added,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> NavMeshTileData {
        NavMeshTileData(vec![1, 2, 3])
    }

    #[test]
    fn absent_tile_has_zero_ref() {
        let item = NavMeshCacheItem::new(1);
        assert_eq!(item.tile_ref(TilePosition::new(0, 0)), 0);
    }

    #[test]
    fn update_assigns_fresh_non_zero_refs() {
        let mut item = NavMeshCacheItem::new(1);
        let tile = TilePosition::new(0, 0);
        assert_eq!(item.update_tile(tile, data()), UpdateNavMeshStatus::Added);
        let first = item.tile_ref(tile);
        assert_ne!(first, 0);
        assert_eq!(item.update_tile(tile, data()), UpdateNavMeshStatus::Replaced);
        let second = item.tile_ref(tile);
        assert_ne!(second, 0);
        assert_ne!(first, second);
    }

    #[test]
    fn remove_clears_the_ref_and_bumps_the_revision() {
        let mut item = NavMeshCacheItem::new(1);
        let tile = TilePosition::new(2, -1);
        item.update_tile(tile, data());
        let before = item.version();
        assert_eq!(item.remove_tile(tile), UpdateNavMeshStatus::Removed);
        assert_eq!(item.tile_ref(tile), 0);
        assert!(item.version() > before);
        assert_eq!(item.remove_tile(tile), UpdateNavMeshStatus::Ignored);
    }

    #[test]
    fn empty_tile_has_zero_ref() {
        let mut item = NavMeshCacheItem::new(1);
        let tile = TilePosition::new(1, 1);
        item.update_tile(tile, data());
        assert_eq!(item.mark_as_empty(tile), UpdateNavMeshStatus::Replaced);
        assert_eq!(item.tile_ref(tile), 0);
    }
}
