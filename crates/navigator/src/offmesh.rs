// Off-mesh connections
// Extra traversal edges (doors, teleports) merged into tiles at build time.
// Connections are indexed by every tile either endpoint lands in.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::geometry::{AreaType, ObjectId};
use crate::settings::RecastSettings;
use crate::tile::{TilePosition, get_tile_position};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OffMeshConnection {
    pub start: [f32; 3],
    pub end: [f32; 3],
    pub radius: f32,
    pub bidirectional: bool,
    pub area_type: AreaType,
}

pub struct OffMeshConnectionsManager {
    recast: RecastSettings,
    by_tile: Mutex<HashMap<TilePosition, Vec<(ObjectId, OffMeshConnection)>>>,
}

impl OffMeshConnectionsManager {
    pub fn new(recast: RecastSettings) -> Self {
        OffMeshConnectionsManager { recast, by_tile: Mutex::new(HashMap::new()) }
    }

    pub fn add(&self, id: ObjectId, connection: OffMeshConnection) {
        let mut by_tile = self.by_tile.lock();
        for tile in self.tiles_of(&connection) {
            by_tile.entry(tile).or_default().push((id, connection));
        }
    }

    pub fn remove(&self, id: ObjectId) {
        let mut by_tile = self.by_tile.lock();
        by_tile.retain(|_, connections| {
            connections.retain(|(owner, _)| *owner != id);
            !connections.is_empty()
        });
    }

    /// Connections to merge into the given tile, in insertion order.
    pub fn get(&self, tile: TilePosition) -> Vec<OffMeshConnection> {
        self.by_tile
            .lock()
            .get(&tile)
            .map(|connections| connections.iter().map(|(_, connection)| *connection).collect())
            .unwrap_or_default()
    }

    fn tiles_of(&self, connection: &OffMeshConnection) -> Vec<TilePosition> {
        let start = get_tile_position(&self.recast, connection.start[0], connection.start[1]);
        let end = get_tile_position(&self.recast, connection.end[0], connection.end[1]);
        if start == end { vec![start] } else { vec![start, end] }
    }
}
