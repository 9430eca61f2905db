// Persistent tile store
// SQLite store for built tiles and deduplicated shape identities. All
// access goes through a single-connection pool driven by an owned
// current-thread runtime, so the public API is blocking and the store can
// sit behind a mutex next to the id allocators.
//
// The byte budget is enforced at insert time: rows with the smallest
// tile_id are deleted until the new row fits, and a row that alone exceeds
// the budget is skipped.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::warn;

use crate::geometry::Worldspace;
use crate::tile::{TilePosition, TilesPositionsRange};

/// Path selecting an ephemeral in-memory store.
pub const MEMORY_DB_PATH: &str = ":memory:";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("failed to start database runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId(pub i64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeId(pub i64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileVersion(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    pub tile_id: TileId,
    pub version: TileVersion,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileData {
    pub tile_id: TileId,
    pub version: TileVersion,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ShapeType {
    Collision = 1,
    Avoid = 2,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tiles (
    tile_id INTEGER PRIMARY KEY,
    revision INTEGER NOT NULL DEFAULT 1,
    worldspace TEXT NOT NULL,
    tile_position_x INTEGER NOT NULL,
    tile_position_y INTEGER NOT NULL,
    version INTEGER NOT NULL,
    input BLOB,
    data BLOB
);

CREATE UNIQUE INDEX IF NOT EXISTS index_unique_tiles_by_worldspace_and_tile_position_and_input
    ON tiles (worldspace, tile_position_x, tile_position_y, input);

CREATE INDEX IF NOT EXISTS index_tiles_by_worldspace_and_tile_position
    ON tiles (worldspace, tile_position_x, tile_position_y);

CREATE TABLE IF NOT EXISTS shapes (
    shape_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    type INTEGER NOT NULL,
    hash BLOB NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS index_unique_shapes_by_name_and_type_and_hash
    ON shapes (name, type, hash);
";

pub struct NavMeshDb {
    runtime: tokio::runtime::Runtime,
    pool: SqlitePool,
    max_file_size: u64,
}

impl NavMeshDb {
    pub fn new(path: &str, max_file_size: u64) -> Result<Self, DbError> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let url = if path == MEMORY_DB_PATH {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{path}?mode=rwc")
        };
        let pool = runtime.block_on(async {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(&url)
                .await?;
            sqlx::raw_sql(SCHEMA).execute(&pool).await?;
            Ok::<_, sqlx::Error>(pool)
        })?;
        Ok(NavMeshDb { runtime, pool, max_file_size })
    }

    pub fn get_max_tile_id(&self) -> Result<TileId, DbError> {
        let row = self.runtime.block_on(
            sqlx::query("SELECT COALESCE(MAX(tile_id), 0) FROM tiles").fetch_one(&self.pool),
        )?;
        Ok(TileId(row.get(0)))
    }

    pub fn find_tile(
        &self,
        worldspace: &Worldspace,
        tile: TilePosition,
        input: &[u8],
    ) -> Result<Option<Tile>, DbError> {
        let row = self.runtime.block_on(
            sqlx::query(
                "SELECT tile_id, version FROM tiles \
                 WHERE worldspace = ? AND tile_position_x = ? AND tile_position_y = ? AND input = ?",
            )
            .bind(worldspace.as_str())
            .bind(tile.x as i64)
            .bind(tile.y as i64)
            .bind(input)
            .fetch_optional(&self.pool),
        )?;
        Ok(row.map(|row| Tile { tile_id: TileId(row.get(0)), version: TileVersion(row.get(1)) }))
    }

    pub fn get_tile_data(
        &self,
        worldspace: &Worldspace,
        tile: TilePosition,
        input: &[u8],
    ) -> Result<Option<TileData>, DbError> {
        let row = self.runtime.block_on(
            sqlx::query(
                "SELECT tile_id, version, data FROM tiles \
                 WHERE worldspace = ? AND tile_position_x = ? AND tile_position_y = ? AND input = ?",
            )
            .bind(worldspace.as_str())
            .bind(tile.x as i64)
            .bind(tile.y as i64)
            .bind(input)
            .fetch_optional(&self.pool),
        )?;
        Ok(row.map(|row| TileData {
            tile_id: TileId(row.get(0)),
            version: TileVersion(row.get(1)),
            data: row.get(2),
        }))
    }

    /// Inserts a row, evicting the oldest rows until the byte budget holds.
    /// Returns the number of inserted rows (0 when the row was skipped).
    pub fn insert_tile(
        &self,
        tile_id: TileId,
        worldspace: &Worldspace,
        tile: TilePosition,
        version: TileVersion,
        input: &[u8],
        data: &[u8],
    ) -> Result<u64, DbError> {
        let row_size = (input.len() + data.len()) as u64;
        if row_size > self.max_file_size {
            warn!(
                worldspace = %worldspace,
                tile = %tile,
                row_size,
                "Tile row exceeds the store byte budget, skipping write"
            );
            return Ok(0);
        }
        while self.total_bytes()? + row_size > self.max_file_size {
            let evicted = self.runtime.block_on(
                sqlx::query(
                    "DELETE FROM tiles \
                     WHERE tile_id = (SELECT MIN(tile_id) FROM tiles)",
                )
                .execute(&self.pool),
            )?;
            if evicted.rows_affected() == 0 {
                break;
            }
        }
        let result = self.runtime.block_on(
            sqlx::query(
                "INSERT INTO tiles (tile_id, revision, worldspace, tile_position_x, \
                 tile_position_y, version, input, data) VALUES (?, 1, ?, ?, ?, ?, ?, ?)",
            )
            .bind(tile_id.0)
            .bind(worldspace.as_str())
            .bind(tile.x as i64)
            .bind(tile.y as i64)
            .bind(version.0)
            .bind(input)
            .bind(data)
            .execute(&self.pool),
        )?;
        Ok(result.rows_affected())
    }

    pub fn update_tile(
        &self,
        tile_id: TileId,
        version: TileVersion,
        data: &[u8],
    ) -> Result<u64, DbError> {
        let result = self.runtime.block_on(
            sqlx::query(
                "UPDATE tiles SET version = ?, data = ?, revision = revision + 1 \
                 WHERE tile_id = ?",
            )
            .bind(version.0)
            .bind(data)
            .bind(tile_id.0)
            .execute(&self.pool),
        )?;
        Ok(result.rows_affected())
    }

    pub fn delete_tiles_at(
        &self,
        worldspace: &Worldspace,
        tile: TilePosition,
    ) -> Result<u64, DbError> {
        let result = self.runtime.block_on(
            sqlx::query(
                "DELETE FROM tiles \
                 WHERE worldspace = ? AND tile_position_x = ? AND tile_position_y = ?",
            )
            .bind(worldspace.as_str())
            .bind(tile.x as i64)
            .bind(tile.y as i64)
            .execute(&self.pool),
        )?;
        Ok(result.rows_affected())
    }

    pub fn delete_tiles_outside_range(
        &self,
        worldspace: &Worldspace,
        range: TilesPositionsRange,
    ) -> Result<u64, DbError> {
        let result = self.runtime.block_on(
            sqlx::query(
                "DELETE FROM tiles WHERE worldspace = ? AND NOT ( \
                 ? <= tile_position_x AND tile_position_x < ? \
                 AND ? <= tile_position_y AND tile_position_y < ?)",
            )
            .bind(worldspace.as_str())
            .bind(range.begin.x as i64)
            .bind(range.end.x as i64)
            .bind(range.begin.y as i64)
            .bind(range.end.y as i64)
            .execute(&self.pool),
        )?;
        Ok(result.rows_affected())
    }

    pub fn get_max_shape_id(&self) -> Result<ShapeId, DbError> {
        let row = self.runtime.block_on(
            sqlx::query("SELECT COALESCE(MAX(shape_id), 0) FROM shapes").fetch_one(&self.pool),
        )?;
        Ok(ShapeId(row.get(0)))
    }

    pub fn find_shape_id(
        &self,
        name: &str,
        shape_type: ShapeType,
        hash: &[u8],
    ) -> Result<Option<ShapeId>, DbError> {
        let row = self.runtime.block_on(
            sqlx::query("SELECT shape_id FROM shapes WHERE name = ? AND type = ? AND hash = ?")
                .bind(name)
                .bind(shape_type as i64)
                .bind(hash)
                .fetch_optional(&self.pool),
        )?;
        Ok(row.map(|row| ShapeId(row.get(0))))
    }

    pub fn insert_shape(
        &self,
        shape_id: ShapeId,
        name: &str,
        shape_type: ShapeType,
        hash: &[u8],
    ) -> Result<u64, DbError> {
        let result = self.runtime.block_on(
            sqlx::query("INSERT INTO shapes (shape_id, name, type, hash) VALUES (?, ?, ?, ?)")
                .bind(shape_id.0)
                .bind(name)
                .bind(shape_type as i64)
                .bind(hash)
                .execute(&self.pool),
        )?;
        Ok(result.rows_affected())
    }

    pub fn vacuum(&self) -> Result<(), DbError> {
        self.runtime.block_on(sqlx::query("VACUUM").execute(&self.pool))?;
        Ok(())
    }

    /// Total size of all stored tile rows in bytes.
    pub fn total_bytes(&self) -> Result<u64, DbError> {
        let row = self.runtime.block_on(
            sqlx::query(
                "SELECT COALESCE(SUM(LENGTH(COALESCE(input, '')) + LENGTH(COALESCE(data, ''))), 0) \
                 FROM tiles",
            )
            .fetch_one(&self.pool),
        )?;
        let total: i64 = row.get(0);
        Ok(total as u64)
    }
}
