//! Access to the map data of a world, over every storage layout.
//!
//! Three layouts have been in use historically:
//!
//! * **old**: `sectors/XXXXZZZZ/YYYY` — one directory per sector, named by
//!   two concatenated 16-bit hex coordinates, one file per block;
//! * **new**: `sectors2/XXX/ZZZ/YYYY` — nested directories of 12-bit hex
//!   coordinates;
//! * **database**: a `map.sqlite` file with a single `blocks(pos, data)`
//!   table keyed by the packed block position.
//!
//! A world directory may contain several of these at once (half-migrated
//! worlds exist in the wild); [`crate::World`] merges them, while a
//! [`MapData`] value is a handle to exactly one.

use std::collections::BTreeSet;

use async_std::fs;
use async_std::path::{Path, PathBuf};
use futures::stream::{self, BoxStream, StreamExt};
#[cfg(feature = "sqlite")]
use futures::TryStreamExt;
use glam::I16Vec3;
use log::{debug, warn};
#[cfg(feature = "sqlite")]
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use thiserror::Error;

use crate::map_block::{MapBlock, MapBlockError, Node};
use crate::positions::{from_hex, to_hex, BlockPos, HexCoordError, HexWidth, SectorPos};
use crate::WORLD_BLOCKS_RANGE;

/// Things that can go wrong when talking to a map data backend
#[derive(Error, Debug)]
pub enum MapDataError {
    /// The database reported an error
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    SqlError(#[from] sqlx::Error),
    /// A file or directory could not be read or written
    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),
    /// No block is stored at this position
    #[error("map block {0:?} does not exist")]
    MapBlockNonexistent(BlockPos),
    /// A stored block could not be decoded, or a block could not be encoded
    #[error(transparent)]
    MapBlockError(#[from] MapBlockError),
    /// A coordinate did not fit the layout's encoding
    #[error(transparent)]
    HexCoordError(#[from] HexCoordError),
}

type Result<T> = std::result::Result<T, MapDataError>;

/// A handle to one map storage backend
#[derive(Debug, Clone)]
pub enum MapData {
    /// The `map.sqlite` database layout
    #[cfg(feature = "sqlite")]
    Sqlite(SqlitePool),
    /// The old `sectors/` directory tree
    OldSectorTree(PathBuf),
    /// The new `sectors2/` directory tree
    NewSectorTree(PathBuf),
}

impl MapData {
    /// Open a map database.
    ///
    /// With `writeable`, the file is created if missing, along with the
    /// `blocks` table; otherwise it is opened read-only.
    #[cfg(feature = "sqlite")]
    pub async fn from_sqlite_file(
        path: impl AsRef<std::path::Path>,
        writeable: bool,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(writeable)
            .read_only(!writeable);
        let pool = SqlitePool::connect_with(options).await?;
        if writeable {
            sqlx::query("CREATE TABLE IF NOT EXISTS blocks (pos INTEGER PRIMARY KEY, data BLOB)")
                .execute(&pool)
                .await?;
        }
        Ok(MapData::Sqlite(pool))
    }

    /// Use an old-layout `sectors/` directory as backend
    pub fn from_old_sector_tree(path: impl Into<std::path::PathBuf>) -> Self {
        MapData::OldSectorTree(PathBuf::from(path.into()))
    }

    /// Use a new-layout `sectors2/` directory as backend
    pub fn from_new_sector_tree(path: impl Into<std::path::PathBuf>) -> Self {
        MapData::NewSectorTree(PathBuf::from(path.into()))
    }

    /// The positions of all map blocks in this backend.
    ///
    /// Enumeration problems below the backend root (an unreadable sector
    /// directory, a database error) surface as `Err` items.
    pub async fn all_mapblock_positions(&self) -> BoxStream<'_, Result<BlockPos>> {
        match self {
            #[cfg(feature = "sqlite")]
            MapData::Sqlite(pool) => sqlx::query_as::<_, BlockPos>("SELECT pos FROM blocks")
                .fetch(pool)
                .map_err(MapDataError::from)
                .boxed(),
            MapData::OldSectorTree(_) | MapData::NewSectorTree(_) => {
                let mut items = Vec::new();
                match self.sector_positions().await {
                    Ok(sectors) => {
                        for sector in sectors {
                            match self.sector_block_heights(sector).await {
                                Ok(heights) => items.extend(
                                    heights
                                        .into_iter()
                                        .filter_map(|y| sector.block_pos(y).ok())
                                        .map(Ok),
                                ),
                                Err(err) => items.push(Err(err)),
                            }
                        }
                    }
                    Err(err) => items.push(Err(err)),
                }
                stream::iter(items).boxed()
            }
        }
    }

    /// The set of sectors this backend has at least one block in
    pub async fn sector_positions(&self) -> Result<BTreeSet<SectorPos>> {
        match self {
            #[cfg(feature = "sqlite")]
            MapData::Sqlite(pool) => {
                let keys: Vec<i64> = sqlx::query_scalar("SELECT pos FROM blocks")
                    .fetch_all(pool)
                    .await?;
                Ok(keys
                    .into_iter()
                    .map(|key| SectorPos::from(BlockPos::from_database_key(key)))
                    .collect())
            }
            MapData::OldSectorTree(root) => {
                let mut sectors = BTreeSet::new();
                for name in dir_names(root).await? {
                    match SectorPos::from_old_dir_name(&name) {
                        Ok(sector) => {
                            sectors.insert(sector);
                        }
                        Err(_) => debug!("skipping non-sector entry {name:?}"),
                    }
                }
                Ok(sectors)
            }
            MapData::NewSectorTree(root) => {
                let mut sectors = BTreeSet::new();
                for x_name in dir_names(root).await? {
                    for z_name in dir_names(&root.join(&x_name)).await? {
                        match SectorPos::from_new_dir_segments(&x_name, &z_name) {
                            Ok(sector) => {
                                sectors.insert(sector);
                            }
                            Err(_) => debug!("skipping non-sector entry {x_name:?}/{z_name:?}"),
                        }
                    }
                }
                Ok(sectors)
            }
        }
    }

    /// The y indices of the blocks present in a sector, highest first.
    ///
    /// The descending order serves top-down scans, which can stop at the
    /// first block that completes their view of the sector.
    pub async fn sector_block_heights(&self, sector: SectorPos) -> Result<Vec<i16>> {
        let mut heights = match self {
            #[cfg(feature = "sqlite")]
            MapData::Sqlite(pool) => {
                // all keys of one sector form an arithmetic sequence with
                // common difference 4096, starting at the lowest y
                let first = pack_sector_key(sector, WORLD_BLOCKS_RANGE.start);
                let last = pack_sector_key(sector, WORLD_BLOCKS_RANGE.end - 1);
                let keys: Vec<i64> = sqlx::query_scalar(
                    "SELECT pos FROM blocks WHERE pos >= ? AND pos <= ? AND (pos - ?) % 4096 = 0",
                )
                .bind(first)
                .bind(last)
                .bind(first)
                .fetch_all(pool)
                .await?;
                keys.into_iter()
                    .map(|key| BlockPos::from_database_key(key).into_index_vec().y)
                    .collect()
            }
            MapData::OldSectorTree(root) => {
                block_file_heights(&root.join(sector.old_dir_name()?)).await?
            }
            MapData::NewSectorTree(root) => match sector.new_dir_segments() {
                Ok((x_name, z_name)) => {
                    block_file_heights(&root.join(x_name).join(z_name)).await?
                }
                // the sector is not representable in this layout's 12 bits
                Err(_) => Vec::new(),
            },
        };
        heights.sort_unstable_by_key(|&y| std::cmp::Reverse(y));
        Ok(heights)
    }

    /// The raw record of the block at the given position
    pub async fn get_block_data(&self, block_pos: BlockPos) -> Result<Vec<u8>> {
        match self {
            #[cfg(feature = "sqlite")]
            MapData::Sqlite(pool) => {
                sqlx::query_scalar::<_, Vec<u8>>("SELECT data FROM blocks WHERE pos = ?")
                    .bind(block_pos.database_key())
                    .fetch_optional(pool)
                    .await?
                    .ok_or(MapDataError::MapBlockNonexistent(block_pos))
            }
            MapData::OldSectorTree(root) => {
                read_block_file(block_file_path_old(root, block_pos)?, block_pos).await
            }
            MapData::NewSectorTree(root) => {
                read_block_file(block_file_path_new(root, block_pos)?, block_pos).await
            }
        }
    }

    /// Store a raw block record at the given position
    pub async fn set_block_data(&self, block_pos: BlockPos, data: &[u8]) -> Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            MapData::Sqlite(pool) => {
                sqlx::query("REPLACE INTO blocks (pos, data) VALUES (?, ?)")
                    .bind(block_pos.database_key())
                    .bind(data)
                    .execute(pool)
                    .await?;
                Ok(())
            }
            MapData::OldSectorTree(root) => {
                write_block_file(block_file_path_old(root, block_pos)?, data).await
            }
            MapData::NewSectorTree(root) => {
                write_block_file(block_file_path_new(root, block_pos)?, data).await
            }
        }
    }

    /// Read and decode the block at the given position
    pub async fn get_mapblock(&self, block_pos: BlockPos) -> Result<MapBlock> {
        Ok(MapBlock::from_slice(&self.get_block_data(block_pos).await?)?)
    }

    /// Encode and store a block at the given position
    pub async fn set_mapblock(&self, block_pos: BlockPos, block: &MapBlock) -> Result<()> {
        self.set_block_data(block_pos, &block.serialize()?).await
    }

    /// All nodes of the block at `block_pos`, with absolute node positions
    pub async fn iter_mapblock_nodes(
        &self,
        block_pos: BlockPos,
    ) -> Result<impl Iterator<Item = (I16Vec3, Node)>> {
        let block = self.get_mapblock(block_pos).await?;
        let nodes: Vec<_> = block
            .nodes()
            .map(|(node_pos, node)| (block_pos.join(node_pos), node))
            .collect();
        Ok(nodes.into_iter())
    }
}

fn block_file_path_old(root: &Path, block_pos: BlockPos) -> Result<PathBuf> {
    let sector = SectorPos::from(block_pos);
    let y_name = to_hex(block_pos.into_index_vec().y, HexWidth::W16)?;
    Ok(root.join(sector.old_dir_name()?).join(y_name))
}

fn block_file_path_new(root: &Path, block_pos: BlockPos) -> Result<PathBuf> {
    let sector = SectorPos::from(block_pos);
    let y_name = to_hex(block_pos.into_index_vec().y, HexWidth::W16)?;
    let (x_name, z_name) = sector.new_dir_segments()?;
    Ok(root.join(x_name).join(z_name).join(y_name))
}

async fn read_block_file(path: PathBuf, block_pos: BlockPos) -> Result<Vec<u8>> {
    match fs::read(path).await {
        Ok(data) => Ok(data),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(MapDataError::MapBlockNonexistent(block_pos))
        }
        Err(err) => Err(err.into()),
    }
}

async fn write_block_file(path: PathBuf, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, data).await?;
    Ok(())
}

#[cfg(feature = "sqlite")]
fn pack_sector_key(sector: SectorPos, y: i16) -> i64 {
    i64::from(sector.z) * 0x100_0000 + i64::from(y) * 0x1000 + i64::from(sector.x)
}

/// The entry names of a directory; a missing directory counts as empty
async fn dir_names(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next().await {
        match entry?.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => debug!("skipping non-unicode entry {name:?}"),
        }
    }
    Ok(names)
}

/// Block heights from the file names of one sector directory
async fn block_file_heights(dir: &Path) -> Result<Vec<i16>> {
    let mut heights = Vec::new();
    for name in dir_names(dir).await? {
        if name == "meta" {
            continue;
        }
        match from_hex(&name, HexWidth::W16) {
            Ok(y) if WORLD_BLOCKS_RANGE.contains(&y) => heights.push(y),
            Ok(y) => warn!("block file {name:?}: height {y} outside the world, skipping"),
            Err(_) => debug!("skipping non-block entry {name:?}"),
        }
    }
    Ok(heights)
}
