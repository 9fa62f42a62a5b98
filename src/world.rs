//! A handle to a world directory and the map storage inside it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use async_std::fs;
use log::debug;
use thiserror::Error;

use crate::map_data::{MapData, MapDataError};
use crate::positions::SectorPos;
use crate::voxel_manip::VoxelManip;

/// Things that can go wrong when opening or inspecting a world
#[derive(Error, Debug)]
pub enum WorldError {
    /// A file in the world directory could not be read
    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),
    /// The map storage reported an error
    #[error(transparent)]
    MapDataError(#[from] MapDataError),
    /// `world.mt` names a backend this crate does not handle
    #[error("unknown backend {0:?}")]
    UnknownBackend(String),
    /// Neither `world.mt` nor probing found any map storage
    #[error("no map data found in {0:?}")]
    NoBackend(PathBuf),
}

/// A Minetest world directory
#[derive(Debug, Clone)]
pub struct World(pub PathBuf);

impl World {
    /// Wrap a world directory path.
    ///
    /// No i/o happens until map data is requested.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        World(path.into())
    }

    /// The key-value pairs of the `world.mt` metadata file.
    ///
    /// Returns an empty map if the file does not exist.
    pub async fn get_world_metadata(&self) -> Result<BTreeMap<String, String>, WorldError> {
        let path = async_std::path::PathBuf::from(self.0.join("world.mt"));
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(content
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once('=')?;
                Some((key.trim().to_string(), value.trim().to_string()))
            })
            .collect())
    }

    /// The primary map data backend of this world.
    ///
    /// Honors the `backend` entry of `world.mt` when present; otherwise
    /// probes for `map.sqlite`, then `sectors2/`, then `sectors/`.
    pub async fn get_map_data(&self) -> Result<MapData, WorldError> {
        self.primary_backend(false).await
    }

    /// Every map storage layout present in this world.
    ///
    /// Half-migrated worlds can carry several layouts at once; they are
    /// returned in consultation order: database, old sector tree, new
    /// sector tree.
    pub async fn get_backends(&self) -> Result<Vec<MapData>, WorldError> {
        let mut backends = Vec::new();
        #[cfg(feature = "sqlite")]
        {
            let sqlite_path = self.0.join("map.sqlite");
            if sqlite_path.is_file() {
                backends.push(MapData::from_sqlite_file(&sqlite_path, false).await?);
            }
        }
        let old = self.0.join("sectors");
        if old.is_dir() {
            backends.push(MapData::from_old_sector_tree(old));
        }
        let new = self.0.join("sectors2");
        if new.is_dir() {
            backends.push(MapData::from_new_sector_tree(new));
        }
        Ok(backends)
    }

    /// All sectors any present layout has blocks in, deduplicated
    pub async fn sector_positions(&self) -> Result<BTreeSet<SectorPos>, WorldError> {
        let mut sectors = BTreeSet::new();
        for backend in self.get_backends().await? {
            sectors.append(&mut backend.sector_positions().await?);
        }
        Ok(sectors)
    }

    /// The block heights of a sector across all present layouts,
    /// deduplicated and sorted highest first
    pub async fn sector_block_heights(&self, sector: SectorPos) -> Result<Vec<i16>, WorldError> {
        let mut heights = BTreeSet::new();
        for backend in self.get_backends().await? {
            heights.extend(backend.sector_block_heights(sector).await?);
        }
        Ok(heights.into_iter().rev().collect())
    }

    /// A [`VoxelManip`] for editing this world's nodes.
    ///
    /// With `writeable`, a database backend named by `world.mt` is
    /// created if its file does not exist yet.
    pub async fn get_voxel_manip(&self, writeable: bool) -> Result<VoxelManip, WorldError> {
        Ok(VoxelManip::new(self.primary_backend(writeable).await?))
    }

    async fn primary_backend(&self, writeable: bool) -> Result<MapData, WorldError> {
        let metadata = self.get_world_metadata().await?;
        if let Some(backend) = metadata.get("backend") {
            debug!("world.mt names backend {backend:?}");
            return match backend.as_str() {
                #[cfg(feature = "sqlite")]
                "sqlite3" => {
                    Ok(MapData::from_sqlite_file(self.0.join("map.sqlite"), writeable).await?)
                }
                other => Err(WorldError::UnknownBackend(other.to_string())),
            };
        }
        #[cfg(feature = "sqlite")]
        if self.0.join("map.sqlite").is_file() {
            return Ok(MapData::from_sqlite_file(self.0.join("map.sqlite"), writeable).await?);
        }
        let new = self.0.join("sectors2");
        if new.is_dir() {
            return Ok(MapData::from_new_sector_tree(new));
        }
        let old = self.0.join("sectors");
        if old.is_dir() {
            return Ok(MapData::from_old_sector_tree(old));
        }
        Err(WorldError::NoBackend(self.0.clone()))
    }
}
