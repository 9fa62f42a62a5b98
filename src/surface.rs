//! Top-down surface extraction, the pass map renderers are built on.
//!
//! For every (x, z) node column of a sector, the scan walks blocks from
//! the highest stored one downward and finds the first node made of
//! content the caller knows (typically: has a color for). Air and
//! not-yet-generated space are skipped, water accumulates a depth count on
//! the way down, and content nobody knows ends up in an
//! [`UnknownContentReport`] instead of failing the scan. A sector is done
//! as soon as every column is resolved, which on most maps means only the
//! top few blocks are ever read.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::warn;
use num_integer::div_floor;

use crate::content::{ContentRef, UnknownContentReport};
use crate::map_data::{MapData, MapDataError};
use crate::positions::{BlockPos, SectorPos};
use crate::world::{World, WorldError};
use crate::BLOCK_NODES_1D;

/// An inclusive node-coordinate rectangle restricting a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Westernmost node x
    pub xmin: i32,
    /// Easternmost node x
    pub xmax: i32,
    /// Southernmost node z
    pub zmin: i32,
    /// Northernmost node z
    pub zmax: i32,
}

impl Region {
    /// The rectangle starting at (x, z) with the given node extents
    pub fn from_geometry(x: i32, z: i32, width: i32, height: i32) -> Self {
        Region {
            xmin: x,
            xmax: x + width - 1,
            zmin: z,
            zmax: z + height - 1,
        }
    }

    /// Whether any node column of `sector` lies within this region
    pub fn contains_sector(&self, sector: SectorPos) -> bool {
        let side = i32::from(BLOCK_NODES_1D);
        let x = i32::from(sector.x);
        let z = i32::from(sector.z);
        x >= div_floor(self.xmin, side)
            && x <= div_floor(self.xmax, side)
            && z >= div_floor(self.zmin, side)
            && z <= div_floor(self.zmax, side)
    }
}

impl Default for Region {
    /// The stock mapper's default view: ±1500 nodes around the origin
    fn default() -> Self {
        Region {
            xmin: -1500,
            xmax: 1500,
            zmin: -1500,
            zmax: 1500,
        }
    }
}

/// What a scan found for one node column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceCell {
    /// Absolute y of the surface node
    pub height: i16,
    /// What the surface node is made of
    pub content: ContentRef,
    /// Number of water nodes passed above the surface
    pub water_depth: u16,
    /// Day/night flag of the block the surface node is in
    pub day_night_differs: bool,
}

/// The outcome of scanning one or more sectors
#[derive(Debug, Default)]
pub struct SurfaceMap {
    /// Resolved columns, keyed by absolute node (x, z)
    pub cells: HashMap<(i32, i32), SurfaceCell>,
    /// Content encountered that the caller's known set has no entry for
    pub unknown: UnknownContentReport,
    /// Blocks that could not be decoded, with the error that stopped them
    pub skipped_blocks: Vec<(BlockPos, MapDataError)>,
}

impl SurfaceMap {
    /// Fold the outcome of another scan into this one
    pub fn merge(&mut self, other: SurfaceMap) {
        self.cells.extend(other.cells);
        self.unknown.extend(other.unknown);
        self.skipped_blocks.extend(other.skipped_blocks);
    }
}

/// Scan one sector across the given backends.
///
/// Backends are consulted in order; the first one that stores a given
/// block height wins (database first, then the old tree, then the new
/// tree, as [`crate::World::get_backends`] returns them). Undecodable
/// blocks are skipped and recorded, never fatal.
pub async fn scan_sector(
    backends: &[MapData],
    sector: SectorPos,
    known: &HashSet<ContentRef>,
) -> Result<SurfaceMap, MapDataError> {
    let mut surface = SurfaceMap::default();

    let mut seen = BTreeSet::new();
    let mut heights: Vec<(i16, &MapData)> = Vec::new();
    for backend in backends {
        for y in backend.sector_block_heights(sector).await? {
            if seen.insert(y) {
                heights.push((y, backend));
            }
        }
    }
    heights.sort_unstable_by_key(|&(y, _)| std::cmp::Reverse(y));

    let side = usize::from(BLOCK_NODES_1D);
    let mut pending: Vec<(usize, usize)> = (0..side)
        .flat_map(|x| (0..side).map(move |z| (x, z)))
        .collect();
    let mut water = [[0u16; 16]; 16];

    for (y, backend) in heights {
        if pending.is_empty() {
            break;
        }
        let block_pos = match sector.block_pos(y) {
            Ok(block_pos) => block_pos,
            Err(_) => continue,
        };
        let block = match backend.get_mapblock(block_pos).await {
            Ok(block) => block,
            Err(MapDataError::MapBlockNonexistent(_)) => continue,
            Err(err) => {
                warn!("skipping block {sector} y={y}: {err}");
                surface.skipped_blocks.push((block_pos, err));
                continue;
            }
        };
        let day_night_differs = block.day_night_differs();

        pending.retain(|&(x, z)| {
            let column = (
                i32::from(sector.x) * side as i32 + x as i32,
                i32::from(sector.z) * side as i32 + z as i32,
            );
            for node_y in (0..side).rev() {
                let index = x + node_y * side + z * side * side;
                let content =
                    ContentRef::resolve(block.param0[index], &block.name_id_mappings);
                if content.is_ignore() || content.is_air() {
                    continue;
                }
                let height = y * side as i16 + node_y as i16;
                if content.is_water() {
                    water[x][z] += 1;
                    // provisional cell, so sea without a known seabed still shows
                    surface.cells.insert(
                        column,
                        SurfaceCell {
                            height,
                            content,
                            water_depth: water[x][z],
                            day_night_differs,
                        },
                    );
                    continue;
                }
                if known.contains(&content) {
                    surface.cells.insert(
                        column,
                        SurfaceCell {
                            height,
                            content,
                            water_depth: water[x][z],
                            day_night_differs,
                        },
                    );
                    return false;
                }
                surface.unknown.record(&content);
            }
            true
        });
    }

    Ok(surface)
}

/// Scan every sector of a world, optionally restricted to a region.
///
/// All storage layouts present in the world contribute, with duplicate
/// sectors and heights deduplicated.
pub async fn scan_world(
    world: &World,
    region: Option<&Region>,
    known: &HashSet<ContentRef>,
) -> Result<SurfaceMap, WorldError> {
    let backends = world.get_backends().await?;
    let mut sectors = BTreeSet::new();
    for backend in &backends {
        sectors.append(&mut backend.sector_positions().await.map_err(WorldError::from)?);
    }

    let mut surface = SurfaceMap::default();
    for sector in sectors {
        if let Some(region) = region {
            if !region.contains_sector(sector) {
                continue;
            }
        }
        surface.merge(scan_sector(&backends, sector, known).await?);
    }
    Ok(surface)
}
