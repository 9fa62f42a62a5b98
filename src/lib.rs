//! Decode, encode and enumerate the map data of a Minetest world.
//!
//! The world map is stored as 16·16·16 voxel chunks ([map blocks](`MapBlock`)),
//! each serialized into a versioned binary record. Records live either as
//! loose files in one of two hex-named directory trees (`sectors/`,
//! `sectors2/`) or as rows of a `map.sqlite` database keyed by a packed
//! 64-bit block position. This crate implements the record codec for map
//! format versions 0, 2 and 16 through 25, the coordinate codecs for all
//! three storage layouts, and enumeration/editing on top of them.
//!
//! ## Terminology
//! ### Node
//! A [`Node`] is a single voxel. It has a content type (a name like
//! `default:dirt`, or a bare numeric id in old map formats) and two
//! auxiliary parameter bytes whose meaning depends on the content type
//! (lighting, liquid flow, rotation, ...).
//!
//! ### MapBlock
//! A [`MapBlock`] holds the nodes of one chunk together with node metadata,
//! static objects and the id→name table needed to interpret its content
//! ids.
//!
//! A map block is addressed by a [`positions::BlockPos`]; the vertical
//! column of blocks sharing an (x, z) is a [`positions::SectorPos`].
//!
//! ## Example
//!
//! Synthesize a block, write it out and read it back:
//! ```
//! use mtmap::MapBlock;
//!
//! let block = MapBlock::generated(24).unwrap();
//! let record = block.serialize().unwrap();
//! let parsed = MapBlock::from_data(&record[..]).unwrap();
//! assert_eq!(parsed.param0, block.param0);
//! ```
//!
//! Read all nodes of a block from a world directory:
//! ```no_run
//! use mtmap::World;
//! use mtmap::positions::BlockPos;
//! use glam::I16Vec3;
//! use async_std::task;
//!
//! task::block_on(async {
//!     let world = World::open("TestWorld");
//!     let mapdata = world.get_map_data().await.unwrap();
//!     let blockpos = BlockPos::from_index_vec(I16Vec3::new(-13, -8, 2));
//!     for (pos, node) in mapdata.iter_mapblock_nodes(blockpos).await.unwrap() {
//!         println!("{pos:?}, {node:?}");
//!     }
//! });
//! ```
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod compress;
pub mod content;
pub mod map_block;
pub mod map_data;
pub mod positions;
pub mod surface;
pub mod voxel_manip;
pub mod world;

use std::ops::Range;

pub use content::ContentRef;
pub use content::UnknownContentReport;
pub use map_block::MapBlock;
pub use map_block::MapBlockError;
pub use map_block::Node;
pub use map_data::MapData;
pub use map_data::MapDataError;
pub use voxel_manip::VoxelManip;
pub use world::World;
pub use world::WorldError as Error;

/// Number of bits needed to address all nodes within a world in each dimension
pub const WORLD_BITS_1D: u32 = i16::BITS;

/// Number of bits needed to address nodes within a block in each dimension
pub const NODE_BITS_1D: u32 = 4;

/// The bits needed to address nodes within a block
pub const NODE_MASK: u16 = (1 << NODE_BITS_1D) - 1;

/// Number of bits needed to address blocks within a world in each dimension
pub const BLOCK_BITS_1D: u32 = WORLD_BITS_1D - NODE_BITS_1D;

/// The bits needed to address blocks within a world
pub const BLOCK_MASK: i16 = -1 << NODE_BITS_1D;

/// Number of nodes per block in each dimension
pub const BLOCK_NODES_1D: u16 = 1 << NODE_BITS_1D;

/// Minimum block index for all dimensions
pub const WORLD_BLOCKS_MIN: i16 = -1 << (BLOCK_BITS_1D - 1);

/// Maximum block index for all dimensions
pub const WORLD_BLOCKS_MAX: i16 = (1 << (BLOCK_BITS_1D - 1)) - 1;

/// Valid block index range for all dimensions
pub const WORLD_BLOCKS_RANGE: Range<i16> = WORLD_BLOCKS_MIN..(1 << (BLOCK_BITS_1D - 1));

const DIAGONAL_KEY_STRIDE: i64 = 1 + (1 << BLOCK_BITS_1D) + (1 << (BLOCK_BITS_1D * 2));

/// Smallest database key a valid block position packs to
pub const BLOCK_KEY_MIN: i64 = WORLD_BLOCKS_MIN as i64 * DIAGONAL_KEY_STRIDE;

/// Largest database key a valid block position packs to
pub const BLOCK_KEY_MAX: i64 = WORLD_BLOCKS_MAX as i64 * DIAGONAL_KEY_STRIDE;

/// Database keys that pack and unpack losslessly
pub const BLOCK_KEY_RANGE: Range<i64> = BLOCK_KEY_MIN..(BLOCK_KEY_MAX + 1);

/// Number of nodes in an entire block
pub const BLOCK_NODES_3D: u16 = 1 << (NODE_BITS_1D * 3);

/// Number of nodes in an entire block as usize for convenience
pub const BLOCK_NODES_3D_U: usize = BLOCK_NODES_3D as usize;

#[cfg(test)]
mod tests;
