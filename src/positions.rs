//! Functions and datatypes to work with world coordinates

use glam::{I16Vec3, U16Vec3};
#[cfg(feature = "sqlite")]
use sqlx::sqlite::SqliteRow;
#[cfg(feature = "sqlite")]
use sqlx::{FromRow, Row};
use std::fmt::Display;
use thiserror::Error;

use crate::{
    BLOCK_BITS_1D, BLOCK_KEY_RANGE, BLOCK_MASK, BLOCK_NODES_1D, BLOCK_NODES_3D, NODE_BITS_1D,
    NODE_MASK, WORLD_BLOCKS_RANGE,
};

/// The position of a map block within the world.
///
/// Internally kept node-scaled: the wrapped vector holds the block index of
/// each dimension shifted left by [`NODE_BITS_1D`], so that joining it with
/// a block-relative [`NodePos`] is a plain addition. Valid block indices
/// cover [`WORLD_BLOCKS_RANGE`] per dimension.
///
/// - `x`: "East direction". The direction in which the sun rises.
/// - `y`: "Up" direction
/// - `z`: "North" direction. 90° left from the direction the sun rises.
#[repr(transparent)]
#[derive(Debug, PartialEq, Copy, Clone, Eq, Hash)]
pub struct BlockPos(I16Vec3);

/// A block position packed into the single integer the database layout keys
/// rows by: `z·2²⁴ + y·2¹² + x` over block indices.
#[repr(transparent)]
#[derive(Debug, PartialEq, Copy, Clone, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey(i64);

impl From<BlockKey> for i64 {
    fn from(value: BlockKey) -> Self {
        value.0
    }
}

impl TryFrom<i64> for BlockKey {
    type Error = NodeIndexOutOfRange;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if BLOCK_KEY_RANGE.contains(&value) {
            Ok(Self(value))
        } else {
            Err(NodeIndexOutOfRange)
        }
    }
}

fn unsigned_to_signed(i: i64, max_positive: i64) -> i64 {
    if i < max_positive {
        i
    } else {
        i - 2 * max_positive
    }
}

impl BlockPos {
    /// Join this block position with a block-relative node position
    pub fn join(self, node_pos: NodePos) -> I16Vec3 {
        I16Vec3::join(self, node_pos)
    }

    /// The block index of each dimension
    #[must_use]
    pub fn into_index_vec(self) -> I16Vec3 {
        self.0 >> NODE_BITS_1D
    }

    /// Build a block position from per-dimension block indices.
    ///
    /// Indices outside [`WORLD_BLOCKS_RANGE`] wrap silently; use the
    /// validating [`TryFrom<I16Vec3>`] when the input is untrusted.
    #[must_use]
    pub fn from_index_vec(vec: I16Vec3) -> Self {
        Self(vec << NODE_BITS_1D)
    }

    /// The key this block is stored under in the database layout
    #[must_use]
    pub fn database_key(self) -> i64 {
        BlockKey::from(self).into()
    }

    /// Decode a database key, however it was produced.
    ///
    /// This accepts any integer and reproduces the historical unpacking
    /// arithmetic exactly: every dimension is recovered as a 12-bit field
    /// (`key mod 4096`, sign-fixed at 2048), so keys written by tools that
    /// silently wrapped out-of-range coordinates decode to the same block
    /// they always decoded to. Within [`BLOCK_KEY_RANGE`] this is the exact
    /// inverse of [`BlockPos::database_key`].
    #[must_use]
    pub fn from_database_key(key: i64) -> Self {
        let modulus = 1i64 << BLOCK_BITS_1D;
        let mut rest = key;
        let mut fields = [0i16; 3];
        for field in &mut fields {
            let low = rest.rem_euclid(modulus);
            *field = unsigned_to_signed(low, modulus / 2) as i16;
            // remove the extracted field; the division is exact by construction
            rest = rest.div_euclid(modulus) + i64::from(low >= modulus / 2);
        }
        Self::from_index_vec(I16Vec3::new(fields[0], fields[1], fields[2]))
    }
}

impl From<BlockKey> for BlockPos {
    fn from(value: BlockKey) -> Self {
        Self::from_database_key(value.0)
    }
}

/// Builds a block position from per-dimension block indices, rejecting any
/// index outside [`WORLD_BLOCKS_RANGE`].
impl TryFrom<I16Vec3> for BlockPos {
    type Error = NodeIndexOutOfRange;

    fn try_from(value: I16Vec3) -> Result<Self, Self::Error> {
        if WORLD_BLOCKS_RANGE.contains(&value.x)
            && WORLD_BLOCKS_RANGE.contains(&value.y)
            && WORLD_BLOCKS_RANGE.contains(&value.z)
        {
            Ok(Self::from_index_vec(value))
        } else {
            Err(NodeIndexOutOfRange)
        }
    }
}

impl From<BlockPos> for BlockKey {
    fn from(value: BlockPos) -> Self {
        let temp = (value.0 >> NODE_BITS_1D).as_i64vec3();
        Self(temp.x + (temp.y << BLOCK_BITS_1D) + (temp.z << (BLOCK_BITS_1D * 2)))
    }
}

#[cfg(feature = "sqlite")]
impl FromRow<'_, SqliteRow> for BlockPos {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(BlockPos::from_database_key(row.try_get::<i64, _>("pos")?))
    }
}

/// A node position relative to its map block.
///
/// It is guaranteed that only the lowest [`NODE_BITS_1D`] bits are set
/// in each dimension.
#[repr(transparent)]
#[derive(Debug, PartialEq, Copy, Clone, Eq, Hash)]
pub struct NodePos(U16Vec3);

/// An index into the flat 16·16·16 node arrays of a map block
#[repr(transparent)]
#[derive(Debug, PartialEq, Copy, Clone, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(u16);

/// A coordinate or index was outside its representable range
#[derive(Error, Debug, PartialEq, Eq)]
#[error("coordinate or index outside its representable range")]
pub struct NodeIndexOutOfRange;

impl TryFrom<u16> for NodeIndex {
    type Error = NodeIndexOutOfRange;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if value < BLOCK_NODES_3D {
            Ok(Self(value))
        } else {
            Err(NodeIndexOutOfRange)
        }
    }
}

impl TryFrom<U16Vec3> for NodePos {
    type Error = NodeIndexOutOfRange;

    fn try_from(value: U16Vec3) -> Result<Self, Self::Error> {
        if value.x < BLOCK_NODES_1D && value.y < BLOCK_NODES_1D && value.z < BLOCK_NODES_1D {
            Ok(Self(value))
        } else {
            Err(NodeIndexOutOfRange)
        }
    }
}

impl From<NodeIndex> for u16 {
    fn from(value: NodeIndex) -> Self {
        value.0
    }
}

impl From<NodePos> for U16Vec3 {
    fn from(value: NodePos) -> Self {
        value.0
    }
}

impl Display for NodeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Display for BlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Convert a node index (used in flat 16·16·16 arrays) into a node position
///
/// The node position will be relative to the map block.
impl From<NodeIndex> for NodePos {
    fn from(node_index: NodeIndex) -> Self {
        // ....zzzzyyyyxxxx
        Self(U16Vec3::new(
            node_index.0 & NODE_MASK,
            (node_index.0 >> NODE_BITS_1D) & NODE_MASK,
            (node_index.0 >> (NODE_BITS_1D * 2)) & NODE_MASK,
        ))
    }
}

/// Convert a MapBlock-relative node position into a flat array index
impl From<NodePos> for NodeIndex {
    fn from(value: NodePos) -> NodeIndex {
        Self(value.0.x + (value.0.y << NODE_BITS_1D) + (value.0.z << (NODE_BITS_1D * 2)))
    }
}

impl From<NodeIndex> for usize {
    fn from(value: NodeIndex) -> usize {
        usize::from(value.0)
    }
}

impl From<NodePos> for usize {
    fn from(value: NodePos) -> usize {
        NodeIndex::from(value).into()
    }
}

/// Splitting and joining of absolute node positions
pub trait SplitPos {
    /// Split an absolute node position into its block and the position inside it
    fn split(self) -> (BlockPos, NodePos);
    /// Rebuild an absolute node position
    fn join(block_pos: BlockPos, node_pos: NodePos) -> Self;
}

impl SplitPos for I16Vec3 {
    fn split(self) -> (BlockPos, NodePos) {
        (
            BlockPos(self & I16Vec3::splat(BLOCK_MASK)),
            NodePos(self.as_u16vec3() & U16Vec3::splat(NODE_MASK)),
        )
    }

    fn join(block_pos: BlockPos, node_pos: NodePos) -> Self {
        block_pos.0 + node_pos.0.as_i16vec3()
    }
}

/// The two signed hex encodings used in sector directory and block file names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexWidth {
    /// 12-bit two's complement, 3 hex digits (`sectors2/` path segments)
    W12,
    /// 16-bit two's complement, 4 hex digits (`sectors/` names, y file names)
    W16,
}

impl HexWidth {
    /// Bit width of the encoded field
    pub const fn bits(self) -> u32 {
        match self {
            HexWidth::W12 => 12,
            HexWidth::W16 => 16,
        }
    }

    /// Number of hex digits an encoded coordinate occupies
    pub const fn digits(self) -> usize {
        self.bits() as usize / 4
    }

    const fn half(self) -> i32 {
        1 << (self.bits() - 1)
    }
}

/// A hex-encoded coordinate could not be produced or understood
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HexCoordError {
    /// The coordinate does not fit the requested bit width
    #[error("coordinate {0} does not fit into {1} bits")]
    OutOfRange(i32, u32),
    /// The text is not a hex coordinate of the requested width
    #[error("not a valid hex coordinate: {0:?}")]
    Malformed(String),
}

/// Encode a coordinate as zero-padded lowercase hex.
///
/// Negative values are mapped by adding 2^bits, i.e. two's complement
/// within the requested width.
pub fn to_hex(value: i16, width: HexWidth) -> Result<String, HexCoordError> {
    let value = i32::from(value);
    if value < -width.half() || value >= width.half() {
        return Err(HexCoordError::OutOfRange(value, width.bits()));
    }
    let unsigned = if value < 0 {
        value + (1 << width.bits())
    } else {
        value
    };
    Ok(format!(
        "{unsigned:0digits$x}",
        digits = width.digits()
    ))
}

/// Decode a hex coordinate of the given width.
///
/// The inverse of [`to_hex`]; unsigned values above 2^(bits−1)−1 come out
/// negative. Historical writers did not always zero-pad, so anything from
/// one digit up to the full width is accepted, in either letter case.
pub fn from_hex(text: &str, width: HexWidth) -> Result<i16, HexCoordError> {
    let malformed = || HexCoordError::Malformed(text.to_string());
    if text.is_empty()
        || text.len() > width.digits()
        || !text.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(malformed());
    }
    let unsigned = i32::from_str_radix(text, 16).map_err(|_| malformed())?;
    let signed = if unsigned >= width.half() {
        unsigned - (1 << width.bits())
    } else {
        unsigned
    };
    Ok(signed as i16)
}

/// The (x, z) pair identifying a vertical column of map blocks.
///
/// Not a stored entity itself; it names the directories of the two
/// file-based storage layouts and is the unit map scans iterate over.
#[derive(Debug, PartialEq, Copy, Clone, Eq, Hash, PartialOrd, Ord)]
pub struct SectorPos {
    /// Block x index
    pub x: i16,
    /// Block z index
    pub z: i16,
}

impl SectorPos {
    /// Create a sector position from block indices
    pub fn new(x: i16, z: i16) -> Self {
        Self { x, z }
    }

    /// Directory name in the old layout: 4 hex digits of x, then 4 of z
    pub fn old_dir_name(self) -> Result<String, HexCoordError> {
        Ok(format!(
            "{}{}",
            to_hex(self.x, HexWidth::W16)?,
            to_hex(self.z, HexWidth::W16)?
        ))
    }

    /// Path segments in the new layout: 3 hex digits of x and of z
    pub fn new_dir_segments(self) -> Result<(String, String), HexCoordError> {
        Ok((to_hex(self.x, HexWidth::W12)?, to_hex(self.z, HexWidth::W12)?))
    }

    /// Parse an old-layout directory name
    pub fn from_old_dir_name(name: &str) -> Result<Self, HexCoordError> {
        if name.len() != 8 || !name.is_ascii() {
            return Err(HexCoordError::Malformed(name.to_string()));
        }
        Ok(Self {
            x: from_hex(&name[..4], HexWidth::W16)?,
            z: from_hex(&name[4..], HexWidth::W16)?,
        })
    }

    /// Parse the two new-layout path segments
    pub fn from_new_dir_segments(x: &str, z: &str) -> Result<Self, HexCoordError> {
        Ok(Self {
            x: from_hex(x, HexWidth::W12)?,
            z: from_hex(z, HexWidth::W12)?,
        })
    }

    /// The position of the block at height `y` within this sector
    pub fn block_pos(self, y: i16) -> Result<BlockPos, NodeIndexOutOfRange> {
        BlockPos::try_from(I16Vec3::new(self.x, y, self.z))
    }
}

impl From<BlockPos> for SectorPos {
    fn from(value: BlockPos) -> Self {
        let index = value.into_index_vec();
        Self {
            x: index.x,
            z: index.z,
        }
    }
}

impl Display for SectorPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}
