//! Reading and writing of single map block records.
//!
//! A record is framed purely by its leading version byte: every later
//! field's presence and width follows from it. The versions handled here
//! are 0, 2 and the 16–25 family; what each sub-variant adds is captured
//! in a version profile computed once per record, so decode and encode
//! walk the same description instead of duplicating the branching.

use std::collections::BTreeMap;
use std::io::{self, Read};

use glam::{DVec3, IVec3};
use log::warn;
use thiserror::Error;

use crate::compress::{deflate, inflate_delimited};
use crate::content::{self, ContentRef, CONTENT_AIR, CONTENT_AIR_LEGACY, CONTENT_IGNORE};
use crate::positions::{NodeIndex, NodePos};
use crate::{BLOCK_NODES_3D, BLOCK_NODES_3D_U};

/// The newest map format version this crate writes
pub const LATEST_FORMAT_VERSION: u8 = 25;

/// Timestamp value meaning "never saved with a timestamp"
pub const TIMESTAMP_UNDEFINED: u32 = 0xffff_ffff;

/// Flag bit: the block is fully below the surface
pub const FLAG_IS_UNDERGROUND: u8 = 1 << 0;
/// Flag bit: day and night lighting differ, the block is visible from above
pub const FLAG_DAY_NIGHT_DIFFERS: u8 = 1 << 1;
/// Flag bit: stored lighting is stale and needs a recalculation
pub const FLAG_LIGHTING_EXPIRED: u8 = 1 << 2;
/// Flag bit: the block was produced by the map generator
pub const FLAG_GENERATED: u8 = 1 << 3;

/// Why a map block record could not be decoded or encoded
#[derive(Error, Debug)]
pub enum MapBlockError {
    /// The version byte is outside every range this crate knows
    #[error("unsupported map format version {0}")]
    UnsupportedVersion(u8),
    /// The record ended in the middle of a fixed-size field
    #[error("map block record ended while reading {0}")]
    TruncatedRecord(&'static str),
    /// The stored node widths cannot occur in a well-formed record
    #[error("implausible node widths {content_width}/{params_width}")]
    InvalidWidths {
        /// Stored content width
        content_width: u8,
        /// Stored params width
        params_width: u8,
    },
    /// A content id does not fit the target version's encoding
    #[error("content id {id:#x} is not representable in map format version {version}")]
    ContentIdUnrepresentable {
        /// The offending id
        id: u16,
        /// The version being written
        version: u8,
    },
    /// A variable-length field exceeds its u16 length prefix
    #[error("{0} too large for its length field")]
    OversizedField(&'static str),
    /// Compressing a segment failed
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// How the content array is laid out in the node-data segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentEncoding {
    /// One byte per voxel, used as-is (formats below 16)
    Plain8,
    /// One byte per voxel, run through the fixed legacy table (16–19)
    Translated8,
    /// One byte per voxel plus the param2 high nibble for ids ≥ 0x80 (20–23)
    Packed12,
    /// Big-endian u16 per voxel (24 and later)
    Wide16,
}

/// Which sections a given format version carries
#[derive(Debug, Clone, Copy)]
struct VersionProfile {
    content_width: u8,
    explicit_widths: bool,
    legacy_object_count: bool,
    timer_version_byte: bool,
    early_timer_table: bool,
    name_id_mappings: bool,
    late_timer_table: bool,
    encoding: ContentEncoding,
}

impl VersionProfile {
    fn of(version: u8) -> Result<Self, MapBlockError> {
        if !matches!(version, 0 | 2 | 16..=25) {
            return Err(MapBlockError::UnsupportedVersion(version));
        }
        Ok(VersionProfile {
            content_width: if version >= 24 { 2 } else { 1 },
            explicit_widths: version >= 22,
            legacy_object_count: version <= 21,
            timer_version_byte: version == 23,
            early_timer_table: version == 24,
            name_id_mappings: version >= 22,
            late_timer_table: version >= 25,
            encoding: match version {
                24.. => ContentEncoding::Wide16,
                20..=23 => ContentEncoding::Packed12,
                16..=19 => ContentEncoding::Translated8,
                _ => ContentEncoding::Plain8,
            },
        })
    }
}

/// Metadata attached to one node, e.g. the inventory of a chest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    /// Content-defined metadata type
    pub type_id: u16,
    /// Opaque payload, interpreted by the content type
    pub data: Vec<u8>,
}

/// A non-voxel entity persisted within a block, e.g. a dropped item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticObject {
    /// Object type id
    pub object_type: u8,
    /// Node position scaled by 10000 per dimension
    pub position: IVec3,
    /// Opaque payload, interpreted by the object type
    pub data: Vec<u8>,
}

impl StaticObject {
    /// The real-valued node position of this object
    pub fn node_position(&self) -> DVec3 {
        self.position.as_dvec3() / 10000.0
    }
}

/// A single voxel as high-level code sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// What the voxel is made of
    pub param0: ContentRef,
    /// First parameter byte, usually lighting
    pub param1: u8,
    /// Second parameter byte, meaning depends on the content type
    pub param2: u8,
}

/// One 16·16·16 chunk of the world map.
///
/// The node arrays are flat, indexed by `z·256 + y·16 + x`
/// (see [`NodeIndex`]). `param0` always holds fully resolved numeric
/// content ids, whatever encoding the record used on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct MapBlock {
    /// The format version this block was read as and will be written as
    pub map_format_version: u8,
    /// Raw flags byte; a bitfield from format 16 on, reserved before
    pub flags: u8,
    /// Bytes per stored content id (1 below format 24, then 2)
    pub content_width: u8,
    /// Combined bytes per voxel for the two param arrays (always 2)
    pub params_width: u8,
    /// Content id of every node
    pub param0: Vec<u16>,
    /// First parameter byte of every node
    pub param1: Vec<u8>,
    /// Second parameter byte of every node
    pub param2: Vec<u8>,
    /// Sparse per-node metadata, keyed by node index
    pub node_metadata: BTreeMap<u16, NodeMetadata>,
    /// Objects persisted in this block
    pub static_objects: Vec<StaticObject>,
    /// Last-saved game time, [`TIMESTAMP_UNDEFINED`] if never set
    pub timestamp: u32,
    /// id→name table for `param0`, present from format 22 on
    pub name_id_mappings: BTreeMap<u16, Vec<u8>>,
}

impl MapBlock {
    fn empty(map_format_version: u8, content_width: u8) -> Self {
        MapBlock {
            map_format_version,
            flags: 0,
            content_width,
            params_width: 2,
            param0: vec![CONTENT_IGNORE; BLOCK_NODES_3D_U],
            param1: vec![0; BLOCK_NODES_3D_U],
            param2: vec![0; BLOCK_NODES_3D_U],
            node_metadata: BTreeMap::new(),
            static_objects: Vec::new(),
            timestamp: TIMESTAMP_UNDEFINED,
            name_id_mappings: BTreeMap::new(),
        }
    }

    /// A block representing not-yet-generated space.
    ///
    /// This is what editing code starts from when writing into a position
    /// no block exists at yet.
    pub fn unloaded() -> Self {
        let mut block = Self::empty(LATEST_FORMAT_VERSION, 2);
        block.name_id_mappings.insert(CONTENT_IGNORE, b"ignore".to_vec());
        block
    }

    /// A freshly generated all-air block, as map generation tools write
    /// them: full sunlight, day/night lighting marked different and stale.
    pub fn generated(map_format_version: u8) -> Result<Self, MapBlockError> {
        let profile = VersionProfile::of(map_format_version)?;
        let mut block = Self::empty(map_format_version, profile.content_width);
        let air = if map_format_version >= 20 {
            CONTENT_AIR
        } else {
            CONTENT_AIR_LEGACY
        };
        block.param0.fill(air);
        block.param1.fill(15);
        block.flags = FLAG_DAY_NIGHT_DIFFERS | FLAG_LIGHTING_EXPIRED;
        if profile.name_id_mappings {
            block.name_id_mappings.insert(air, b"air".to_vec());
        }
        Ok(block)
    }

    /// Decode a map block record from a reader
    pub fn from_data(mut reader: impl Read) -> Result<Self, MapBlockError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_slice(&data)
    }

    /// Decode a map block record.
    ///
    /// Decode is all-or-nothing per block, with one deliberate exception:
    /// a compressed segment that fails to inflate degrades to default
    /// content (and default values for everything framed after it) with a
    /// warning, so corrupt chunks don't take down whole-map scans.
    pub fn from_slice(data: &[u8]) -> Result<Self, MapBlockError> {
        let mut record = RecordReader::new(data);
        let version = record.u8("version")?;
        let profile = VersionProfile::of(version)?;
        let flags = record.u8("flags")?;
        let (content_width, params_width) = if profile.explicit_widths {
            (record.u8("content width")?, record.u8("params width")?)
        } else {
            (profile.content_width, 2)
        };
        let width_ok = params_width == 2
            && if version >= 24 {
                content_width == 2
            } else {
                (1..=2).contains(&content_width)
            };
        if !width_ok {
            return Err(MapBlockError::InvalidWidths {
                content_width,
                params_width,
            });
        }
        let mut block = Self::empty(version, content_width);
        block.flags = flags;
        let encoding = if content_width == 2 {
            ContentEncoding::Wide16
        } else {
            profile.encoding
        };

        let node_data_len = (usize::from(content_width) + 2) * BLOCK_NODES_3D_U;
        let node_data = match inflate_delimited(record.remaining()) {
            Ok((buf, used)) if buf.len() == node_data_len => {
                record.advance(used);
                buf
            }
            Ok((buf, _)) => {
                warn!(
                    "map block v{version}: node data is {} bytes, expected {node_data_len}",
                    buf.len()
                );
                return Ok(block);
            }
            Err(err) => {
                warn!("map block v{version}: node data did not decompress: {err}");
                return Ok(block);
            }
        };
        block.unpack_nodes(&node_data, encoding);

        match inflate_delimited(record.remaining()) {
            Ok((buf, used)) => {
                record.advance(used);
                block.node_metadata = parse_metadata(&buf);
            }
            Err(err) => {
                warn!("map block v{version}: node metadata did not decompress: {err}");
                return Ok(block);
            }
        }

        if profile.legacy_object_count {
            record.u16_be("mapblockobject count")?;
        }
        if profile.timer_version_byte {
            record.u8("node timer version")?;
        }
        if profile.early_timer_table {
            let timer_version = record.u8("node timer version")?;
            if timer_version == 1 {
                let count = record.u16_be("node timer count")?;
                for _ in 0..count {
                    record.take(10, "node timer")?;
                }
            }
        }

        record.u8("static object version")?;
        let object_count = record.u16_be("static object count")?;
        for _ in 0..object_count {
            let object_type = record.u8("static object type")?;
            let x = record.s32_be("static object position")?;
            let y = record.s32_be("static object position")?;
            let z = record.s32_be("static object position")?;
            let size = record.u16_be("static object size")?;
            let data = record.take(size.into(), "static object data")?.to_vec();
            block.static_objects.push(StaticObject {
                object_type,
                position: IVec3::new(x, y, z),
                data,
            });
        }

        block.timestamp = record.u32_be("timestamp")?;

        if profile.name_id_mappings {
            record.u8("name-id mapping version")?;
            let mapping_count = record.u16_be("name-id mapping count")?;
            for _ in 0..mapping_count {
                let id = record.u16_be("name-id mapping id")?;
                let len = record.u16_be("name-id mapping name length")?;
                let name = record.take(len.into(), "name-id mapping name")?.to_vec();
                block.name_id_mappings.insert(id, name);
            }
        }

        if profile.late_timer_table {
            record.u8("node timer element size")?;
            let count = record.u16_be("node timer count")?;
            for _ in 0..count {
                record.take(10, "node timer")?;
            }
        }

        Ok(block)
    }

    fn unpack_nodes(&mut self, raw: &[u8], encoding: ContentEncoding) {
        let n = BLOCK_NODES_3D_U;
        let content_bytes = usize::from(self.content_width) * n;
        self.param1.copy_from_slice(&raw[content_bytes..content_bytes + n]);
        self.param2
            .copy_from_slice(&raw[content_bytes + n..content_bytes + 2 * n]);
        match encoding {
            ContentEncoding::Wide16 => {
                for (i, id) in self.param0.iter_mut().enumerate() {
                    *id = u16::from_be_bytes([raw[2 * i], raw[2 * i + 1]]);
                }
            }
            ContentEncoding::Packed12 => {
                for (i, id) in self.param0.iter_mut().enumerate() {
                    *id = if raw[i] < 0x80 {
                        u16::from(raw[i])
                    } else {
                        content::packed12_join(raw[i], self.param2[i])
                    };
                }
            }
            ContentEncoding::Translated8 => {
                for (i, id) in self.param0.iter_mut().enumerate() {
                    *id = content::translate_legacy(raw[i]);
                }
            }
            ContentEncoding::Plain8 => {
                for (i, id) in self.param0.iter_mut().enumerate() {
                    *id = u16::from(raw[i]);
                }
            }
        }
    }

    /// Serialize this block into the record format of its own version.
    ///
    /// Sections the version defines but this block has nothing for are
    /// written as zero-count placeholders; node timers are always written
    /// empty.
    pub fn serialize(&self) -> Result<Vec<u8>, MapBlockError> {
        let version = self.map_format_version;
        let profile = VersionProfile::of(version)?;
        let valid_widths = self.params_width == 2
            && if version >= 24 {
                self.content_width == 2
            } else if profile.explicit_widths {
                (1..=2).contains(&self.content_width)
            } else {
                self.content_width == profile.content_width
            };
        if !valid_widths {
            return Err(MapBlockError::InvalidWidths {
                content_width: self.content_width,
                params_width: self.params_width,
            });
        }
        let encoding = if self.content_width == 2 {
            ContentEncoding::Wide16
        } else {
            profile.encoding
        };

        let mut out = Vec::with_capacity(2048);
        out.push(version);
        out.push(self.flags);
        if profile.explicit_widths {
            out.push(self.content_width);
            out.push(self.params_width);
        }

        out.extend_from_slice(&deflate(&self.pack_nodes(encoding)?)?);
        out.extend_from_slice(&deflate(&encode_metadata(&self.node_metadata)?)?);

        if profile.legacy_object_count {
            out.extend_from_slice(&0u16.to_be_bytes());
        }
        if profile.timer_version_byte {
            out.push(0);
        }
        if profile.early_timer_table {
            out.push(0);
        }

        out.push(0); // static object version
        let object_count = checked_count(self.static_objects.len(), "static object list")?;
        out.extend_from_slice(&object_count.to_be_bytes());
        for object in &self.static_objects {
            out.push(object.object_type);
            out.extend_from_slice(&object.position.x.to_be_bytes());
            out.extend_from_slice(&object.position.y.to_be_bytes());
            out.extend_from_slice(&object.position.z.to_be_bytes());
            let size = checked_count(object.data.len(), "static object data")?;
            out.extend_from_slice(&size.to_be_bytes());
            out.extend_from_slice(&object.data);
        }

        out.extend_from_slice(&self.timestamp.to_be_bytes());

        if profile.name_id_mappings {
            out.push(0); // name-id mapping version
            let mapping_count = checked_count(self.name_id_mappings.len(), "name-id mapping")?;
            out.extend_from_slice(&mapping_count.to_be_bytes());
            for (id, name) in &self.name_id_mappings {
                out.extend_from_slice(&id.to_be_bytes());
                let len = checked_count(name.len(), "name-id mapping name")?;
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(name);
            }
        }

        if profile.late_timer_table {
            out.push(10); // bytes per node timer
            out.extend_from_slice(&0u16.to_be_bytes());
        }

        Ok(out)
    }

    fn pack_nodes(&self, encoding: ContentEncoding) -> Result<Vec<u8>, MapBlockError> {
        let version = self.map_format_version;
        let unrepresentable = |id: u16| MapBlockError::ContentIdUnrepresentable { id, version };
        let n = BLOCK_NODES_3D_U;
        let mut raw = Vec::with_capacity((usize::from(self.content_width) + 2) * n);
        for &id in &self.param0 {
            match encoding {
                ContentEncoding::Wide16 => raw.extend_from_slice(&id.to_be_bytes()),
                ContentEncoding::Packed12 => {
                    if id < 0x80 {
                        raw.push(id as u8);
                    } else if (0x800..=0xfff).contains(&id) {
                        raw.push(content::packed12_split(id).0);
                    } else {
                        return Err(unrepresentable(id));
                    }
                }
                ContentEncoding::Translated8 => {
                    if let Some(byte) = content::legacy_for(id) {
                        raw.push(byte);
                    } else if id <= 0xff && content::translate_legacy(id as u8) == id {
                        raw.push(id as u8);
                    } else {
                        return Err(unrepresentable(id));
                    }
                }
                ContentEncoding::Plain8 => {
                    if id <= 0xff {
                        raw.push(id as u8);
                    } else {
                        return Err(unrepresentable(id));
                    }
                }
            }
        }
        raw.extend_from_slice(&self.param1);
        if encoding == ContentEncoding::Packed12 {
            // extended ids own the high nibble of their param2 byte
            for (i, &id) in self.param0.iter().enumerate() {
                raw.push(if id >= 0x800 {
                    (self.param2[i] & 0x0f) | content::packed12_split(id).1
                } else {
                    self.param2[i]
                });
            }
        } else {
            raw.extend_from_slice(&self.param2);
        }
        Ok(raw)
    }

    /// The node at a block-relative position
    pub fn get_node_at(&self, node_pos: NodePos) -> Node {
        let i = usize::from(node_pos);
        Node {
            param0: ContentRef::resolve(self.param0[i], &self.name_id_mappings),
            param1: self.param1[i],
            param2: self.param2[i],
        }
    }

    /// The raw content id at a block-relative position
    pub fn content_id_at(&self, node_pos: NodePos) -> u16 {
        self.param0[usize::from(node_pos)]
    }

    /// Set the content id at a block-relative position
    pub fn set_content(&mut self, node_pos: NodePos, content_id: u16) {
        self.param0[usize::from(node_pos)] = content_id;
    }

    /// Set the first parameter byte at a block-relative position
    pub fn set_param1(&mut self, node_pos: NodePos, param1: u8) {
        self.param1[usize::from(node_pos)] = param1;
    }

    /// Set the second parameter byte at a block-relative position
    pub fn set_param2(&mut self, node_pos: NodePos, param2: u8) {
        self.param2[usize::from(node_pos)] = param2;
    }

    /// The id this block maps `name` to, allocating a fresh entry if the
    /// name is not mapped yet
    pub fn get_or_create_content_id(&mut self, name: &[u8]) -> u16 {
        if let Some((&id, _)) = self
            .name_id_mappings
            .iter()
            .find(|(_, mapped)| mapped.as_slice() == name)
        {
            return id;
        }
        let id = (0..=u16::MAX)
            .find(|id| !self.name_id_mappings.contains_key(id))
            .unwrap_or(0);
        self.name_id_mappings.insert(id, name.to_vec());
        id
    }

    /// All nodes of this block, with their block-relative positions
    pub fn nodes(&self) -> impl Iterator<Item = (NodePos, Node)> + '_ {
        (0..BLOCK_NODES_3D).filter_map(move |i| {
            let pos = NodePos::from(NodeIndex::try_from(i).ok()?);
            Some((pos, self.get_node_at(pos)))
        })
    }

    /// The block is fully below the surface
    pub fn is_underground(&self) -> bool {
        self.flags & FLAG_IS_UNDERGROUND != 0
    }

    /// Day and night lighting differ, i.e. the block sees the sky
    pub fn day_night_differs(&self) -> bool {
        self.flags & FLAG_DAY_NIGHT_DIFFERS != 0
    }

    /// Stored lighting is stale
    pub fn lighting_expired(&self) -> bool {
        self.flags & FLAG_LIGHTING_EXPIRED != 0
    }

    /// The map generator has finished this block
    pub fn generated_flag(&self) -> bool {
        self.flags & FLAG_GENERATED != 0
    }
}

fn checked_count(len: usize, what: &'static str) -> Result<u16, MapBlockError> {
    u16::try_from(len).map_err(|_| MapBlockError::OversizedField(what))
}

/// Parse the decompressed node metadata table.
///
/// The table lives inside its own compressed segment, so a malformed
/// table cannot desynchronize the record framing; it degrades to empty.
fn parse_metadata(buf: &[u8]) -> BTreeMap<u16, NodeMetadata> {
    let mut metadata = BTreeMap::new();
    if buf.is_empty() {
        return metadata;
    }
    let mut reader = RecordReader::new(buf);
    let parsed = (|| -> Result<(), MapBlockError> {
        let table_version = reader.u16_be("metadata version")?;
        if table_version != 1 {
            warn!("node metadata table version {table_version}, treating as empty");
            return Ok(());
        }
        let count = reader.u16_be("metadata count")?;
        for _ in 0..count {
            let index = reader.u16_be("metadata position")?;
            let type_id = reader.u16_be("metadata type")?;
            let size = reader.u16_be("metadata size")?;
            let data = reader.take(size.into(), "metadata payload")?.to_vec();
            metadata.insert(index, NodeMetadata { type_id, data });
        }
        Ok(())
    })();
    if let Err(err) = parsed {
        warn!("malformed node metadata table ({err}), treating as empty");
        metadata.clear();
    }
    metadata
}

fn encode_metadata(metadata: &BTreeMap<u16, NodeMetadata>) -> Result<Vec<u8>, MapBlockError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&1u16.to_be_bytes());
    let count = checked_count(metadata.len(), "node metadata table")?;
    buf.extend_from_slice(&count.to_be_bytes());
    for (&index, entry) in metadata {
        buf.extend_from_slice(&index.to_be_bytes());
        buf.extend_from_slice(&entry.type_id.to_be_bytes());
        let size = checked_count(entry.data.len(), "node metadata payload")?;
        buf.extend_from_slice(&size.to_be_bytes());
        buf.extend_from_slice(&entry.data);
    }
    Ok(buf)
}

struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], MapBlockError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(MapBlockError::TruncatedRecord(what))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn advance(&mut self, len: usize) {
        self.pos += len;
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, MapBlockError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16_be(&mut self, what: &'static str) -> Result<u16, MapBlockError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32_be(&mut self, what: &'static str) -> Result<u32, MapBlockError> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn s32_be(&mut self, what: &'static str) -> Result<i32, MapBlockError> {
        Ok(self.u32_be(what)? as i32)
    }
}
