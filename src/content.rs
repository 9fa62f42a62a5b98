//! Content id translation and classification.
//!
//! What a raw per-voxel content value means has changed three times over
//! the life of the map format:
//!
//! * below version 16 the stored byte is the id;
//! * versions 16–19 remapped a fixed set of legacy ids into an extended id
//!   space at 0x800 and up ([`translate_legacy`]);
//! * versions 20–23 store one byte per voxel, borrowing the high nibble of
//!   the param2 array to extend ids ≥ 0x80 to 12 bits;
//! * from version 24 the id is a plain big-endian u16, and from version 22
//!   blocks carry their own id→name table.
//!
//! [`ContentRef`] is the uniform result of resolving an id: a name where
//! the block maps one, the bare id otherwise.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Content id of air in map formats below 20
pub const CONTENT_AIR_LEGACY: u16 = 254;

/// Content id of air since the content-type extension (format 20)
pub const CONTENT_AIR: u16 = 126;

/// Content id of not-yet-generated space
pub const CONTENT_IGNORE: u16 = 0;

/// The fixed id remapping applied by map formats 16 through 19
const LEGACY_TRANSLATION: [(u8, u16); 21] = [
    (1, 0x800),  // grass
    (4, 0x801),  // tree
    (5, 0x802),  // leaves
    (6, 0x803),  // grass with footsteps
    (7, 0x804),  // mese
    (8, 0x805),  // mud
    (10, 0x806), // cloud
    (11, 0x807), // coalstone
    (12, 0x808), // wood
    (13, 0x809), // sand
    (18, 0x80a), // cobble
    (19, 0x80b), // steel
    (20, 0x80c), // glass
    (22, 0x80d), // mossy cobble
    (23, 0x80e), // gravel
    (24, 0x80f), // sandstone
    (25, 0x810), // cactus
    (26, 0x811), // brick
    (27, 0x812), // clay
    (28, 0x813), // papyrus
    (29, 0x814), // bookshelf
];

/// Translate a format 16–19 content byte into the extended id space.
///
/// Ids without a table entry pass through unchanged.
pub fn translate_legacy(id: u8) -> u16 {
    LEGACY_TRANSLATION
        .iter()
        .find(|(from, _)| *from == id)
        .map(|&(_, to)| to)
        .unwrap_or(u16::from(id))
}

/// The format 16–19 content byte an extended id maps back to, if any
pub fn legacy_for(id: u16) -> Option<u8> {
    LEGACY_TRANSLATION
        .iter()
        .find(|(_, to)| *to == id)
        .map(|&(from, _)| from)
}

/// Join a format 20–23 content byte ≥ 0x80 with its param2 companion
pub(crate) fn packed12_join(byte: u8, companion: u8) -> u16 {
    (u16::from(byte) << 4) | u16::from(companion >> 4)
}

/// Split a 12-bit extended id into the content byte and the param2 high
/// nibble that encode it in formats 20–23. Only valid for ids ≥ 0x800.
pub(crate) fn packed12_split(id: u16) -> (u8, u8) {
    ((id >> 4) as u8, ((id & 0xf) << 4) as u8)
}

/// A resolved content reference: what a voxel is made of.
///
/// Blocks of format ≥ 22 name their contents through an embedded id→name
/// table; older blocks only have numbers. Render and query logic treats
/// both uniformly through this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentRef {
    /// A numeric content id that no name is known for
    Id(u16),
    /// A content name such as `default:stone`
    Name(Vec<u8>),
}

impl ContentRef {
    /// Resolve a numeric id against a block's id→name table
    pub fn resolve(id: u16, name_id_mappings: &BTreeMap<u16, Vec<u8>>) -> Self {
        match name_id_mappings.get(&id) {
            Some(name) => ContentRef::Name(name.clone()),
            None => ContentRef::Id(id),
        }
    }

    /// Not-yet-generated space
    pub fn is_ignore(&self) -> bool {
        match self {
            ContentRef::Id(id) => *id == CONTENT_IGNORE,
            ContentRef::Name(name) => name == b"ignore",
        }
    }

    /// Air, under any of its historical ids
    pub fn is_air(&self) -> bool {
        match self {
            ContentRef::Id(id) => matches!(id, 126 | 127 | 254),
            ContentRef::Name(name) => name == b"air",
        }
    }

    /// Water, under its legacy numeric ids
    pub fn is_water(&self) -> bool {
        matches!(self, ContentRef::Id(2 | 9))
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRef::Id(id) => write!(f, "{id:#x}"),
            ContentRef::Name(name) => write!(f, "{}", String::from_utf8_lossy(name)),
        }
    }
}

/// Content encountered during a scan that the caller knows nothing about.
///
/// World data legitimately references mod-defined content a generic tool
/// has no entry for; scans collect those here instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownContentReport {
    /// Unknown content names, sorted
    pub names: BTreeSet<Vec<u8>>,
    /// Unknown numeric content ids, sorted
    pub ids: BTreeSet<u16>,
}

impl UnknownContentReport {
    /// Record one unknown content reference
    pub fn record(&mut self, content: &ContentRef) {
        match content {
            ContentRef::Id(id) => {
                self.ids.insert(*id);
            }
            ContentRef::Name(name) => {
                self.names.insert(name.clone());
            }
        }
    }

    /// Fold another report into this one
    pub fn extend(&mut self, other: UnknownContentReport) {
        self.names.extend(other.names);
        self.ids.extend(other.ids);
    }

    /// True if nothing unknown was encountered
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.ids.is_empty()
    }
}

impl fmt::Display for UnknownContentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.names.is_empty() {
            write!(f, "unknown node names:")?;
            for name in &self.names {
                write!(f, " {}", String::from_utf8_lossy(name))?;
            }
            writeln!(f)?;
        }
        if !self.ids.is_empty() {
            write!(f, "unknown node ids:")?;
            for id in &self.ids {
                write!(f, " {id:#x}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
