use crate::compress::{deflate, inflate_delimited};
use crate::content;
use crate::content::ContentRef;
use crate::map_block::MapBlockError;
use crate::map_block::NodeMetadata;
use crate::map_block::StaticObject;
use crate::map_block::TIMESTAMP_UNDEFINED;
use crate::map_data::MapDataError;
use crate::positions::from_hex;
use crate::positions::to_hex;
use crate::positions::BlockKey;
use crate::positions::BlockPos;
use crate::positions::HexWidth;
use crate::positions::NodeIndex;
use crate::positions::NodePos;
use crate::positions::SectorPos;
use crate::positions::SplitPos;
use crate::surface::scan_sector;
use crate::MapBlock;
use crate::MapData;
use crate::BLOCK_KEY_MAX;
use crate::BLOCK_KEY_MIN;
use crate::BLOCK_NODES_3D_U;
use crate::WORLD_BLOCKS_MAX;
use crate::WORLD_BLOCKS_MIN;
use futures::prelude::*;
use glam::{I16Vec3, IVec3, U16Vec3};
use std::collections::BTreeMap;
use std::collections::HashSet;

fn test_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("mtmap-test-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn simple_math() {
    assert_eq!(
        BlockPos::from(BlockKey::try_from(134270984).unwrap()),
        BlockPos::from_index_vec(I16Vec3::new(8, 13, 8)),
    );
    assert_eq!(
        BlockPos::from(BlockKey::try_from(-184549374).unwrap()),
        BlockPos::from_index_vec(I16Vec3::new(2, 0, -11)),
    );
}

#[test]
fn origin_block_key() {
    assert_eq!(BlockPos::from_index_vec(I16Vec3::new(0, 0, 0)).database_key(), 0);
}

#[test]
fn key_round_trip_extremes() {
    let extremes = [WORLD_BLOCKS_MIN, -1, 0, 1, WORLD_BLOCKS_MAX];
    for &x in &extremes {
        for &y in &extremes {
            for &z in &extremes {
                let pos = BlockPos::from_index_vec(I16Vec3::new(x, y, z));
                assert_eq!(BlockPos::from_database_key(pos.database_key()), pos);
            }
        }
    }
    assert_eq!(
        BlockPos::from_database_key(BLOCK_KEY_MIN).database_key(),
        BLOCK_KEY_MIN
    );
    assert_eq!(
        BlockPos::from_database_key(BLOCK_KEY_MAX).database_key(),
        BLOCK_KEY_MAX
    );
    assert!(BlockKey::try_from(BLOCK_KEY_MIN - 1).is_err());
    assert!(BlockKey::try_from(BLOCK_KEY_MAX + 1).is_err());
}

#[test]
fn wrapped_keys_fold_into_12_bit_fields() {
    // x = 5000 does not fit the 12-bit field; the historical unpacking
    // bleeds its high bits into y
    assert_eq!(
        BlockPos::from_database_key(5000),
        BlockPos::from_index_vec(I16Vec3::new(904, 1, 0)),
    );
    // a 16-bit-era z of -32768 is congruent to 0 modulo the field size
    assert_eq!(
        BlockPos::from_database_key(-32768i64 * 16777216),
        BlockPos::from_index_vec(I16Vec3::new(0, 0, 0)),
    );
}

#[test]
fn hex_coordinates() {
    assert_eq!(to_hex(1, HexWidth::W16).unwrap(), "0001");
    assert_eq!(to_hex(-2, HexWidth::W16).unwrap(), "fffe");
    assert_eq!(to_hex(-1, HexWidth::W12).unwrap(), "fff");
    assert_eq!(to_hex(0, HexWidth::W12).unwrap(), "000");

    // the old-layout path scenario: sectors/00010002/fffe
    assert_eq!(from_hex("0001", HexWidth::W16), Ok(1));
    assert_eq!(from_hex("0002", HexWidth::W16), Ok(2));
    assert_eq!(from_hex("fffe", HexWidth::W16), Ok(-2));

    for value in [-2048, -1, 0, 1, 2047] {
        let encoded = to_hex(value, HexWidth::W12).unwrap();
        assert_eq!(encoded.len(), 3);
        assert_eq!(from_hex(&encoded, HexWidth::W12), Ok(value));
    }
    for value in [-32768, -2048, -1, 0, 1, 2047, 32767] {
        let encoded = to_hex(value, HexWidth::W16).unwrap();
        assert_eq!(encoded.len(), 4);
        assert_eq!(from_hex(&encoded, HexWidth::W16), Ok(value));
    }

    assert!(to_hex(2048, HexWidth::W12).is_err());
    assert!(to_hex(-2049, HexWidth::W12).is_err());
    assert!(from_hex("meta", HexWidth::W16).is_err());
    assert!(from_hex("-1", HexWidth::W16).is_err());
    assert!(from_hex("00001", HexWidth::W16).is_err());
    assert!(from_hex("", HexWidth::W12).is_err());
}

#[test]
fn sector_directory_names() {
    let sector = SectorPos::new(1, 2);
    assert_eq!(sector.old_dir_name().unwrap(), "00010002");
    let (x, z) = sector.new_dir_segments().unwrap();
    assert_eq!((x.as_str(), z.as_str()), ("001", "002"));
    assert_eq!(SectorPos::from_old_dir_name("00010002"), Ok(sector));
    assert_eq!(SectorPos::from_new_dir_segments("001", "002"), Ok(sector));

    let negative = SectorPos::new(-1, -2);
    assert_eq!(negative.old_dir_name().unwrap(), "fffffffe");
    assert_eq!(SectorPos::from_old_dir_name("fffffffe"), Ok(negative));
    let (x, z) = negative.new_dir_segments().unwrap();
    assert_eq!((x.as_str(), z.as_str()), ("fff", "ffe"));

    assert!(SectorPos::from_old_dir_name("meta").is_err());
    assert!(SectorPos::new(5000, 0).new_dir_segments().is_err());
}

#[test]
fn node_index() {
    assert_eq!(
        NodePos::from(NodeIndex::try_from(0).unwrap()),
        NodePos::try_from(U16Vec3::new(0, 0, 0)).unwrap()
    );
    assert_eq!(
        NodePos::from(NodeIndex::try_from(4095).unwrap()),
        NodePos::try_from(U16Vec3::new(15, 15, 15)).unwrap()
    );
}

#[test]
fn split_and_join() {
    for vec in [
        I16Vec3::new(0, 0, 0),
        I16Vec3::new(8, 13, 8),
        I16Vec3::new(2, 0, -11),
        I16Vec3::new(-1, -17, 31),
    ] {
        let (block, node) = vec.split();
        assert_eq!(I16Vec3::join(block, node), vec);
    }
}

#[test]
fn legacy_translation_table() {
    assert_eq!(content::translate_legacy(1), 0x800);
    assert_eq!(content::translate_legacy(29), 0x814);
    assert_eq!(content::translate_legacy(42), 42);
    assert_eq!(content::legacy_for(0x80f), Some(24));
    assert_eq!(content::legacy_for(0x666), None);
}

#[test]
fn content_classification() {
    assert!(ContentRef::Id(0).is_ignore());
    assert!(ContentRef::Name(b"ignore".to_vec()).is_ignore());
    for id in [126, 127, 254] {
        assert!(ContentRef::Id(id).is_air());
    }
    assert!(ContentRef::Name(b"air".to_vec()).is_air());
    assert!(ContentRef::Id(2).is_water());
    assert!(ContentRef::Id(9).is_water());
    assert!(!ContentRef::Id(3).is_water());
    assert!(!ContentRef::Name(b"default:stone".to_vec()).is_air());
}

#[test]
fn content_resolution() {
    let mut mappings = BTreeMap::new();
    mappings.insert(7, b"default:dirt".to_vec());
    assert_eq!(
        ContentRef::resolve(7, &mappings),
        ContentRef::Name(b"default:dirt".to_vec())
    );
    assert_eq!(ContentRef::resolve(8, &mappings), ContentRef::Id(8));
}

#[test]
fn zlib_framing() {
    let payload = b"sixteen candles in the map block";
    let mut record = deflate(payload).unwrap();
    let stream_len = record.len();
    record.extend_from_slice(&[1, 2, 3]);
    let (inflated, used) = inflate_delimited(&record).unwrap();
    assert_eq!(inflated, payload);
    assert_eq!(used, stream_len);

    assert!(inflate_delimited(&record[..stream_len / 2]).is_err());
    assert!(inflate_delimited(&[0xff; 8]).is_err());
    assert!(inflate_delimited(&[]).is_err());
}

fn sample_block(version: u8) -> MapBlock {
    let mut block = MapBlock::generated(version).unwrap();
    block.param0[0] = 0;
    block.param0[77] = 3;
    block.param1[5] = 7;
    block.param2[9] = 0x21;
    block.timestamp = 123456;
    block.node_metadata.insert(
        5,
        NodeMetadata {
            type_id: 2,
            data: b"owner=singleplayer".to_vec(),
        },
    );
    block.static_objects.push(StaticObject {
        object_type: 7,
        position: IVec3::new(10000, -20000, 35),
        data: b"itemstack".to_vec(),
    });
    block
}

#[test]
fn round_trip_all_versions() {
    for version in [0, 2, 16, 17, 20, 21, 22, 23, 24, 25] {
        let block = sample_block(version);
        let record = block.serialize().unwrap();
        let decoded = MapBlock::from_slice(&record).unwrap();
        assert_eq!(decoded, block, "map format version {version}");
    }
}

#[test]
fn round_trip_name_id_mappings() {
    let mut block = sample_block(25);
    block.name_id_mappings.insert(1, b"default:stone".to_vec());
    block.param0[100] = 1;
    let decoded = MapBlock::from_slice(&block.serialize().unwrap()).unwrap();
    assert_eq!(decoded, block);
    assert_eq!(
        decoded.get_node_at(NodePos::from(NodeIndex::try_from(100).unwrap())).param0,
        ContentRef::Name(b"default:stone".to_vec())
    );
}

#[test]
fn extended_content_id_packing() {
    // the two-array encoding of formats 20 through 23
    assert_eq!(content::packed12_join(0x80, 0xf0), 0x80f);
    let (byte, nibble) = content::packed12_split(0x80f);
    assert_eq!((byte, nibble), (0x80, 0xf0));

    let mut block = sample_block(20);
    block.param0[1] = 0x80f;
    block.param2[1] = 0x23;
    block.param0[2] = 0x7f;
    let decoded = MapBlock::from_slice(&block.serialize().unwrap()).unwrap();
    // a direct byte resolves to itself, the extended pair to the 12-bit id
    assert_eq!(decoded.param0[2], 127);
    assert_eq!(decoded.param0[1], 0x80f);
    // the low param2 nibble survives, the high one belongs to the id
    assert_eq!(decoded.param2[1] & 0x0f, 0x03);
    assert_eq!(decoded.param2[1] >> 4, 0x0f);
}

#[test]
fn extended_ids_round_trip_through_the_legacy_table() {
    let mut block = sample_block(17);
    block.param0[3] = 0x800;
    block.param0[4] = 0x814;
    let decoded = MapBlock::from_slice(&block.serialize().unwrap()).unwrap();
    assert_eq!(decoded, block);
}

#[test]
fn unrepresentable_content_ids() {
    // a raw table key would decode differently than it was written
    let mut block = sample_block(17);
    block.param0[0] = 1;
    assert!(matches!(
        block.serialize(),
        Err(MapBlockError::ContentIdUnrepresentable { id: 1, version: 17 })
    ));

    // the packed encoding has no room between 0x80 and 0x800
    let mut block = sample_block(20);
    block.param0[0] = 0x200;
    assert!(block.serialize().is_err());

    let mut block = sample_block(2);
    block.param0[0] = 0x100;
    assert!(block.serialize().is_err());
}

#[test]
fn generation_round_trip() {
    let mut block = MapBlock::generated(2).unwrap();
    block.param0.fill(0);
    block.param1.fill(15);
    let decoded = MapBlock::from_slice(&block.serialize().unwrap()).unwrap();
    assert_eq!(decoded.param0, vec![0; BLOCK_NODES_3D_U]);
    assert!(decoded.param1.iter().all(|&light| light == 15));
}

#[test]
fn corrupt_node_data_degrades_to_defaults() {
    let block = sample_block(25);
    let record = block.serialize().unwrap();

    // cut off in the middle of the node data stream
    let decoded = MapBlock::from_slice(&record[..8]).unwrap();
    assert_eq!(decoded.param0, vec![0; BLOCK_NODES_3D_U]);
    assert_eq!(decoded.timestamp, TIMESTAMP_UNDEFINED);
    assert!(decoded.node_metadata.is_empty());

    // garbage instead of a zlib stream
    let mut garbage = record[..4].to_vec();
    garbage.extend_from_slice(&[0xff; 16]);
    let decoded = MapBlock::from_slice(&garbage).unwrap();
    assert_eq!(decoded.param0, vec![0; BLOCK_NODES_3D_U]);
}

#[test]
fn unsupported_versions() {
    for version in [1, 3, 15, 26, 29, 255] {
        assert!(matches!(
            MapBlock::from_slice(&[version, 0]),
            Err(MapBlockError::UnsupportedVersion(v)) if v == version
        ));
    }
}

#[test]
fn truncated_records() {
    assert!(matches!(
        MapBlock::from_slice(&[]),
        Err(MapBlockError::TruncatedRecord(_))
    ));
    assert!(matches!(
        MapBlock::from_slice(&[22]),
        Err(MapBlockError::TruncatedRecord(_))
    ));
    assert!(matches!(
        MapBlock::from_slice(&[22, 0, 1]),
        Err(MapBlockError::TruncatedRecord(_))
    ));
}

#[test]
fn unknown_content_report() {
    let mut report = crate::UnknownContentReport::default();
    report.record(&ContentRef::Id(0x999));
    report.record(&ContentRef::Name(b"mod:mystery".to_vec()));
    report.record(&ContentRef::Id(0x999));
    assert!(!report.is_empty());
    assert_eq!(report.ids.len(), 1);
    assert_eq!(report.names.len(), 1);
    let listing = report.to_string();
    assert!(listing.contains("mod:mystery"));
    assert!(listing.contains("0x999"));
}

#[cfg(feature = "sqlite")]
#[async_std::test]
async fn sqlite_round_trip() {
    let dir = test_dir("sqlite-round-trip");
    let map = MapData::from_sqlite_file(dir.join("map.sqlite"), true)
        .await
        .unwrap();

    let pos = BlockPos::from_index_vec(I16Vec3::new(1, -2, 3));
    let block = sample_block(25);
    map.set_mapblock(pos, &block).await.unwrap();
    assert_eq!(map.get_mapblock(pos).await.unwrap(), block);

    let positions: Vec<_> = map
        .all_mapblock_positions()
        .await
        .map(|pos| pos.unwrap())
        .collect()
        .await;
    assert_eq!(positions, vec![pos]);

    let sector = SectorPos::new(1, 3);
    assert!(map.sector_positions().await.unwrap().contains(&sector));
    assert_eq!(map.sector_block_heights(sector).await.unwrap(), vec![-2]);

    let missing = BlockPos::from_index_vec(I16Vec3::new(0, 0, 0));
    assert!(matches!(
        map.get_mapblock(missing).await,
        Err(MapDataError::MapBlockNonexistent(pos)) if pos == missing
    ));

    let _ = std::fs::remove_dir_all(&dir);
}

#[async_std::test]
async fn new_sector_tree_round_trip() {
    let dir = test_dir("sectors2");
    let map = MapData::from_new_sector_tree(&dir);

    let pos = BlockPos::from_index_vec(I16Vec3::new(-1, 3, 2));
    let block = sample_block(22);
    map.set_mapblock(pos, &block).await.unwrap();
    assert!(dir.join("fff").join("002").join("0003").is_file());
    assert_eq!(map.get_mapblock(pos).await.unwrap(), block);

    // neither the sector metadata file nor junk entries are blocks
    std::fs::write(dir.join("fff").join("002").join("meta"), b"x").unwrap();
    std::fs::write(dir.join("fff").join("002").join("zz+"), b"x").unwrap();

    let sector = SectorPos::new(-1, 2);
    assert!(map.sector_positions().await.unwrap().contains(&sector));
    assert_eq!(map.sector_block_heights(sector).await.unwrap(), vec![3]);

    let missing = BlockPos::from_index_vec(I16Vec3::new(-1, 4, 2));
    assert!(matches!(
        map.get_block_data(missing).await,
        Err(MapDataError::MapBlockNonexistent(_))
    ));

    let _ = std::fs::remove_dir_all(&dir);
}

#[async_std::test]
async fn old_sector_tree_round_trip() {
    let dir = test_dir("sectors");
    let map = MapData::from_old_sector_tree(&dir);

    // the legacy directory scenario: sectors/00010002/fffe
    let pos = BlockPos::from_index_vec(I16Vec3::new(1, -2, 2));
    let block = sample_block(17);
    map.set_mapblock(pos, &block).await.unwrap();
    assert!(dir.join("00010002").join("fffe").is_file());
    assert_eq!(map.get_mapblock(pos).await.unwrap(), block);

    let sector = SectorPos::new(1, 2);
    assert!(map.sector_positions().await.unwrap().contains(&sector));
    assert_eq!(map.sector_block_heights(sector).await.unwrap(), vec![-2]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[async_std::test]
async fn surface_scan_finds_the_seabed() {
    let dir = test_dir("surface-scan");
    let map = MapData::from_new_sector_tree(&dir);
    let sector = SectorPos::new(0, 0);

    // ground floor: all stone, named through the block's id table
    let mut ground = MapBlock::generated(25).unwrap();
    ground.name_id_mappings.insert(1, b"default:stone".to_vec());
    ground.param0.fill(1);
    map.set_mapblock(sector.block_pos(0).unwrap(), &ground)
        .await
        .unwrap();

    // above it: air with one layer of legacy water at the bottom, plus one
    // node of content nobody knows
    let mut above = MapBlock::generated(25).unwrap();
    for x in 0..16 {
        for z in 0..16 {
            above.param0[x + z * 256] = 2;
        }
    }
    above.param0[15 * 16] = 0x999;
    map.set_mapblock(sector.block_pos(1).unwrap(), &above)
        .await
        .unwrap();

    let known = HashSet::from([ContentRef::Name(b"default:stone".to_vec())]);
    let backends = [map];
    let surface = scan_sector(&backends, sector, &known).await.unwrap();

    assert_eq!(surface.cells.len(), 256);
    let cell = surface.cells.get(&(3, 3)).unwrap();
    assert_eq!(cell.height, 15);
    assert_eq!(cell.content, ContentRef::Name(b"default:stone".to_vec()));
    assert_eq!(cell.water_depth, 1);
    assert!(surface.unknown.ids.contains(&0x999));
    assert!(surface.skipped_blocks.is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}
