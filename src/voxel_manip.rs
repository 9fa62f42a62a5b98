//! A cached, node-granular view onto the map data.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use async_std::sync::Mutex;
use glam::I16Vec3;

use crate::content::ContentRef;
use crate::map_data::{MapData, MapDataError};
use crate::positions::{BlockPos, NodePos, SplitPos};
use crate::{MapBlock, Node};

type Result<T> = std::result::Result<T, MapDataError>;

struct BlockEdit {
    mapblock: MapBlock,
    tainted: bool,
}

impl BlockEdit {
    fn get_node(&self, node_pos: NodePos) -> Node {
        self.mapblock.get_node_at(node_pos)
    }

    fn set_node(&mut self, node_pos: NodePos, node: Node) {
        let content_id = match &node.param0 {
            ContentRef::Name(name) => self.mapblock.get_or_create_content_id(name),
            ContentRef::Id(id) => *id,
        };
        self.mapblock.set_content(node_pos, content_id);
        self.mapblock.set_param1(node_pos, node.param1);
        self.mapblock.set_param2(node_pos, node.param2);
        self.tainted = true;
    }

    fn set_content(&mut self, node_pos: NodePos, content: &[u8]) {
        let content_id = self.mapblock.get_or_create_content_id(content);
        self.mapblock.set_content(node_pos, content_id);
        self.tainted = true;
    }

    fn set_param1(&mut self, node_pos: NodePos, param1: u8) {
        self.mapblock.set_param1(node_pos, param1);
        self.tainted = true;
    }

    fn set_param2(&mut self, node_pos: NodePos, param2: u8) {
        self.mapblock.set_param2(node_pos, param2);
        self.tainted = true;
    }
}

/// In-memory world data cache that allows easy handling of single nodes.
///
/// It is an abstraction on top of the map blocks the world data consists
/// of, addressing every node by its absolute position. Blocks are fetched
/// lazily and kept in a local cache.
///
/// All changes have to be committed via [`VoxelManip::commit`]. Before
/// this, they are only present in the local cache and lost on drop.
///
/// ⚠️ You want to do a world backup before modifying the map data.
pub struct VoxelManip {
    map: MapData,
    mapblock_cache: HashMap<BlockPos, Arc<Mutex<BlockEdit>>>,
}

impl VoxelManip {
    /// Create a new VoxelManip from a handle to a map data backend
    pub fn new(map: MapData) -> Self {
        VoxelManip {
            map,
            mapblock_cache: HashMap::new(),
        }
    }

    /// Return the cache entry containing the given mapblock
    async fn get_mapblock(&mut self, mapblock_pos: BlockPos) -> Result<Arc<Mutex<BlockEdit>>> {
        Ok(match self.mapblock_cache.entry(mapblock_pos) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                // not cached yet: fetch it, or start from not-yet-generated
                // space if the map has no block here
                let mapblock = match self.map.get_mapblock(mapblock_pos).await {
                    Ok(mapblock) => Ok(mapblock),
                    Err(MapDataError::MapBlockNonexistent(_)) => Ok(MapBlock::unloaded()),
                    Err(e) => Err(e),
                }?;
                entry
                    .insert(Arc::new(Mutex::new(BlockEdit {
                        mapblock,
                        tainted: false,
                    })))
                    .clone()
            }
        })
    }

    /// Get the node at the given world position
    pub async fn get_node(&mut self, node_pos: I16Vec3) -> Result<Node> {
        let (blockpos, nodepos) = node_pos.split();
        Ok(self
            .get_mapblock(blockpos)
            .await?
            .lock()
            .await
            .get_node(nodepos))
    }

    /// Set a voxel in VoxelManip's cache
    ///
    /// ⚠️ The change will be present locally only. To modify the map,
    /// the change has to be written back via [`VoxelManip::commit`].
    pub async fn set_node(&mut self, node_pos: I16Vec3, node: Node) -> Result<()> {
        let (blockpos, nodepos) = node_pos.split();
        let mutex = self.get_mapblock(blockpos).await?;
        mutex.lock().await.set_node(nodepos, node);
        Ok(())
    }

    /// Sets the content string at this world position
    ///
    /// `content` has to be the unique [itemstring](https://wiki.minetest.net/Itemstrings).
    /// The use of aliases is not possible, because it would require a Lua
    /// runtime loading all mods.
    ///
    /// ```ignore
    /// vm.set_content(I16Vec3::new(8, 9, 10), b"default:stone").await?;
    /// ```
    ///
    /// ⚠️ Until the change is [commited](`VoxelManip::commit`),
    /// the node will only be changed in the cache.
    pub async fn set_content(&mut self, node_pos: I16Vec3, content: &[u8]) -> Result<()> {
        let (blockpos, nodepos) = node_pos.split();
        let mutex = self.get_mapblock(blockpos).await?;
        mutex.lock().await.set_content(nodepos, content);
        Ok(())
    }

    /// Sets the lighting parameter at this world position
    ///
    /// ⚠️ Until the change is [commited](`VoxelManip::commit`),
    /// the node will only be changed in the cache.
    pub async fn set_param1(&mut self, node_pos: I16Vec3, param1: u8) -> Result<()> {
        let (blockpos, nodepos) = node_pos.split();
        let mutex = self.get_mapblock(blockpos).await?;
        mutex.lock().await.set_param1(nodepos, param1);
        Ok(())
    }

    /// Sets the param2 of the node at this world position
    ///
    /// ⚠️ Until the change is [commited](`VoxelManip::commit`),
    /// the node will only be changed in the cache.
    pub async fn set_param2(&mut self, node_pos: I16Vec3, param2: u8) -> Result<()> {
        let (blockpos, nodepos) = node_pos.split();
        let mutex = self.get_mapblock(blockpos).await?;
        mutex.lock().await.set_param2(nodepos, param2);
        Ok(())
    }

    /// Returns true if this world position is cached
    pub fn is_in_cache(&self, node_pos: I16Vec3) -> bool {
        let (blockpos, _) = node_pos.split();
        self.mapblock_cache.contains_key(&blockpos)
    }

    /// Ensures that this world position is in the cache
    pub async fn visit(&mut self, node_pos: I16Vec3) -> Result<()> {
        let (blockpos, _) = node_pos.split();
        self.get_mapblock(blockpos).await?;
        Ok(())
    }

    /// Apply all changes made to the map
    ///
    /// Without this, all changes made with [`VoxelManip::set_node`],
    /// [`VoxelManip::set_content`], [`VoxelManip::set_param1`], and
    /// [`VoxelManip::set_param2`] are lost when this instance is dropped.
    pub async fn commit(&mut self) -> Result<()> {
        // Write modified mapblocks back into the map data
        for (&pos, cache_entry) in self.mapblock_cache.iter_mut() {
            let mut cache_entry = cache_entry.lock().await;
            if cache_entry.tainted {
                self.map.set_mapblock(pos, &cache_entry.mapblock).await?;
                cache_entry.tainted = false;
            }
        }

        Ok(())
    }
}
