//! Superblock and group descriptor table I/O, and the `Volume` type that
//! bundles them with the block cache every other module operates through.

use std::io;

use fs_core::{BlockCache, BlockDevice, CacheMode};
use wire::{Endianness, WireDeserialize, WireSerialize};

use crate::format::{
    GroupDesc, Superblock, BLOCK_GROUP_DESCRIPTOR_SIZE, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE,
};

pub struct Volume<D: BlockDevice> {
    pub cache: BlockCache<D>,
    pub sb: Superblock,
    pub groups: Vec<GroupDesc>,
    sb_dirty: bool,
    gd_dirty: bool,
}

impl<D: BlockDevice> Volume<D> {
    /// Read the superblock from its fixed byte offset and the group
    /// descriptor table from the block right after it (spec §4.1), the same
    /// layout `read_superblock`/`get_group_desc` in the source this is
    /// modeled on assume.
    pub fn open(device: D, cache_capacity: usize) -> io::Result<Self> {
        let mut cache = BlockCache::new(device, cache_capacity);

        let mut raw = [0u8; SUPERBLOCK_SIZE];
        cache.device_mut().read_at(SUPERBLOCK_OFFSET, &mut raw)?;
        let (sb, _) = Superblock::deserialize(Endianness::Little, &raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        if !sb.is_valid() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad ext2 magic number",
            ));
        }

        sb.validate_geometry()
            .map_err(|msg| io::Error::new(io::ErrorKind::InvalidData, msg))?;

        if sb.has_unsupported_incompat_features() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "volume requires unsupported incompat features",
            ));
        }

        let groups_count = sb.groups_count();
        let gd_block = sb.s_first_data_block + 1;
        let mut groups = Vec::with_capacity(groups_count as usize);
        let mut remaining = groups_count as usize;
        let mut block = gd_block;
        while remaining > 0 {
            let slot = cache.get(block, CacheMode::Read);
            let data = cache.data(slot).to_vec();
            let per_block = data.len() / BLOCK_GROUP_DESCRIPTOR_SIZE;
            let take = remaining.min(per_block);
            for i in 0..take {
                let off = i * BLOCK_GROUP_DESCRIPTOR_SIZE;
                let (gd, _) = GroupDesc::deserialize(Endianness::Little, &data[off..])
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                groups.push(gd);
            }
            remaining -= take;
            block += 1;
        }

        Ok(Self {
            cache,
            sb,
            groups,
            sb_dirty: false,
            gd_dirty: false,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.sb.block_size()
    }

    /// True when the volume's `ro_compat` features exceed what this server
    /// understands — the mount is still safe to read, but writing to it
    /// could corrupt a feature it doesn't know how to maintain, so it must
    /// be forced read-only regardless of the caller's requested mode
    /// (spec §3).
    pub fn forces_read_only(&self) -> bool {
        self.sb.has_unsupported_ro_compat_features()
    }

    pub fn mark_sb_dirty(&mut self) {
        self.sb_dirty = true;
    }

    pub fn mark_gd_dirty(&mut self) {
        self.gd_dirty = true;
    }

    /// Write back the superblock (if dirty), the group descriptor table (if
    /// dirty) and every dirty cached block, in that order — mirroring the
    /// source's `write_superblock`/`copy_group_descriptors`/buffer flush
    /// sequence on unmount/sync.
    pub fn flush(&mut self) {
        if self.sb_dirty {
            let mut raw = vec![0u8; SUPERBLOCK_SIZE];
            self.sb
                .serialize(Endianness::Little, &mut raw)
                .expect("superblock serialization cannot fail");
            self.cache
                .device_mut()
                .write_at(SUPERBLOCK_OFFSET, &raw)
                .unwrap_or_else(|e| panic!("extfs: superblock write failed: {e}"));
            self.sb_dirty = false;
        }

        if self.gd_dirty {
            let gd_block = self.sb.s_first_data_block + 1;
            let block_size = self.block_size() as usize;
            let per_block = block_size / BLOCK_GROUP_DESCRIPTOR_SIZE;
            for (chunk_idx, chunk) in self.groups.chunks(per_block).enumerate() {
                let slot = self.cache.get(gd_block + chunk_idx as u32, CacheMode::Read);
                let mut buf = vec![0u8; block_size];
                for (i, gd) in chunk.iter().enumerate() {
                    let off = i * BLOCK_GROUP_DESCRIPTOR_SIZE;
                    gd.serialize(Endianness::Little, &mut buf[off..])
                        .expect("group descriptor serialization cannot fail");
                }
                self.cache.data_mut(slot).copy_from_slice(&buf);
                self.cache.mark_dirty(slot);
            }
            self.gd_dirty = false;
        }

        self.cache.flush_all();
    }
}
