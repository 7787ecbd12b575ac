//! File data read/write/truncate (spec §4.7, §4.9), grounded on
//! `read.c`/`write.c` in the source this is modeled on. Unlike that source's
//! `truncate_inode`, which is a stub returning `-ENOSYS`, this implements
//! truncate for real — nothing in the spec excuses a server that can't
//! shrink a file.

use fs_core::{BlockDevice, CacheMode};
use fs_proto::FsError;

use crate::alloc::{alloc_block, find_free_inode_file_group};
use crate::blockmap::{delete_map_entry, enter_map_entry, read_map_entry};
use crate::inode::Inode;
use crate::superblock::Volume;

/// Read up to `size` bytes starting at `offset`. Bytes past `i_size` are
/// never returned; a logical block with no physical mapping (a hole) reads
/// as zero.
pub fn read_file<D: BlockDevice>(
    vol: &mut Volume<D>,
    inode: &Inode,
    offset: u64,
    size: u32,
) -> Result<Vec<u8>, FsError> {
    let file_size = inode.disk.i_size as u64;
    if offset >= file_size {
        return Ok(Vec::new());
    }
    let end = (offset + size as u64).min(file_size);
    let mut out = Vec::with_capacity((end - offset) as usize);
    let block_size = vol.block_size() as u64;

    let mut pos = offset;
    while pos < end {
        let logical = (pos / block_size) as u32;
        let in_block = (pos % block_size) as usize;
        let chunk = ((block_size as usize - in_block) as u64).min(end - pos) as usize;

        match read_map_entry(vol, inode, logical)? {
            Some(phys) => {
                let slot = vol.cache.get(phys, CacheMode::Read);
                out.extend_from_slice(&vol.cache.data(slot)[in_block..in_block + chunk]);
            }
            None => out.resize(out.len() + chunk, 0u8),
        }
        pos += chunk as u64;
    }

    Ok(out)
}

/// Write `data` at `offset`, allocating blocks (and filling any leading hole
/// within a partially-written block with zeros) as needed (spec §4.7).
pub fn write_file<D: BlockDevice>(
    vol: &mut Volume<D>,
    inode: &mut Inode,
    offset: u64,
    data: &[u8],
    goal_group: u32,
) -> Result<u32, FsError> {
    let block_size = vol.block_size() as u64;
    let mut pos = offset;
    let end = offset + data.len() as u64;

    while pos < end {
        let logical = (pos / block_size) as u32;
        let in_block = (pos % block_size) as usize;
        let chunk = ((block_size as usize - in_block) as u64).min(end - pos) as usize;
        let src_off = (pos - offset) as usize;

        let phys = match read_map_entry(vol, inode, logical)? {
            Some(p) => p,
            None => {
                let group = find_free_inode_file_group(vol, goal_group).unwrap_or(goal_group);
                let p = alloc_block(vol, group)?;
                let cache_slot = vol.cache.get(p, CacheMode::Clear);
                vol.cache.mark_dirty(cache_slot);
                if let Err(e) = enter_map_entry(vol, inode, logical, p, group) {
                    crate::alloc::free_block(vol, p);
                    return Err(e);
                }
                p
            }
        };

        let slot = vol.cache.get(phys, CacheMode::Read);
        vol.cache.data_mut(slot)[in_block..in_block + chunk]
            .copy_from_slice(&data[src_off..src_off + chunk]);
        vol.cache.mark_dirty(slot);

        pos += chunk as u64;
    }

    if end > inode.disk.i_size as u64 {
        inode.disk.i_size = end as u32;
    }

    Ok(data.len() as u32)
}

/// Grow or shrink a file to exactly `new_size`. Growing only adjusts
/// `i_size` (the newly exposed range reads as a hole until written).
/// Shrinking frees every block beyond the new last block.
pub fn truncate_inode<D: BlockDevice>(
    vol: &mut Volume<D>,
    inode: &mut Inode,
    new_size: u64,
) -> Result<(), FsError> {
    let block_size = vol.block_size() as u64;
    let old_size = inode.disk.i_size as u64;

    if new_size >= old_size {
        inode.disk.i_size = new_size as u32;
        return Ok(());
    }

    let old_blocks = old_size.div_ceil(block_size);
    let new_blocks = new_size.div_ceil(block_size);

    for logical in new_blocks..old_blocks {
        delete_map_entry(vol, inode, logical as u32)?;
    }

    inode.disk.i_size = new_size as u32;
    Ok(())
}
