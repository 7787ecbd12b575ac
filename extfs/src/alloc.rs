//! Block and inode bit allocation (spec §4.3), modeled on `new_block`/
//! `alloc_block`/`free_block`/`alloc_inode`/`free_inode` in the source this
//! is grounded on.

use fs_core::{alloc_bit, clear_bit, BlockDevice, CacheMode};
use fs_proto::FsError;

use crate::format::EXT2_ROOT_INO;
use crate::superblock::Volume;

/// A block handed back by the allocator, or freed by the caller, must fall
/// within this group's data region and must not collide with the group's
/// own bitmaps or inode table. A violation means the bitmap and the
/// metadata it's supposed to agree with have diverged — not something a
/// request can recover from (spec §7 category 2).
fn check_block_number<D: BlockDevice>(vol: &Volume<D>, group: u32, block: u32) {
    let sb = &vol.sb;
    let first = sb.s_first_data_block + group * sb.s_blocks_per_group;
    let last = (first + sb.s_blocks_per_group - 1).min(sb.s_blocks_count - 1);
    assert!(
        block >= first && block <= last,
        "extfs: block {block} outside group {group}'s range [{first}, {last}]"
    );

    let gd = &vol.groups[group as usize];
    let inodes_per_block = (sb.block_size() / sb.inode_size() as u32).max(1);
    let itable_blocks = sb.s_inodes_per_group.div_ceil(inodes_per_block);
    let itable_end = gd.g_inode_table + itable_blocks;
    assert!(
        block != gd.g_block_bitmap
            && block != gd.g_inode_bitmap
            && !(block >= gd.g_inode_table && block < itable_end),
        "extfs: block allocator tried to return a system block"
    );
}

fn group_for_block<D: BlockDevice>(vol: &Volume<D>, block: u32) -> u32 {
    (block - vol.sb.s_first_data_block) / vol.sb.s_blocks_per_group
}

/// Allocate one free block, searching outward from `goal_group` with
/// wraparound across the whole volume (spec §4.3's goal-based search).
pub fn alloc_block<D: BlockDevice>(vol: &mut Volume<D>, goal_group: u32) -> Result<u32, FsError> {
    let groups_count = vol.groups.len() as u32;
    let blocks_per_group = vol.sb.s_blocks_per_group;

    for offset in 0..groups_count {
        let group = (goal_group + offset) % groups_count;
        if vol.groups[group as usize].g_free_blocks_count == 0 {
            continue;
        }

        let first_in_group = vol.sb.s_first_data_block + group * blocks_per_group;
        let bits_in_group = blocks_per_group.min(vol.sb.s_blocks_count - first_in_group);
        let bitmap_block = vol.groups[group as usize].g_block_bitmap;
        let slot = vol.cache.get(bitmap_block, CacheMode::Read);
        let bit = {
            let data = vol.cache.data_mut(slot);
            alloc_bit(data, bits_in_group, 0)
        };

        let Some(bit) = bit else { continue };
        vol.cache.mark_dirty(slot);

        let block = first_in_group + bit;
        check_block_number(vol, group, block);

        vol.groups[group as usize].g_free_blocks_count -= 1;
        vol.sb.s_free_blocks_count -= 1;
        vol.mark_gd_dirty();
        vol.mark_sb_dirty();

        return Ok(block);
    }

    Err(FsError::NoSpace)
}

/// Free a previously allocated block. Panics (via `clear_bit`) if the block
/// was already free.
pub fn free_block<D: BlockDevice>(vol: &mut Volume<D>, block: u32) {
    let group = group_for_block(vol, block);
    check_block_number(vol, group, block);

    let blocks_per_group = vol.sb.s_blocks_per_group;
    let first_in_group = vol.sb.s_first_data_block + group * blocks_per_group;
    let bit = block - first_in_group;

    let bitmap_block = vol.groups[group as usize].g_block_bitmap;
    let slot = vol.cache.get(bitmap_block, CacheMode::Read);
    clear_bit(vol.cache.data_mut(slot), bit);
    vol.cache.mark_dirty(slot);
    vol.cache.invalidate(block);

    vol.groups[group as usize].g_free_blocks_count += 1;
    vol.sb.s_free_blocks_count += 1;
    vol.mark_gd_dirty();
    vol.mark_sb_dirty();
}

/// Directories are spread across groups with below-average inode usage, so
/// that a large tree doesn't pile every directory inode into one group
/// (spec §4.3). The root directory's own children use an arbitrary varying
/// starting point rather than always group 0: the running inode-allocation
/// count stands in for the source's call to `random()`, since nothing else
/// in this workspace needs a real PRNG.
pub fn find_free_inode_dir_group<D: BlockDevice>(vol: &Volume<D>) -> Option<u32> {
    let groups_count = vol.groups.len() as u32;
    if groups_count == 0 {
        return None;
    }
    let avg_free = vol.sb.s_free_inodes_count / groups_count.max(1);
    let start = vol.sb.s_inodes_count.wrapping_sub(vol.sb.s_free_inodes_count) % groups_count;

    for offset in 0..groups_count {
        let group = (start + offset) % groups_count;
        let gd = &vol.groups[group as usize];
        if gd.g_free_inodes_count > 0 && gd.g_free_inodes_count as u32 >= avg_free {
            return Some(group);
        }
    }
    (0..groups_count).find(|&g| vol.groups[g as usize].g_free_inodes_count > 0)
}

/// Regular files prefer their parent directory's group, then probe at
/// growing power-of-two distances, then fall back to a full linear scan
/// (spec §4.3).
pub fn find_free_inode_file_group<D: BlockDevice>(
    vol: &Volume<D>,
    parent_group: u32,
) -> Option<u32> {
    let groups_count = vol.groups.len() as u32;
    if groups_count == 0 {
        return None;
    }
    if vol.groups[parent_group as usize].g_free_inodes_count > 0 {
        return Some(parent_group);
    }

    let mut distance = 1u32;
    while distance < groups_count {
        let group = (parent_group + distance) % groups_count;
        if vol.groups[group as usize].g_free_inodes_count > 0 {
            return Some(group);
        }
        distance *= 2;
    }

    (0..groups_count).find(|&g| vol.groups[g as usize].g_free_inodes_count > 0)
}

/// Allocate an inode number in `group`'s inode bitmap.
pub fn alloc_inode_bit<D: BlockDevice>(vol: &mut Volume<D>, group: u32) -> Result<u64, FsError> {
    if vol.groups[group as usize].g_free_inodes_count == 0 {
        return Err(FsError::NoSpace);
    }

    let inodes_per_group = vol.sb.s_inodes_per_group;
    let bitmap_block = vol.groups[group as usize].g_inode_bitmap;
    let slot = vol.cache.get(bitmap_block, CacheMode::Read);
    let bit = {
        let data = vol.cache.data_mut(slot);
        alloc_bit(data, inodes_per_group, 0)
    };
    let Some(bit) = bit else {
        return Err(FsError::NoSpace);
    };
    vol.cache.mark_dirty(slot);

    vol.groups[group as usize].g_free_inodes_count -= 1;
    vol.sb.s_free_inodes_count -= 1;
    vol.mark_gd_dirty();
    vol.mark_sb_dirty();

    Ok(group as u64 * inodes_per_group as u64 + bit as u64 + 1)
}

/// Free a previously allocated inode number.
pub fn free_inode_bit<D: BlockDevice>(vol: &mut Volume<D>, ino: u64) {
    assert!(ino != EXT2_ROOT_INO, "extfs: attempt to free the root inode");
    let inodes_per_group = vol.sb.s_inodes_per_group as u64;
    let group = ((ino - 1) / inodes_per_group) as u32;
    let bit = ((ino - 1) % inodes_per_group) as u32;

    let bitmap_block = vol.groups[group as usize].g_inode_bitmap;
    let slot = vol.cache.get(bitmap_block, CacheMode::Read);
    clear_bit(vol.cache.data_mut(slot), bit);
    vol.cache.mark_dirty(slot);

    vol.groups[group as usize].g_free_inodes_count += 1;
    vol.sb.s_free_inodes_count += 1;
    vol.mark_gd_dirty();
    vol.mark_sb_dirty();
}
