//! Logical-to-physical block mapping through the direct and indirect block
//! pointers of `OndiskInode::i_block` (spec §4.4), modeled on
//! `calc_block_indirection_offsets`/`read_map_entry`/`enter_map_entry`/
//! `delete_map_entry` in the source this is grounded on.

use fs_core::{BlockDevice, CacheMode};
use fs_proto::FsError;

use crate::alloc::{alloc_block, free_block};
use crate::format::{EXT2_DIND_BLOCK, EXT2_IND_BLOCK, EXT2_N_BLOCKS, EXT2_TIND_BLOCK};
use crate::inode::Inode;
use crate::superblock::Volume;

/// Which level of indirection a logical block number resolves through.
#[derive(Debug, Clone, Copy)]
enum BlockPath {
    Direct(usize),
    Single(usize),
    Double(usize, usize),
    Triple(usize, usize, usize),
}

/// `sb_out_range_s` in the original carries a FIXME: rather than the
/// theoretically correct triple-indirect limit it is a hardcoded
/// `0xFFFF0000`, which in practice is far larger than any volume this format
/// can address with 32-bit block numbers. Kept verbatim rather than
/// "fixed" — changing it would reject logical block numbers the rest of the
/// layout can represent.
const OUT_OF_RANGE_BLOCK: u32 = 0xFFFF_0000;

fn locate(addr_per_block: u32, logical: u32) -> Option<BlockPath> {
    let ndir = EXT2_N_BLOCKS.min(12) as u32; // EXT2_NDIR_BLOCKS == 12
    if logical < ndir {
        return Some(BlockPath::Direct(logical as usize));
    }
    let single_span = addr_per_block;
    let double_start = ndir + single_span;
    if logical < double_start {
        return Some(BlockPath::Single((logical - ndir) as usize));
    }
    let double_span = addr_per_block * addr_per_block;
    let triple_start = double_start + double_span;
    if logical < triple_start {
        let rel = logical - double_start;
        return Some(BlockPath::Double(
            (rel / addr_per_block) as usize,
            (rel % addr_per_block) as usize,
        ));
    }
    let triple_span = double_span * addr_per_block;
    let out_of_range = triple_start.saturating_add(triple_span).min(OUT_OF_RANGE_BLOCK);
    if logical < out_of_range {
        let rel = logical - triple_start;
        let per_double = addr_per_block * addr_per_block;
        return Some(BlockPath::Triple(
            (rel / per_double) as usize,
            ((rel / addr_per_block) % addr_per_block) as usize,
            (rel % addr_per_block) as usize,
        ));
    }
    None
}

fn read_indirect_entry<D: BlockDevice>(vol: &mut Volume<D>, block: u32, index: usize) -> u32 {
    let slot = vol.cache.get(block, CacheMode::Read);
    let off = index * 4;
    let data = vol.cache.data(slot);
    u32::from_le_bytes(data[off..off + 4].try_into().unwrap())
}

fn write_indirect_entry<D: BlockDevice>(
    vol: &mut Volume<D>,
    block: u32,
    index: usize,
    value: u32,
) {
    let slot = vol.cache.get(block, CacheMode::Read);
    let off = index * 4;
    vol.cache.data_mut(slot)[off..off + 4].copy_from_slice(&value.to_le_bytes());
    vol.cache.mark_dirty(slot);
}

fn is_empty_indirect_block<D: BlockDevice>(vol: &mut Volume<D>, block: u32) -> bool {
    let slot = vol.cache.get(block, CacheMode::Read);
    vol.cache.data(slot).chunks(4).all(|w| w == [0, 0, 0, 0])
}

/// Resolve `logical_block` to a physical block number, or `None` for a hole
/// (a logical block never written, reading as all zero).
pub fn read_map_entry<D: BlockDevice>(
    vol: &mut Volume<D>,
    inode: &Inode,
    logical_block: u32,
) -> Result<Option<u32>, FsError> {
    let addr_per_block = vol.block_size() / 4;
    let path = locate(addr_per_block, logical_block).ok_or(FsError::FileTooBig)?;

    let phys = match path {
        BlockPath::Direct(i) => inode.disk.i_block[i],
        BlockPath::Single(i) => {
            let ind = inode.disk.i_block[EXT2_IND_BLOCK];
            if ind == 0 {
                0
            } else {
                read_indirect_entry(vol, ind, i)
            }
        }
        BlockPath::Double(i, j) => {
            let dind = inode.disk.i_block[EXT2_DIND_BLOCK];
            if dind == 0 {
                0
            } else {
                let ind = read_indirect_entry(vol, dind, i);
                if ind == 0 {
                    0
                } else {
                    read_indirect_entry(vol, ind, j)
                }
            }
        }
        BlockPath::Triple(i, j, k) => {
            let tind = inode.disk.i_block[EXT2_TIND_BLOCK];
            if tind == 0 {
                0
            } else {
                let dind = read_indirect_entry(vol, tind, i);
                if dind == 0 {
                    0
                } else {
                    let ind = read_indirect_entry(vol, dind, j);
                    if ind == 0 {
                        0
                    } else {
                        read_indirect_entry(vol, ind, k)
                    }
                }
            }
        }
    };

    Ok(if phys == 0 { None } else { Some(phys) })
}

/// Map `logical_block` to `new_block`, allocating whatever indirect blocks
/// are needed along the way. Any indirect block allocated before a later
/// allocation fails is freed again, leaving the inode untouched (spec §4.4's
/// all-or-nothing contract).
pub fn enter_map_entry<D: BlockDevice>(
    vol: &mut Volume<D>,
    inode: &mut Inode,
    logical_block: u32,
    new_block: u32,
    goal_group: u32,
) -> Result<(), FsError> {
    let addr_per_block = vol.block_size() / 4;
    let path = locate(addr_per_block, logical_block).ok_or(FsError::FileTooBig)?;
    let mut allocated: Vec<u32> = Vec::new();

    let result = (|| -> Result<(), FsError> {
        match path {
            BlockPath::Direct(i) => {
                inode.disk.i_block[i] = new_block;
            }
            BlockPath::Single(i) => {
                let ind = ensure_indirect(vol, &mut inode.disk.i_block[EXT2_IND_BLOCK], &mut inode.disk.i_blocks, goal_group, &mut allocated)?;
                write_indirect_entry(vol, ind, i, new_block);
            }
            BlockPath::Double(i, j) => {
                let dind = ensure_indirect(vol, &mut inode.disk.i_block[EXT2_DIND_BLOCK], &mut inode.disk.i_blocks, goal_group, &mut allocated)?;
                let mut ind = read_indirect_entry(vol, dind, i);
                let ind = ensure_indirect(vol, &mut ind, &mut inode.disk.i_blocks, goal_group, &mut allocated)?;
                write_indirect_entry(vol, dind, i, ind);
                write_indirect_entry(vol, ind, j, new_block);
            }
            BlockPath::Triple(i, j, k) => {
                let tind = ensure_indirect(vol, &mut inode.disk.i_block[EXT2_TIND_BLOCK], &mut inode.disk.i_blocks, goal_group, &mut allocated)?;
                let mut dind = read_indirect_entry(vol, tind, i);
                let dind = ensure_indirect(vol, &mut dind, &mut inode.disk.i_blocks, goal_group, &mut allocated)?;
                write_indirect_entry(vol, tind, i, dind);
                let mut ind = read_indirect_entry(vol, dind, j);
                let ind = ensure_indirect(vol, &mut ind, &mut inode.disk.i_blocks, goal_group, &mut allocated)?;
                write_indirect_entry(vol, dind, j, ind);
                write_indirect_entry(vol, ind, k, new_block);
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        // `ensure_indirect` writes a freshly allocated dind/tind block number
        // straight into the inode's top-level slot. Freeing the block isn't
        // enough on its own: the slot must be cleared too, or the inode is
        // left pointing at a block that now belongs to no one.
        for block in allocated {
            if inode.disk.i_block[EXT2_DIND_BLOCK] == block {
                inode.disk.i_block[EXT2_DIND_BLOCK] = 0;
            }
            if inode.disk.i_block[EXT2_TIND_BLOCK] == block {
                inode.disk.i_block[EXT2_TIND_BLOCK] = 0;
            }
            free_block(vol, block);
            inode.disk.i_blocks -= vol.block_size() / 512;
        }
        return Err(e);
    }

    inode.disk.i_blocks += vol.block_size() / 512;
    Ok(())
}

/// If `*slot` is zero, allocate a fresh zero-filled indirect block and store
/// its number both in `*slot` and `allocated` (for rollback). Every
/// successful allocation bumps `i_blocks` by one block's worth of 512-byte
/// sectors, same as the leaf data block does (spec §4.5).
fn ensure_indirect<D: BlockDevice>(
    vol: &mut Volume<D>,
    slot: &mut u32,
    i_blocks: &mut u32,
    goal_group: u32,
    allocated: &mut Vec<u32>,
) -> Result<u32, FsError> {
    if *slot != 0 {
        return Ok(*slot);
    }
    let block = alloc_block(vol, goal_group)?;
    let cache_slot = vol.cache.get(block, CacheMode::Clear);
    vol.cache.mark_dirty(cache_slot);
    *slot = block;
    allocated.push(block);
    *i_blocks += vol.block_size() / 512;
    Ok(block)
}

/// Remove the mapping for `logical_block`, freeing the data block and
/// ascending to free any indirect block left empty by the removal. Mirrors
/// the "free child, then ascend" order of the source, including its
/// documented ordering quirk: an indirect block is checked for emptiness and
/// freed using its in-cache contents immediately after the child pointer is
/// cleared, before anything else touches it, so the check always sees the
/// write that just happened.
pub fn delete_map_entry<D: BlockDevice>(
    vol: &mut Volume<D>,
    inode: &mut Inode,
    logical_block: u32,
) -> Result<(), FsError> {
    let addr_per_block = vol.block_size() / 4;
    let path = locate(addr_per_block, logical_block).ok_or(FsError::FileTooBig)?;

    match path {
        BlockPath::Direct(i) => {
            let b = inode.disk.i_block[i];
            if b != 0 {
                free_block(vol, b);
                inode.disk.i_block[i] = 0;
                inode.disk.i_blocks -= vol.block_size() / 512;
            }
        }
        BlockPath::Single(i) => {
            let ind = inode.disk.i_block[EXT2_IND_BLOCK];
            if ind == 0 {
                return Ok(());
            }
            let b = read_indirect_entry(vol, ind, i);
            if b == 0 {
                return Ok(());
            }
            free_block(vol, b);
            write_indirect_entry(vol, ind, i, 0);
            inode.disk.i_blocks -= vol.block_size() / 512;
            if is_empty_indirect_block(vol, ind) {
                free_block(vol, ind);
                inode.disk.i_block[EXT2_IND_BLOCK] = 0;
                inode.disk.i_blocks -= vol.block_size() / 512;
            }
        }
        BlockPath::Double(i, j) => {
            let dind = inode.disk.i_block[EXT2_DIND_BLOCK];
            if dind == 0 {
                return Ok(());
            }
            let ind = read_indirect_entry(vol, dind, i);
            if ind == 0 {
                return Ok(());
            }
            let b = read_indirect_entry(vol, ind, j);
            if b == 0 {
                return Ok(());
            }
            free_block(vol, b);
            write_indirect_entry(vol, ind, j, 0);
            inode.disk.i_blocks -= vol.block_size() / 512;
            if is_empty_indirect_block(vol, ind) {
                free_block(vol, ind);
                write_indirect_entry(vol, dind, i, 0);
                inode.disk.i_blocks -= vol.block_size() / 512;
                if is_empty_indirect_block(vol, dind) {
                    free_block(vol, dind);
                    inode.disk.i_block[EXT2_DIND_BLOCK] = 0;
                    inode.disk.i_blocks -= vol.block_size() / 512;
                }
            }
        }
        BlockPath::Triple(i, j, k) => {
            let tind = inode.disk.i_block[EXT2_TIND_BLOCK];
            if tind == 0 {
                return Ok(());
            }
            let dind = read_indirect_entry(vol, tind, i);
            if dind == 0 {
                return Ok(());
            }
            let ind = read_indirect_entry(vol, dind, j);
            if ind == 0 {
                return Ok(());
            }
            let b = read_indirect_entry(vol, ind, k);
            if b == 0 {
                return Ok(());
            }
            free_block(vol, b);
            write_indirect_entry(vol, ind, k, 0);
            inode.disk.i_blocks -= vol.block_size() / 512;
            if is_empty_indirect_block(vol, ind) {
                free_block(vol, ind);
                write_indirect_entry(vol, dind, j, 0);
                inode.disk.i_blocks -= vol.block_size() / 512;
                if is_empty_indirect_block(vol, dind) {
                    free_block(vol, dind);
                    write_indirect_entry(vol, tind, i, 0);
                    inode.disk.i_blocks -= vol.block_size() / 512;
                    if is_empty_indirect_block(vol, tind) {
                        free_block(vol, tind);
                        inode.disk.i_block[EXT2_TIND_BLOCK] = 0;
                        inode.disk.i_blocks -= vol.block_size() / 512;
                    }
                }
            }
        }
    }

    Ok(())
}
