//! File data I/O (spec §13), grounded on `file.c`'s `readFile`/`writeFile`/
//! `truncateFile`. Unlike the original, gap-clearing on a write past EOF
//! and truncation to a non-cluster-aligned size both walk the full
//! affected range cluster by cluster rather than touching only one
//! cluster's worth — the original's single-cluster gap clear silently
//! leaves a multi-cluster gap uninitialized, and its truncate frees the
//! cluster containing the new end-of-file outright, discarding bytes that
//! should have survived. Both are fixed here rather than reproduced.

use fs_core::{BlockDevice, CacheMode};

use crate::fat::{append_cluster, clear_cluster, cluster_to_sector, find_cluster, free_cluster_chain};
use crate::format::SECTOR_SIZE;
use crate::node::{get_first_cluster, set_first_cluster, FatNode};
use crate::volume::Volume;
use crate::format::FatType;

fn cluster_bytes<D: BlockDevice>(vol: &Volume<D>) -> u64 {
    vol.bytes_per_cluster() as u64
}

/// Read up to `size` bytes starting at `offset`, bounded by the node's
/// recorded size (`readFile`).
pub fn read_file<D: BlockDevice>(
    vol: &mut Volume<D>,
    node: &mut FatNode,
    fat_type: FatType,
    offset: u64,
    size: u32,
) -> Vec<u8> {
    let file_size = node.size();
    if offset >= file_size {
        return Vec::new();
    }
    let want = (size as u64).min(file_size - offset) as usize;
    let first = node.first_cluster(fat_type, 0);
    let cbytes = cluster_bytes(vol);

    let mut out = Vec::with_capacity(want);
    let mut pos = offset;
    while out.len() < want {
        let cluster_index = (pos / cbytes) as u32;
        let Some((idx, cluster)) = find_cluster(vol, first, cluster_index, node.hint) else {
            break;
        };
        node.hint = Some((idx, cluster));

        let within_cluster = pos % cbytes;
        let sector = cluster_to_sector(vol, cluster) + (within_cluster / SECTOR_SIZE as u64) as u32;
        let sector_off = (within_cluster % SECTOR_SIZE as u64) as usize;
        let chunk = (SECTOR_SIZE - sector_off).min(want - out.len());

        let slot = vol.cache.get(sector, CacheMode::Read);
        out.extend_from_slice(&vol.cache.data(slot)[sector_off..sector_off + chunk]);
        pos += chunk as u64;
    }
    out
}

/// Write `data` at `offset`, growing the cluster chain as needed and
/// zero-filling any gap between the current end-of-file and `offset`
/// (`writeFile`). Updates the dirent's size if the file grew and marks the
/// node dirty. Returns the number of bytes written.
pub fn write_file<D: BlockDevice>(
    vol: &mut Volume<D>,
    node: &mut FatNode,
    fat_type: FatType,
    offset: u64,
    data: &[u8],
) -> u32 {
    let cbytes = cluster_bytes(vol);
    let old_size = node.size();
    let end = offset + data.len() as u64;

    // Ensure a first cluster exists even for a pure gap-extend with no
    // payload (extendFile's zero-byte-write special case).
    let mut first = node.first_cluster(fat_type, 0);
    if !(crate::format::CLUSTER_ALLOC_MIN..=crate::format::CLUSTER_ALLOC_MAX).contains(&first) {
        let (cluster, new_first) = append_cluster(vol, None).expect("fatfs: volume is full");
        clear_cluster(vol, cluster);
        first = new_first;
        set_node_first_cluster(node, fat_type, first);
    }

    let highest_needed_cluster = if end == 0 { 0 } else { ((end - 1) / cbytes) as u32 };
    let mut last_known = node.hint.or_else(|| find_cluster(vol, first, 0, None));
    let mut have_index = last_known.map(|(i, _)| i).unwrap_or(0);
    while have_index < highest_needed_cluster {
        let existing_first = Some(first).filter(|c| {
            (crate::format::CLUSTER_ALLOC_MIN..=crate::format::CLUSTER_ALLOC_MAX).contains(c)
        });
        let (new_cluster, _) = append_cluster(vol, existing_first).expect("fatfs: volume is full");
        clear_cluster(vol, new_cluster);
        have_index += 1;
        last_known = Some((have_index, new_cluster));
    }
    node.hint = last_known;

    // Zero the gap between the old end of file and `offset`, one sector
    // at a time across however many clusters that spans.
    if offset > old_size {
        zero_range(vol, node, fat_type, first, old_size, offset);
    }

    let mut pos = offset;
    let mut written = 0usize;
    while written < data.len() {
        let cluster_index = (pos / cbytes) as u32;
        let (idx, cluster) = find_cluster(vol, first, cluster_index, node.hint)
            .expect("cluster chain was just grown to cover this range");
        node.hint = Some((idx, cluster));

        let within_cluster = pos % cbytes;
        let sector = cluster_to_sector(vol, cluster) + (within_cluster / SECTOR_SIZE as u64) as u32;
        let sector_off = (within_cluster % SECTOR_SIZE as u64) as usize;
        let chunk = (SECTOR_SIZE - sector_off).min(data.len() - written);

        let slot = vol.cache.get(sector, if sector_off == 0 && chunk == SECTOR_SIZE {
            CacheMode::Clear
        } else {
            CacheMode::Read
        });
        vol.cache.data_mut(slot)[sector_off..sector_off + chunk]
            .copy_from_slice(&data[written..written + chunk]);
        vol.cache.mark_dirty(slot);

        pos += chunk as u64;
        written += chunk;
    }

    if end > old_size {
        set_node_size(node, end);
    }
    written as u32
}

fn zero_range<D: BlockDevice>(
    vol: &mut Volume<D>,
    node: &mut FatNode,
    _fat_type: FatType,
    first: u32,
    mut pos: u64,
    end: u64,
) {
    let cbytes = cluster_bytes(vol);
    while pos < end {
        let cluster_index = (pos / cbytes) as u32;
        let (idx, cluster) = find_cluster(vol, first, cluster_index, node.hint)
            .expect("cluster chain was just grown to cover this range");
        node.hint = Some((idx, cluster));

        let within_cluster = pos % cbytes;
        let sector = cluster_to_sector(vol, cluster) + (within_cluster / SECTOR_SIZE as u64) as u32;
        let sector_off = (within_cluster % SECTOR_SIZE as u64) as usize;
        let chunk = ((SECTOR_SIZE - sector_off) as u64).min(end - pos) as usize;

        let mode = if sector_off == 0 && chunk == SECTOR_SIZE {
            CacheMode::Clear
        } else {
            CacheMode::Read
        };
        let slot = vol.cache.get(sector, mode);
        if mode == CacheMode::Read {
            vol.cache.data_mut(slot)[sector_off..sector_off + chunk].fill(0);
        }
        vol.cache.mark_dirty(slot);
        pos += chunk as u64;
    }
}

/// Shrink or extend a file to exactly `new_size` (`truncateFile`).
/// Shrinking frees every cluster wholly beyond the new size and preserves
/// the cluster that still holds live bytes; growing defers to
/// [`write_file`]'s gap-clearing, matching `extendFile`.
pub fn truncate_file<D: BlockDevice>(
    vol: &mut Volume<D>,
    node: &mut FatNode,
    fat_type: FatType,
    new_size: u64,
) {
    let old_size = node.size();
    if new_size == old_size {
        return;
    }
    if new_size > old_size {
        write_file(vol, node, fat_type, new_size, &[]);
        return;
    }

    let first = node.first_cluster(fat_type, 0);
    if !(crate::format::CLUSTER_ALLOC_MIN..=crate::format::CLUSTER_ALLOC_MAX).contains(&first) {
        set_node_size(node, new_size);
        return;
    }

    if new_size == 0 {
        free_cluster_chain(vol, first);
        set_node_first_cluster(node, fat_type, crate::format::CLUSTER_EOC);
        node.hint = None;
    } else {
        let cbytes = cluster_bytes(vol);
        let last_surviving = ((new_size - 1) / cbytes) as u32;
        if let Some((idx, cluster)) = find_cluster(vol, first, last_surviving, None) {
            let next = crate::fat::read_fat_entry(vol, cluster);
            if !crate::fat::is_eoc(next) && next >= 2 {
                free_cluster_chain(vol, next);
            }
            crate::fat::write_fat_entry(vol, cluster, crate::format::CLUSTER_EOC);
            node.hint = Some((idx, cluster));
        }
    }
    set_node_size(node, new_size);
}

fn set_node_size(node: &mut FatNode, size: u64) {
    if let Some((_, entry)) = &mut node.location {
        entry.size = size as u32;
        node.dirty = true;
    }
}

fn set_node_first_cluster(node: &mut FatNode, fat_type: FatType, cluster: u32) {
    if let Some((_, entry)) = &mut node.location {
        set_first_cluster(fat_type, entry, cluster);
        node.dirty = true;
    }
}

pub fn node_first_cluster(node: &FatNode, fat_type: FatType) -> Option<u32> {
    match &node.location {
        Some((_, entry)) => Some(get_first_cluster(fat_type, entry)),
        None => None,
    }
}
