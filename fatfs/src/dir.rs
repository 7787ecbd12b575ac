//! Directory entry access and 8.3 name conversion (spec §13), grounded on
//! `dir.c`'s `fat_dir_read`/`FatCreateDirEntry`/`FatDeleteDirEntry` and
//! `FatASCIIZToDirEntry`/`FatDirEntryToASCIIZ`.

use fs_core::{BlockDevice, CacheMode};
use wire::{Endianness, WireDeserialize, WireSerialize};

use crate::fat::{append_cluster, clear_cluster, cluster_to_sector, find_cluster};
use crate::format::{
    FatDirEntry, ATTR_VOLUME_ID, DIRENTRY_DELETED, FAT_DIRENTRY_SZ, SECTOR_SIZE,
};
use crate::volume::Volume;

/// A directory entry's location: either a fixed slot in FAT12/16's root
/// region, or a cluster-chain slot (directory's first cluster + index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirSlot {
    RootFixed { index: u32 },
    Chain { first_cluster: u32, index: u32 },
}

fn root_fixed_sector<D: BlockDevice>(vol: &Volume<D>, slot_index: u32) -> (u32, usize) {
    let entries_per_sector = (SECTOR_SIZE / FAT_DIRENTRY_SZ) as u32;
    let sector = vol.partition_start
        + vol.bpb.reserved_sectors_cnt as u32
        + vol.bpb.fat_cnt as u32 * vol.sectors_per_fat
        + slot_index / entries_per_sector;
    let off = (slot_index % entries_per_sector) as usize * FAT_DIRENTRY_SZ;
    (sector, off)
}

fn chain_sector<D: BlockDevice>(
    vol: &mut Volume<D>,
    first_cluster: u32,
    slot_index: u32,
) -> Option<(u32, usize)> {
    let entries_per_cluster =
        vol.bpb.sectors_per_cluster as u32 * (SECTOR_SIZE / FAT_DIRENTRY_SZ) as u32;
    let cluster_idx = slot_index / entries_per_cluster;
    let within = slot_index % entries_per_cluster;
    let (_, cluster) = find_cluster(vol, first_cluster, cluster_idx, None)?;
    let entries_per_sector = (SECTOR_SIZE / FAT_DIRENTRY_SZ) as u32;
    let sector = cluster_to_sector(vol, cluster) + within / entries_per_sector;
    let off = (within % entries_per_sector) as usize * FAT_DIRENTRY_SZ;
    Some((sector, off))
}

/// Number of fixed slots in FAT12/16's root region, `None` for FAT32 (whose
/// root is an ordinary, growable cluster chain).
fn root_fixed_slot_count<D: BlockDevice>(vol: &Volume<D>) -> Option<u32> {
    if vol.root_is_fixed_region() {
        Some(vol.bpb.root_entries_cnt as u32)
    } else {
        None
    }
}

fn read_slot<D: BlockDevice>(vol: &mut Volume<D>, slot: DirSlot) -> Option<FatDirEntry> {
    let (sector, off) = match slot {
        DirSlot::RootFixed { index } => root_fixed_sector(vol, index),
        DirSlot::Chain { first_cluster, index } => chain_sector(vol, first_cluster, index)?,
    };
    let cslot = vol.cache.get(sector, CacheMode::Read);
    let bytes = &vol.cache.data(cslot)[off..off + FAT_DIRENTRY_SZ];
    let (entry, _) = FatDirEntry::deserialize(Endianness::Little, bytes).ok()?;
    Some(entry)
}

pub(crate) fn write_slot<D: BlockDevice>(vol: &mut Volume<D>, slot: DirSlot, entry: &FatDirEntry) {
    let (sector, off) = match slot {
        DirSlot::RootFixed { index } => root_fixed_sector(vol, index),
        DirSlot::Chain { first_cluster, index } => {
            chain_sector(vol, first_cluster, index).expect("slot must already exist to write")
        }
    };
    let mut buf = [0u8; FAT_DIRENTRY_SZ];
    entry
        .serialize(Endianness::Little, &mut buf)
        .expect("FatDirEntry always fits 32 bytes");
    let cslot = vol.cache.get(sector, CacheMode::Read);
    vol.cache.data_mut(cslot)[off..off + FAT_DIRENTRY_SZ].copy_from_slice(&buf);
    vol.cache.mark_dirty(cslot);
}

/// Iterate every slot of a directory (root-fixed or cluster-chain), calling
/// `f(slot, entry)` for each occupied-or-free slot until it returns
/// `Some(_)`, which short-circuits the walk and becomes the return value.
fn for_each_slot<D: BlockDevice, T>(
    vol: &mut Volume<D>,
    dir_first_cluster: Option<u32>,
    mut f: impl FnMut(&mut Volume<D>, DirSlot, FatDirEntry) -> Option<T>,
) -> Option<T> {
    match dir_first_cluster {
        None => {
            let count = root_fixed_slot_count(vol).expect("root-fixed directory must be the root");
            for index in 0..count {
                let slot = DirSlot::RootFixed { index };
                let entry = read_slot(vol, slot)?;
                if let Some(r) = f(vol, slot, entry) {
                    return Some(r);
                }
            }
            None
        }
        Some(first) => {
            let mut index = 0;
            loop {
                let Some(slot_entry) = read_slot(vol, DirSlot::Chain { first_cluster: first, index })
                else {
                    return None;
                };
                let slot = DirSlot::Chain { first_cluster: first, index };
                if let Some(r) = f(vol, slot, slot_entry) {
                    return Some(r);
                }
                index += 1;
            }
        }
    }
}

/// Look up a directory entry by name. `dir_first_cluster` is `None` for a
/// FAT12/16 root directory, `Some(cluster)` otherwise.
pub fn find_dir_entry<D: BlockDevice>(
    vol: &mut Volume<D>,
    dir_first_cluster: Option<u32>,
    name: &[u8; 8],
    extension: &[u8; 3],
) -> Option<(DirSlot, FatDirEntry)> {
    for_each_slot(vol, dir_first_cluster, |_, slot, entry| {
        if !entry.is_free() && !entry.is_long_name() && &entry.name == name && &entry.extension == extension {
            Some((slot, entry))
        } else {
            None
        }
    })
}

pub fn list_dir_entries<D: BlockDevice>(
    vol: &mut Volume<D>,
    dir_first_cluster: Option<u32>,
    skip: u32,
) -> Vec<(u32, FatDirEntry)> {
    let mut out = Vec::new();
    let mut ordinal = 0u32;
    for_each_slot(vol, dir_first_cluster, |_, slot, entry| {
        let this_ordinal = ordinal;
        ordinal += 1;
        if !entry.is_free() && !entry.is_long_name() && entry.attributes & ATTR_VOLUME_ID == 0 && this_ordinal >= skip {
            out.push((this_ordinal, entry));
        }
        let _ = slot;
        None::<()>
    });
    out
}

/// Create a new directory entry, reusing a free/deleted slot if one
/// exists and, for a cluster-chain directory, growing the chain by one
/// cluster otherwise (`FatCreateDirEntry`). Root-fixed-region directories
/// cannot grow — a full root returns `None` exactly like the original.
pub fn create_dir_entry<D: BlockDevice>(
    vol: &mut Volume<D>,
    dir_first_cluster: Option<u32>,
    entry: &FatDirEntry,
) -> Option<DirSlot> {
    if let Some(slot) = for_each_slot(vol, dir_first_cluster, |_, slot, existing| {
        existing.is_free().then_some(slot)
    }) {
        write_slot(vol, slot, entry);
        return Some(slot);
    }

    let first = dir_first_cluster?;
    let (new_cluster, new_first) = append_cluster(vol, Some(first))?;
    clear_cluster(vol, new_cluster);
    debug_assert_eq!(new_first, first, "existing chain keeps its first cluster");
    let entries_per_cluster =
        vol.bpb.sectors_per_cluster as u32 * (SECTOR_SIZE / FAT_DIRENTRY_SZ) as u32;
    let (prev_len, _) = crate::fat::find_last_cluster(vol, first)?;
    let index = (prev_len + 1) * entries_per_cluster;
    let slot = DirSlot::Chain { first_cluster: first, index };
    write_slot(vol, slot, entry);
    Some(slot)
}

/// Mark a slot deleted in place. No shrink/merge of neighboring free
/// slots — directory slots are fixed-size, unlike ext2's variable-length
/// dirents, so there's nothing to coalesce.
pub fn delete_dir_entry<D: BlockDevice>(vol: &mut Volume<D>, slot: DirSlot) {
    let mut entry = read_slot(vol, slot).expect("slot must exist to delete");
    entry.name[0] = DIRENTRY_DELETED;
    write_slot(vol, slot, &entry);
}

pub fn is_dir_empty<D: BlockDevice>(vol: &mut Volume<D>, dir_first_cluster: u32) -> bool {
    for_each_slot(vol, Some(dir_first_cluster), |_, _, entry| {
        if entry.is_free() || entry.is_long_name() || entry.attributes & ATTR_VOLUME_ID != 0 {
            return None;
        }
        let name = dos_name_str(&entry);
        if name == "." || name == ".." {
            None
        } else {
            Some(())
        }
    })
    .is_none()
}

fn dos_name_str(entry: &FatDirEntry) -> String {
    let name = String::from_utf8_lossy(&entry.name).trim_end().to_string();
    let ext = String::from_utf8_lossy(&entry.extension).trim_end().to_string();
    if ext.is_empty() {
        name
    } else {
        format!("{name}.{ext}")
    }
}

/// Render a directory entry's 8.3 name as a lowercase, dot-separated
/// string (`FatDirEntryToASCIIZ`).
pub fn entry_to_name(entry: &FatDirEntry) -> String {
    dos_name_str(entry).to_ascii_lowercase()
}

/// Validate and convert a name to its packed 8.3 form (`FatIsDosName` +
/// `FatASCIIZToDirEntry`). Rejects names that don't fit the DOS charset:
/// more than 8 base characters, more than 3 extension characters, more
/// than one dot, or characters outside the DOS-legal set.
pub fn name_to_dos(name: &str) -> Option<([u8; 8], [u8; 3])> {
    if name.is_empty() || name == "." || name == ".." {
        return special_dot_name(name);
    }
    let mut parts = name.splitn(2, '.');
    let base = parts.next().unwrap_or("");
    let ext = parts.next().unwrap_or("");
    if name.matches('.').count() > 1 || base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return None;
    }
    let mut packed_name = [b' '; 8];
    let mut packed_ext = [b' '; 3];
    for (i, c) in base.chars().enumerate() {
        packed_name[i] = dos_char(c)?;
    }
    for (i, c) in ext.chars().enumerate() {
        packed_ext[i] = dos_char(c)?;
    }
    Some((packed_name, packed_ext))
}

fn special_dot_name(name: &str) -> Option<([u8; 8], [u8; 3])> {
    let mut packed = [b' '; 8];
    match name {
        "." => packed[0] = b'.',
        ".." => {
            packed[0] = b'.';
            packed[1] = b'.';
        }
        _ => return None,
    }
    Some((packed, [b' '; 3]))
}

fn dos_char(c: char) -> Option<u8> {
    if !c.is_ascii() {
        return None;
    }
    let b = c.to_ascii_uppercase() as u8;
    let legal = b.is_ascii_alphanumeric()
        || matches!(b, b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'(' | b')' | b'-' | b'@' | b'^' | b'_' | b'`' | b'{' | b'}' | b'~');
    legal.then_some(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_roundtrip() {
        let (name, ext) = name_to_dos("readme.txt").unwrap();
        let entry = FatDirEntry { name, extension: ext, ..Default::default() };
        assert_eq!(entry_to_name(&entry), "readme.txt");
    }

    #[test]
    fn rejects_overlong_base() {
        assert!(name_to_dos("toolongname.txt").is_none());
    }

    #[test]
    fn dot_entries_roundtrip() {
        let (name, ext) = name_to_dos(".").unwrap();
        assert_eq!(&name, b"\x2e       ");
        assert_eq!(&ext, b"   ");
    }
}
