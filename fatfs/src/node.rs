//! In-core node representation and the node cache (spec §13), grounded on
//! `node.c`'s `FindNode`/`AllocNode`/`FreeNode` and `GetFirstCluster`/
//! `SetFirstCluster`.
//!
//! The original keys nodes by first-cluster number and simply cannot
//! assign an identity to a zero-length file (no cluster allocated yet).
//! Every node this server creates gets a first cluster up front so that
//! gap never opens; a node seen only because it pre-existed on a mounted
//! image without one is instead keyed off its directory slot, which is
//! just as stable and unique.

use std::collections::HashMap;

use fs_core::BlockDevice;
use fs_proto::{Attr, Ino};

use crate::dir::DirSlot;
use crate::format::{FatDirEntry, FatType, ATTR_DIRECTORY, CLUSTER_ALLOC_MAX};
use crate::volume::Volume;

pub const ROOT_INO: Ino = 0;
const SYNTHETIC_INO_BIT: Ino = 1 << 63;

pub fn get_first_cluster(fat_type: FatType, entry: &FatDirEntry) -> u32 {
    let lo = entry.first_cluster_lo as u32;
    match fat_type {
        FatType::Fat32 => ((entry.first_cluster_hi as u32) << 16) | lo,
        _ => lo,
    }
}

pub fn set_first_cluster(fat_type: FatType, entry: &mut FatDirEntry, cluster: u32) {
    entry.first_cluster_lo = cluster as u16;
    entry.first_cluster_hi = if fat_type == FatType::Fat32 {
        (cluster >> 16) as u16
    } else {
        0
    };
}

fn is_allocated(cluster: u32) -> bool {
    (crate::format::CLUSTER_ALLOC_MIN..=CLUSTER_ALLOC_MAX).contains(&cluster)
}

/// Derive the identity a node should use: its first cluster when one is
/// allocated, otherwise a slot-derived value outside the cluster number
/// space so it can never collide with one.
pub fn ino_for(fat_type: FatType, slot: DirSlot, entry: &FatDirEntry) -> Ino {
    let cluster = get_first_cluster(fat_type, entry);
    // `..` entries in a subdirectory of a FAT12/16 root point at cluster 0,
    // the DOS convention for "the root directory" (which has no cluster of
    // its own in that layout).
    if cluster == 0 && entry.is_dir() {
        return ROOT_INO;
    }
    if is_allocated(cluster) {
        return cluster as Ino;
    }
    match slot {
        DirSlot::RootFixed { index } => SYNTHETIC_INO_BIT | index as Ino,
        DirSlot::Chain { first_cluster, index } => {
            SYNTHETIC_INO_BIT | ((first_cluster as Ino) << 20) | index as Ino
        }
    }
}

pub struct FatNode {
    pub ino: Ino,
    /// `None` for the volume root, which has no backing directory entry.
    pub location: Option<(DirSlot, FatDirEntry)>,
    /// Cluster-chain walk cache: `(index, cluster)` most recently resolved
    /// for this node's data, mirroring `hint_cluster`/`hint_offset`.
    pub hint: Option<(u32, u32)>,
    pub dirty: bool,
}

impl FatNode {
    pub fn is_dir(&self, root_is_dir: bool) -> bool {
        match &self.location {
            None => root_is_dir,
            Some((_, entry)) => entry.attributes & ATTR_DIRECTORY != 0,
        }
    }

    pub fn first_cluster(&self, fat_type: FatType, root_cluster: u32) -> u32 {
        match &self.location {
            None => root_cluster,
            Some((_, entry)) => get_first_cluster(fat_type, entry),
        }
    }

    pub fn size(&self) -> u64 {
        match &self.location {
            None => 0,
            Some((_, entry)) => entry.size as u64,
        }
    }

    pub fn to_attr(&self, root_is_dir: bool) -> Attr {
        let mode_kind = if self.is_dir(root_is_dir) { 0o040000 } else { 0o100000 };
        let read_only = match &self.location {
            Some((_, entry)) => entry.attributes & crate::format::ATTR_READ_ONLY != 0,
            None => false,
        };
        let perm = if read_only { 0o555 } else { 0o777 };
        Attr {
            inode: self.ino,
            size: self.size(),
            mode: mode_kind | perm,
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        }
    }
}

/// Reference-counted cache of in-core nodes keyed by [`Ino`], the same
/// open/borrow_mut/get/put shape as extfs's inode cache — `FreeNode`
/// decrements a refcount and only then reclaims the in-core entry, but
/// unlike extfs, deletion of the on-disk data happens synchronously at
/// unlink time, not deferred to last close.
#[derive(Default)]
pub struct NodeTable {
    entries: HashMap<Ino, (FatNode, u32)>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_root(&mut self) {
        if let Some(entry) = self.entries.get_mut(&ROOT_INO) {
            entry.1 += 1;
            return;
        }
        self.entries.insert(
            ROOT_INO,
            (
                FatNode {
                    ino: ROOT_INO,
                    location: None,
                    hint: None,
                    dirty: false,
                },
                1,
            ),
        );
    }

    pub fn open_existing(&mut self, ino: Ino, slot: DirSlot, entry: FatDirEntry) {
        if let Some(e) = self.entries.get_mut(&ino) {
            e.1 += 1;
            return;
        }
        self.entries.insert(
            ino,
            (
                FatNode {
                    ino,
                    location: Some((slot, entry)),
                    hint: None,
                    dirty: false,
                },
                1,
            ),
        );
    }

    pub fn is_open(&self, ino: Ino) -> bool {
        self.entries.contains_key(&ino)
    }

    pub fn bump_ref(&mut self, ino: Ino) {
        if let Some(e) = self.entries.get_mut(&ino) {
            e.1 += 1;
        }
    }

    pub fn borrow_mut(&mut self, ino: Ino) -> &mut FatNode {
        &mut self
            .entries
            .get_mut(&ino)
            .unwrap_or_else(|| panic!("fatfs: node {ino} accessed without an open reference"))
            .0
    }

    /// Like [`borrow_mut`](Self::borrow_mut) but returns `None` instead of
    /// panicking when `ino` isn't currently open — used after a synchronous
    /// unlink/rmdir to keep an already-open node's in-core copy consistent
    /// with the disk, without requiring the caller to have held it open.
    pub fn borrow_mut_if_open(&mut self, ino: Ino) -> Option<&mut FatNode> {
        self.entries.get_mut(&ino).map(|(node, _)| node)
    }

    pub fn borrow(&self, ino: Ino) -> &FatNode {
        &self
            .entries
            .get(&ino)
            .unwrap_or_else(|| panic!("fatfs: node {ino} accessed without an open reference"))
            .0
    }

    pub fn mark_dirty(&mut self, ino: Ino) {
        if let Some((node, _)) = self.entries.get_mut(&ino) {
            node.dirty = true;
        }
    }

    /// Drop one reference, writing the dirent back on last close if
    /// dirty. The entry may already have been retargeted to
    /// [`FatDirEntry::is_free`] by a synchronous unlink — in that case
    /// there is nothing left to write.
    pub fn put<D: BlockDevice>(&mut self, vol: &mut Volume<D>, ino: Ino) {
        let Some((_, count)) = self.entries.get_mut(&ino) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return;
        }
        let (node, _) = self.entries.remove(&ino).unwrap();
        if node.dirty {
            if let Some((slot, entry)) = &node.location {
                if !entry.is_free() {
                    crate::dir::write_slot(vol, *slot, entry);
                }
            }
        }
    }

    pub fn flush_dirty<D: BlockDevice>(&mut self, vol: &mut Volume<D>) {
        for (node, _) in self.entries.values_mut() {
            if node.dirty {
                if let Some((slot, entry)) = &node.location {
                    if !entry.is_free() {
                        crate::dir::write_slot(vol, *slot, entry);
                    }
                }
                node.dirty = false;
            }
        }
    }
}

/// Build a fresh, zero-size directory entry for `create`/`mkdir`, with a
/// cluster already allocated so `ino_for` never has to fall back to a
/// synthetic identity for a file this server creates itself.
pub fn new_dir_entry(
    fat_type: FatType,
    name: [u8; 8],
    extension: [u8; 3],
    attributes: u8,
    first_cluster: u32,
    size: u32,
) -> FatDirEntry {
    let mut entry = FatDirEntry {
        name,
        extension,
        attributes,
        ..Default::default()
    };
    set_first_cluster(fat_type, &mut entry, first_cluster);
    entry.size = size;
    entry
}
