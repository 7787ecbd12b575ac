//! In-core inode representation, on-disk inode I/O, and the inode cache
//! (spec §4.5), grounded on `inode.c`/`inode_cache.c` in the source this is
//! modeled on.

use std::collections::HashMap;

use fs_core::{BlockDevice, CacheMode};
use fs_proto::{Attr, Ino};
use wire::{Endianness, WireDeserialize, WireSerialize};

use crate::alloc::free_block;
use crate::blockmap::delete_map_entry;
use crate::format::{OndiskInode, ATIME, CTIME, MTIME, ONDISK_INODE_SIZE, S_IFMT};
use crate::superblock::Volume;

pub struct Inode {
    pub ino: Ino,
    pub disk: OndiskInode,
    pub dirty: bool,
}

impl Inode {
    pub fn to_attr(&self) -> Attr {
        Attr {
            inode: self.ino,
            size: self.disk.i_size as u64,
            mode: self.disk.i_mode as u32,
            uid: self.disk.i_uid as u32,
            gid: self.disk.i_gid as u32,
            atime: self.disk.i_atime as i64,
            mtime: self.disk.i_mtime as i64,
            ctime: self.disk.i_ctime as i64,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.disk.i_mode & S_IFMT == crate::format::S_IFDIR
    }
}

fn inode_location<D: BlockDevice>(vol: &Volume<D>, ino: Ino) -> (u32, u64) {
    let inodes_per_group = vol.sb.s_inodes_per_group as u64;
    let index = ino - 1;
    let group = (index / inodes_per_group) as u32;
    let local_index = index % inodes_per_group;
    let inode_size = vol.sb.inode_size() as u64;
    let table_block = vol.groups[group as usize].g_inode_table;
    let byte_offset = local_index * inode_size;
    (table_block, byte_offset)
}

pub fn read_inode<D: BlockDevice>(vol: &mut Volume<D>, ino: Ino) -> OndiskInode {
    let (table_block, byte_offset) = inode_location(vol, ino);
    let block_size = vol.block_size() as u64;
    let block = table_block + (byte_offset / block_size) as u32;
    let offset_in_block = (byte_offset % block_size) as usize;

    let slot = vol.cache.get(block, CacheMode::Read);
    let data = vol.cache.data(slot);
    let (disk, _) = OndiskInode::deserialize(
        Endianness::Little,
        &data[offset_in_block..offset_in_block + ONDISK_INODE_SIZE],
    )
    .expect("inode table slice is always large enough");
    disk
}

pub fn write_inode<D: BlockDevice>(vol: &mut Volume<D>, ino: Ino, disk: &OndiskInode) {
    let (table_block, byte_offset) = inode_location(vol, ino);
    let block_size = vol.block_size() as u64;
    let block = table_block + (byte_offset / block_size) as u32;
    let offset_in_block = (byte_offset % block_size) as usize;

    let slot = vol.cache.get(block, CacheMode::Read);
    let mut buf = [0u8; ONDISK_INODE_SIZE];
    disk.serialize(Endianness::Little, &mut buf)
        .expect("inode always fits its fixed-size record");
    vol.cache.data_mut(slot)[offset_in_block..offset_in_block + ONDISK_INODE_SIZE]
        .copy_from_slice(&buf);
    vol.cache.mark_dirty(slot);
}

/// Set the requested timestamp fields to `now`. Skipped entirely when the
/// volume is mounted read-only (spec §4.5); callers check that before
/// calling in.
pub fn update_times(disk: &mut OndiskInode, which: u8, now: u32) {
    if which & ATIME != 0 {
        disk.i_atime = now;
    }
    if which & CTIME != 0 {
        disk.i_ctime = now;
    }
    if which & MTIME != 0 {
        disk.i_mtime = now;
    }
}

/// Free every data block an inode owns, walking logical block numbers from
/// zero up to the end of its indirect addressing range, the same full-scan
/// truncate-to-zero the source's unlink path performs.
pub fn free_inode_blocks<D: BlockDevice>(vol: &mut Volume<D>, inode: &mut Inode) {
    let block_size = vol.block_size() as u64;
    let blocks = inode.disk.i_size.div_ceil(block_size as u32).max(1);
    for logical in 0..blocks {
        let _ = delete_map_entry(vol, inode, logical);
    }
    for b in &mut inode.disk.i_block {
        if *b != 0 {
            free_block(vol, *b);
            *b = 0;
        }
    }
    inode.disk.i_blocks = 0;
    inode.disk.i_size = 0;
}

/// Reference-counted, lazily-written inode cache keyed by inode number
/// (spec §4.5). `get` loads from disk on first reference; `put` decrements
/// the reference count and, once it drops to zero on an unlinked inode,
/// frees the inode's blocks and its bit in the inode bitmap — the same
/// delete-on-last-close rule `put_inode` implements.
#[derive(Default)]
pub struct InodeCache {
    entries: HashMap<Ino, (Inode, u32)>,
}

impl InodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire one logical reference to `ino`, loading it from disk the
    /// first time it's opened. Call exactly once per logical hold — use
    /// [`borrow_mut`](Self::borrow_mut) for repeated access to an
    /// already-open inode, since that does not affect the reference count.
    pub fn open<D: BlockDevice>(&mut self, vol: &mut Volume<D>, ino: Ino) {
        if let Some(entry) = self.entries.get_mut(&ino) {
            entry.1 += 1;
            return;
        }
        let disk = read_inode(vol, ino);
        self.entries.insert(
            ino,
            (
                Inode {
                    ino,
                    disk,
                    dirty: false,
                },
                1,
            ),
        );
    }

    /// Same as [`open`](Self::open) but returns the inode directly, for the
    /// common case of opening and immediately using it.
    pub fn get<D: BlockDevice>(&mut self, vol: &mut Volume<D>, ino: Ino) -> &mut Inode {
        self.open(vol, ino);
        self.borrow_mut(ino)
    }

    /// Access an inode that is already open. Panics if it isn't — every
    /// caller must have opened it first.
    pub fn borrow_mut(&mut self, ino: Ino) -> &mut Inode {
        &mut self
            .entries
            .get_mut(&ino)
            .unwrap_or_else(|| panic!("extfs: inode {ino} accessed without an open reference"))
            .0
    }

    pub fn mark_dirty(&mut self, ino: Ino) {
        if let Some((inode, _)) = self.entries.get_mut(&ino) {
            inode.dirty = true;
        }
    }

    /// Drop one reference. If it was the last one, write the inode back if
    /// dirty and, when it has no links left, reclaim it entirely.
    pub fn put<D: BlockDevice>(&mut self, vol: &mut Volume<D>, ino: Ino) {
        let Some((_, count)) = self.entries.get_mut(&ino) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return;
        }

        let (mut inode, _) = self.entries.remove(&ino).unwrap();
        if inode.disk.i_links_count == 0 {
            free_inode_blocks(vol, &mut inode);
            crate::alloc::free_inode_bit(vol, ino);
        } else if inode.dirty {
            write_inode(vol, ino, &inode.disk);
        }
    }

    pub fn flush_dirty<D: BlockDevice>(&mut self, vol: &mut Volume<D>) {
        for (ino, (inode, _)) in self.entries.iter_mut() {
            if inode.dirty {
                write_inode(vol, *ino, &inode.disk);
                inode.dirty = false;
            }
        }
    }
}
