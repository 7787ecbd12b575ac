//! Directory entry management (spec §4.6), grounded on `dir.c`/
//! `dir_lookup.c`/`dir_enter.c`/`dir_delete.c`/`dir_isempty.c` in the source
//! this is modeled on.
//!
//! Entries are variable length: a fixed 8-byte header (`d_ino`, `d_rec_len`,
//! `d_name_len`, `d_file_type`) followed by the name, padded so `d_rec_len`
//! is always a multiple of 4. A block is one linear run of entries whose
//! `d_rec_len` values sum to the block size.

use fs_core::{BlockDevice, CacheMode};
use fs_proto::{DirEntryRecord, FsError, Ino};

use crate::alloc::{alloc_block, find_free_inode_file_group};
use crate::blockmap::{enter_map_entry, read_map_entry};
use crate::format::EXT2_FT_UNKNOWN;
use crate::inode::Inode;
use crate::superblock::Volume;

const DIRENT_HEADER_LEN: usize = 8;

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn actual_len(name_len: usize) -> usize {
    align4(DIRENT_HEADER_LEN + name_len)
}

struct RawDirent {
    ino: u32,
    rec_len: u16,
    name_len: u8,
    file_type: u8,
}

fn read_header(data: &[u8], off: usize) -> RawDirent {
    RawDirent {
        ino: u32::from_le_bytes(data[off..off + 4].try_into().unwrap()),
        rec_len: u16::from_le_bytes(data[off + 4..off + 6].try_into().unwrap()),
        name_len: data[off + 6],
        file_type: data[off + 7],
    }
}

fn read_name(data: &[u8], off: usize, name_len: u8) -> String {
    String::from_utf8_lossy(&data[off + DIRENT_HEADER_LEN..off + DIRENT_HEADER_LEN + name_len as usize])
        .into_owned()
}

fn write_entry(data: &mut [u8], off: usize, ino: u32, rec_len: u16, file_type: u8, name: &str) {
    data[off..off + 4].copy_from_slice(&ino.to_le_bytes());
    data[off + 4..off + 6].copy_from_slice(&rec_len.to_le_bytes());
    data[off + 6] = name.len() as u8;
    data[off + 7] = file_type;
    let name_bytes = name.as_bytes();
    data[off + DIRENT_HEADER_LEN..off + DIRENT_HEADER_LEN + name_bytes.len()]
        .copy_from_slice(name_bytes);
}

fn block_count(vol_block_size: u32, size: u32) -> u32 {
    size.div_ceil(vol_block_size)
}

/// Look up `name` in the directory's data blocks, scanning block by block.
pub fn lookup_dir<D: BlockDevice>(
    vol: &mut Volume<D>,
    dir: &mut Inode,
    name: &str,
) -> Result<Option<(Ino, u8)>, FsError> {
    let block_size = vol.block_size();
    let blocks = block_count(block_size, dir.disk.i_size);

    for logical in 0..blocks {
        let Some(phys) = read_map_entry(vol, dir, logical)? else {
            continue;
        };
        let slot = vol.cache.get(phys, CacheMode::Read);
        let data = vol.cache.data(slot).to_vec();

        let mut off = 0usize;
        while off < data.len() {
            let hdr = read_header(&data, off);
            if hdr.rec_len == 0 {
                break;
            }
            if hdr.ino != 0 && hdr.name_len as usize == name.len() {
                if read_name(&data, off, hdr.name_len) == name {
                    return Ok(Some((hdr.ino as Ino, hdr.file_type)));
                }
            }
            off += hdr.rec_len as usize;
        }
    }

    Ok(None)
}

/// Resume a READDIR from `cookie` (an absolute byte offset into the
/// directory's linear entry stream). Re-walks from the start of the block
/// containing the cookie so deletions/merges since the last call don't
/// desynchronize the walk (spec §4.6). `size` is the caller's output buffer
/// in bytes (spec §4.9): entries are emitted until the next one would not
/// fit, never split across a buffer boundary.
pub fn get_dirents<D: BlockDevice>(
    vol: &mut Volume<D>,
    dir: &mut Inode,
    cookie: u64,
    size: u32,
) -> Result<(u64, Vec<DirEntryRecord>), FsError> {
    let block_size = vol.block_size() as u64;
    let blocks = block_count(block_size as u32, dir.disk.i_size) as u64;
    let mut pos = (cookie / block_size) * block_size;
    let mut out = Vec::new();
    let mut used = 0u32;

    'outer: while pos < blocks * block_size {
        let logical = (pos / block_size) as u32;
        let Some(phys) = read_map_entry(vol, dir, logical)? else {
            pos += block_size;
            continue;
        };
        let slot = vol.cache.get(phys, CacheMode::Read);
        let data = vol.cache.data(slot).to_vec();

        let block_start = logical as u64 * block_size;
        let mut off = 0usize;
        while off < data.len() {
            let hdr = read_header(&data, off);
            if hdr.rec_len == 0 {
                break;
            }
            let entry_off = off;
            let entry_pos = block_start + off as u64;
            off += hdr.rec_len as usize;
            if entry_pos < cookie {
                continue;
            }
            if hdr.ino != 0 {
                let record = DirEntryRecord {
                    inode: hdr.ino as Ino,
                    file_type: hdr.file_type,
                    name: read_name(&data, entry_off, hdr.name_len),
                };
                let record_size = record.wire_size();
                if used + record_size > size {
                    return Ok((entry_pos, out));
                }
                used += record_size;
                out.push(record);
            }
        }
        pos += block_size;
        continue 'outer;
    }

    Ok((blocks * block_size, out))
}

/// Find room for a new `name`/`ino` entry in an existing block, shrinking a
/// larger-than-needed live entry to make space, or allocate a new block with
/// one entry spanning it (spec §4.6).
pub fn dirent_enter<D: BlockDevice>(
    vol: &mut Volume<D>,
    dir: &mut Inode,
    name: &str,
    ino: Ino,
    file_type: u8,
) -> Result<(), FsError> {
    if name.len() > 255 {
        return Err(FsError::NameTooLong);
    }
    let needed = actual_len(name.len());
    let block_size = vol.block_size();
    let blocks = block_count(block_size, dir.disk.i_size);

    for logical in 0..blocks {
        let Some(phys) = read_map_entry(vol, dir, logical)? else {
            continue;
        };
        let slot = vol.cache.get(phys, CacheMode::Read);
        let mut data = vol.cache.data(slot).to_vec();

        let mut off = 0usize;
        while off < data.len() {
            let hdr = read_header(&data, off);
            if hdr.rec_len == 0 {
                break;
            }
            let used = if hdr.ino == 0 { 0 } else { actual_len(hdr.name_len as usize) };
            let free = hdr.rec_len as usize - used;

            if free >= needed {
                if used > 0 {
                    let existing_name = read_name(&data, off, hdr.name_len);
                    write_entry(
                        &mut data,
                        off,
                        hdr.ino,
                        used as u16,
                        hdr.file_type,
                        &existing_name,
                    );
                    write_entry(
                        &mut data,
                        off + used,
                        ino as u32,
                        free as u16,
                        file_type,
                        name,
                    );
                } else {
                    write_entry(&mut data, off, ino as u32, hdr.rec_len, file_type, name);
                }
                vol.cache.data_mut(slot).copy_from_slice(&data);
                vol.cache.mark_dirty(slot);
                return Ok(());
            }

            off += hdr.rec_len as usize;
        }
    }

    extend_directory(vol, dir, name, ino, file_type)
}

fn extend_directory<D: BlockDevice>(
    vol: &mut Volume<D>,
    dir: &mut Inode,
    name: &str,
    ino: Ino,
    file_type: u8,
) -> Result<(), FsError> {
    let block_size = vol.block_size();
    let logical = block_count(block_size, dir.disk.i_size);
    let group = find_free_inode_file_group(vol, 0).unwrap_or(0);
    let phys = alloc_block(vol, group)?;

    if let Err(e) = enter_map_entry(vol, dir, logical, phys, group) {
        crate::alloc::free_block(vol, phys);
        return Err(e);
    }

    let slot = vol.cache.get(phys, CacheMode::Clear);
    write_entry(vol.cache.data_mut(slot), 0, ino as u32, block_size as u16, file_type, name);
    vol.cache.mark_dirty(slot);

    dir.disk.i_size += block_size;
    Ok(())
}

/// Delete `name` from the directory, merging its slot into the preceding
/// live entry's `rec_len` within the same block. If the deleted entry is
/// the first in its block there is no predecessor to merge into, so the
/// slot is only marked free (`d_ino = 0`) and left for `dirent_enter` to
/// reuse later — the asymmetry is inherited from the source: a following
/// already-free entry is never folded in by this path either.
pub fn dirent_delete<D: BlockDevice>(
    vol: &mut Volume<D>,
    dir: &mut Inode,
    name: &str,
) -> Result<(Ino, u8), FsError> {
    let block_size = vol.block_size();
    let blocks = block_count(block_size, dir.disk.i_size);

    for logical in 0..blocks {
        let Some(phys) = read_map_entry(vol, dir, logical)? else {
            continue;
        };
        let slot = vol.cache.get(phys, CacheMode::Read);
        let mut data = vol.cache.data(slot).to_vec();

        let mut prev_off: Option<usize> = None;
        let mut off = 0usize;
        while off < data.len() {
            let hdr = read_header(&data, off);
            if hdr.rec_len == 0 {
                break;
            }
            if hdr.ino != 0 && hdr.name_len as usize == name.len() && read_name(&data, off, hdr.name_len) == name {
                let found_ino = hdr.ino as Ino;
                let found_type = hdr.file_type;

                if let Some(prev_off) = prev_off {
                    let prev_hdr = read_header(&data, prev_off);
                    let merged_len = prev_hdr.rec_len + hdr.rec_len;
                    data[prev_off + 4..prev_off + 6].copy_from_slice(&merged_len.to_le_bytes());
                } else {
                    data[off..off + 4].copy_from_slice(&0u32.to_le_bytes());
                }

                vol.cache.data_mut(slot).copy_from_slice(&data);
                vol.cache.mark_dirty(slot);
                return Ok((found_ino, found_type));
            }
            prev_off = Some(off);
            off += hdr.rec_len as usize;
        }
    }

    Err(FsError::NotFound)
}

/// A directory is empty once only "." and ".." remain (spec §4.6).
pub fn is_dir_empty<D: BlockDevice>(vol: &mut Volume<D>, dir: &mut Inode) -> Result<bool, FsError> {
    let block_size = vol.block_size();
    let blocks = block_count(block_size, dir.disk.i_size);

    for logical in 0..blocks {
        let Some(phys) = read_map_entry(vol, dir, logical)? else {
            continue;
        };
        let slot = vol.cache.get(phys, CacheMode::Read);
        let data = vol.cache.data(slot).to_vec();

        let mut off = 0usize;
        while off < data.len() {
            let hdr = read_header(&data, off);
            if hdr.rec_len == 0 {
                break;
            }
            if hdr.ino != 0 {
                let name = read_name(&data, off, hdr.name_len);
                if name != "." && name != ".." {
                    return Ok(false);
                }
            }
            off += hdr.rec_len as usize;
        }
    }

    Ok(true)
}

/// Initialize a fresh directory block with "." and ".." entries (spec
/// §4.6), used by both mkdir and filesystem formatting of the root.
pub fn init_dir_block(data: &mut [u8], block_size: usize, ino: Ino, parent_ino: Ino) {
    let dot_len = actual_len(1);
    write_entry(data, 0, ino as u32, dot_len as u16, crate::format::EXT2_FT_DIR, ".");
    let dotdot_rec_len = block_size - dot_len;
    write_entry(
        data,
        dot_len,
        parent_ino as u32,
        dotdot_rec_len as u16,
        crate::format::EXT2_FT_DIR,
        "..",
    );
}

pub fn default_file_type() -> u8 {
    EXT2_FT_UNKNOWN
}
