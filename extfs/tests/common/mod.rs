//! Builds a minimal, freshly formatted ext2 volume in a temp file so the
//! dispatcher can be driven end-to-end without a real `mke2fs` (spec §8's
//! literal scenarios all start "on a fresh ... ext2 volume").
//!
//! This mirrors only what mkfs.ext2 needs to lay down for this server to
//! mount it: one superblock, a group descriptor table sized for however many
//! groups the requested geometry needs, one block bitmap/inode bitmap/inode
//! table per group (all placed in group 0's data area for simplicity), and a
//! root directory with "." and "..".

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use extfs::format::{
    GroupDesc, OndiskInode, Superblock, BLOCK_GROUP_DESCRIPTOR_SIZE, EXT2_FT_DIR,
    EXT2_GOOD_OLD_FIRST_INO, EXT2_GOOD_OLD_INODE_SIZE, EXT2_GOOD_OLD_REV, EXT2_ROOT_INO,
    EXT2_SUPER_MAGIC, ONDISK_INODE_SIZE, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE,
};
use wire::{Endianness, WireSerialize};

fn set_bit(bitmap: &mut [u8], bit: u32) {
    bitmap[(bit / 8) as usize] |= 1 << (bit % 8);
}

pub struct Layout {
    pub block_size: u32,
    pub blocks_count: u32,
    pub inodes_per_group: u32,
    pub blocks_per_group: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
}

impl Default for Layout {
    /// 16 MiB, 1024-byte blocks: exactly the volume spec §8 scenario 1 uses.
    fn default() -> Self {
        Layout {
            block_size: 1024,
            blocks_count: 16 * 1024 * 1024 / 1024,
            inodes_per_group: 512,
            blocks_per_group: 8192,
            feature_incompat: filetype_feature(),
            feature_ro_compat: 0,
        }
    }
}

/// Format `file` per `layout` and return the path so the caller can reopen
/// it through `FileBlockDevice`.
pub fn format(file: &mut File, layout: &Layout) {
    let block_size = layout.block_size;
    file.set_len(layout.blocks_count as u64 * block_size as u64).unwrap();

    let first_data_block = if block_size == 1024 { 1 } else { 0 };
    let groups_count =
        (layout.blocks_count - first_data_block - 1) / layout.blocks_per_group + 1;
    let inode_size = EXT2_GOOD_OLD_INODE_SIZE as u32;
    let inodes_per_block = block_size / inode_size;
    let itable_blocks_per_group = layout.inodes_per_group / inodes_per_block;
    let inodes_count = layout.inodes_per_group * groups_count;

    // Static metadata layout, all physically inside group 0's address range:
    // [boot][superblock][gdt][group bitmaps+inode tables...][root dir]
    let gdt_block = first_data_block + 1;
    let gdt_blocks = (groups_count as usize * BLOCK_GROUP_DESCRIPTOR_SIZE)
        .div_ceil(block_size as usize) as u32;
    let mut cursor = gdt_block + gdt_blocks;

    let mut groups = Vec::new();
    for _ in 0..groups_count {
        let block_bitmap = cursor;
        let inode_bitmap = cursor + 1;
        let inode_table = cursor + 2;
        cursor += 2 + itable_blocks_per_group;
        groups.push(GroupDesc {
            g_block_bitmap: block_bitmap,
            g_inode_bitmap: inode_bitmap,
            g_inode_table: inode_table,
            g_free_blocks_count: 0,
            g_free_inodes_count: 0,
            g_used_dirs_count: 1,
            pad: 0,
            reserved: [0; 3],
        });
    }
    let root_dir_block = cursor;
    cursor += 1;
    let last_static_block = cursor - 1;

    // Per-group bitmaps: every block up to and including the root dir block
    // lives physically in group 0, so group 0's bitmap marks all of them
    // used; every other group starts out entirely free.
    let mut bitmaps: Vec<Vec<u8>> = (0..groups_count)
        .map(|_| vec![0u8; block_size as usize])
        .collect();
    let mut inode_bitmaps: Vec<Vec<u8>> = (0..groups_count)
        .map(|_| vec![0u8; block_size as usize])
        .collect();

    for block in first_data_block..=last_static_block {
        let group = (block - first_data_block) / layout.blocks_per_group;
        let bit = (block - first_data_block) % layout.blocks_per_group;
        set_bit(&mut bitmaps[group as usize], bit);
    }
    // Reserved inodes 1..=EXT2_GOOD_OLD_FIRST_INO (includes root, ino 2).
    for ino in 1..=EXT2_GOOD_OLD_FIRST_INO as u64 {
        let bit = (ino - 1) % layout.inodes_per_group as u64;
        set_bit(&mut inode_bitmaps[0], bit as u32);
    }

    for (g, gd) in groups.iter_mut().enumerate() {
        let first_in_group = first_data_block + g as u32 * layout.blocks_per_group;
        let bits_in_group = layout.blocks_per_group.min(layout.blocks_count - first_in_group);
        let used_blocks = bitmaps[g][..bits_in_group.div_ceil(8) as usize]
            .iter()
            .map(|b| b.count_ones())
            .sum::<u32>();
        gd.g_free_blocks_count = (bits_in_group - used_blocks) as u16;

        let used_inodes = inode_bitmaps[g]
            [..(layout.inodes_per_group.div_ceil(8)) as usize]
            .iter()
            .map(|b| b.count_ones())
            .sum::<u32>();
        gd.g_free_inodes_count = (layout.inodes_per_group - used_inodes) as u16;
    }

    let total_free_blocks: u32 = groups
        .iter()
        .enumerate()
        .map(|(g, gd)| {
            let _ = g;
            gd.g_free_blocks_count as u32
        })
        .sum();
    let total_free_inodes: u32 = groups.iter().map(|gd| gd.g_free_inodes_count as u32).sum();

    let sb = Superblock {
        s_inodes_count: inodes_count,
        s_blocks_count: layout.blocks_count,
        s_r_blocks_count: 0,
        s_free_blocks_count: total_free_blocks,
        s_free_inodes_count: total_free_inodes,
        s_first_data_block: first_data_block,
        s_log_block_size: (block_size / 1024).trailing_zeros(),
        s_log_frag_size: (block_size / 1024).trailing_zeros(),
        s_blocks_per_group: layout.blocks_per_group,
        s_frags_per_group: layout.blocks_per_group,
        s_inodes_per_group: layout.inodes_per_group,
        s_mtime: 0,
        s_wtime: 0,
        s_mnt_count: 0,
        s_max_mnt_count: u16::MAX,
        s_magic: EXT2_SUPER_MAGIC,
        s_state: 1,
        s_errors: 1,
        s_minor_rev_level: 0,
        s_lastcheck: 0,
        s_checkinterval: 0,
        s_creator_os: 0,
        s_rev_level: EXT2_GOOD_OLD_REV,
        s_def_resuid: 0,
        s_def_resgid: 0,
        s_first_ino: EXT2_GOOD_OLD_FIRST_INO,
        s_inode_size: EXT2_GOOD_OLD_INODE_SIZE,
        s_block_group_nr: 0,
        s_feature_compat: 0,
        s_feature_incompat: layout.feature_incompat,
        s_feature_ro_compat: layout.feature_ro_compat,
        s_uuid: [0; 16],
        s_volume_name: [0; 16],
        s_last_mounted: [0; 64],
        s_algorithm_usage_bitmap: 0,
        s_prealloc_blocks: 0,
        s_prealloc_dir_blocks: 0,
        s_padding1: 0,
        s_journal_uuid: [0; 16],
        s_journal_inum: 0,
        s_journal_dev: 0,
        s_last_orphan: 0,
        s_hash_seed: [0; 4],
        s_def_hash_version: 0,
        s_reserved_char_pad: 0,
        s_reserved_word_pad: 0,
        s_default_mount_opts: 0,
        s_first_meta_bg: 0,
        s_reserved: [0; 760],
    };

    let mut raw_sb = vec![0u8; SUPERBLOCK_SIZE];
    sb.serialize(Endianness::Little, &mut raw_sb).unwrap();
    file.seek(SeekFrom::Start(SUPERBLOCK_OFFSET)).unwrap();
    file.write_all(&raw_sb).unwrap();

    let mut gdt_buf = vec![0u8; gdt_blocks as usize * block_size as usize];
    for (i, gd) in groups.iter().enumerate() {
        let off = i * BLOCK_GROUP_DESCRIPTOR_SIZE;
        gd.serialize(Endianness::Little, &mut gdt_buf[off..]).unwrap();
    }
    write_block(file, block_size, gdt_block, &gdt_buf);

    for (g, gd) in groups.iter().enumerate() {
        write_block(file, block_size, gd.g_block_bitmap, &bitmaps[g]);
        write_block(file, block_size, gd.g_inode_bitmap, &inode_bitmaps[g]);
        let itable_bytes = vec![0u8; itable_blocks_per_group as usize * block_size as usize];
        for b in 0..itable_blocks_per_group {
            write_block(file, block_size, gd.g_inode_table + b, &itable_bytes[..block_size as usize]);
        }
    }

    // Root inode: a directory with one data block, link count 2.
    let root = OndiskInode {
        i_mode: 0x4000 | 0o755,
        i_links_count: 2,
        i_size: block_size,
        i_blocks: block_size / 512,
        i_block: {
            let mut b = [0u32; 15];
            b[0] = root_dir_block;
            b
        },
        ..Default::default()
    };
    write_inode(file, block_size, layout.inodes_per_group, groups[0].g_inode_table, EXT2_ROOT_INO, &root);

    let mut root_block = vec![0u8; block_size as usize];
    extfs::dir::init_dir_block(&mut root_block, block_size as usize, EXT2_ROOT_INO, EXT2_ROOT_INO);
    let _ = EXT2_FT_DIR;
    write_block(file, block_size, root_dir_block, &root_block);
}

fn write_block(file: &mut File, block_size: u32, block: u32, data: &[u8]) {
    file.seek(SeekFrom::Start(block as u64 * block_size as u64)).unwrap();
    file.write_all(&data[..block_size as usize]).unwrap();
}

fn write_inode(
    file: &mut File,
    block_size: u32,
    inodes_per_group: u32,
    inode_table_block: u32,
    ino: u64,
    disk: &OndiskInode,
) {
    let local_index = (ino - 1) % inodes_per_group as u64;
    let byte_offset = local_index * ONDISK_INODE_SIZE as u64;
    let block = inode_table_block as u64 + byte_offset / block_size as u64;
    let offset_in_block = byte_offset % block_size as u64;

    let mut buf = [0u8; ONDISK_INODE_SIZE];
    disk.serialize(Endianness::Little, &mut buf).unwrap();
    file.seek(SeekFrom::Start(block * block_size as u64 + offset_in_block))
        .unwrap();
    file.write_all(&buf).unwrap();
}

pub fn filetype_feature() -> u32 {
    extfs::format::EXT2_FEATURE_INCOMPAT_FILETYPE
}

pub fn make_temp_volume(layout: &Layout) -> (tempfile::TempPath, u32) {
    let named = tempfile::NamedTempFile::new().unwrap();
    let (mut file, path) = named.into_parts();
    format(&mut file, layout);
    (path, layout.block_size)
}

pub fn open_fs(path: &std::path::Path, block_size: u32, read_only: bool) -> extfs::Ext2Fs<fs_core::FileBlockDevice> {
    let file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let device = fs_core::FileBlockDevice::open(file, block_size).unwrap();
    let vol = extfs::superblock::Volume::open(device, 256).unwrap();
    extfs::Ext2Fs::new(vol, read_only)
}
