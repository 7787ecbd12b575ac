//! Block-map indirection, directory-block boundary, and cross-group
//! allocation properties from spec §8's "Round-trip laws" and "Boundary
//! behaviors".

mod common;

use common::{make_temp_volume, open_fs, Layout};
use fs_core::FsOps;
use fs_proto::FsError;

const ROOT: u64 = 2;

#[test]
fn large_file_crosses_single_and_double_indirect_ranges() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let attr = fs.create(ROOT, "big", 0o100644, 0, 0, 0).unwrap();
    let addr_per_block = block_size / 4;
    // Logical block well inside the double-indirect range.
    let double_range_block = 12 + addr_per_block + addr_per_block * 2;
    let offset = double_range_block as u64 * block_size as u64;

    let payload = b"indirect-block-payload";
    fs.write(attr.inode, offset, payload).unwrap();
    let back = fs.read(attr.inode, offset, payload.len() as u32).unwrap();
    assert_eq!(back, payload);

    let (free_before, _) = fs.free_counts();
    fs.truncate(attr.inode, 0).unwrap();
    let (free_after, _) = fs.free_counts();
    assert!(free_after > free_before, "freeing a far-indirect block must return space");

    fs.close(attr.inode).unwrap();
}

#[test]
fn directory_insertion_exactly_filling_a_block_does_not_allocate_another() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    // Every ext2 dirent is 4-byte aligned with an 8-byte header; pick a name
    // length so entries divide the block evenly (16-byte entries: 8 header +
    // 8-byte name, no padding).
    let per_entry = 16usize;
    let root_attr = fs.lookup(ROOT, ".").unwrap();
    let root_size_before = root_attr.size;
    let slack = (block_size as usize - root_size_before as usize % block_size as usize)
        % block_size as usize;
    let n_entries = slack / per_entry;

    for i in 0..n_entries {
        let name = format!("f{i:07}");
        assert_eq!(name.len(), 8);
        fs.create(ROOT, &name, 0o100644, 0, 0, 0).unwrap();
    }

    let root_attr_after = fs.lookup(ROOT, ".").unwrap();
    assert_eq!(
        root_attr_after.size, root_size_before,
        "filling existing slack must not grow the directory"
    );
}

#[test]
fn exhausting_a_groups_inodes_rolls_over_to_the_next_group() {
    let layout = Layout {
        inodes_per_group: 16,
        blocks_per_group: 1024,
        blocks_count: 4096,
        block_size: 1024,
        ..Layout::default()
    };
    let (path, block_size) = make_temp_volume(&layout);
    let mut fs = open_fs(&path, block_size, false);

    // Group 0 starts with 16 - 11 (reserved) = 5 free inodes.
    let mut created = Vec::new();
    for i in 0..5 {
        let name = format!("g0file{i}");
        let attr = fs.create(ROOT, &name, 0o100644, 0, 0, 0).unwrap();
        created.push((name, attr.inode));
    }

    // This one must roll over into group 1 without panicking.
    let attr = fs.create(ROOT, "rollover", 0o100644, 0, 0, 0).unwrap();
    assert!(attr.inode > 0);
    fs.close(attr.inode).unwrap();

    for (name, ino) in created {
        let found = fs.lookup(ROOT, &name).unwrap();
        assert_eq!(found.inode, ino);
        fs.close(found.inode).unwrap();
    }
}

#[test]
fn double_indirect_allocation_failure_leaves_no_dangling_pointer() {
    // 9 blocks of static metadata, 2 free data blocks left: exactly enough
    // for the leaf data block plus the double-indirect block, not enough
    // for the single-indirect block underneath it.
    let layout = Layout {
        inodes_per_group: 32,
        blocks_per_group: 1024,
        blocks_count: 12,
        block_size: 1024,
        ..Layout::default()
    };
    let (path, block_size) = make_temp_volume(&layout);
    let mut fs = open_fs(&path, block_size, false);

    let attr = fs.create(ROOT, "big", 0o100644, 0, 0, 0).unwrap();
    let addr_per_block = block_size / 4;
    let double_range_block = 12 + addr_per_block;
    let offset = double_range_block as u64 * block_size as u64;

    let (free_before, _) = fs.free_counts();
    let err = fs.write(attr.inode, offset, b"x").unwrap_err();
    assert_eq!(err, FsError::NoSpace);

    let (free_after, _) = fs.free_counts();
    assert_eq!(
        free_after, free_before,
        "a failed double-indirect allocation must not leak blocks"
    );

    let after = fs.lookup(ROOT, "big").unwrap();
    assert_eq!(after.size, 0, "a failed write must not grow the file");

    // The freed blocks must be genuinely reusable, not left referenced by a
    // dangling i_block slot.
    let written = fs.write(attr.inode, 0, b"ok").unwrap();
    assert_eq!(written, 2);

    fs.close(attr.inode).unwrap();
}

#[test]
#[should_panic(expected = "system block")]
fn allocator_panics_if_bitmap_disagrees_with_inode_table() {
    use std::fs::OpenOptions;
    use std::io::{Read, Seek, SeekFrom, Write};

    // Same fixed static layout as the rollback test above: group 0's block
    // bitmap lives at block 3, its inode table at blocks 5..9.
    let layout = Layout {
        inodes_per_group: 32,
        blocks_per_group: 1024,
        blocks_count: 12,
        block_size: 1024,
        ..Layout::default()
    };
    let (path, block_size) = make_temp_volume(&layout);

    let bitmap_block = 3u64;
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(bitmap_block * block_size as u64)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] &= !(1 << 4); // falsely mark the inode table's first block free
    file.seek(SeekFrom::Start(bitmap_block * block_size as u64)).unwrap();
    file.write_all(&byte).unwrap();
    drop(file);

    let mut fs = open_fs(&path, block_size, false);
    let attr = fs.create(ROOT, "x", 0o100644, 0, 0, 0).unwrap();
    let _ = fs.write(attr.inode, 0, b"y");
}
