//! End-to-end scenarios from spec §8, driven directly against `Ext2Fs`
//! (which implements `fs_core::FsOps`) over a freshly formatted volume.

mod common;

use common::{make_temp_volume, open_fs, Layout};
use fs_core::FsOps;
use fs_proto::FsError;

const ROOT: u64 = 2;

#[test]
fn create_write_read_back() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let attr = fs.create(ROOT, "hello", 0o100644, 0, 0, 0).unwrap();
    fs.close(attr.inode).unwrap();

    let attr = fs.lookup(ROOT, "hello").unwrap();
    let written = fs.write(attr.inode, 0, b"Hello, world!").unwrap();
    assert_eq!(written, 13);

    let data = fs.read(attr.inode, 0, 13).unwrap();
    assert_eq!(&data, b"Hello, world!");

    let looked_up = fs.lookup(ROOT, "hello").unwrap();
    assert_eq!(looked_up.size, 13);
    fs.close(attr.inode).unwrap();
    fs.close(looked_up.inode).unwrap();
}

#[test]
fn sparse_file_reads_zero_in_the_gap() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let attr = fs.create(ROOT, "sparse", 0o100644, 0, 0, 0).unwrap();
    let written = fs.write(attr.inode, 1_048_576, b"X").unwrap();
    assert_eq!(written, 1);

    let looked_up = fs.lookup(ROOT, "sparse").unwrap();
    assert_eq!(looked_up.size, 1_048_577);

    let zeros = fs.read(attr.inode, 0, 16).unwrap();
    assert_eq!(zeros, vec![0u8; 16]);

    let x = fs.read(attr.inode, 1_048_576, 1).unwrap();
    assert_eq!(x, b"X");

    fs.close(attr.inode).unwrap();
    fs.close(looked_up.inode).unwrap();
}

#[test]
fn unlink_restores_free_counts_exactly() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let (free_blocks0, free_inodes0) = fs.free_counts();

    let attr = fs.create(ROOT, "hello", 0o100644, 0, 0, 0).unwrap();
    fs.write(attr.inode, 0, b"Hello, world!").unwrap();
    fs.close(attr.inode).unwrap();

    fs.unlink(ROOT, "hello").unwrap();

    let (free_blocks1, free_inodes1) = fs.free_counts();
    assert_eq!(free_blocks0, free_blocks1);
    assert_eq!(free_inodes0, free_inodes1);
}

#[test]
fn mkdir_populates_dot_and_dotdot() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let attr = fs.mkdir(ROOT, "sub", 0o40755, 0, 0).unwrap();
    let (_, entries) = fs.readdir(attr.inode, 0, 100).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, ".");
    assert_eq!(entries[0].inode, attr.inode);
    assert_eq!(entries[1].name, "..");
    assert_eq!(entries[1].inode, ROOT);
    fs.close(attr.inode).unwrap();
}

#[test]
fn directory_entry_compaction_reuses_space_without_growing() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let root_attr = fs.lookup(ROOT, ".").or_else(|_| fs.create(ROOT, "probe", 0o100644, 0, 0, 0));
    let _ = root_attr;

    let names: Vec<String> = (0..8).map(|i| format!("file_{i:03}_padded_name")).collect();
    for name in &names {
        fs.create(ROOT, name, 0o100644, 0, 0, 0).unwrap();
    }
    let (_, before) = fs.readdir(ROOT, 0, 1000).unwrap();
    let dir_size_before = fs.lookup(ROOT, &names[0]).unwrap();
    let _ = dir_size_before;

    for name in names.iter().step_by(2) {
        fs.unlink(ROOT, name).unwrap();
    }

    let new_names: Vec<String> = (0..4).map(|i| format!("new_{i}")).collect();
    for name in &new_names {
        fs.create(ROOT, name, 0o100644, 0, 0, 0).unwrap();
    }

    let (_, after) = fs.readdir(ROOT, 0, 1000).unwrap();
    assert!(after.len() >= before.len() - names.len() / 2 + new_names.len());
    for name in &new_names {
        assert!(fs.lookup(ROOT, name).is_ok());
    }
}

#[test]
fn readdir_survives_deletion_between_calls() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let mut names = Vec::new();
    for i in 0..40 {
        let name = format!("entry{i:03}");
        fs.create(ROOT, &name, 0o100644, 0, 0, 0).unwrap();
        names.push(name);
    }

    let (cookie1, first_page) = fs.readdir(ROOT, 0, 240).unwrap();
    assert_eq!(first_page.len(), 10);

    // Delete the entry the next page would have started at.
    let next_name_idx = first_page.len();
    fs.unlink(ROOT, &names[next_name_idx]).unwrap();

    let (mut cookie, mut seen) = (cookie1, first_page);
    loop {
        let (next_cookie, page) = fs.readdir(ROOT, cookie, 240).unwrap();
        if page.is_empty() {
            break;
        }
        seen.extend(page);
        cookie = next_cookie;
    }

    let seen_names: std::collections::HashSet<_> = seen.iter().map(|e| e.name.clone()).collect();
    assert!(!seen_names.contains(&names[next_name_idx]));
    // every other created file must still show up exactly once
    let mut counts = std::collections::HashMap::new();
    for e in &seen {
        *counts.entry(e.name.clone()).or_insert(0) += 1;
    }
    for (name, count) in &counts {
        assert_eq!(*count, 1, "{name} seen more than once");
    }
}

#[test]
fn rmdir_requires_empty_directory() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let attr = fs.mkdir(ROOT, "sub", 0o40755, 0, 0).unwrap();
    fs.create(attr.inode, "child", 0o100644, 0, 0, 0).unwrap();
    assert_eq!(fs.rmdir(ROOT, "sub").unwrap_err(), FsError::NotEmpty);

    fs.unlink(attr.inode, "child").unwrap();
    fs.close(attr.inode).unwrap();
    fs.rmdir(ROOT, "sub").unwrap();
    assert_eq!(fs.lookup(ROOT, "sub").unwrap_err(), FsError::NotFound);
}

#[test]
fn truncate_shrinks_and_frees_blocks() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let attr = fs.create(ROOT, "big", 0o100644, 0, 0, 0).unwrap();
    let payload = vec![0xAB; 4096];
    fs.write(attr.inode, 0, &payload).unwrap();

    let (free_before, _) = fs.free_counts();
    fs.truncate(attr.inode, 10).unwrap();
    let (free_after, _) = fs.free_counts();
    assert!(free_after > free_before);

    let data = fs.read(attr.inode, 0, 4096).unwrap();
    assert_eq!(data.len(), 10);
    fs.close(attr.inode).unwrap();
}

#[test]
fn rename_moves_entry_between_directories() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let dir_attr = fs.mkdir(ROOT, "dir", 0o40755, 0, 0).unwrap();
    let file_attr = fs.create(ROOT, "a", 0o100644, 0, 0, 0).unwrap();
    fs.rename(ROOT, "a", dir_attr.inode, "b").unwrap();

    assert_eq!(fs.lookup(ROOT, "a").unwrap_err(), FsError::NotFound);
    let moved = fs.lookup(dir_attr.inode, "b").unwrap();
    assert_eq!(moved.inode, file_attr.inode);
}

#[test]
fn rename_over_existing_file_frees_the_replaced_inode() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    let mut fs = open_fs(&path, block_size, false);

    let victim = fs.create(ROOT, "old", 0o100644, 0, 0, 0).unwrap();
    fs.write(victim.inode, 0, b"displaced").unwrap();
    fs.close(victim.inode).unwrap();
    let (_, free_inodes_with_one_file) = fs.free_counts();

    fs.create(ROOT, "new", 0o100644, 0, 0, 0).unwrap();
    fs.rename(ROOT, "new", ROOT, "old").unwrap();

    assert_eq!(fs.lookup(ROOT, "new").unwrap_err(), FsError::NotFound);
    let moved = fs.lookup(ROOT, "old").unwrap();
    assert_eq!(moved.size, 0);

    let (_, free_inodes_after) = fs.free_counts();
    assert_eq!(
        free_inodes_after, free_inodes_with_one_file,
        "the inode replaced by rename must be reclaimed, not leaked"
    );
}

#[test]
fn write_across_block_boundary_matches_two_separate_writes() {
    let layout = Layout::default();
    let block_size = layout.block_size as usize;

    let (path_a, bs) = make_temp_volume(&layout);
    let mut fs_a = open_fs(&path_a, bs, false);
    let attr_a = fs_a.create(ROOT, "a", 0o100644, 0, 0, 0).unwrap();
    let payload: Vec<u8> = (0..64u8).cycle().take(32).collect();
    fs_a.write(attr_a.inode, (block_size - 16) as u64, &payload).unwrap();

    let (path_b, _) = make_temp_volume(&layout);
    let mut fs_b = open_fs(&path_b, bs, false);
    let attr_b = fs_b.create(ROOT, "b", 0o100644, 0, 0, 0).unwrap();
    fs_b.write(attr_b.inode, (block_size - 16) as u64, &payload[..16]).unwrap();
    fs_b.write(attr_b.inode, block_size as u64, &payload[16..]).unwrap();

    let data_a = fs_a.read(attr_a.inode, (block_size - 16) as u64, 32).unwrap();
    let data_b = fs_b.read(attr_b.inode, (block_size - 16) as u64, 32).unwrap();
    assert_eq!(data_a, data_b);
}

#[test]
fn read_only_volume_rejects_mutation() {
    let (path, block_size) = make_temp_volume(&Layout::default());
    {
        let mut fs = open_fs(&path, block_size, false);
        fs.create(ROOT, "existing", 0o100644, 0, 0, 0).unwrap();
        fs.flush();
    }
    let mut fs = open_fs(&path, block_size, true);
    assert_eq!(
        fs.create(ROOT, "new", 0o100644, 0, 0, 0).unwrap_err(),
        FsError::ReadOnly
    );
    assert!(fs.lookup(ROOT, "existing").is_ok());
}

#[test]
fn unknown_incompat_feature_refuses_to_mount() {
    let mut layout = Layout::default();
    layout.feature_incompat |= 0x8000;
    let (path, block_size) = make_temp_volume(&layout);

    let file = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
    let device = fs_core::FileBlockDevice::open(file, block_size).unwrap();
    let result = extfs::superblock::Volume::open(device, 256);
    assert!(result.is_err());
    assert_eq!(result.err().unwrap().kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn unknown_ro_compat_feature_forces_read_only() {
    let mut layout = Layout::default();
    layout.feature_ro_compat |= 0x8000;
    let (path, block_size) = make_temp_volume(&layout);

    let mut fs = open_fs(&path, block_size, false);
    assert_eq!(
        fs.create(ROOT, "new", 0o100644, 0, 0, 0).unwrap_err(),
        FsError::ReadOnly
    );
}
