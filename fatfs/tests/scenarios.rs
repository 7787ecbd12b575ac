//! End-to-end scenarios over a freshly formatted FAT12 volume, driven
//! directly against `FatFs` (which implements `fs_core::FsOps`).

mod common;

use common::{make_temp_volume, open_fs};
use fs_core::FsOps;
use fs_proto::FsError;

#[test]
fn create_write_read_back() {
    let path = make_temp_volume();
    let mut fs = open_fs(&path, false);
    let root: u64 = fatfs::fs::root_ino();

    let attr = fs.create(root, "hello.txt", 0o100644, 0, 0, 0).unwrap();
    let written = fs.write(attr.inode, 0, b"Hello, world!").unwrap();
    assert_eq!(written, 13);

    let data = fs.read(attr.inode, 0, 13).unwrap();
    assert_eq!(&data, b"Hello, world!");

    let looked_up = fs.lookup(root, "hello.txt").unwrap();
    assert_eq!(looked_up.size, 13);
    fs.close(attr.inode).unwrap();
    fs.close(looked_up.inode).unwrap();
}

#[test]
fn mkdir_populates_dot_and_dotdot() {
    let path = make_temp_volume();
    let mut fs = open_fs(&path, false);
    let root: u64 = fatfs::fs::root_ino();

    let attr = fs.mkdir(root, "sub", 0o40755, 0, 0).unwrap();
    let (_, entries) = fs.readdir(attr.inode, 0, 100).unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
    assert!(names.contains(&".".to_string()));
    assert!(names.contains(&"..".to_string()));
    fs.close(attr.inode).unwrap();
}

#[test]
fn unlink_removes_file() {
    let path = make_temp_volume();
    let mut fs = open_fs(&path, false);
    let root: u64 = fatfs::fs::root_ino();

    let attr = fs.create(root, "bye.txt", 0o100644, 0, 0, 0).unwrap();
    fs.write(attr.inode, 0, b"x").unwrap();
    fs.close(attr.inode).unwrap();

    fs.unlink(root, "bye.txt").unwrap();
    assert_eq!(fs.lookup(root, "bye.txt").unwrap_err(), FsError::NotFound);
}

#[test]
fn rmdir_requires_empty_directory() {
    let path = make_temp_volume();
    let mut fs = open_fs(&path, false);
    let root: u64 = fatfs::fs::root_ino();

    let attr = fs.mkdir(root, "sub", 0o40755, 0, 0).unwrap();
    fs.create(attr.inode, "child.txt", 0o100644, 0, 0, 0).unwrap();
    assert_eq!(fs.rmdir(root, "sub").unwrap_err(), FsError::NotEmpty);

    fs.unlink(attr.inode, "child.txt").unwrap();
    fs.close(attr.inode).unwrap();
    fs.rmdir(root, "sub").unwrap();
    assert_eq!(fs.lookup(root, "sub").unwrap_err(), FsError::NotFound);
}

#[test]
fn readdir_lists_every_created_entry() {
    let path = make_temp_volume();
    let mut fs = open_fs(&path, false);
    let root: u64 = fatfs::fs::root_ino();

    let names = ["a.txt", "b.txt", "c.txt"];
    for name in names {
        fs.create(root, name, 0o100644, 0, 0, 0).unwrap();
    }

    let (_, entries) = fs.readdir(root, 0, 100).unwrap();
    let seen: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
    for name in names {
        assert!(seen.contains(&name.to_string()), "missing {name}");
    }
}

#[test]
fn write_past_eof_zero_fills_the_gap() {
    let path = make_temp_volume();
    let mut fs = open_fs(&path, false);
    let root: u64 = fatfs::fs::root_ino();

    let attr = fs.create(root, "sparse.dat", 0o100644, 0, 0, 0).unwrap();
    fs.write(attr.inode, 600, b"X").unwrap();

    let looked_up = fs.lookup(root, "sparse.dat").unwrap();
    assert_eq!(looked_up.size, 601);

    let zeros = fs.read(attr.inode, 0, 16).unwrap();
    assert_eq!(zeros, vec![0u8; 16]);
    let x = fs.read(attr.inode, 600, 1).unwrap();
    assert_eq!(x, b"X");
    fs.close(attr.inode).unwrap();
}

#[test]
fn truncate_shrinks_file_and_read_reflects_new_size() {
    let path = make_temp_volume();
    let mut fs = open_fs(&path, false);
    let root: u64 = fatfs::fs::root_ino();

    let attr = fs.create(root, "big.dat", 0o100644, 0, 0, 0).unwrap();
    fs.write(attr.inode, 0, &vec![0xABu8; 1200]).unwrap();
    fs.truncate(attr.inode, 10).unwrap();

    let looked_up = fs.lookup(root, "big.dat").unwrap();
    assert_eq!(looked_up.size, 10);
    let data = fs.read(attr.inode, 0, 1200).unwrap();
    assert_eq!(data.len(), 10);
    fs.close(attr.inode).unwrap();
}

#[test]
fn read_only_volume_rejects_mutation() {
    let path = make_temp_volume();
    {
        let mut fs = open_fs(&path, false);
        let root: u64 = fatfs::fs::root_ino();
        fs.create(root, "existing.txt", 0o100644, 0, 0, 0).unwrap();
        fs.flush();
    }
    let mut fs = open_fs(&path, true);
    let root: u64 = fatfs::fs::root_ino();
    assert_eq!(
        fs.create(root, "new.txt", 0o100644, 0, 0, 0).unwrap_err(),
        FsError::ReadOnly
    );
    assert!(fs.lookup(root, "existing.txt").is_ok());
}

#[test]
fn creating_past_a_fixed_roots_capacity_fails_with_no_space() {
    let path = make_temp_volume();
    let mut fs = open_fs(&path, false);
    let root: u64 = fatfs::fs::root_ino();

    // The fixture's root directory has exactly 16 fixed slots.
    let mut last_err = None;
    for i in 0..17 {
        let name = format!("f{i}.txt");
        if let Err(e) = fs.create(root, &name, 0o100644, 0, 0, 0) {
            last_err = Some(e);
            break;
        }
    }
    assert_eq!(last_err, Some(FsError::NoSpace));
}
