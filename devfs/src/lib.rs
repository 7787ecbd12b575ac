//! Flat device node registry (spec §12), grounded on
//! `examples/original_source/devfs/main.c`'s fixed `devfs_inode_table`.
//!
//! Every node lives directly under the single root directory (inode 0);
//! there is no subdirectory nesting. `LOOKUP` and `MKNOD` linear-scan the
//! table the same way the original does, `READDIR`'s cookie is the raw
//! table index to resume from.

use fs_core::FsOps;
use fs_proto::{Attr, DirEntryRecord, FsError, Ino};

pub const DEVFS_MAX_INODE: usize = 128;
pub const DEVFS_ROOT_INO: Ino = 0;
const EXT2_FT_CHRDEV: u8 = 3;

#[derive(Clone)]
struct DevfsNode {
    name: String,
    mode: u32,
    uid: u32,
    gid: u32,
    size: u64,
}

pub struct Devfs {
    table: Vec<Option<DevfsNode>>,
}

impl Default for Devfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Devfs {
    pub fn new() -> Self {
        Self {
            table: vec![None; DEVFS_MAX_INODE],
        }
    }

    /// Pre-register a device node, as the CLI's device list does at
    /// startup.
    pub fn register(&mut self, name: &str, mode: u32, uid: u32, gid: u32, size: u64) -> Option<Ino> {
        if self.table.iter().skip(1).flatten().any(|n| n.name == name) {
            return None;
        }
        let slot = (1..DEVFS_MAX_INODE).find(|&i| self.table[i].is_none())?;
        self.table[slot] = Some(DevfsNode {
            name: name.to_string(),
            mode,
            uid,
            gid,
            size,
        });
        Some(slot as Ino)
    }

    fn find(&self, name: &str) -> Option<(Ino, &DevfsNode)> {
        self.table
            .iter()
            .enumerate()
            .skip(1)
            .find_map(|(i, n)| n.as_ref().filter(|n| n.name == name).map(|n| (i as Ino, n)))
    }

    fn attr_of(ino: Ino, node: &DevfsNode) -> Attr {
        Attr {
            inode: ino,
            size: node.size,
            mode: node.mode,
            uid: node.uid,
            gid: node.gid,
            atime: 0,
            mtime: 0,
            ctime: 0,
        }
    }
}

impl FsOps for Devfs {
    fn lookup(&mut self, dir_inode: Ino, name: &str) -> Result<Attr, FsError> {
        if dir_inode != DEVFS_ROOT_INO {
            return Err(FsError::NotDirectory);
        }
        self.find(name)
            .map(|(ino, node)| Self::attr_of(ino, node))
            .ok_or(FsError::NotFound)
    }

    fn close(&mut self, _inode: Ino) -> Result<(), FsError> {
        Ok(())
    }

    fn create(
        &mut self,
        _dir_inode: Ino,
        _name: &str,
        _mode: u32,
        _uid: u32,
        _gid: u32,
        _oflags: u32,
    ) -> Result<Attr, FsError> {
        Err(FsError::NotSupported)
    }

    fn read(&mut self, _inode: Ino, _offset: u64, _size: u32) -> Result<Vec<u8>, FsError> {
        Err(FsError::NotSupported)
    }

    fn write(&mut self, _inode: Ino, _offset: u64, _data: &[u8]) -> Result<u32, FsError> {
        Err(FsError::NotSupported)
    }

    fn readdir(
        &mut self,
        dir_inode: Ino,
        cookie: u64,
        size: u32,
    ) -> Result<(u64, Vec<DirEntryRecord>), FsError> {
        if dir_inode != DEVFS_ROOT_INO {
            return Err(FsError::NotDirectory);
        }
        let start = cookie.max(1) as usize;
        let mut entries = Vec::new();
        let mut idx = start;
        let mut used = 0u32;
        while idx < DEVFS_MAX_INODE {
            if let Some(node) = &self.table[idx] {
                let record = DirEntryRecord {
                    inode: idx as Ino,
                    file_type: EXT2_FT_CHRDEV,
                    name: node.name.clone(),
                };
                let record_size = record.wire_size();
                if used + record_size > size {
                    break;
                }
                used += record_size;
                entries.push(record);
            }
            idx += 1;
        }
        Ok((idx as u64, entries))
    }

    fn mkdir(
        &mut self,
        _dir_inode: Ino,
        _name: &str,
        _mode: u32,
        _uid: u32,
        _gid: u32,
    ) -> Result<Attr, FsError> {
        Err(FsError::NotSupported)
    }

    fn rmdir(&mut self, _dir_inode: Ino, _name: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn mknod(
        &mut self,
        dir_inode: Ino,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(), FsError> {
        if dir_inode != DEVFS_ROOT_INO {
            return Err(FsError::NotDirectory);
        }
        if self.find(name).is_some() {
            return Err(FsError::Exists);
        }
        self.register(name, mode, uid, gid, 0)
            .map(|_| ())
            .ok_or(FsError::NoSpace)
    }

    fn unlink(&mut self, dir_inode: Ino, name: &str) -> Result<(), FsError> {
        if dir_inode != DEVFS_ROOT_INO {
            return Err(FsError::NotDirectory);
        }
        let Some((ino, _)) = self.find(name) else {
            return Err(FsError::NotFound);
        };
        self.table[ino as usize] = None;
        Ok(())
    }

    fn rename(
        &mut self,
        _src_dir: Ino,
        _src_name: &str,
        _dst_dir: Ino,
        _dst_name: &str,
    ) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn chmod(&mut self, inode: Ino, mode: u32) -> Result<(), FsError> {
        let node = self
            .table
            .get_mut(inode as usize)
            .and_then(|n| n.as_mut())
            .ok_or(FsError::NotFound)?;
        node.mode = mode;
        Ok(())
    }

    fn chown(&mut self, inode: Ino, uid: u32, gid: u32) -> Result<(), FsError> {
        let node = self
            .table
            .get_mut(inode as usize)
            .and_then(|n| n.as_mut())
            .ok_or(FsError::NotFound)?;
        node.uid = uid;
        node.gid = gid;
        Ok(())
    }

    fn truncate(&mut self, _inode: Ino, _size: u64) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn flush(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup() {
        let mut fs = Devfs::new();
        let ino = fs.register("console", 0o620, 0, 0, 0).unwrap();
        let attr = fs.lookup(DEVFS_ROOT_INO, "console").unwrap();
        assert_eq!(attr.inode, ino);
        assert_eq!(attr.mode, 0o620);
    }

    #[test]
    fn lookup_missing_fails() {
        let mut fs = Devfs::new();
        assert_eq!(fs.lookup(DEVFS_ROOT_INO, "missing"), Err(FsError::NotFound));
    }

    #[test]
    fn mknod_rejects_duplicate_name() {
        let mut fs = Devfs::new();
        fs.mknod(DEVFS_ROOT_INO, "tty0", 0o620, 0, 0).unwrap();
        assert_eq!(
            fs.mknod(DEVFS_ROOT_INO, "tty0", 0o620, 0, 0),
            Err(FsError::Exists)
        );
    }

    #[test]
    fn unlink_removes_node() {
        let mut fs = Devfs::new();
        fs.mknod(DEVFS_ROOT_INO, "tty0", 0o620, 0, 0).unwrap();
        fs.unlink(DEVFS_ROOT_INO, "tty0").unwrap();
        assert_eq!(fs.lookup(DEVFS_ROOT_INO, "tty0"), Err(FsError::NotFound));
    }

    #[test]
    fn readdir_resumes_from_cookie() {
        let mut fs = Devfs::new();
        fs.mknod(DEVFS_ROOT_INO, "a", 0, 0, 0).unwrap();
        fs.mknod(DEVFS_ROOT_INO, "b", 0, 0, 0).unwrap();
        let (cookie, first) = fs.readdir(DEVFS_ROOT_INO, 0, 24).unwrap();
        assert_eq!(first.len(), 1);
        let (_, rest) = fs.readdir(DEVFS_ROOT_INO, cookie, 64).unwrap();
        assert_eq!(rest.len(), 1);
    }
}
