//! Wires the volume, cluster allocator, directory walk and node cache
//! together behind the `fs_core::FsOps` verb set (spec §13), grounded on
//! `main.c`'s dispatch handlers.
//!
//! `main.c`'s `fatCreate`/`fatMkNod`/`fatRename` are unconditional
//! `-ENOTSUP` stubs despite `file.c`/`dir.c`/`cluster.c` fully implementing
//! the machinery a real `create` needs; `fatClose` never actually removes
//! anything from its node cache either. `create`/`truncate` are
//! implemented for real here rather than reproducing the stub. `mknod` has
//! no FAT equivalent of a device node and stays unsupported; `rename` has
//! no working original logic to ground a real implementation on and also
//! stays unsupported.

use fs_core::{BlockDevice, FsOps};
use fs_proto::{Attr, DirEntryRecord, FsError, Ino};

use crate::dir::{create_dir_entry, delete_dir_entry, find_dir_entry, is_dir_empty, list_dir_entries, name_to_dos, DirSlot};
use crate::fat::append_cluster;
use crate::file::{read_file, truncate_file, write_file};
use crate::format::{FatDirEntry, ATTR_DIRECTORY};
use crate::node::{get_first_cluster, ino_for, new_dir_entry, NodeTable, ROOT_INO};
use crate::volume::Volume;

const EXT2_FT_REG_FILE: u8 = 1;
const EXT2_FT_DIR: u8 = 2;

pub struct FatFs<D: BlockDevice> {
    vol: Volume<D>,
    nodes: NodeTable,
    read_only: bool,
}

impl<D: BlockDevice> FatFs<D> {
    pub fn new(vol: Volume<D>, read_only: bool) -> Self {
        let mut nodes = NodeTable::new();
        nodes.open_root();
        Self { vol, nodes, read_only }
    }

    /// Resolve a directory inode to the cluster its entries live in:
    /// `None` means the fixed FAT12/16 root region, `Some(cluster)` an
    /// ordinary chain (including FAT32's root). Panics if `dir_inode`
    /// isn't currently open, same as the node cache's own `borrow`.
    fn dir_first_cluster(&self, dir_inode: Ino) -> Result<Option<u32>, FsError> {
        if dir_inode == ROOT_INO {
            return Ok(if self.vol.root_is_fixed_region() {
                None
            } else {
                Some(self.vol.root_cluster())
            });
        }
        let node = self.nodes.borrow(dir_inode);
        match &node.location {
            Some((_, entry)) if entry.is_dir() => {
                Ok(Some(get_first_cluster(self.vol.fat_type, entry)))
            }
            Some(_) => Err(FsError::NotDirectory),
            None => unreachable!("only the root has no backing dirent"),
        }
    }

    fn root_is_dir(&self) -> bool {
        true
    }

    fn attr_for(&self, ino: Ino) -> Attr {
        if ino == ROOT_INO {
            Attr {
                inode: ROOT_INO,
                size: 0,
                mode: 0o040755,
                uid: 0,
                gid: 0,
                atime: 0,
                mtime: 0,
                ctime: 0,
            }
        } else {
            self.nodes.borrow(ino).to_attr(self.root_is_dir())
        }
    }

    /// Allocate a fresh cluster and build its directory entry, wiring in
    /// `.`/`..` when the new node is itself a directory.
    fn make_entry(
        &mut self,
        dir_first_cluster: Option<u32>,
        name: &[u8; 8],
        ext: &[u8; 3],
        mode: u32,
        is_dir: bool,
    ) -> Result<FatDirEntry, FsError> {
        let (cluster, first) = append_cluster(&mut self.vol, None).ok_or(FsError::NoSpace)?;
        crate::fat::clear_cluster(&mut self.vol, cluster);

        let attrs = if is_dir { ATTR_DIRECTORY } else { 0 };
        let ro = if mode & 0o200 == 0 { crate::format::ATTR_READ_ONLY } else { 0 };
        let entry = new_dir_entry(self.vol.fat_type, *name, *ext, attrs | ro, first, 0);

        if is_dir {
            let parent_cluster = match dir_first_cluster {
                Some(c) => c,
                None => 0, // parent is the FAT12/16 fixed root: "0" is its sentinel
            };
            let (dot_name, dot_ext) = name_to_dos(".").unwrap();
            let dot = new_dir_entry(self.vol.fat_type, dot_name, dot_ext, ATTR_DIRECTORY, first, 0);
            let (dotdot_name, dotdot_ext) = name_to_dos("..").unwrap();
            let dotdot = new_dir_entry(
                self.vol.fat_type,
                dotdot_name,
                dotdot_ext,
                ATTR_DIRECTORY,
                parent_cluster,
                0,
            );
            create_dir_entry(&mut self.vol, Some(first), &dot).ok_or(FsError::NoSpace)?;
            create_dir_entry(&mut self.vol, Some(first), &dotdot).ok_or(FsError::NoSpace)?;
        }

        Ok(entry)
    }
}

impl<D: BlockDevice> FsOps for FatFs<D> {
    fn lookup(&mut self, dir_inode: Ino, name: &str) -> Result<Attr, FsError> {
        let dir_first = self.dir_first_cluster(dir_inode)?;
        let (packed_name, packed_ext) = name_to_dos(name).ok_or(FsError::NotFound)?;
        let (slot, entry) = find_dir_entry(&mut self.vol, dir_first, &packed_name, &packed_ext)
            .ok_or(FsError::NotFound)?;
        let ino = ino_for(self.vol.fat_type, slot, &entry);
        if ino == ROOT_INO {
            self.nodes.open_root();
        } else {
            self.nodes.open_existing(ino, slot, entry);
        }
        Ok(self.attr_for(ino))
    }

    fn close(&mut self, inode: Ino) -> Result<(), FsError> {
        if inode != ROOT_INO {
            self.nodes.put(&mut self.vol, inode);
        }
        Ok(())
    }

    fn create(
        &mut self,
        dir_inode: Ino,
        name: &str,
        mode: u32,
        _uid: u32,
        _gid: u32,
        oflags: u32,
    ) -> Result<Attr, FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        const O_EXCL: u32 = 0x80;
        let dir_first = self.dir_first_cluster(dir_inode)?;
        let (packed_name, packed_ext) = name_to_dos(name).ok_or(FsError::NotSupported)?;

        if let Some((slot, entry)) = find_dir_entry(&mut self.vol, dir_first, &packed_name, &packed_ext) {
            if oflags & O_EXCL != 0 {
                return Err(FsError::Exists);
            }
            let ino = ino_for(self.vol.fat_type, slot, &entry);
            self.nodes.open_existing(ino, slot, entry);
            return Ok(self.attr_for(ino));
        }

        let entry = self.make_entry(dir_first, &packed_name, &packed_ext, mode, false)?;
        let slot = create_dir_entry(&mut self.vol, dir_first, &entry).ok_or(FsError::NoSpace)?;
        let ino = ino_for(self.vol.fat_type, slot, &entry);
        self.nodes.open_existing(ino, slot, entry);
        Ok(self.attr_for(ino))
    }

    fn read(&mut self, inode: Ino, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        if inode == ROOT_INO {
            return Err(FsError::IsDirectory);
        }
        if self.nodes.borrow(inode).is_dir(false) {
            return Err(FsError::IsDirectory);
        }
        let fat_type = self.vol.fat_type;
        let node = self.nodes.borrow_mut(inode);
        Ok(read_file(&mut self.vol, node, fat_type, offset, size))
    }

    fn write(&mut self, inode: Ino, offset: u64, data: &[u8]) -> Result<u32, FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if inode == ROOT_INO || self.nodes.borrow(inode).is_dir(false) {
            return Err(FsError::IsDirectory);
        }
        let fat_type = self.vol.fat_type;
        let node = self.nodes.borrow_mut(inode);
        let written = write_file(&mut self.vol, node, fat_type, offset, data);
        self.nodes.mark_dirty(inode);
        Ok(written)
    }

    fn readdir(
        &mut self,
        inode: Ino,
        cookie: u64,
        size: u32,
    ) -> Result<(u64, Vec<DirEntryRecord>), FsError> {
        let dir_first = self.dir_first_cluster(inode)?;
        let entries = list_dir_entries(&mut self.vol, dir_first, cookie as u32);
        let mut out = Vec::new();
        let mut next_cookie = cookie;
        let mut used = 0u32;
        for (ordinal, entry) in entries.into_iter() {
            let name = crate::dir::entry_to_name(&entry);
            let slot = match dir_first {
                None => DirSlot::RootFixed { index: ordinal },
                Some(c) => DirSlot::Chain { first_cluster: c, index: ordinal },
            };
            let ino = ino_for(self.vol.fat_type, slot, &entry);
            let record = DirEntryRecord {
                inode: ino,
                file_type: if entry.is_dir() { EXT2_FT_DIR } else { EXT2_FT_REG_FILE },
                name,
            };
            let record_size = record.wire_size();
            if used + record_size > size {
                break;
            }
            used += record_size;
            out.push(record);
            next_cookie = ordinal as u64 + 1;
        }
        Ok((next_cookie, out))
    }

    fn mkdir(
        &mut self,
        dir_inode: Ino,
        name: &str,
        mode: u32,
        _uid: u32,
        _gid: u32,
    ) -> Result<Attr, FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        let dir_first = self.dir_first_cluster(dir_inode)?;
        let (packed_name, packed_ext) = name_to_dos(name).ok_or(FsError::NotSupported)?;
        if find_dir_entry(&mut self.vol, dir_first, &packed_name, &packed_ext).is_some() {
            return Err(FsError::Exists);
        }

        let entry = self.make_entry(dir_first, &packed_name, &packed_ext, mode, true)?;
        let slot = create_dir_entry(&mut self.vol, dir_first, &entry).ok_or(FsError::NoSpace)?;
        let ino = ino_for(self.vol.fat_type, slot, &entry);
        self.nodes.open_existing(ino, slot, entry);
        Ok(self.attr_for(ino))
    }

    fn rmdir(&mut self, dir_inode: Ino, name: &str) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        let dir_first = self.dir_first_cluster(dir_inode)?;
        let (packed_name, packed_ext) = name_to_dos(name).ok_or(FsError::NotFound)?;
        let (slot, entry) =
            find_dir_entry(&mut self.vol, dir_first, &packed_name, &packed_ext).ok_or(FsError::NotFound)?;
        if !entry.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let child_cluster = get_first_cluster(self.vol.fat_type, &entry);
        if !is_dir_empty(&mut self.vol, child_cluster) {
            return Err(FsError::NotEmpty);
        }
        crate::fat::free_cluster_chain(&mut self.vol, child_cluster);
        delete_dir_entry(&mut self.vol, slot);
        let ino = ino_for(self.vol.fat_type, slot, &entry);
        if let Some(node) = self.nodes.borrow_mut_if_open(ino) {
            if let Some((_, loc_entry)) = &mut node.location {
                loc_entry.name[0] = crate::format::DIRENTRY_DELETED;
            }
        }
        Ok(())
    }

    fn mknod(
        &mut self,
        _dir_inode: Ino,
        _name: &str,
        _mode: u32,
        _uid: u32,
        _gid: u32,
    ) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn unlink(&mut self, dir_inode: Ino, name: &str) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        let dir_first = self.dir_first_cluster(dir_inode)?;
        let (packed_name, packed_ext) = name_to_dos(name).ok_or(FsError::NotFound)?;
        let (slot, entry) =
            find_dir_entry(&mut self.vol, dir_first, &packed_name, &packed_ext).ok_or(FsError::NotFound)?;
        if entry.is_dir() {
            return Err(FsError::IsDirectory);
        }
        let cluster = get_first_cluster(self.vol.fat_type, &entry);
        crate::fat::free_cluster_chain(&mut self.vol, cluster);
        delete_dir_entry(&mut self.vol, slot);
        let ino = ino_for(self.vol.fat_type, slot, &entry);
        if let Some(node) = self.nodes.borrow_mut_if_open(ino) {
            if let Some((_, loc_entry)) = &mut node.location {
                loc_entry.name[0] = crate::format::DIRENTRY_DELETED;
            }
        }
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
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if inode == ROOT_INO {
            return Ok(());
        }
        let node = self.nodes.borrow_mut(inode);
        if let Some((_, entry)) = &mut node.location {
            if mode & 0o200 == 0 {
                entry.attributes |= crate::format::ATTR_READ_ONLY;
            } else {
                entry.attributes &= !crate::format::ATTR_READ_ONLY;
            }
        }
        node.dirty = true;
        Ok(())
    }

    fn chown(&mut self, _inode: Ino, _uid: u32, _gid: u32) -> Result<(), FsError> {
        // FAT directory entries carry no owner/group fields.
        Ok(())
    }

    fn truncate(&mut self, inode: Ino, size: u64) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        if inode == ROOT_INO || self.nodes.borrow(inode).is_dir(false) {
            return Err(FsError::IsDirectory);
        }
        let fat_type = self.vol.fat_type;
        let node = self.nodes.borrow_mut(inode);
        truncate_file(&mut self.vol, node, fat_type, size);
        self.nodes.mark_dirty(inode);
        Ok(())
    }

    fn flush(&mut self) {
        self.nodes.flush_dirty(&mut self.vol);
        self.vol.flush();
    }
}

pub fn root_ino() -> Ino {
    ROOT_INO
}

