//! Wires the block map, allocator, inode cache and directory operations
//! together behind the `fs_core::FsOps` verb set (spec §6.1).
//!
//! Every method opens exactly one reference per inode it touches and closes
//! it exactly once before returning; `InodeCache::borrow_mut` is used for
//! any further access to an already-open inode so intermediate borrows
//! never inflate the reference count (spec §4.5).

use std::time::{SystemTime, UNIX_EPOCH};

use fs_core::{BlockDevice, CacheMode, FsOps};
use fs_proto::{Attr, DirEntryRecord, FsError, Ino};

use crate::alloc::{alloc_inode_bit, find_free_inode_dir_group, find_free_inode_file_group};
use crate::dir::{dirent_delete, dirent_enter, init_dir_block, is_dir_empty, lookup_dir};
use crate::file::{read_file, truncate_inode, write_file};
use crate::format::{OndiskInode, ATIME, CTIME, EXT2_FT_DIR, EXT2_ROOT_INO, MTIME, S_IFDIR, S_IFMT};
use crate::inode::{update_times, InodeCache};
use crate::superblock::Volume;

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn group_of_ino<D: BlockDevice>(vol: &Volume<D>, ino: Ino) -> u32 {
    ((ino - 1) / vol.sb.s_inodes_per_group as u64) as u32
}

pub struct Ext2Fs<D: BlockDevice> {
    vol: Volume<D>,
    inodes: InodeCache,
    read_only: bool,
}

impl<D: BlockDevice> Ext2Fs<D> {
    pub fn new(vol: Volume<D>, read_only: bool) -> Self {
        let read_only = read_only || vol.forces_read_only();
        Self {
            vol,
            inodes: InodeCache::new(),
            read_only,
        }
    }

    /// Superblock free-blocks/free-inodes counts, for the consistency
    /// invariant of spec §8: these must equal the sum of the per-group
    /// counts after every completed operation.
    pub fn free_counts(&self) -> (u32, u32) {
        (self.vol.sb.s_free_blocks_count, self.vol.sb.s_free_inodes_count)
    }

    /// Update timestamps on an inode that is already open.
    fn touch(&mut self, ino: Ino, which: u8) {
        if self.read_only {
            return;
        }
        let ts = now();
        let inode = self.inodes.borrow_mut(ino);
        update_times(&mut inode.disk, which, ts);
        self.inodes.mark_dirty(ino);
    }

    fn new_inode(
        &mut self,
        parent: Ino,
        mode: u16,
        uid: u32,
        gid: u32,
        is_dir: bool,
    ) -> Result<Ino, FsError> {
        let parent_group = group_of_ino(&self.vol, parent);
        let group = if is_dir {
            find_free_inode_dir_group(&self.vol).ok_or(FsError::NoSpace)?
        } else {
            find_free_inode_file_group(&self.vol, parent_group).ok_or(FsError::NoSpace)?
        };
        let ino = alloc_inode_bit(&mut self.vol, group)?;

        let ts = now();
        let disk = OndiskInode {
            i_mode: mode,
            i_uid: uid as u16,
            i_gid: gid as u16,
            i_links_count: 1,
            i_atime: ts,
            i_ctime: ts,
            i_mtime: ts,
            ..Default::default()
        };
        crate::inode::write_inode(&mut self.vol, ino, &disk);
        Ok(ino)
    }
}

impl<D: BlockDevice> FsOps for Ext2Fs<D> {
    fn lookup(&mut self, dir_inode: Ino, name: &str) -> Result<Attr, FsError> {
        self.inodes.open(&mut self.vol, dir_inode);
        let dir = self.inodes.borrow_mut(dir_inode);
        if !dir.is_dir() {
            self.inodes.put(&mut self.vol, dir_inode);
            return Err(FsError::NotDirectory);
        }
        let found = lookup_dir(&mut self.vol, self.inodes.borrow_mut(dir_inode), name);
        self.inodes.put(&mut self.vol, dir_inode);
        let Some((ino, _)) = found? else {
            return Err(FsError::NotFound);
        };

        self.inodes.open(&mut self.vol, ino);
        let attr = self.inodes.borrow_mut(ino).to_attr();
        Ok(attr)
    }

    fn close(&mut self, inode: Ino) -> Result<(), FsError> {
        self.inodes.put(&mut self.vol, inode);
        Ok(())
    }

    fn create(
        &mut self,
        dir_inode: Ino,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        oflags: u32,
    ) -> Result<Attr, FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        const O_EXCL: u32 = 0x80;

        self.inodes.open(&mut self.vol, dir_inode);
        if !self.inodes.borrow_mut(dir_inode).is_dir() {
            self.inodes.put(&mut self.vol, dir_inode);
            return Err(FsError::NotDirectory);
        }
        let existing = lookup_dir(&mut self.vol, self.inodes.borrow_mut(dir_inode), name)?;
        if let Some((ino, _)) = existing {
            self.inodes.put(&mut self.vol, dir_inode);
            if oflags & O_EXCL != 0 {
                return Err(FsError::Exists);
            }
            self.inodes.open(&mut self.vol, ino);
            return Ok(self.inodes.borrow_mut(ino).to_attr());
        }

        let file_mode = (mode as u16 & 0x0FFF) | crate::format::S_IFREG;
        let ino = match self.new_inode(dir_inode, file_mode, uid, gid, false) {
            Ok(ino) => ino,
            Err(e) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(e);
            }
        };

        if let Err(e) = dirent_enter(
            &mut self.vol,
            self.inodes.borrow_mut(dir_inode),
            name,
            ino,
            crate::format::EXT2_FT_REG_FILE,
        ) {
            self.inodes.put(&mut self.vol, dir_inode);
            return Err(e);
        }
        self.touch(dir_inode, MTIME | CTIME);
        self.inodes.put(&mut self.vol, dir_inode);

        self.inodes.open(&mut self.vol, ino);
        Ok(self.inodes.borrow_mut(ino).to_attr())
    }

    fn read(&mut self, inode: Ino, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        self.inodes.open(&mut self.vol, inode);
        if self.inodes.borrow_mut(inode).is_dir() {
            self.inodes.put(&mut self.vol, inode);
            return Err(FsError::IsDirectory);
        }
        let data = read_file(&mut self.vol, self.inodes.borrow_mut(inode), offset, size);
        self.touch(inode, ATIME);
        self.inodes.put(&mut self.vol, inode);
        data
    }

    fn write(&mut self, inode: Ino, offset: u64, data: &[u8]) -> Result<u32, FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        let group = group_of_ino(&self.vol, inode);
        self.inodes.open(&mut self.vol, inode);
        if self.inodes.borrow_mut(inode).is_dir() {
            self.inodes.put(&mut self.vol, inode);
            return Err(FsError::IsDirectory);
        }
        let written = write_file(
            &mut self.vol,
            self.inodes.borrow_mut(inode),
            offset,
            data,
            group,
        );
        self.touch(inode, MTIME | CTIME);
        self.inodes.mark_dirty(inode);
        self.inodes.put(&mut self.vol, inode);
        written
    }

    fn readdir(
        &mut self,
        inode: Ino,
        cookie: u64,
        size: u32,
    ) -> Result<(u64, Vec<DirEntryRecord>), FsError> {
        self.inodes.open(&mut self.vol, inode);
        if !self.inodes.borrow_mut(inode).is_dir() {
            self.inodes.put(&mut self.vol, inode);
            return Err(FsError::NotDirectory);
        }
        let result = crate::dir::get_dirents(&mut self.vol, self.inodes.borrow_mut(inode), cookie, size);
        self.inodes.put(&mut self.vol, inode);
        result
    }

    fn mkdir(
        &mut self,
        dir_inode: Ino,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<Attr, FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        self.inodes.open(&mut self.vol, dir_inode);
        if !self.inodes.borrow_mut(dir_inode).is_dir() {
            self.inodes.put(&mut self.vol, dir_inode);
            return Err(FsError::NotDirectory);
        }
        match lookup_dir(&mut self.vol, self.inodes.borrow_mut(dir_inode), name) {
            Ok(Some(_)) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(FsError::Exists);
            }
            Err(e) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(e);
            }
            Ok(None) => {}
        }

        let dir_mode = (mode as u16 & 0x0FFF) | S_IFDIR;
        let ino = match self.new_inode(dir_inode, dir_mode, uid, gid, true) {
            Ok(ino) => ino,
            Err(e) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(e);
            }
        };

        let group = group_of_ino(&self.vol, ino);
        let phys = match crate::alloc::alloc_block(&mut self.vol, group) {
            Ok(b) => b,
            Err(e) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(e);
            }
        };
        let block_size = self.vol.block_size() as usize;
        let slot = self.vol.cache.get(phys, CacheMode::Clear);
        init_dir_block(self.vol.cache.data_mut(slot), block_size, ino, dir_inode);
        self.vol.cache.mark_dirty(slot);

        self.inodes.open(&mut self.vol, ino);
        {
            let node = self.inodes.borrow_mut(ino);
            node.disk.i_block[0] = phys;
            node.disk.i_size = block_size as u32;
            node.disk.i_blocks = block_size as u32 / 512;
            node.disk.i_links_count = 2;
        }
        self.inodes.mark_dirty(ino);

        if let Err(e) = dirent_enter(&mut self.vol, self.inodes.borrow_mut(dir_inode), name, ino, EXT2_FT_DIR) {
            self.inodes.put(&mut self.vol, ino);
            self.inodes.put(&mut self.vol, dir_inode);
            return Err(e);
        }
        self.inodes.borrow_mut(dir_inode).disk.i_links_count += 1;
        self.inodes.mark_dirty(dir_inode);
        self.touch(dir_inode, MTIME | CTIME);
        self.inodes.put(&mut self.vol, dir_inode);

        Ok(self.inodes.borrow_mut(ino).to_attr())
    }

    fn rmdir(&mut self, dir_inode: Ino, name: &str) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        self.inodes.open(&mut self.vol, dir_inode);
        let found = lookup_dir(&mut self.vol, self.inodes.borrow_mut(dir_inode), name);
        let (ino, file_type) = match found {
            Ok(Some(v)) => v,
            Ok(None) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(FsError::NotFound);
            }
            Err(e) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(e);
            }
        };
        if file_type != EXT2_FT_DIR {
            self.inodes.put(&mut self.vol, dir_inode);
            return Err(FsError::NotDirectory);
        }

        self.inodes.open(&mut self.vol, ino);
        match is_dir_empty(&mut self.vol, self.inodes.borrow_mut(ino)) {
            Ok(true) => {}
            Ok(false) => {
                self.inodes.put(&mut self.vol, ino);
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(FsError::NotEmpty);
            }
            Err(e) => {
                self.inodes.put(&mut self.vol, ino);
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(e);
            }
        }

        dirent_delete(&mut self.vol, self.inodes.borrow_mut(dir_inode), name)?;
        self.inodes.borrow_mut(dir_inode).disk.i_links_count -= 1;
        self.inodes.mark_dirty(dir_inode);
        self.touch(dir_inode, MTIME | CTIME);

        self.inodes.borrow_mut(ino).disk.i_links_count = 0;
        self.inodes.mark_dirty(ino);

        self.inodes.put(&mut self.vol, ino);
        self.inodes.put(&mut self.vol, dir_inode);
        Ok(())
    }

    fn mknod(
        &mut self,
        dir_inode: Ino,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        self.inodes.open(&mut self.vol, dir_inode);
        if !self.inodes.borrow_mut(dir_inode).is_dir() {
            self.inodes.put(&mut self.vol, dir_inode);
            return Err(FsError::NotDirectory);
        }
        match lookup_dir(&mut self.vol, self.inodes.borrow_mut(dir_inode), name) {
            Ok(Some(_)) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(FsError::Exists);
            }
            Err(e) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(e);
            }
            Ok(None) => {}
        }

        let ino = match self.new_inode(dir_inode, mode as u16, uid, gid, false) {
            Ok(ino) => ino,
            Err(e) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(e);
            }
        };
        self.inodes.open(&mut self.vol, ino);
        let file_type = self.inodes.borrow_mut(ino).disk.file_type_byte();
        self.inodes.put(&mut self.vol, ino);

        if let Err(e) = dirent_enter(&mut self.vol, self.inodes.borrow_mut(dir_inode), name, ino, file_type) {
            self.inodes.put(&mut self.vol, dir_inode);
            return Err(e);
        }
        self.touch(dir_inode, MTIME | CTIME);
        self.inodes.put(&mut self.vol, dir_inode);
        Ok(())
    }

    fn unlink(&mut self, dir_inode: Ino, name: &str) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        self.inodes.open(&mut self.vol, dir_inode);
        let found = lookup_dir(&mut self.vol, self.inodes.borrow_mut(dir_inode), name);
        let (ino, file_type) = match found {
            Ok(Some(v)) => v,
            Ok(None) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(FsError::NotFound);
            }
            Err(e) => {
                self.inodes.put(&mut self.vol, dir_inode);
                return Err(e);
            }
        };
        if file_type == EXT2_FT_DIR {
            self.inodes.put(&mut self.vol, dir_inode);
            return Err(FsError::IsDirectory);
        }

        dirent_delete(&mut self.vol, self.inodes.borrow_mut(dir_inode), name)?;
        self.touch(dir_inode, MTIME | CTIME);
        self.inodes.put(&mut self.vol, dir_inode);

        self.inodes.open(&mut self.vol, ino);
        let node = self.inodes.borrow_mut(ino);
        node.disk.i_links_count = node.disk.i_links_count.saturating_sub(1);
        self.inodes.mark_dirty(ino);
        self.inodes.put(&mut self.vol, ino);
        Ok(())
    }

    fn rename(
        &mut self,
        src_dir: Ino,
        src_name: &str,
        dst_dir: Ino,
        dst_name: &str,
    ) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        self.inodes.open(&mut self.vol, src_dir);
        let found = lookup_dir(&mut self.vol, self.inodes.borrow_mut(src_dir), src_name);
        let (ino, file_type) = match found {
            Ok(Some(v)) => v,
            Ok(None) => {
                self.inodes.put(&mut self.vol, src_dir);
                return Err(FsError::NotFound);
            }
            Err(e) => {
                self.inodes.put(&mut self.vol, src_dir);
                return Err(e);
            }
        };

        self.inodes.open(&mut self.vol, dst_dir);
        let existing = lookup_dir(&mut self.vol, self.inodes.borrow_mut(dst_dir), dst_name);
        let existing = match existing {
            Ok(v) => v,
            Err(e) => {
                self.inodes.put(&mut self.vol, dst_dir);
                self.inodes.put(&mut self.vol, src_dir);
                return Err(e);
            }
        };

        if let Some((existing_ino, existing_type)) = existing {
            if existing_type == EXT2_FT_DIR {
                self.inodes.open(&mut self.vol, existing_ino);
                let empty = is_dir_empty(&mut self.vol, self.inodes.borrow_mut(existing_ino));
                self.inodes.put(&mut self.vol, existing_ino);
                match empty {
                    Ok(true) => {}
                    Ok(false) => {
                        self.inodes.put(&mut self.vol, dst_dir);
                        self.inodes.put(&mut self.vol, src_dir);
                        return Err(FsError::NotEmpty);
                    }
                    Err(e) => {
                        self.inodes.put(&mut self.vol, dst_dir);
                        self.inodes.put(&mut self.vol, src_dir);
                        return Err(e);
                    }
                }
            }
            if let Err(e) = dirent_delete(&mut self.vol, self.inodes.borrow_mut(dst_dir), dst_name) {
                self.inodes.put(&mut self.vol, dst_dir);
                self.inodes.put(&mut self.vol, src_dir);
                return Err(e);
            }

            // The destination's old occupant loses the link this dirent
            // held, same as unlink/rmdir would for it directly.
            self.inodes.open(&mut self.vol, existing_ino);
            if existing_type == EXT2_FT_DIR {
                self.inodes.borrow_mut(existing_ino).disk.i_links_count = 0;
            } else {
                let node = self.inodes.borrow_mut(existing_ino);
                node.disk.i_links_count = node.disk.i_links_count.saturating_sub(1);
            }
            self.inodes.mark_dirty(existing_ino);
            self.inodes.put(&mut self.vol, existing_ino);
        }

        if let Err(e) = dirent_delete(&mut self.vol, self.inodes.borrow_mut(src_dir), src_name) {
            self.inodes.put(&mut self.vol, dst_dir);
            self.inodes.put(&mut self.vol, src_dir);
            return Err(e);
        }
        self.touch(src_dir, MTIME | CTIME);
        self.inodes.put(&mut self.vol, src_dir);

        let result = dirent_enter(&mut self.vol, self.inodes.borrow_mut(dst_dir), dst_name, ino, file_type);
        self.touch(dst_dir, MTIME | CTIME);
        self.inodes.put(&mut self.vol, dst_dir);
        result
    }

    fn chmod(&mut self, inode: Ino, mode: u32) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        self.inodes.open(&mut self.vol, inode);
        let node = self.inodes.borrow_mut(inode);
        node.disk.i_mode = (node.disk.i_mode & S_IFMT) | (mode as u16 & 0x0FFF);
        self.inodes.mark_dirty(inode);
        self.touch(inode, CTIME);
        self.inodes.put(&mut self.vol, inode);
        Ok(())
    }

    fn chown(&mut self, inode: Ino, uid: u32, gid: u32) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        self.inodes.open(&mut self.vol, inode);
        let node = self.inodes.borrow_mut(inode);
        node.disk.i_uid = uid as u16;
        node.disk.i_gid = gid as u16;
        self.inodes.mark_dirty(inode);
        self.touch(inode, CTIME);
        self.inodes.put(&mut self.vol, inode);
        Ok(())
    }

    fn truncate(&mut self, inode: Ino, size: u64) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        self.inodes.open(&mut self.vol, inode);
        if self.inodes.borrow_mut(inode).is_dir() {
            self.inodes.put(&mut self.vol, inode);
            return Err(FsError::IsDirectory);
        }
        let result = truncate_inode(&mut self.vol, self.inodes.borrow_mut(inode), size);
        self.inodes.mark_dirty(inode);
        self.touch(inode, MTIME | CTIME);
        self.inodes.put(&mut self.vol, inode);
        result
    }

    fn flush(&mut self) {
        self.inodes.flush_dirty(&mut self.vol);
        self.vol.flush();
    }
}

pub fn root_ino() -> Ino {
    EXT2_ROOT_INO
}
