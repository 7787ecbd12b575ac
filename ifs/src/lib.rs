//! In-memory, read-only filesystem server (spec §12), grounded on
//! `examples/original_source/ifs/main.c`. The entire backing image is read
//! into memory once at startup and parsed as a fixed node table; every
//! mutating verb replies [`FsError::ReadOnly`].

pub mod format;

use fs_core::FsOps;
use fs_proto::{Attr, DirEntryRecord, FsError, Ino};
use wire::{Endianness, WireDeserialize};

use format::{IfsHeader, IfsNode, IFS_HEADER_SIZE, IFS_MAGIC, IFS_NODE_SIZE};

const S_IRWXUGO: u32 = 0o777;
const S_IFMT: u32 = 0o170000;
const EXT2_FT_REG_FILE: u8 = 1;
const EXT2_FT_DIR: u8 = 2;

pub struct Ifs {
    image: Vec<u8>,
    nodes: Vec<IfsNode>,
}

impl Ifs {
    /// Parse `image` as an IFS archive, grounded on `init_ifs`'s header
    /// validation and `ifs_inode_table` setup.
    pub fn open(image: Vec<u8>) -> Result<Self, String> {
        if image.len() < IFS_HEADER_SIZE {
            return Err("image too small for IFS header".into());
        }
        let (header, _) = IfsHeader::deserialize(Endianness::Little, &image[..IFS_HEADER_SIZE])
            .map_err(|e| format!("parsing IFS header: {e}"))?;
        if header.magic != IFS_MAGIC {
            return Err("IFS magic header not found".into());
        }

        let table_start = header.node_table_offset as usize;
        let node_cnt = header.node_cnt.max(0) as usize;
        let mut nodes = Vec::with_capacity(node_cnt);
        for i in 0..node_cnt {
            let off = table_start + i * IFS_NODE_SIZE;
            let slice = image
                .get(off..off + IFS_NODE_SIZE)
                .ok_or("IFS node table runs past end of image")?;
            let (node, _) = IfsNode::deserialize(Endianness::Little, slice)
                .map_err(|e| format!("parsing IFS node {i}: {e}"))?;
            nodes.push(node);
        }

        Ok(Self { image, nodes })
    }

    fn attr_of(&self, node: &IfsNode) -> Attr {
        Attr {
            inode: node.inode_nr as Ino,
            size: node.file_size as u64,
            mode: S_IRWXUGO | (node.permissions & S_IFMT),
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        }
    }

    fn file_type(node: &IfsNode) -> u8 {
        if node.permissions & S_IFMT == 0o040000 {
            EXT2_FT_DIR
        } else {
            EXT2_FT_REG_FILE
        }
    }
}

impl FsOps for Ifs {
    fn lookup(&mut self, dir_inode: Ino, name: &str) -> Result<Attr, FsError> {
        self.nodes
            .iter()
            .find(|n| n.parent_inode_nr as Ino == dir_inode && n.name_str() == name)
            .map(|n| self.attr_of(n))
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
        Err(FsError::ReadOnly)
    }

    fn read(&mut self, inode: Ino, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let node = self
            .nodes
            .iter()
            .find(|n| n.inode_nr as Ino == inode)
            .ok_or(FsError::NotFound)?;
        if offset >= node.file_size as u64 {
            return Ok(Vec::new());
        }
        let start = node.file_offset as u64 + offset;
        let remaining = node.file_size as u64 - offset;
        let count = (size as u64).min(remaining) as usize;
        let start = start as usize;
        self.image
            .get(start..start + count)
            .map(|s| s.to_vec())
            .ok_or(FsError::Io)
    }

    fn write(&mut self, _inode: Ino, _offset: u64, _data: &[u8]) -> Result<u32, FsError> {
        Err(FsError::ReadOnly)
    }

    fn readdir(
        &mut self,
        dir_inode: Ino,
        cookie: u64,
        size: u32,
    ) -> Result<(u64, Vec<DirEntryRecord>), FsError> {
        let mut entries = Vec::new();
        let mut idx = cookie as usize;
        let mut used = 0u32;
        while idx < self.nodes.len() {
            let node = &self.nodes[idx];
            if !node.is_free() && node.parent_inode_nr as Ino == dir_inode {
                let record = DirEntryRecord {
                    inode: node.inode_nr as Ino,
                    file_type: Self::file_type(node),
                    name: node.name_str().to_string(),
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
        Err(FsError::ReadOnly)
    }

    fn rmdir(&mut self, _dir_inode: Ino, _name: &str) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn mknod(
        &mut self,
        _dir_inode: Ino,
        _name: &str,
        _mode: u32,
        _uid: u32,
        _gid: u32,
    ) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn unlink(&mut self, _dir_inode: Ino, _name: &str) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn rename(
        &mut self,
        _src_dir: Ino,
        _src_name: &str,
        _dst_dir: Ino,
        _dst_name: &str,
    ) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn chmod(&mut self, _inode: Ino, _mode: u32) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn chown(&mut self, _inode: Ino, _uid: u32, _gid: u32) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn truncate(&mut self, _inode: Ino, _size: u64) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn flush(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use wire::WireSerialize;

    fn sample_image() -> Vec<u8> {
        let header = IfsHeader {
            magic: IFS_MAGIC,
            node_table_offset: IFS_HEADER_SIZE as u32,
            node_cnt: 2,
            ifs_size: 0,
        };
        let mut root_name = [0u8; 32];
        root_name[0] = b'.';
        let root = IfsNode {
            name: root_name,
            inode_nr: 0,
            parent_inode_nr: -1,
            permissions: 0o040755,
            uid: 0,
            gid: 0,
            file_offset: 0,
            file_size: 0,
        };
        let mut file_name = [0u8; 32];
        file_name[..5].copy_from_slice(b"hello");
        let data_offset = IFS_HEADER_SIZE + 2 * IFS_NODE_SIZE;
        let data = b"hi there";
        let file = IfsNode {
            name: file_name,
            inode_nr: 1,
            parent_inode_nr: 0,
            permissions: 0o100644,
            uid: 0,
            gid: 0,
            file_offset: data_offset as u32,
            file_size: data.len() as u32,
        };

        let mut image = vec![0u8; data_offset + data.len()];
        let mut buf = [0u8; IFS_HEADER_SIZE];
        header.serialize(Endianness::Little, &mut buf).unwrap();
        image[..IFS_HEADER_SIZE].copy_from_slice(&buf);

        let mut nbuf = [0u8; IFS_NODE_SIZE];
        root.serialize(Endianness::Little, &mut nbuf).unwrap();
        image[IFS_HEADER_SIZE..IFS_HEADER_SIZE + IFS_NODE_SIZE].copy_from_slice(&nbuf);

        file.serialize(Endianness::Little, &mut nbuf).unwrap();
        image[IFS_HEADER_SIZE + IFS_NODE_SIZE..IFS_HEADER_SIZE + 2 * IFS_NODE_SIZE]
            .copy_from_slice(&nbuf);

        image[data_offset..].copy_from_slice(data);
        image
    }

    #[test]
    fn lookup_and_read_roundtrip() {
        let mut fs = Ifs::open(sample_image()).unwrap();
        let attr = fs.lookup(0, "hello").unwrap();
        assert_eq!(attr.size, 8);
        let data = fs.read(attr.inode, 0, 100).unwrap();
        assert_eq!(data, b"hi there");
    }

    #[test]
    fn write_is_rejected() {
        let mut fs = Ifs::open(sample_image()).unwrap();
        assert_eq!(fs.write(1, 0, b"x"), Err(FsError::ReadOnly));
    }

    #[test]
    fn readdir_lists_root_children() {
        let mut fs = Ifs::open(sample_image()).unwrap();
        let (_, entries) = fs.readdir(0, 0, 64).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "hello");
    }
}
