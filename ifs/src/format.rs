//! On-image layout (spec §12), grounded on `ifs.h`'s `IFSHeader`/`IFSNode`.

use wire::Wire;

pub const IFS_MAGIC: [u8; 4] = *b"MAGC";
pub const IFS_HEADER_SIZE: usize = 16;
pub const IFS_NODE_SIZE: usize = 60;
pub const IFS_NAME_LEN: usize = 32;

#[derive(Wire, Debug, Clone, Copy)]
pub struct IfsHeader {
    pub magic: [u8; 4],
    pub node_table_offset: u32,
    pub node_cnt: i32,
    pub ifs_size: u32,
}

#[derive(Wire, Debug, Clone, Copy)]
pub struct IfsNode {
    pub name: [u8; IFS_NAME_LEN],
    pub inode_nr: i32,
    pub parent_inode_nr: i32,
    pub permissions: u32,
    pub uid: i32,
    pub gid: i32,
    pub file_offset: u32,
    pub file_size: u32,
}

impl IfsNode {
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }
}
