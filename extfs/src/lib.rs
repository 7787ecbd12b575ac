pub mod alloc;
pub mod blockmap;
pub mod dir;
pub mod file;
pub mod format;
pub mod fs;
pub mod inode;
pub mod superblock;

pub use fs::Ext2Fs;
