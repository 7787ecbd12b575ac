//! On-disk ext2 structures: superblock, block group descriptor and inode.
//! Every multi-byte field is little-endian on disk (spec §6.2); `Wire`
//! derives the serialize/deserialize pair that does the conversion field by
//! field, the same way the teacher's on-disk structs did.

use wire::Wire;

pub const SUPERBLOCK_OFFSET: u64 = 1024;
pub const SUPERBLOCK_SIZE: usize = 1024;
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

pub const EXT2_GOOD_OLD_REV: u32 = 0;
pub const EXT2_DYNAMIC_REV: u32 = 1;
pub const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;
pub const EXT2_GOOD_OLD_FIRST_INO: u32 = 11;

pub const EXT2_BAD_INO: u64 = 1;
pub const EXT2_ROOT_INO: u64 = 2;

pub const EXT2_NDIR_BLOCKS: usize = 12;
pub const EXT2_IND_BLOCK: usize = EXT2_NDIR_BLOCKS;
pub const EXT2_DIND_BLOCK: usize = EXT2_IND_BLOCK + 1;
pub const EXT2_TIND_BLOCK: usize = EXT2_DIND_BLOCK + 1;
pub const EXT2_N_BLOCKS: usize = EXT2_TIND_BLOCK + 1;

pub const EXT2_FEATURE_INCOMPAT_FILETYPE: u32 = 0x0002;
pub const EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER: u32 = 0x0001;
pub const EXT2_FEATURE_RO_COMPAT_LARGE_FILE: u32 = 0x0002;

/// `incompat` features this server understands; anything else set refuses
/// the mount outright (spec §3).
pub const EXT2_FEATURE_INCOMPAT_SUPPORTED: u32 = EXT2_FEATURE_INCOMPAT_FILETYPE;
/// `ro_compat` features this server understands read-write; anything else
/// set forces a read-only mount rather than a refusal (spec §3).
pub const EXT2_FEATURE_RO_COMPAT_SUPPORTED: u32 =
    EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER | EXT2_FEATURE_RO_COMPAT_LARGE_FILE;

pub const EXT2_FT_UNKNOWN: u8 = 0x00;
pub const EXT2_FT_REG_FILE: u8 = 0x01;
pub const EXT2_FT_DIR: u8 = 0x02;
pub const EXT2_FT_CHRDEV: u8 = 0x03;
pub const EXT2_FT_BLKDEV: u8 = 0x04;
pub const EXT2_FT_FIFO: u8 = 0x05;
pub const EXT2_FT_SOCK: u8 = 0x06;
pub const EXT2_FT_SYMLINK: u8 = 0x07;

pub const S_IFMT: u16 = 0xF000;
pub const S_IFDIR: u16 = 0x4000;
pub const S_IFREG: u16 = 0x8000;
pub const S_IFLNK: u16 = 0xA000;
pub const S_IFBLK: u16 = 0x6000;
pub const S_IFCHR: u16 = 0x2000;
pub const S_IFIFO: u16 = 0x1000;
pub const S_IFSOCK: u16 = 0xC000;

pub const BLOCK_GROUP_DESCRIPTOR_SIZE: usize = 32;
pub const ONDISK_INODE_SIZE: usize = 128;

pub const ATIME: u8 = 0x01;
pub const CTIME: u8 = 0x02;
pub const MTIME: u8 = 0x04;

/// 1024 bytes, located at a fixed byte offset regardless of block size.
#[derive(Wire, Debug, Clone)]
pub struct Superblock {
    pub s_inodes_count: u32,
    pub s_blocks_count: u32,
    pub s_r_blocks_count: u32,
    pub s_free_blocks_count: u32,
    pub s_free_inodes_count: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32,
    pub s_log_frag_size: u32,
    pub s_blocks_per_group: u32,
    pub s_frags_per_group: u32,
    pub s_inodes_per_group: u32,
    pub s_mtime: u32,
    pub s_wtime: u32,
    pub s_mnt_count: u16,
    pub s_max_mnt_count: u16,
    pub s_magic: u16,
    pub s_state: u16,
    pub s_errors: u16,
    pub s_minor_rev_level: u16,
    pub s_lastcheck: u32,
    pub s_checkinterval: u32,
    pub s_creator_os: u32,
    pub s_rev_level: u32,
    pub s_def_resuid: u16,
    pub s_def_resgid: u16,
    pub s_first_ino: u32,
    pub s_inode_size: u16,
    pub s_block_group_nr: u16,
    pub s_feature_compat: u32,
    pub s_feature_incompat: u32,
    pub s_feature_ro_compat: u32,
    pub s_uuid: [u8; 16],
    pub s_volume_name: [u8; 16],
    pub s_last_mounted: [u8; 64],
    pub s_algorithm_usage_bitmap: u32,
    pub s_prealloc_blocks: u8,
    pub s_prealloc_dir_blocks: u8,
    pub s_padding1: u16,
    pub s_journal_uuid: [u8; 16],
    pub s_journal_inum: u32,
    pub s_journal_dev: u32,
    pub s_last_orphan: u32,
    pub s_hash_seed: [u32; 4],
    pub s_def_hash_version: u8,
    pub s_reserved_char_pad: u8,
    pub s_reserved_word_pad: u16,
    pub s_default_mount_opts: u32,
    pub s_first_meta_bg: u32,
    pub s_reserved: [u8; 760],
}

impl Superblock {
    pub fn block_size(&self) -> u32 {
        1024 << self.s_log_block_size
    }

    pub fn is_valid(&self) -> bool {
        self.s_magic == EXT2_SUPER_MAGIC
    }

    pub fn inode_size(&self) -> u16 {
        if self.s_rev_level == EXT2_DYNAMIC_REV {
            self.s_inode_size
        } else {
            EXT2_GOOD_OLD_INODE_SIZE
        }
    }

    pub fn first_ino(&self) -> u32 {
        if self.s_rev_level == EXT2_DYNAMIC_REV {
            self.s_first_ino
        } else {
            EXT2_GOOD_OLD_FIRST_INO
        }
    }

    pub fn groups_count(&self) -> u32 {
        (self.s_blocks_count - self.s_first_data_block - 1) / self.s_blocks_per_group + 1
    }

    pub fn supports_filetype(&self) -> bool {
        self.s_feature_incompat & EXT2_FEATURE_INCOMPAT_FILETYPE != 0
    }

    /// True if `s_feature_incompat` sets a bit this server doesn't
    /// understand; mounting such a volume at all (even read-only) risks
    /// misinterpreting its on-disk layout, so the mount must be refused
    /// (spec §3).
    pub fn has_unsupported_incompat_features(&self) -> bool {
        self.s_feature_incompat & !EXT2_FEATURE_INCOMPAT_SUPPORTED != 0
    }

    /// True if `s_feature_ro_compat` sets a bit this server doesn't
    /// understand; the volume can still be read safely but must not be
    /// written to (spec §3).
    pub fn has_unsupported_ro_compat_features(&self) -> bool {
        self.s_feature_ro_compat & !EXT2_FEATURE_RO_COMPAT_SUPPORTED != 0
    }

    /// Geometry invariants spec §3 makes binding at mount time, mirroring
    /// `read_superblock`'s checks in the original server.
    pub fn validate_geometry(&self) -> Result<(), &'static str> {
        if self.s_log_block_size > 2 {
            return Err("log_block_size out of range");
        }
        let block_size = self.block_size();
        if block_size % 512 != 0 {
            return Err("block size is not a multiple of 512");
        }
        if SUPERBLOCK_SIZE as u32 > block_size {
            return Err("superblock size is larger than block size");
        }
        let inode_size = self.inode_size() as u32;
        if inode_size == 0 || (inode_size & (inode_size - 1)) != 0 || inode_size > block_size {
            return Err("inode size is not a power of two within the block size");
        }
        if block_size / inode_size == 0 {
            return Err("inodes_per_block is 0");
        }
        if self.s_inodes_per_group == 0 {
            return Err("inodes_per_group is 0");
        }
        if self.s_blocks_per_group == 0 {
            return Err("blocks_per_group is 0");
        }
        Ok(())
    }
}

/// 32 bytes per group, stored contiguously in the group descriptor table.
#[derive(Wire, Debug, Clone, Copy, Default)]
pub struct GroupDesc {
    pub g_block_bitmap: u32,
    pub g_inode_bitmap: u32,
    pub g_inode_table: u32,
    pub g_free_blocks_count: u16,
    pub g_free_inodes_count: u16,
    pub g_used_dirs_count: u16,
    pub pad: u16,
    pub reserved: [u32; 3],
}

/// 128 bytes per inode (`EXT2_GOOD_OLD_INODE_SIZE`); `i_block` holds 12
/// direct block numbers plus single/double/triple indirect block numbers
/// (spec §2, §4.4).
#[derive(Wire, Debug, Clone, Copy)]
pub struct OndiskInode {
    pub i_mode: u16,
    pub i_uid: u16,
    pub i_size: u32,
    pub i_atime: u32,
    pub i_ctime: u32,
    pub i_mtime: u32,
    pub i_dtime: u32,
    pub i_gid: u16,
    pub i_links_count: u16,
    pub i_blocks: u32,
    pub i_flags: u32,
    pub l_i_reserved1: u32,
    pub i_block: [u32; EXT2_N_BLOCKS],
    pub i_generation: u32,
    pub i_file_acl: u32,
    pub i_dir_acl: u32,
    pub i_faddr: u32,
    pub l_i_reserved_osd2: [u32; 3],
}

impl Default for OndiskInode {
    fn default() -> Self {
        OndiskInode {
            i_mode: 0,
            i_uid: 0,
            i_size: 0,
            i_atime: 0,
            i_ctime: 0,
            i_mtime: 0,
            i_dtime: 0,
            i_gid: 0,
            i_links_count: 0,
            i_blocks: 0,
            i_flags: 0,
            l_i_reserved1: 0,
            i_block: [0; EXT2_N_BLOCKS],
            i_generation: 0,
            i_file_acl: 0,
            i_dir_acl: 0,
            i_faddr: 0,
            l_i_reserved_osd2: [0; 3],
        }
    }
}

impl OndiskInode {
    pub fn is_dir(&self) -> bool {
        self.i_mode & S_IFMT == S_IFDIR
    }

    pub fn file_type_byte(&self) -> u8 {
        match self.i_mode & S_IFMT {
            S_IFREG => EXT2_FT_REG_FILE,
            S_IFDIR => EXT2_FT_DIR,
            S_IFCHR => EXT2_FT_CHRDEV,
            S_IFBLK => EXT2_FT_BLKDEV,
            S_IFIFO => EXT2_FT_FIFO,
            S_IFSOCK => EXT2_FT_SOCK,
            S_IFLNK => EXT2_FT_SYMLINK,
            _ => EXT2_FT_UNKNOWN,
        }
    }
}
