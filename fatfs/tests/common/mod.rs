//! Builds a minimal FAT12 volume (one MBR partition, 512-byte sectors, a
//! single sector per cluster) in a temp file so the server can be driven
//! end-to-end without a real `mkfs.fat`.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use fatfs::format::{
    MbrPartitionEntry, MBR_PARTITION_TABLE_OFFSET,
};
use wire::{Endianness, WireSerialize};

const SECTOR_SIZE: usize = 512;

/// Sector offsets, relative to the partition start, of a FAT12 volume with
/// `reserved_sectors_cnt=1`, `fat_cnt=2`, `sectors_per_fat=1`,
/// `root_entries_cnt=16` (one sector), `sectors_per_cluster=1`.
pub const PARTITION_START: u32 = 1;
pub const FAT_SECTORS: u32 = 1;
pub const ROOT_DIR_SECTORS: u32 = 1;
pub const FIRST_DATA_SECTOR: u32 = 1 + 2 * FAT_SECTORS + ROOT_DIR_SECTORS; // relative: reserved + 2 FATs + root
pub const DATA_SECTORS: u32 = 200;
pub const TOTAL_PARTITION_SECTORS: u32 = FIRST_DATA_SECTOR + DATA_SECTORS;

/// Lay down an MBR and a FAT12 BPB/FAT/root directory, returning the
/// reopenable file path.
pub fn make_temp_volume() -> tempfile::TempPath {
    let named = tempfile::NamedTempFile::new().unwrap();
    let (mut file, path) = named.into_parts();

    let total_sectors = PARTITION_START + TOTAL_PARTITION_SECTORS;
    file.set_len(total_sectors as u64 * SECTOR_SIZE as u64).unwrap();

    write_mbr(&mut file);
    write_bpb(&mut file);
    // FAT tables and root directory start zeroed (all entries free), which
    // `set_len` already gives us via the sparse-extend above.

    path
}

fn write_mbr(file: &mut File) {
    let mut sector = vec![0u8; SECTOR_SIZE];
    let entry = MbrPartitionEntry {
        status: 0,
        chs_first: [0; 3],
        partition_type: 0x01,
        chs_last: [0; 3],
        lba: PARTITION_START,
        nsectors: TOTAL_PARTITION_SECTORS,
    };
    let off = MBR_PARTITION_TABLE_OFFSET;
    entry
        .serialize(Endianness::Little, &mut sector[off..off + 16])
        .unwrap();
    sector[510] = 0x55;
    sector[511] = 0xaa;
    write_sector(file, 0, &sector);
}

fn write_bpb(file: &mut File) {
    let mut sector = vec![0u8; SECTOR_SIZE];
    // jump + oem_name
    sector[0..3].copy_from_slice(&[0xeb, 0x3c, 0x90]);
    sector[3..11].copy_from_slice(b"TESTFAT ");
    put_u16(&mut sector, 11, SECTOR_SIZE as u16); // bytes_per_sector
    sector[13] = 1; // sectors_per_cluster
    put_u16(&mut sector, 14, 1); // reserved_sectors_cnt
    sector[16] = 2; // fat_cnt
    put_u16(&mut sector, 17, 16); // root_entries_cnt
    put_u16(&mut sector, 19, TOTAL_PARTITION_SECTORS as u16); // total_sectors_cnt16
    sector[21] = 0xf8; // media_type
    put_u16(&mut sector, 22, FAT_SECTORS as u16); // sectors_per_fat16
    put_u16(&mut sector, 24, 0); // sectors_per_track
    put_u16(&mut sector, 26, 0); // heads_per_cylinder
    put_u32(&mut sector, 28, 0); // hidden_sectors_cnt
    put_u32(&mut sector, 32, 0); // total_sectors_cnt32
    sector[510] = 0x55;
    sector[511] = 0xaa;
    write_sector(file, PARTITION_START, &sector);
}

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}
fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn write_sector(file: &mut File, sector: u32, data: &[u8]) {
    file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64)).unwrap();
    file.write_all(&data[..SECTOR_SIZE]).unwrap();
}

pub fn open_fs(path: &std::path::Path, read_only: bool) -> fatfs::FatFs<fs_core::FileBlockDevice> {
    let file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let device = fs_core::FileBlockDevice::open(file, SECTOR_SIZE as u32).unwrap();
    let vol = fatfs::Volume::open(device, 64).unwrap();
    fatfs::FatFs::new(vol, read_only)
}
