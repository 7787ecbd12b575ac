//! Mounted-volume state: BPB/FSInfo plus the sector cache (spec §13),
//! grounded on `init.c`'s `detectPartition` and the `FatSB` global.

use fs_core::{BlockCache, BlockDevice, CacheMode};
use wire::{Endianness, WireDeserialize, WireSerialize};

use crate::format::{
    FatBpb, FatBpb32Ext, FatFsInfo, FatType, MbrPartitionEntry, BPB_EXT_OFFSET,
    FSINFO_LEAD_SIG, FSINFO_STRUC_SIG, FSINFO_TRAIL_SIG, MBR_PARTITION_COUNT,
    MBR_PARTITION_ENTRY_SIZE, MBR_PARTITION_TABLE_OFFSET, SECTOR_SIZE,
};

pub struct Volume<D: BlockDevice> {
    pub cache: BlockCache<D>,
    pub partition_start: u32,
    pub bpb: FatBpb,
    pub bpb32: FatBpb32Ext,
    pub fat_type: FatType,
    pub first_data_sector: u32,
    pub root_dir_sectors: u32,
    pub sectors_per_fat: u32,
    pub data_sectors: u32,
    pub cluster_cnt: u32,
    pub start_search_cluster: u32,
    pub fsinfo: Option<FatFsInfo>,
    fsinfo_dirty: bool,
}

fn read_sector<D: BlockDevice>(cache: &mut BlockCache<D>, sector: u32) -> Vec<u8> {
    let slot = cache.get(sector, CacheMode::Read);
    cache.data(slot).to_vec()
}

/// Derived mount parameters for one candidate partition, computed without
/// owning the cache so several candidates can be probed before committing.
struct VolumeMeta {
    partition_start: u32,
    bpb: FatBpb,
    bpb32: FatBpb32Ext,
    fat_type: FatType,
    first_data_sector: u32,
    root_dir_sectors: u32,
    sectors_per_fat: u32,
    data_sectors: u32,
    cluster_cnt: u32,
    fsinfo: Option<FatFsInfo>,
}

impl<D: BlockDevice> Volume<D> {
    /// Scan the MBR partition table for the first usable FAT partition,
    /// mirroring `detectPartition`'s per-partition BPB sanity checks.
    pub fn open(device: D, cache_capacity: usize) -> Result<Self, String> {
        if device.block_size() != SECTOR_SIZE as u32 {
            return Err(format!(
                "fatfs requires a {SECTOR_SIZE}-byte sector device, got {}",
                device.block_size()
            ));
        }
        let mut cache = BlockCache::new(device, cache_capacity);

        let mbr = read_sector(&mut cache, 0);
        let mut meta = None;
        for i in 0..MBR_PARTITION_COUNT {
            let off = MBR_PARTITION_TABLE_OFFSET + i * MBR_PARTITION_ENTRY_SIZE;
            let (entry, _) = MbrPartitionEntry::deserialize(
                Endianness::Little,
                &mbr[off..off + MBR_PARTITION_ENTRY_SIZE],
            )
            .map_err(|e| format!("parsing MBR entry {i}: {e}"))?;
            if entry.partition_type == 0 {
                continue;
            }
            if let Some(m) = Self::probe_partition(&mut cache, entry.lba) {
                meta = Some(m);
                break;
            }
        }

        let meta = meta.ok_or("no usable FAT partition found")?;
        Ok(Volume {
            cache,
            partition_start: meta.partition_start,
            bpb: meta.bpb,
            bpb32: meta.bpb32,
            fat_type: meta.fat_type,
            first_data_sector: meta.first_data_sector,
            root_dir_sectors: meta.root_dir_sectors,
            sectors_per_fat: meta.sectors_per_fat,
            data_sectors: meta.data_sectors,
            cluster_cnt: meta.cluster_cnt,
            start_search_cluster: 2,
            fsinfo: meta.fsinfo,
            fsinfo_dirty: false,
        })
    }

    fn probe_partition(cache: &mut BlockCache<D>, partition_start: u32) -> Option<VolumeMeta> {
        let sector0 = read_sector(cache, partition_start);
        let (bpb, _) = FatBpb::deserialize(Endianness::Little, &sector0[..36]).ok()?;
        let (bpb32, _) =
            FatBpb32Ext::deserialize(Endianness::Little, &sector0[BPB_EXT_OFFSET..]).ok()?;

        if bpb.bytes_per_sector as usize != SECTOR_SIZE {
            return None;
        }
        if !(1..=128).contains(&bpb.sectors_per_cluster)
            || !bpb.sectors_per_cluster.is_power_of_two()
        {
            return None;
        }
        if bpb.reserved_sectors_cnt == 0 || bpb.fat_cnt == 0 {
            return None;
        }
        if !(bpb.media_type == 0 || bpb.media_type == 1 || bpb.media_type >= 0xf0) {
            return None;
        }
        if bpb.total_sectors_cnt16 == 0 && bpb.total_sectors_cnt32 == 0 {
            return None;
        }
        if bpb.sectors_per_fat16 == 0 && bpb32.sectors_per_fat32 == 0 {
            return None;
        }

        let root_dir_sectors =
            ((bpb.root_entries_cnt as u32 * 32) + 511) / SECTOR_SIZE as u32;
        let sectors_per_fat = if bpb.sectors_per_fat16 != 0 {
            bpb.sectors_per_fat16 as u32
        } else {
            bpb32.sectors_per_fat32
        };
        let total_sectors_cnt = if bpb.total_sectors_cnt16 != 0 {
            bpb.total_sectors_cnt16 as u32
        } else {
            bpb.total_sectors_cnt32
        };

        let first_data_sector = bpb.reserved_sectors_cnt as u32
            + (bpb.fat_cnt as u32 * sectors_per_fat)
            + root_dir_sectors;
        let data_sectors = total_sectors_cnt
            - (bpb.reserved_sectors_cnt as u32 + (bpb.fat_cnt as u32 * sectors_per_fat) + root_dir_sectors);
        let cluster_cnt = data_sectors / bpb.sectors_per_cluster as u32;

        // The original skips FAT12 partitions entirely here (an unfinished
        // code path, not a format limitation — `ReadFATEntry`/`WriteFATEntry`
        // both fully implement it); FAT12 is supported like the other two.
        let fat_type = if cluster_cnt < 4085 {
            FatType::Fat12
        } else if cluster_cnt < 65525 {
            FatType::Fat16
        } else {
            FatType::Fat32
        };

        if fat_type == FatType::Fat32 && bpb32.fs_version != 0 {
            return None;
        }
        if matches!(fat_type, FatType::Fat12 | FatType::Fat16) && bpb.root_entries_cnt == 0 {
            return None;
        }

        let fsinfo = if fat_type == FatType::Fat32 {
            let sector = partition_start + bpb32.fs_info as u32;
            let raw = read_sector(cache, sector);
            FatFsInfo::deserialize(Endianness::Little, &raw)
                .ok()
                .map(|(info, _)| info)
                .filter(|info| {
                    info.lead_sig == FSINFO_LEAD_SIG
                        && info.struc_sig == FSINFO_STRUC_SIG
                        && info.trail_sig == FSINFO_TRAIL_SIG
                })
        } else {
            None
        };

        Some(VolumeMeta {
            partition_start,
            bpb,
            bpb32,
            fat_type,
            first_data_sector,
            root_dir_sectors,
            sectors_per_fat,
            data_sectors,
            cluster_cnt,
            fsinfo,
        })
    }

    pub fn root_is_fixed_region(&self) -> bool {
        matches!(self.fat_type, FatType::Fat12 | FatType::Fat16)
    }

    pub fn root_cluster(&self) -> u32 {
        self.bpb32.root_cluster
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bpb.sectors_per_cluster as u32 * SECTOR_SIZE as u32
    }

    pub fn mark_fsinfo_dirty(&mut self) {
        self.fsinfo_dirty = true;
    }

    pub fn flush(&mut self) {
        if self.fsinfo_dirty {
            if let Some(info) = &self.fsinfo {
                let mut buf = vec![0u8; SECTOR_SIZE];
                info.serialize(Endianness::Little, &mut buf)
                    .expect("FSInfo always fits one sector");
                let sector = self.partition_start + self.bpb32.fs_info as u32;
                let slot = self.cache.get(sector, CacheMode::Clear);
                self.cache.data_mut(slot).copy_from_slice(&buf);
                self.cache.mark_dirty(slot);
            }
            self.fsinfo_dirty = false;
        }
        self.cache.flush_all();
    }
}
