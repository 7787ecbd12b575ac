use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// A byte-addressable random-access handle to the backing medium (spec §1 —
/// this is the boundary we consume, not the device driver itself).
pub trait BlockDevice {
    fn block_size(&self) -> u32;
    fn block_count(&self) -> u64;
    fn read_block(&mut self, block: u32, buf: &mut [u8]) -> io::Result<()>;
    fn write_block(&mut self, block: u32, buf: &[u8]) -> io::Result<()>;

    /// Byte-granular access used for structures that aren't block-aligned,
    /// such as the ext2 superblock (fixed 1024-byte region at a fixed byte
    /// offset regardless of the filesystem's block size).
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;
}

/// A `BlockDevice` backed by a plain file — the userspace stand-in for a
/// raw block device node.
pub struct FileBlockDevice {
    file: File,
    block_size: u32,
    block_count: u64,
}

impl FileBlockDevice {
    pub fn open(file: File, block_size: u32) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            block_size,
            block_count: len / block_size as u64,
        })
    }
}

impl BlockDevice for FileBlockDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_block(&mut self, block: u32, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), self.block_size as usize);
        self.file
            .seek(SeekFrom::Start(block as u64 * self.block_size as u64))?;
        self.file.read_exact(buf)
    }

    fn write_block(&mut self, block: u32, buf: &[u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), self.block_size as usize);
        self.file
            .seek(SeekFrom::Start(block as u64 * self.block_size as u64))?;
        self.file.write_all(buf)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn round_trips_a_block() {
        let mut tmp = tempfile::tempfile().unwrap();
        tmp.write_all(&vec![0u8; 4096]).unwrap();
        let mut dev = FileBlockDevice::open(tmp, 1024).unwrap();
        assert_eq!(dev.block_count(), 4);

        let mut block = vec![0xAB; 1024];
        dev.write_block(2, &block).unwrap();
        block.fill(0);
        dev.read_block(2, &mut block).unwrap();
        assert!(block.iter().all(|&b| b == 0xAB));
    }
}
