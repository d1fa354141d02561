//! Block device: owns the container file and its mmap'd header+bitmap prefix, and
//! performs fixed-size block reads/writes against the data region that follows.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, warn};
use memmap2::MmapMut;

use crate::bitmap::Bitmap;
use crate::error::{FsError, Result};
use crate::layout::{DiskHeader, RawBlock, BLOCK_SIZE};

/// Random-access block array backed by a host file. Owns the bitmap and the
/// authoritative `free_blocks` count; data blocks are read and written at
/// `metadata_size + n * BLOCK_SIZE`.
pub struct BlockDevice {
    file: File,
    mmap: MmapMut,
    metadata_size: usize,
    num_blocks: u32,
}

impl BlockDevice {
    /// Opens `path` if it exists (validating it), or creates and formats a fresh
    /// container sized for `num_blocks` data blocks.
    pub fn open(path: impl AsRef<Path>, num_blocks: u32) -> Result<Self> {
        let path = path.as_ref();
        match OpenOptions::new().read(true).write(true).create_new(true).open(path) {
            Ok(file) => Self::create(file, num_blocks),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                Self::load(file, num_blocks)
            }
            Err(e) => Err(FsError::Io(e)),
        }
    }

    fn metadata_layout(num_blocks: u32) -> (usize, usize) {
        let bitmap_entries = num_blocks.div_ceil(8) as usize;
        let raw = std::mem::size_of::<DiskHeader>() + bitmap_entries;
        let metadata_size = raw.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        (bitmap_entries, metadata_size)
    }

    fn create(file: File, num_blocks: u32) -> Result<Self> {
        let (bitmap_entries, metadata_size) = Self::metadata_layout(num_blocks);
        let total_size = metadata_size as u64 + num_blocks as u64 * BLOCK_SIZE as u64;
        file.set_len(total_size).map_err(|e| FsError::Fatal(format!("ftruncate failed: {e}")))?;

        let mut mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| FsError::Fatal(format!("mmap failed: {e}")))?
        };

        let header = DiskHeader::new(num_blocks, bitmap_entries as u32);
        mmap[..std::mem::size_of::<DiskHeader>()].copy_from_slice(bytemuck::bytes_of(&header));
        let bitmap_start = std::mem::size_of::<DiskHeader>();
        mmap[bitmap_start..bitmap_start + bitmap_entries].fill(0);

        debug!("created container: {num_blocks} blocks, metadata_size={metadata_size}");

        Ok(Self { file, mmap, metadata_size, num_blocks })
    }

    fn load(file: File, expected_num_blocks: u32) -> Result<Self> {
        let (bitmap_entries, metadata_size) = Self::metadata_layout(expected_num_blocks);

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| FsError::Fatal(format!("mmap failed: {e}")))?
        };

        let header: DiskHeader =
            bytemuck::pod_read_unaligned(&mmap[..std::mem::size_of::<DiskHeader>()]);

        if !header.verify_checksum() {
            return Err(FsError::Fatal("disk header checksum mismatch".into()));
        }
        if header.num_blocks != expected_num_blocks || header.bitmap_blocks != expected_num_blocks
        {
            return Err(FsError::Fatal(format!(
                "container block count mismatch: header has {}, expected {}",
                header.num_blocks, expected_num_blocks
            )));
        }
        if header.free_blocks > header.num_blocks {
            return Err(FsError::Fatal("free_blocks exceeds num_blocks".into()));
        }
        if header.bitmap_entries as usize != bitmap_entries {
            return Err(FsError::Fatal("bitmap_entries mismatch".into()));
        }

        debug!("opened container: {expected_num_blocks} blocks, free={}", header.free_blocks);

        Ok(Self { file, mmap, metadata_size, num_blocks: expected_num_blocks })
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn free_blocks(&self) -> u32 {
        self.header().free_blocks
    }

    fn header(&self) -> DiskHeader {
        bytemuck::pod_read_unaligned(&self.mmap[..std::mem::size_of::<DiskHeader>()])
    }

    fn set_header(&mut self, mut header: DiskHeader) {
        header.checksum = header.compute_checksum();
        self.mmap[..std::mem::size_of::<DiskHeader>()].copy_from_slice(bytemuck::bytes_of(&header));
    }

    fn bitmap(&mut self) -> Bitmap<'_> {
        let start = std::mem::size_of::<DiskHeader>();
        let entries = self.header().bitmap_entries as usize;
        let num_blocks = self.num_blocks as usize;
        Bitmap::new(&mut self.mmap[start..start + entries], num_blocks)
    }

    fn in_range(&self, n: u32) -> bool {
        n < self.num_blocks
    }

    fn seek_to_block(&mut self, n: u32) -> Result<()> {
        let offset = self.metadata_size as u64 + n as u64 * BLOCK_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Reads block `n` into `dest`. Fails if `n` is out of range or currently unallocated.
    pub fn read_block(&mut self, n: u32, dest: &mut RawBlock) -> Result<()> {
        if !self.in_range(n) {
            return Err(FsError::OutOfRange);
        }
        if !self.bitmap().get(n as usize)? {
            return Err(FsError::OutOfRange);
        }
        self.seek_to_block(n)?;
        read_fully(&mut self.file, dest)
    }

    /// Writes `src` to block `n`, marking it allocated. Decrements `free_blocks` only if
    /// the block was previously free.
    pub fn write_block(&mut self, n: u32, src: &RawBlock) -> Result<()> {
        if !self.in_range(n) {
            return Err(FsError::OutOfRange);
        }
        let was_free = !self.bitmap().get(n as usize)?;
        self.seek_to_block(n)?;
        write_fully(&mut self.file, src)?;
        self.bitmap().set(n as usize, true)?;
        if was_free {
            let mut header = self.header();
            header.free_blocks -= 1;
            self.set_header(header);
        }
        debug!("write_block({n}), was_free={was_free}");
        Ok(())
    }

    /// Clears block `n`'s allocation bit. Increments `free_blocks` only if the block was
    /// previously allocated.
    pub fn free_block(&mut self, n: u32) -> Result<()> {
        if !self.in_range(n) {
            return Err(FsError::OutOfRange);
        }
        let was_allocated = self.bitmap().get(n as usize)?;
        self.bitmap().set(n as usize, false)?;
        if was_allocated {
            let mut header = self.header();
            header.free_blocks += 1;
            self.set_header(header);
        }
        debug!("free_block({n}), was_allocated={was_allocated}");
        Ok(())
    }

    /// Lowest free block index `>= start`.
    pub fn get_free_block(&mut self, start: u32) -> Result<u32> {
        self.bitmap()
            .find(start as usize, false)
            .map(|i| i as u32)
            .ok_or(FsError::NoSpace)
    }

    /// `msync`s the metadata (header + bitmap) region.
    pub fn flush(&mut self) -> Result<()> {
        self.mmap.flush().map_err(|e| {
            warn!("flush failed: {e}");
            FsError::Fatal(format!("msync failed: {e}"))
        })
    }
}

/// Reads exactly `dest.len()` bytes, retrying on short reads and `Interrupted`.
fn read_fully(file: &mut File, dest: &mut [u8]) -> Result<()> {
    let mut total = 0;
    while total < dest.len() {
        match file.read(&mut dest[total..]) {
            Ok(0) => return Err(FsError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read from container file",
            ))),
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FsError::Io(e)),
        }
    }
    Ok(())
}

/// Writes exactly `src.len()` bytes, retrying on short writes and `Interrupted`.
fn write_fully(file: &mut File, src: &[u8]) -> Result<()> {
    let mut total = 0;
    while total < src.len() {
        match file.write(&src[total..]) {
            Ok(0) => {
                return Err(FsError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "short write to container file",
                )))
            }
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FsError::Io(e)),
        }
    }
    Ok(())
}

/// Zeroes a [`BlockHeader`]-prefixed block's header fields in place. Used by callers that
/// build a fresh `RawBlock` via `bytemuck::bytes_of`.
pub fn zero_block() -> RawBlock {
    [0u8; BLOCK_SIZE]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_path() -> std::path::PathBuf {
        let f = NamedTempFile::new().unwrap();
        let path = f.path().to_path_buf();
        // Drop the handle but keep the path; BlockDevice::open creates it fresh.
        drop(f);
        std::fs::remove_file(&path).ok();
        path
    }

    #[test]
    fn create_then_reopen_round_trips_header() {
        let path = temp_path();
        {
            let mut dev = BlockDevice::open(&path, 64).unwrap();
            assert_eq!(dev.num_blocks(), 64);
            assert_eq!(dev.free_blocks(), 64);
            let block = [7u8; BLOCK_SIZE];
            dev.write_block(0, &block).unwrap();
            dev.flush().unwrap();
            assert_eq!(dev.free_blocks(), 63);
        }
        {
            let mut dev = BlockDevice::open(&path, 64).unwrap();
            assert_eq!(dev.free_blocks(), 63);
            let mut out = zero_block();
            dev.read_block(0, &mut out).unwrap();
            assert_eq!(out, [7u8; BLOCK_SIZE]);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn read_unallocated_block_fails() {
        let path = temp_path();
        let mut dev = BlockDevice::open(&path, 8).unwrap();
        let mut out = zero_block();
        assert!(dev.read_block(1, &mut out).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn free_block_is_idempotent_on_counter() {
        let path = temp_path();
        let mut dev = BlockDevice::open(&path, 8).unwrap();
        let block = [1u8; BLOCK_SIZE];
        dev.write_block(2, &block).unwrap();
        assert_eq!(dev.free_blocks(), 7);
        dev.free_block(2).unwrap();
        assert_eq!(dev.free_blocks(), 8);
        // Freeing an already-free block does not increment again.
        dev.free_block(2).unwrap();
        assert_eq!(dev.free_blocks(), 8);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn get_free_block_finds_lowest() {
        let path = temp_path();
        let mut dev = BlockDevice::open(&path, 8).unwrap();
        let block = [1u8; BLOCK_SIZE];
        dev.write_block(0, &block).unwrap();
        dev.write_block(1, &block).unwrap();
        assert_eq!(dev.get_free_block(0).unwrap(), 2);
    }

    #[test]
    fn out_of_range_checksum_rejected() {
        let path = temp_path();
        {
            BlockDevice::open(&path, 8).unwrap();
        }
        assert!(BlockDevice::open(&path, 16).is_err());
        std::fs::remove_file(&path).ok();
    }
}
