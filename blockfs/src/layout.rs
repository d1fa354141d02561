//! On-disk layout: fixed-size, `bytemuck`-`Pod` records that are written and read
//! verbatim as raw bytes. Every block-sized record in this module is exactly
//! [`BLOCK_SIZE`] bytes; a compile-time assertion at the bottom of the file enforces it.

use bytemuck::{Pod, Zeroable};

/// Size of one block, in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Maximum filename length, including the zero terminator.
pub const MAX_FILENAME_LEN: usize = 128;

/// Sentinel `directory_block` value meaning "no parent" (the root directory).
pub const NO_PARENT: i32 = -1;

/// Header stored at the very start of the container, before the bitmap.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DiskHeader {
    pub num_blocks: u32,
    pub free_blocks: u32,
    pub bitmap_entries: u32,
    pub bitmap_blocks: u32,
    /// CRC32 over the four fields above; zero while they're being computed.
    pub checksum: u32,
    pub _pad: u32,
}

impl DiskHeader {
    pub fn new(num_blocks: u32, bitmap_entries: u32) -> Self {
        let mut header = Self {
            num_blocks,
            free_blocks: num_blocks,
            bitmap_entries,
            bitmap_blocks: num_blocks,
            checksum: 0,
            _pad: 0,
        };
        header.checksum = header.compute_checksum();
        header
    }

    /// CRC32 of every field except `checksum` itself.
    pub fn compute_checksum(&self) -> u32 {
        let mut buf = [0u8; 16];
        buf[0..4].copy_from_slice(&self.num_blocks.to_le_bytes());
        buf[4..8].copy_from_slice(&self.free_blocks.to_le_bytes());
        buf[8..12].copy_from_slice(&self.bitmap_entries.to_le_bytes());
        buf[12..16].copy_from_slice(&self.bitmap_blocks.to_le_bytes());
        crc32(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/// Minimal CRC32 (IEEE 802.3 polynomial), used only to protect [`DiskHeader`].
pub fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    !crc
}

/// Header present at the start of every allocated block.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BlockHeader {
    pub previous_block: u32,
    pub next_block: u32,
    pub block_in_file: u32,
}

/// File/directory metadata record embedded in every entity's head block.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Fcb {
    /// Index of the parent directory's first block; [`NO_PARENT`] for the root.
    pub directory_block: i32,
    /// The head block's own index.
    pub block_in_disk: u32,
    /// Zero-terminated name.
    pub name: [u8; MAX_FILENAME_LEN],
    pub size_in_bytes: u32,
    pub size_in_blocks: u32,
    /// 0 = file, 1 = directory.
    pub is_dir: u32,
}

impl Fcb {
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0u8; MAX_FILENAME_LEN];
        let bytes = name.as_bytes();
        self.name[..bytes.len()].copy_from_slice(bytes);
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }
}

const HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();
const FCB_SIZE: usize = std::mem::size_of::<Fcb>();

/// Inline payload capacity of a file's head block.
pub const BYTES_IN_FIRST_FB: usize = BLOCK_SIZE - HEADER_SIZE - FCB_SIZE;
/// Inline payload capacity of a file continuation block.
pub const BYTES_IN_FB: usize = BLOCK_SIZE - HEADER_SIZE;

const NUM_ENTRIES_SIZE: usize = std::mem::size_of::<u32>();
const CHILD_SIZE: usize = std::mem::size_of::<u32>();

/// Child slots in a directory's head block.
pub const FILES_IN_FIRST_DB: usize =
    (BLOCK_SIZE - HEADER_SIZE - FCB_SIZE - NUM_ENTRIES_SIZE) / CHILD_SIZE;
/// Child slots in a directory continuation block.
pub const FILES_IN_DB: usize = (BLOCK_SIZE - HEADER_SIZE) / CHILD_SIZE;

/// Head block of a file: header, FCB, and the first [`BYTES_IN_FIRST_FB`] data bytes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct FirstFileBlock {
    pub header: BlockHeader,
    pub fcb: Fcb,
    pub data: [u8; BYTES_IN_FIRST_FB],
}

/// Continuation block of a file: header plus [`BYTES_IN_FB`] payload bytes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct FileBlock {
    pub header: BlockHeader,
    pub data: [u8; BYTES_IN_FB],
}

/// Head block of a directory: header, FCB, entry count, and the first
/// [`FILES_IN_FIRST_DB`] child block indices.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct FirstDirectoryBlock {
    pub header: BlockHeader,
    pub fcb: Fcb,
    pub num_entries: u32,
    pub file_blocks: [u32; FILES_IN_FIRST_DB],
}

/// Continuation block of a directory: header plus [`FILES_IN_DB`] child block indices.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DirectoryBlock {
    pub header: BlockHeader,
    pub file_blocks: [u32; FILES_IN_DB],
}

const _ASSERT_FIRST_FILE_BLOCK: () =
    assert!(std::mem::size_of::<FirstFileBlock>() == BLOCK_SIZE);
const _ASSERT_FILE_BLOCK: () = assert!(std::mem::size_of::<FileBlock>() == BLOCK_SIZE);
const _ASSERT_FIRST_DIR_BLOCK: () =
    assert!(std::mem::size_of::<FirstDirectoryBlock>() == BLOCK_SIZE);
const _ASSERT_DIR_BLOCK: () = assert!(std::mem::size_of::<DirectoryBlock>() == BLOCK_SIZE);

/// A raw, type-erased block buffer. Every on-disk record above can be viewed as one
/// via `bytemuck::cast`.
pub type RawBlock = [u8; BLOCK_SIZE];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_records_are_exactly_one_block() {
        assert_eq!(std::mem::size_of::<FirstFileBlock>(), BLOCK_SIZE);
        assert_eq!(std::mem::size_of::<FileBlock>(), BLOCK_SIZE);
        assert_eq!(std::mem::size_of::<FirstDirectoryBlock>(), BLOCK_SIZE);
        assert_eq!(std::mem::size_of::<DirectoryBlock>(), BLOCK_SIZE);
    }

    #[test]
    fn fcb_name_roundtrip() {
        let mut fcb = Fcb::zeroed();
        fcb.set_name("hello.txt");
        assert_eq!(fcb.name_str(), "hello.txt");
    }

    #[test]
    fn header_checksum_detects_corruption() {
        let mut header = DiskHeader::new(1024, 128);
        assert!(header.verify_checksum());
        header.free_blocks -= 1;
        assert!(!header.verify_checksum());
    }
}
