//! Directory/file entity model built on top of [`BlockDevice`]: linked-block traversal,
//! directory scanning, and every mutating operation from the handle API (§6 of the
//! design).

pub mod handle;
pub mod iterator;

use log::{info, trace};

use crate::device::{zero_block, BlockDevice};
use crate::error::{FsError, Result};
use crate::layout::{
    BlockHeader, DirectoryBlock, Fcb, FileBlock, FirstDirectoryBlock, FirstFileBlock,
    BYTES_IN_FB, BYTES_IN_FIRST_FB, FILES_IN_DB, FILES_IN_FIRST_DB, MAX_FILENAME_LEN,
    NO_PARENT,
};

pub use handle::{ChildHead, Current, DirectoryHandle, FileHandle};
pub use iterator::FileIterator;

/// Block index of the root directory's head block, fixed by the on-disk format.
pub const ROOT_BLOCK: u32 = 0;

/// Owns a [`BlockDevice`] and implements the directory/file entity model on top of it.
pub struct Filesystem {
    device: BlockDevice,
}

impl Filesystem {
    pub fn new(device: BlockDevice) -> Self {
        Self { device }
    }

    pub fn free_blocks(&self) -> u32 {
        self.device.free_blocks()
    }

    pub fn num_blocks(&self) -> u32 {
        self.device.num_blocks()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.device.flush()
    }

    /// Reads block 0; if it's unallocated (a freshly created container), formats the
    /// device first. Returns the filesystem and a handle to the root directory.
    pub fn init(device: BlockDevice) -> Result<(Filesystem, DirectoryHandle)> {
        let mut fs = Filesystem::new(device);

        let mut probe = zero_block();
        if fs.device.read_block(ROOT_BLOCK, &mut probe).is_err() {
            fs.format()?;
        }

        let dcb = fs.read_first_directory_block(ROOT_BLOCK)?;
        Ok((fs, DirectoryHandle::new(dcb, None)))
    }

    /// Clears the entire bitmap and writes a fresh, empty root directory at block 0.
    pub fn format(&mut self) -> Result<()> {
        for i in 0..self.device.num_blocks() {
            self.device.free_block(i)?;
        }

        let mut fcb = Fcb::zeroed();
        fcb.directory_block = NO_PARENT;
        fcb.block_in_disk = ROOT_BLOCK;
        fcb.set_name("/");
        fcb.size_in_bytes = 0;
        fcb.size_in_blocks = 1;
        fcb.is_dir = 1;

        let root = FirstDirectoryBlock {
            header: BlockHeader { previous_block: ROOT_BLOCK, next_block: ROOT_BLOCK, block_in_file: 0 },
            fcb,
            num_entries: 0,
            file_blocks: [0; FILES_IN_FIRST_DB],
        };
        self.write_first_directory_block(&root)?;
        self.device.flush()?;
        info!("formatted container: {} blocks", self.device.num_blocks());
        Ok(())
    }

    // -- raw block (de)serialization -------------------------------------------------

    fn read_first_directory_block(&mut self, idx: u32) -> Result<FirstDirectoryBlock> {
        let mut raw = zero_block();
        self.device.read_block(idx, &mut raw)?;
        Ok(bytemuck::cast(raw))
    }

    fn write_first_directory_block(&mut self, block: &FirstDirectoryBlock) -> Result<()> {
        let raw = bytemuck::cast(*block);
        self.device.write_block(block.fcb.block_in_disk, &raw)
    }

    fn read_directory_block(&mut self, idx: u32) -> Result<DirectoryBlock> {
        let mut raw = zero_block();
        self.device.read_block(idx, &mut raw)?;
        Ok(bytemuck::cast(raw))
    }

    fn write_directory_block(&mut self, idx: u32, block: &DirectoryBlock) -> Result<()> {
        let raw = bytemuck::cast(*block);
        self.device.write_block(idx, &raw)
    }

    fn read_first_file_block(&mut self, idx: u32) -> Result<FirstFileBlock> {
        let mut raw = zero_block();
        self.device.read_block(idx, &mut raw)?;
        Ok(bytemuck::cast(raw))
    }

    fn write_first_file_block(&mut self, block: &FirstFileBlock) -> Result<()> {
        let raw = bytemuck::cast(*block);
        self.device.write_block(block.fcb.block_in_disk, &raw)
    }

    fn read_file_block(&mut self, idx: u32) -> Result<FileBlock> {
        let mut raw = zero_block();
        self.device.read_block(idx, &mut raw)?;
        Ok(bytemuck::cast(raw))
    }

    fn write_file_block(&mut self, idx: u32, block: &FileBlock) -> Result<()> {
        let raw = bytemuck::cast(*block);
        self.device.write_block(idx, &raw)
    }

    fn read_block_header(&mut self, idx: u32) -> Result<BlockHeader> {
        let mut raw = zero_block();
        self.device.read_block(idx, &mut raw)?;
        Ok(bytemuck::pod_read_unaligned(&raw[..std::mem::size_of::<BlockHeader>()]))
    }

    /// Reads just the `BlockHeader` + `Fcb` prefix common to both head-block kinds,
    /// without committing to interpreting the rest of the block.
    pub(crate) fn read_child_head(&mut self, idx: u32) -> Result<ChildHead> {
        let mut raw = zero_block();
        self.device.read_block(idx, &mut raw)?;
        let header_size = std::mem::size_of::<BlockHeader>();
        let fcb_size = std::mem::size_of::<Fcb>();
        let header = bytemuck::pod_read_unaligned(&raw[..header_size]);
        let fcb = bytemuck::pod_read_unaligned(&raw[header_size..header_size + fcb_size]);
        Ok(ChildHead { header, fcb })
    }

    // -- chain maintenance -------------------------------------------------------------

    /// Walks `d`'s directory chain to find the tail (the continuation whose
    /// `next_block == d`'s own block index, or the head itself for a single-block
    /// directory).
    fn find_tail_directory_block(&mut self, d: &DirectoryHandle) -> Result<u32> {
        let head_idx = d.dcb.fcb.block_in_disk;
        let mut cur_idx = head_idx;
        let mut cur_next = d.dcb.header.next_block;
        while cur_next != head_idx {
            cur_idx = cur_next;
            let block = self.read_directory_block(cur_idx)?;
            cur_next = block.header.next_block;
        }
        Ok(cur_idx)
    }

    /// Allocates and links a new, empty continuation block onto the tail of `d`'s
    /// directory chain. Returns its disk index.
    fn new_dir_block(&mut self, d: &mut DirectoryHandle) -> Result<u32> {
        let head_idx = d.dcb.fcb.block_in_disk;
        let tail_idx = self.find_tail_directory_block(d)?;
        let tail_block_in_file = if tail_idx == head_idx {
            d.dcb.header.block_in_file
        } else {
            self.read_directory_block(tail_idx)?.header.block_in_file
        };

        let np = self.device.get_free_block(0)?;
        let new_block = DirectoryBlock {
            header: BlockHeader {
                previous_block: tail_idx,
                next_block: head_idx,
                block_in_file: tail_block_in_file + 1,
            },
            file_blocks: [0; FILES_IN_DB],
        };
        self.write_directory_block(np, &new_block)?;

        if tail_idx == head_idx {
            d.dcb.header.next_block = np;
        } else {
            let mut tail_block = self.read_directory_block(tail_idx)?;
            tail_block.header.next_block = np;
            self.write_directory_block(tail_idx, &tail_block)?;
        }
        d.dcb.header.previous_block = np;
        d.dcb.fcb.size_in_blocks += 1;
        self.write_first_directory_block(&d.dcb)?;

        trace!("new_dir_block({}) -> {np}", d.dcb.fcb.name_str());
        Ok(np)
    }

    /// Appends `child_idx` as the `num_entries`-th child of `d`, growing the directory
    /// chain if the head and all existing continuations are full.
    fn add_to_directory(&mut self, d: &mut DirectoryHandle, child_idx: u32) -> Result<()> {
        let num_entries = d.dcb.num_entries as usize;
        if num_entries < FILES_IN_FIRST_DB {
            d.dcb.file_blocks[num_entries] = child_idx;
        } else {
            let relative_pos = num_entries - FILES_IN_FIRST_DB;
            let target_continuation = relative_pos / FILES_IN_DB;
            let slot = relative_pos % FILES_IN_DB;
            let head_idx = d.dcb.fcb.block_in_disk;

            let mut cur_idx = d.dcb.header.next_block;
            for _ in 0..target_continuation {
                cur_idx = if cur_idx == head_idx {
                    self.new_dir_block(d)?
                } else {
                    self.read_directory_block(cur_idx)?.header.next_block
                };
            }
            if cur_idx == head_idx {
                cur_idx = self.new_dir_block(d)?;
            }

            let mut block = self.read_directory_block(cur_idx)?;
            block.file_blocks[slot] = child_idx;
            self.write_directory_block(cur_idx, &block)?;
        }

        d.dcb.num_entries += 1;
        self.write_first_directory_block(&d.dcb)?;
        Ok(())
    }

    fn name_exists(&mut self, d: &DirectoryHandle, name: &str) -> Result<bool> {
        let mut iter = FileIterator::new(d);
        while let Some(child) = iter.next(self)? {
            if child.fcb.name_str() == name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn validate_new_name(&mut self, d: &DirectoryHandle, name: &str) -> Result<()> {
        if name.len() >= MAX_FILENAME_LEN {
            return Err(FsError::NameTooLong { name: name.to_string(), max: MAX_FILENAME_LEN });
        }
        if self.name_exists(d, name)? {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    // -- creation ------------------------------------------------------------------------

    /// Creates a new, empty file named `name` in `d` and returns a handle to it.
    pub fn create_file(&mut self, d: &mut DirectoryHandle, name: &str) -> Result<FileHandle> {
        self.validate_new_name(d, name)?;
        let np = self.device.get_free_block(0)?;

        let mut fcb = Fcb::zeroed();
        fcb.directory_block = d.dcb.fcb.block_in_disk as i32;
        fcb.block_in_disk = np;
        fcb.set_name(name);
        fcb.size_in_bytes = 0;
        fcb.size_in_blocks = 1;
        fcb.is_dir = 0;

        let block = FirstFileBlock {
            header: BlockHeader { previous_block: np, next_block: np, block_in_file: 0 },
            fcb,
            data: [0u8; BYTES_IN_FIRST_FB],
        };
        self.write_first_file_block(&block)?;
        self.add_to_directory(d, np)?;
        info!("created file '{name}' at block {np}");
        Ok(FileHandle::new(block))
    }

    /// Creates a new, empty directory named `name` in `d`.
    pub fn mkdir(&mut self, d: &mut DirectoryHandle, name: &str) -> Result<()> {
        self.validate_new_name(d, name)?;
        let np = self.device.get_free_block(0)?;

        let mut fcb = Fcb::zeroed();
        fcb.directory_block = d.dcb.fcb.block_in_disk as i32;
        fcb.block_in_disk = np;
        fcb.set_name(name);
        fcb.size_in_bytes = 0;
        fcb.size_in_blocks = 1;
        fcb.is_dir = 1;

        let block = FirstDirectoryBlock {
            header: BlockHeader { previous_block: np, next_block: np, block_in_file: 0 },
            fcb,
            num_entries: 0,
            file_blocks: [0; FILES_IN_FIRST_DB],
        };
        self.write_first_directory_block(&block)?;
        self.add_to_directory(d, np)?;
        info!("created directory '{name}' at block {np}");
        Ok(())
    }

    /// Opens the file named `name` in `d`.
    pub fn open_file(&mut self, d: &DirectoryHandle, name: &str) -> Result<FileHandle> {
        let mut iter = FileIterator::new(d);
        while let Some(child) = iter.next(self)? {
            if child.fcb.name_str() == name {
                if child.fcb.is_dir() {
                    return Err(FsError::IsADirectory(name.to_string()));
                }
                let block = self.read_first_file_block(child.fcb.block_in_disk)?;
                return Ok(FileHandle::new(block));
            }
        }
        Err(FsError::NotFound(name.to_string()))
    }

    /// Closes a file handle. Trivial in this implementation — `Drop` already releases
    /// everything a `FileHandle` owns — but exposed for parity with the handle API.
    pub fn close(&mut self, fh: FileHandle) -> Result<()> {
        drop(fh);
        Ok(())
    }

    /// Closes a directory handle. See [`Filesystem::close`].
    pub fn close_dir(&mut self, d: DirectoryHandle) -> Result<()> {
        drop(d);
        Ok(())
    }

    /// Names of every child of `d`, in logical (creation/compaction) order.
    pub fn read_dir(&mut self, d: &DirectoryHandle) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(d.dcb.num_entries as usize);
        let mut iter = FileIterator::new(d);
        while let Some(child) = iter.next(self)? {
            names.push(child.fcb.name_str().to_string());
        }
        Ok(names)
    }

    /// Single-component directory navigation: `.`, `..`, `/`, or a child name.
    pub fn change_dir(&mut self, d: &mut DirectoryHandle, name: &str) -> Result<()> {
        match name {
            "." => Ok(()),
            ".." => {
                let parent = d.parent.take().ok_or(FsError::OutOfRange)?;
                d.dcb = parent;
                let grandparent_idx = d.dcb.fcb.directory_block;
                d.parent = if grandparent_idx >= 0 {
                    Some(self.read_first_directory_block(grandparent_idx as u32)?)
                } else {
                    None
                };
                Ok(())
            }
            "/" => {
                d.dcb = self.read_first_directory_block(ROOT_BLOCK)?;
                d.parent = None;
                Ok(())
            }
            _ => {
                let mut iter = FileIterator::new(d);
                while let Some(child) = iter.next(self)? {
                    if child.fcb.name_str() == name {
                        if !child.fcb.is_dir() {
                            return Err(FsError::NotADirectory(name.to_string()));
                        }
                        let new_dcb = self.read_first_directory_block(child.fcb.block_in_disk)?;
                        let old_dcb = std::mem::replace(&mut d.dcb, new_dcb);
                        d.parent = Some(old_dcb);
                        return Ok(());
                    }
                }
                Err(FsError::NotFound(name.to_string()))
            }
        }
    }

    // -- removal --------------------------------------------------------------------------

    /// Frees every block reachable from the circular chain rooted at `head_idx`.
    fn free_chain(&mut self, head_idx: u32) -> Result<()> {
        let mut indices = vec![head_idx];
        let mut cur = head_idx;
        loop {
            let header = self.read_block_header(cur)?;
            if header.next_block == head_idx {
                break;
            }
            cur = header.next_block;
            indices.push(cur);
        }
        for idx in indices {
            self.device.free_block(idx)?;
        }
        Ok(())
    }

    /// Collects every child block index stored (directly or via continuations) in `dcb`.
    fn collect_children(&mut self, dcb: &FirstDirectoryBlock) -> Result<Vec<u32>> {
        let num_entries = dcb.num_entries as usize;
        let mut indices = Vec::with_capacity(num_entries);

        let head_count = num_entries.min(FILES_IN_FIRST_DB);
        indices.extend_from_slice(&dcb.file_blocks[..head_count]);

        let mut remaining = num_entries.saturating_sub(FILES_IN_FIRST_DB);
        let head_idx = dcb.fcb.block_in_disk;
        let mut cur_idx = dcb.header.next_block;
        while remaining > 0 && cur_idx != head_idx {
            let block = self.read_directory_block(cur_idx)?;
            let take = remaining.min(FILES_IN_DB);
            indices.extend_from_slice(&block.file_blocks[..take]);
            remaining -= take;
            cur_idx = block.header.next_block;
        }
        Ok(indices)
    }

    /// Recursively frees every descendant of `dcb` (not `dcb`'s own chain).
    fn free_directory_contents(&mut self, dcb: &FirstDirectoryBlock) -> Result<()> {
        for child_idx in self.collect_children(dcb)? {
            let child = self.read_child_head(child_idx)?;
            if child.fcb.is_dir() {
                let child_dcb = self.read_first_directory_block(child_idx)?;
                self.free_directory_contents(&child_dcb)?;
            }
            self.free_chain(child_idx)?;
        }
        Ok(())
    }

    /// Removes the child named `name` from `d`: recursively frees its contents if it's a
    /// directory, frees its own chain, compacts the parent's entry list, and splices out
    /// the parent's last continuation block if removal emptied it.
    pub fn remove(&mut self, d: &mut DirectoryHandle, name: &str) -> Result<()> {
        let mut find_iter = FileIterator::new(d);
        let mut target = None;
        while let Some(child) = find_iter.next(self)? {
            if child.fcb.name_str() == name {
                target = Some(child);
                break;
            }
        }
        let target = target.ok_or_else(|| FsError::NotFound(name.to_string()))?;

        if target.fcb.is_dir() {
            let target_dcb = self.read_first_directory_block(target.fcb.block_in_disk)?;
            self.free_directory_contents(&target_dcb)?;
        }
        self.free_chain(target.fcb.block_in_disk)?;

        let last_idx = {
            let mut scan = FileIterator::new(d);
            let mut last = None;
            while let Some(idx) = scan.next_idx(self)? {
                last = Some(idx);
            }
            last.expect("at least the removed entry was present")
        };
        if last_idx != target.fcb.block_in_disk {
            find_iter.update(self, d, last_idx)?;
        }

        let old_num_entries = d.dcb.num_entries as usize;
        let splice_last_continuation = old_num_entries > FILES_IN_FIRST_DB
            && (old_num_entries - FILES_IN_FIRST_DB - 1) % FILES_IN_DB == 0;

        d.dcb.num_entries -= 1;

        if splice_last_continuation {
            let head_idx = d.dcb.fcb.block_in_disk;
            let tail_idx = self.find_tail_directory_block(d)?;
            debug_assert_ne!(tail_idx, head_idx, "splice condition implies a continuation exists");
            let tail_block = self.read_directory_block(tail_idx)?;
            let predecessor_idx = tail_block.header.previous_block;
            if predecessor_idx == head_idx {
                d.dcb.header.next_block = head_idx;
            } else {
                let mut predecessor = self.read_directory_block(predecessor_idx)?;
                predecessor.header.next_block = head_idx;
                self.write_directory_block(predecessor_idx, &predecessor)?;
            }
            d.dcb.header.previous_block = predecessor_idx;
            self.device.free_block(tail_idx)?;
            d.dcb.fcb.size_in_blocks -= 1;
        }

        self.write_first_directory_block(&d.dcb)?;
        info!("removed '{name}'");
        Ok(())
    }

    // -- file I/O ---------------------------------------------------------------------------

    fn current_header(&self, fh: &FileHandle) -> BlockHeader {
        match &fh.current {
            Current::Head => fh.fcb.header,
            Current::Continuation { block, .. } => block.header,
        }
    }

    /// Advances `fh`'s cursor to the next block in the chain for writing, allocating a
    /// new tail block if none exists yet.
    fn advance_or_allocate_for_write(&mut self, fh: &mut FileHandle) -> Result<()> {
        let cur_idx = fh.current_block_pos();
        let cur_header = self.current_header(fh);

        if cur_header.next_block == fh.fcb.fcb.block_in_disk {
            let np = self.device.get_free_block(0)?;

            match &mut fh.current {
                Current::Head => {
                    fh.fcb.header.next_block = np;
                    self.write_first_file_block(&fh.fcb)?;
                }
                Current::Continuation { block, index } => {
                    block.header.next_block = np;
                    self.write_file_block(*index, block)?;
                }
            }

            fh.fcb.header.previous_block = np;
            fh.fcb.fcb.size_in_blocks += 1;
            self.write_first_file_block(&fh.fcb)?;

            let new_block = FileBlock {
                header: BlockHeader {
                    previous_block: cur_idx,
                    next_block: fh.fcb.fcb.block_in_disk,
                    block_in_file: cur_header.block_in_file + 1,
                },
                data: [0u8; BYTES_IN_FB],
            };
            self.write_file_block(np, &new_block)?;
            fh.current = Current::Continuation { block: new_block, index: np };
        } else {
            let next_idx = cur_header.next_block;
            let next_block = self.read_file_block(next_idx)?;
            fh.current = Current::Continuation { block: next_block, index: next_idx };
        }
        Ok(())
    }

    /// Advances `fh`'s cursor to the next block in the chain for reading/seeking. Unlike
    /// the write variant, reaching the tail here is corruption, not a normal growth point.
    fn advance_for_read(&mut self, fh: &mut FileHandle) -> Result<()> {
        let cur_header = self.current_header(fh);
        if cur_header.next_block == fh.fcb.fcb.block_in_disk {
            return Err(FsError::Fatal("read/seek advanced past the end of the chain".into()));
        }
        let next_idx = cur_header.next_block;
        let next_block = self.read_file_block(next_idx)?;
        fh.current = Current::Continuation { block: next_block, index: next_idx };
        Ok(())
    }

    /// Writes `buf` at `fh`'s current position, growing the file as needed. Returns the
    /// number of bytes written, which always equals `buf.len()` on success — a failure
    /// partway through (disk full) surfaces as `Err` with no partial count, and any blocks
    /// already spliced into the chain before the failure are left linked (§7/§9).
    pub fn write(&mut self, fh: &mut FileHandle, buf: &[u8]) -> Result<usize> {
        let mut written = 0usize;
        while written < buf.len() {
            let remaining = buf.len() - written;

            if fh.pos_in_file < BYTES_IN_FIRST_FB as u64 {
                let offset = fh.pos_in_file as usize;
                let chunk = remaining.min(BYTES_IN_FIRST_FB - offset);
                fh.fcb.data[offset..offset + chunk].copy_from_slice(&buf[written..written + chunk]);
                written += chunk;
                fh.pos_in_file += chunk as u64;
            } else {
                let pos_in_block =
                    ((fh.pos_in_file - BYTES_IN_FIRST_FB as u64) % BYTES_IN_FB as u64) as usize;
                if pos_in_block == 0 {
                    self.advance_or_allocate_for_write(fh)?;
                }
                let chunk = remaining.min(BYTES_IN_FB - pos_in_block);
                let (idx, updated) = match &mut fh.current {
                    Current::Head => unreachable!("pos_in_file implies a continuation block"),
                    Current::Continuation { block, index } => {
                        block.data[pos_in_block..pos_in_block + chunk]
                            .copy_from_slice(&buf[written..written + chunk]);
                        (*index, *block)
                    }
                };
                self.write_file_block(idx, &updated)?;
                written += chunk;
                fh.pos_in_file += chunk as u64;
            }

            fh.fcb.fcb.size_in_bytes = fh.fcb.fcb.size_in_bytes.max(fh.pos_in_file as u32);
        }
        self.write_first_file_block(&fh.fcb)?;
        Ok(written)
    }

    /// Reads up to `buf.len()` bytes (truncated to what's left in the file) starting at
    /// `fh`'s current position. Returns the number of bytes actually produced.
    pub fn read(&mut self, fh: &mut FileHandle, buf: &mut [u8]) -> Result<usize> {
        let size = fh.fcb.fcb.size_in_bytes as u64;
        let available = size.saturating_sub(fh.pos_in_file);
        let to_read = (buf.len() as u64).min(available) as usize;

        let mut done = 0usize;
        while done < to_read {
            let remaining = to_read - done;

            if fh.pos_in_file < BYTES_IN_FIRST_FB as u64 {
                let offset = fh.pos_in_file as usize;
                let chunk = remaining.min(BYTES_IN_FIRST_FB - offset);
                buf[done..done + chunk].copy_from_slice(&fh.fcb.data[offset..offset + chunk]);
                done += chunk;
                fh.pos_in_file += chunk as u64;
            } else {
                let pos_in_block =
                    ((fh.pos_in_file - BYTES_IN_FIRST_FB as u64) % BYTES_IN_FB as u64) as usize;
                if pos_in_block == 0 {
                    self.advance_for_read(fh)?;
                }
                let chunk = remaining.min(BYTES_IN_FB - pos_in_block);
                match &fh.current {
                    Current::Head => unreachable!("pos_in_file implies a continuation block"),
                    Current::Continuation { block, .. } => {
                        buf[done..done + chunk]
                            .copy_from_slice(&block.data[pos_in_block..pos_in_block + chunk]);
                    }
                }
                done += chunk;
                fh.pos_in_file += chunk as u64;
            }
        }
        Ok(done)
    }

    /// Moves `fh`'s cursor to `pos`, rewinding to the head first if seeking backward.
    /// Returns the signed delta `pos - old_pos`.
    pub fn seek(&mut self, fh: &mut FileHandle, pos: i64) -> Result<i64> {
        let size = fh.fcb.fcb.size_in_bytes as i64;
        if pos < 0 || pos > size {
            return Err(FsError::OutOfRange);
        }

        let old_pos = fh.pos_in_file as i64;
        if pos < old_pos {
            fh.current = Current::Head;
            fh.pos_in_file = 0;
        }

        while (fh.pos_in_file as i64) < pos {
            let remaining = pos as u64 - fh.pos_in_file;
            if fh.pos_in_file < BYTES_IN_FIRST_FB as u64 {
                let step = remaining.min(BYTES_IN_FIRST_FB as u64 - fh.pos_in_file);
                fh.pos_in_file += step;
            } else {
                let pos_in_block =
                    (fh.pos_in_file - BYTES_IN_FIRST_FB as u64) % BYTES_IN_FB as u64;
                if pos_in_block == 0 {
                    self.advance_for_read(fh)?;
                }
                let step = remaining.min(BYTES_IN_FB as u64 - pos_in_block);
                fh.pos_in_file += step;
            }
        }

        Ok(pos - old_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use tempfile::NamedTempFile;

    fn temp_path() -> std::path::PathBuf {
        let f = NamedTempFile::new().unwrap();
        let path = f.path().to_path_buf();
        drop(f);
        std::fs::remove_file(&path).ok();
        path
    }

    fn fresh(num_blocks: u32) -> (Filesystem, DirectoryHandle, std::path::PathBuf) {
        let path = temp_path();
        let device = BlockDevice::open(&path, num_blocks).unwrap();
        let (fs, root) = Filesystem::init(device).unwrap();
        (fs, root, path)
    }

    #[test]
    fn single_file_round_trip() {
        let (mut fs, mut root, path) = fresh(1024);
        let mut f = fs.create_file(&mut root, "test.txt").unwrap();
        assert_eq!(fs.write(&mut f, b"lorem ipsum dolor sit amet").unwrap(), 27);
        assert_eq!(fs.seek(&mut f, 0).unwrap(), -27);
        let mut buf = [0u8; 4096];
        assert_eq!(fs.read(&mut f, &mut buf).unwrap(), 27);
        assert_eq!(&buf[..27], b"lorem ipsum dolor sit amet");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn four_kib_random_payload_round_trips() {
        let (mut fs, mut root, path) = fresh(1024);
        let mut f = fs.create_file(&mut root, "blob.bin").unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let mut payload = [0u8; 4096];
        rng.fill_bytes(&mut payload);

        assert_eq!(fs.write(&mut f, &payload).unwrap(), 4096);
        assert_eq!(fs.seek(&mut f, 0).unwrap(), -4096);
        let mut readback = [0u8; 4096];
        assert_eq!(fs.read(&mut f, &mut readback).unwrap(), 4096);
        assert_eq!(readback, payload);

        // Repeat with 64-byte chunks, rewritten from the start.
        assert_eq!(fs.seek(&mut f, 0).unwrap(), -4096);
        for chunk in payload.chunks(64) {
            fs.write(&mut f, chunk).unwrap();
        }
        assert_eq!(fs.seek(&mut f, 0).unwrap(), -4096);
        let mut readback2 = vec![0u8; 4096];
        for chunk in readback2.chunks_mut(64) {
            assert_eq!(fs.read(&mut f, chunk).unwrap(), 64);
        }
        assert_eq!(&readback2[..], &payload[..]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn random_seeks_and_reads() {
        let (mut fs, mut root, path) = fresh(1024);
        let mut f = fs.create_file(&mut root, "blob.bin").unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let mut payload = [0u8; 4096];
        rng.fill_bytes(&mut payload);
        fs.write(&mut f, &payload).unwrap();

        for _ in 0..100 {
            let pos = (rng.next_u32() as usize) % (4096 - 16);
            fs.seek(&mut f, pos as i64).unwrap();
            let mut buf = [0u8; 16];
            assert_eq!(fs.read(&mut f, &mut buf).unwrap(), 16);
            assert_eq!(&buf[..], &payload[pos..pos + 16]);
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn write_at_block_boundary_allocates_tail() {
        let (mut fs, mut root, path) = fresh(1024);
        let mut f = fs.create_file(&mut root, "boundary.bin").unwrap();

        let exact = vec![b'x'; BYTES_IN_FIRST_FB];
        fs.write(&mut f, &exact).unwrap();
        assert_eq!(f.size(), BYTES_IN_FIRST_FB as u64);

        fs.write(&mut f, b"!").unwrap();
        assert_eq!(f.size(), BYTES_IN_FIRST_FB as u64 + 1);

        fs.seek(&mut f, 0).unwrap();
        let mut buf = vec![0u8; BYTES_IN_FIRST_FB + 1];
        assert_eq!(fs.read(&mut f, &mut buf).unwrap(), buf.len());
        assert_eq!(buf[BYTES_IN_FIRST_FB], b'!');

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn directory_nesting_navigation() {
        let (mut fs, mut root, path) = fresh(1024);
        fs.mkdir(&mut root, "a").unwrap();
        fs.mkdir(&mut root, "b").unwrap();

        fs.change_dir(&mut root, "a").unwrap();
        assert_eq!(root.name(), "a");
        fs.change_dir(&mut root, ".").unwrap();
        assert_eq!(root.name(), "a");

        fs.mkdir(&mut root, "c").unwrap();
        fs.mkdir(&mut root, "d").unwrap();
        fs.mkdir(&mut root, "e").unwrap();

        fs.change_dir(&mut root, "..").unwrap();
        assert!(root.is_root());

        assert!(matches!(fs.change_dir(&mut root, ".."), Err(FsError::OutOfRange)));
        assert!(matches!(
            fs.change_dir(&mut root, "invalid-name"),
            Err(FsError::NotFound(_))
        ));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn directory_overflow_and_removal_accounting() {
        let (mut fs, mut root, path) = fresh(4096);
        fs.mkdir(&mut root, "a").unwrap();
        fs.change_dir(&mut root, "a").unwrap();
        fs.mkdir(&mut root, "c").unwrap();
        fs.change_dir(&mut root, "c").unwrap();

        for i in 0..200 {
            fs.create_file(&mut root, &format!("file{i}.txt")).unwrap();
        }
        let names = fs.read_dir(&root).unwrap();
        assert_eq!(names.len(), 200);
        for (i, name) in names.iter().enumerate() {
            assert_eq!(name, &format!("file{i}.txt"));
        }
        let free_before_removal = fs.free_blocks();
        fs.remove(&mut root, "file0.txt").unwrap();
        assert_eq!(fs.free_blocks(), free_before_removal + 1);

        fs.change_dir(&mut root, "/").unwrap();
        fs.remove(&mut root, "a").unwrap();

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn remove_sole_occupant_of_last_continuation_frees_it() {
        let (mut fs, mut root, path) = fresh(4096);
        // FILES_IN_FIRST_DB + 1 entries: the (FILES_IN_FIRST_DB+1)-th is the sole
        // occupant of the first (and last) continuation block.
        for i in 0..FILES_IN_FIRST_DB + 1 {
            fs.create_file(&mut root, &format!("f{i}.txt")).unwrap();
        }
        let before = fs.free_blocks();
        let last_name = format!("f{}.txt", FILES_IN_FIRST_DB);
        fs.remove(&mut root, &last_name).unwrap();
        // The file's own block, plus the now-empty continuation block.
        assert_eq!(fs.free_blocks(), before + 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn duplicate_name_and_not_found_errors() {
        let (mut fs, mut root, path) = fresh(256);
        fs.create_file(&mut root, "dup.txt").unwrap();
        assert!(matches!(
            fs.create_file(&mut root, "dup.txt"),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(fs.open_file(&root, "missing.txt"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.remove(&mut root, "missing.txt"), Err(FsError::NotFound(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn open_file_on_directory_errors() {
        let (mut fs, mut root, path) = fresh(256);
        fs.mkdir(&mut root, "sub").unwrap();
        assert!(matches!(fs.open_file(&root, "sub"), Err(FsError::IsADirectory(_))));
        std::fs::remove_file(&path).ok();
    }
}
