//! Scans a directory's children in logical order: head slots first, then continuation
//! blocks in chain order.

use crate::error::Result;
use crate::fs::handle::{ChildHead, DirectoryHandle};
use crate::fs::Filesystem;
use crate::layout::{DirectoryBlock, FILES_IN_DB, FILES_IN_FIRST_DB};

/// Iterates the children of a [`DirectoryHandle`] snapshot taken at construction time.
/// Mutating the directory (via [`FileIterator::update`] or any `Filesystem` call) while
/// an iterator from an older snapshot is still in use is a caller error: don't hold two
/// live views of one directory.
pub struct FileIterator {
    num_entries: u32,
    head_file_blocks: [u32; FILES_IN_FIRST_DB],
    pos: i64,
    relative_pos: i64,
    cur_dir_block: u32,
    next_dir_block: u32,
    cur_db: Option<DirectoryBlock>,
}

impl FileIterator {
    pub fn new(dir: &DirectoryHandle) -> Self {
        Self {
            num_entries: dir.dcb.num_entries,
            head_file_blocks: dir.dcb.file_blocks,
            pos: -1,
            relative_pos: -1,
            cur_dir_block: dir.dcb.fcb.block_in_disk,
            next_dir_block: dir.dcb.header.next_block,
            cur_db: None,
        }
    }

    /// Advances and returns the next child's block index, or `None` once `num_entries`
    /// entries have been produced.
    pub fn next_idx(&mut self, fs: &mut Filesystem) -> Result<Option<u32>> {
        self.pos += 1;
        if self.pos as u32 >= self.num_entries {
            return Ok(None);
        }

        if (self.pos as usize) < FILES_IN_FIRST_DB {
            return Ok(Some(self.head_file_blocks[self.pos as usize]));
        }

        if self.relative_pos == -1 || self.relative_pos as usize == FILES_IN_DB {
            let load_idx = self.next_dir_block;
            let db = fs.read_directory_block(load_idx)?;
            self.cur_dir_block = load_idx;
            self.next_dir_block = db.header.next_block;
            self.relative_pos = 0;
            self.cur_db = Some(db);
        }

        let db = self.cur_db.as_ref().expect("continuation block loaded above");
        let idx = db.file_blocks[self.relative_pos as usize];
        self.relative_pos += 1;
        Ok(Some(idx))
    }

    /// Advances and returns the next child's common header+FCB prefix.
    pub fn next(&mut self, fs: &mut Filesystem) -> Result<Option<ChildHead>> {
        match self.next_idx(fs)? {
            Some(idx) => Ok(Some(fs.read_child_head(idx)?)),
            None => Ok(None),
        }
    }

    /// Overwrites the slot the cursor currently refers to with `new_child_idx`,
    /// persisting the enclosing directory block (head or continuation) and keeping
    /// `dir`'s cached copy in sync when the head was touched. Must be called right
    /// after a `next`/`next_idx` that returned `Some`, before the cursor advances again.
    pub fn update(
        &self,
        fs: &mut Filesystem,
        dir: &mut DirectoryHandle,
        new_child_idx: u32,
    ) -> Result<()> {
        if (self.pos as usize) < FILES_IN_FIRST_DB {
            dir.dcb.file_blocks[self.pos as usize] = new_child_idx;
            fs.write_first_directory_block(&dir.dcb)?;
        } else {
            let slot = self.relative_pos as usize - 1;
            let mut db = self.cur_db.expect("continuation block loaded before update");
            db.file_blocks[slot] = new_child_idx;
            fs.write_directory_block(self.cur_dir_block, &db)?;
        }
        Ok(())
    }
}
