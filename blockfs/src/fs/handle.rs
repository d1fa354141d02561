//! In-memory cursors over on-disk entities. Nothing in this module is persisted; every
//! field here is a cached copy or bookkeeping value owned by exactly one handle.

use crate::layout::{BlockHeader, Fcb, FileBlock, FirstDirectoryBlock, FirstFileBlock};

/// The common `BlockHeader` + `Fcb` prefix shared by `FirstFileBlock` and
/// `FirstDirectoryBlock`. Used to inspect a child's name/type without committing to
/// reading it as one or the other.
#[derive(Debug, Clone, Copy)]
pub struct ChildHead {
    pub header: BlockHeader,
    pub fcb: Fcb,
}

/// Cursor over an open directory.
///
/// `pos_in_block`/`pos_in_dir` are scan cursors that no core algorithm here actually
/// advances — directory scans always go through a fresh
/// [`crate::fs::iterator::FileIterator`] instead. They're kept for API symmetry with
/// callers that expect a directory handle to carry its own position.
pub struct DirectoryHandle {
    pub(crate) dcb: FirstDirectoryBlock,
    pub(crate) parent: Option<FirstDirectoryBlock>,
    #[allow(dead_code)]
    pub(crate) pos_in_block: i64,
    #[allow(dead_code)]
    pub(crate) pos_in_dir: i64,
}

impl DirectoryHandle {
    pub(crate) fn new(dcb: FirstDirectoryBlock, parent: Option<FirstDirectoryBlock>) -> Self {
        Self { dcb, parent, pos_in_block: -1, pos_in_dir: -1 }
    }

    pub fn name(&self) -> &str {
        self.dcb.fcb.name_str()
    }

    pub fn block_in_disk(&self) -> u32 {
        self.dcb.fcb.block_in_disk
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none() && self.dcb.fcb.directory_block < 0
    }
}

/// Which block a [`FileHandle`]'s cursor currently sits on.
pub enum Current {
    /// The cursor is on the file's head block (`fcb`).
    Head,
    /// The cursor owns a copy of a continuation block at disk index `index`.
    Continuation { block: FileBlock, index: u32 },
}

/// Cursor over an open file.
pub struct FileHandle {
    pub(crate) fcb: FirstFileBlock,
    pub(crate) current: Current,
    pub(crate) pos_in_file: u64,
}

impl FileHandle {
    pub(crate) fn new(fcb: FirstFileBlock) -> Self {
        Self { fcb, current: Current::Head, pos_in_file: 0 }
    }

    pub fn name(&self) -> &str {
        self.fcb.fcb.name_str()
    }

    pub fn size(&self) -> u64 {
        self.fcb.fcb.size_in_bytes as u64
    }

    pub fn position(&self) -> u64 {
        self.pos_in_file
    }

    /// Disk index of whichever block the cursor currently sits on.
    pub(crate) fn current_block_pos(&self) -> u32 {
        match &self.current {
            Current::Head => self.fcb.fcb.block_in_disk,
            Current::Continuation { index, .. } => *index,
        }
    }
}
