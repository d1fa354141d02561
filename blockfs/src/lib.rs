//! A block-structured filesystem stored in a single host-file container.
//!
//! The container is a flat array of fixed-size [`layout::BLOCK_SIZE`] blocks prefixed by
//! a [`layout::DiskHeader`] and an allocation [`bitmap::Bitmap`]. Every file and directory
//! is a circular doubly-linked chain of blocks rooted at a head block that embeds a
//! [`layout::Fcb`]. See `DESIGN.md` in the repository root for design notes.
//!
//! ```no_run
//! use blockfs::{BlockDevice, Filesystem};
//!
//! # fn main() -> blockfs::Result<()> {
//! let device = BlockDevice::open("container.img", 4096)?;
//! let (mut fs, mut root) = Filesystem::init(device)?;
//! fs.mkdir(&mut root, "docs")?;
//! let mut f = fs.create_file(&mut root, "readme.txt")?;
//! fs.write(&mut f, b"hello")?;
//! # Ok(())
//! # }
//! ```

pub mod bitmap;
pub mod device;
pub mod error;
pub mod fs;
pub mod layout;

pub use device::BlockDevice;
pub use error::{FsError, Result};
pub use fs::{ChildHead, DirectoryHandle, FileHandle, Filesystem};
pub use layout::{BLOCK_SIZE, MAX_FILENAME_LEN};
