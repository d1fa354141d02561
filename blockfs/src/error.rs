//! Error taxonomy for the whole crate. Every fallible core operation returns
//! `Result<T, FsError>`; the `mkfs`/`shell` binaries are the only places that turn an
//! `Err` back into a process exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("name too long (max {max} bytes): {name}")]
    NameTooLong { name: String, max: usize },

    #[error("no space left on device")]
    NoSpace,

    #[error("out of range")]
    OutOfRange,

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("fatal filesystem error: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, FsError>;
