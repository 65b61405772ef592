use thiserror::Error;

/// Errors returned by the block device and the filesystem on top of it.
///
/// `Io` and `Corruption` are fatal to the session. Every other kind is
/// caller-recoverable and leaves the on-disk structures consistent.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("bad argument: {0}")]
    BadArgument(&'static str),
    #[error("name not found")]
    NotFound,
    #[error("name already exists")]
    AlreadyExists,
    #[error("no free blocks")]
    NoSpace,
    #[error("not a directory")]
    NotADirectory,
    #[error("not a file")]
    NotAFile,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupted filesystem: {0}")]
    Corruption(&'static str),
}

pub type Result<T> = std::result::Result<T, FsError>;
