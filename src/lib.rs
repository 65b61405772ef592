//! A small block-structured filesystem stored in one host file.
//!
//! The image holds a block count, an allocation bitmap (one byte per
//! block) and 512-byte payload blocks. Files and directories are
//! doubly-linked chains of blocks; the first block of a chain carries
//! a control block with the entry's metadata. The payload region is
//! accessed through a single sliding 4096-byte memory-mapped window.

pub mod bitmap;
pub mod disk;
pub mod error;
pub mod fs;
pub mod layout;
pub mod param;

pub use error::{FsError, Result};
pub use fs::{ChainFs, CheckStats, DirHandle, FileHandle, Handle, Stat};
