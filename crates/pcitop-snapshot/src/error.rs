use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    #[error("invalid snapshot magic")]
    InvalidMagic,

    #[error("snapshot size mismatch (header says {declared} bytes, file has {actual} bytes)")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("snapshot has an empty {0} table")]
    EmptyTable(&'static str),

    #[error("corrupt snapshot: {0}")]
    Corrupt(&'static str),

    #[error("{0} does not fit the snapshot format")]
    TooLarge(&'static str),

    #[error("{} already exists", .0.display())]
    TargetExists(PathBuf),

    #[error("utf-8 decoding failed: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl From<SnapshotError> for pcitop_core::Error {
    fn from(err: SnapshotError) -> Self {
        pcitop_core::Error::Source(Box::new(err))
    }
}
