use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::address::BusAddress;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A backing namespace or required file is missing.
    #[error("{}: source unavailable: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    #[error("{}: short read (expected {expected} bytes, found {found})", .path.display())]
    PartialIo {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("duplicate bus {domain:04x}:{bus:02x}")]
    DuplicateBus { domain: u16, bus: u8 },

    #[error("{address}: capability chain revisits offset {offset:#05x}")]
    CapabilityLoop { address: BusAddress, offset: u16 },

    /// Failure reported by a data source implemented outside this crate.
    #[error(transparent)]
    Source(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    pub(crate) fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            detail: detail.into(),
        }
    }
}
