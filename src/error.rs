//! Error taxonomy shared by every module in the crate.
//!
//! Validation failures (`InvalidArgument`, `UnsupportedCapability`,
//! `NotInitialized`) are detected in-core before any hardware is touched and
//! are always reported to the caller. Hardware failures
//! (`ResourceUnavailable`) during mux-chain application leave the hardware
//! partially configured; see [`crate::mux`] for the no-rollback contract.

use std::io;

use crate::board::Capability;

/// Common error type for routing and resource-lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Out-of-range logical id, malformed sub-platform encoding, or a
    /// parameter outside the board's documented bounds.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested function is not in the pin's capability set.
    #[error("pin {pin} does not support {cap}")]
    UnsupportedCapability { pin: i32, cap: Capability },

    /// An underlying OS open/read/write failed.
    #[error("{what}: {source}")]
    ResourceUnavailable {
        what: String,
        #[source]
        source: io::Error,
    },

    /// The platform registry was queried before `init()` or after `deinit()`.
    #[error("platform registry not initialized")]
    NotInitialized,

    /// Best-effort detection of a device node already held elsewhere.
    /// Not guaranteed; the OS is the real arbiter of exclusivity.
    #[error("{what} is already in use")]
    AlreadyOpenConflict { what: String },

    /// A resource context was used after `close()`.
    #[error("resource context is not open")]
    NotOpen,

    /// Platform detection found no board table for this host.
    #[error("no known platform recognized on this host")]
    PlatformNotRecognized,

    /// A board table failed schema or consistency validation.
    #[error("board table error: {0}")]
    BoardConfig(String),
}

impl Error {
    /// Wrap an I/O error from a failed open, classifying `EBUSY` as an
    /// already-open conflict.
    pub(crate) fn from_open(what: impl Into<String>, err: io::Error) -> Self {
        let what = what.into();
        if err.raw_os_error() == Some(libc::EBUSY) {
            Error::AlreadyOpenConflict { what }
        } else {
            Error::ResourceUnavailable { what, source: err }
        }
    }

    /// Wrap an I/O error from a read/write/attribute access.
    pub(crate) fn unavailable(what: impl Into<String>, err: io::Error) -> Self {
        Error::ResourceUnavailable {
            what: what.into(),
            source: err,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
