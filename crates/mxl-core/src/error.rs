//! Status taxonomy for the public MXL surface.
//!
//! Every fallible public call returns one of these variants. Rich context
//! (domain path, flow id, errno text) is emitted to the structured log at the
//! failure site and is intentionally not embedded in the status itself.

use std::io;

use thiserror::Error;

/// The result alias used across the MXL crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Public status type.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    /// The requested flow (or domain) does not exist.
    #[error("not found")]
    NotFound,

    /// A flow with the same id is already published.
    #[error("already exists")]
    AlreadyExists,

    /// The requested grain has been overwritten by a newer one.
    #[error("grain out of range")]
    OutOfRange,

    /// The requested grain has not been committed yet.
    #[error("grain not ready")]
    NotReady,

    /// A blocking call exhausted its timeout.
    #[error("timed out")]
    Timeout,

    /// The data format is unsupported or does not match the flow shape.
    #[error("unsupported data format")]
    UnsupportedFormat,

    /// Filesystem, mapping, or truncation failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Provider rejection, endpoint setup or remote write failure.
    #[error("fabric: {0}")]
    Fabric(String),
}

impl Error {
    /// An invariant violation in shared state (header UUID mismatch, corrupt
    /// sizes). Fatal to the affected handle; reported through the I/O kind.
    pub fn corrupt(what: impl Into<String>) -> Self {
        Error::Io(io::Error::new(io::ErrorKind::InvalidData, what.into()))
    }

    /// True when this error reports shared-state corruption.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::InvalidData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_maps_to_invalid_data() {
        let err = Error::corrupt("header uuid mismatch");
        assert!(err.is_corrupt());
        match err {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
            other => panic!("unexpected variant: {other}"),
        }
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
