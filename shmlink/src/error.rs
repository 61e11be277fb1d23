//! Error types for shared struct channel operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during channel operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Existing segment size disagrees with the requested layout
    #[error("Segment {key} is {actual} bytes, layout expects {expected}")]
    SegmentSizeMismatch {
        /// Segment key
        key: i32,
        /// Byte size of the requested layout
        expected: usize,
        /// Byte size of the existing segment
        actual: usize,
    },

    /// Caller lacks rights to the segment or its lock
    #[error("Permission denied accessing segment: {key}")]
    PermissionDenied {
        /// Segment key
        key: i32,
    },

    /// Lock was not acquired within the configured timeout
    #[error("Lock for segment {key} not acquired within {timeout:?}")]
    LockTimeout {
        /// Segment key
        key: i32,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Other processes still hold the segment
    #[error("Segment {key} still attached by other processes ({attached:?})")]
    StillAttached {
        /// Segment key
        key: i32,
        /// Number of other attachments, when the backend can count them
        attached: Option<u64>,
    },

    /// Operation attempted on a closed handle
    #[error("Channel is not attached")]
    NotAttached,

    /// No segment exists for the key
    #[error("Segment not found: {key}")]
    NotFound {
        /// Segment key
        key: i32,
    },

    /// Field name not present in the layout
    #[error("Unknown field: {name}")]
    UnknownField {
        /// Requested field name
        name: String,
    },

    /// Value does not fit the field's declared width
    #[error("Value {value} out of range for field {field}")]
    ValueOutOfRange {
        /// Field name
        field: String,
        /// Rejected value
        value: i64,
    },

    /// Layout declaration rejected
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },

    /// Configuration error
    #[error("Configuration error: {source}")]
    Config {
        /// Source configuration error
        #[from]
        source: shmlink_common::config::ConfigError,
    },
}

/// Result type for channel operations
pub type ShmResult<T> = Result<T, ShmError>;

impl ShmError {
    /// Map an errno from a segment or lock syscall, attributing it to `key`.
    pub(crate) fn from_errno(key: i32, errno: nix::Error) -> Self {
        match errno {
            nix::Error::EACCES | nix::Error::EPERM => Self::PermissionDenied { key },
            nix::Error::ENOENT => Self::NotFound { key },
            other => Self::Nix { source: other },
        }
    }

    /// Map an IO error from a file-backed segment, attributing it to `key`.
    pub(crate) fn from_io(key: i32, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { key },
            std::io::ErrorKind::NotFound => Self::NotFound { key },
            _ => Self::Io { source: err },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert!(matches!(
            ShmError::from_errno(454, nix::Error::EACCES),
            ShmError::PermissionDenied { key: 454 }
        ));
        assert!(matches!(
            ShmError::from_errno(454, nix::Error::ENOENT),
            ShmError::NotFound { key: 454 }
        ));
        assert!(matches!(
            ShmError::from_errno(454, nix::Error::ENOMEM),
            ShmError::Nix { .. }
        ));
    }

    #[test]
    fn io_mapping() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            ShmError::from_io(7, denied),
            ShmError::PermissionDenied { key: 7 }
        ));
        let other = std::io::Error::from(std::io::ErrorKind::InvalidData);
        assert!(matches!(ShmError::from_io(7, other), ShmError::Io { .. }));
    }
}
