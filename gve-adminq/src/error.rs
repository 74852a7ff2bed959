//! # Admin Queue Errors
//!
//! ## Purpose
//!
//! Defines the single error type returned by every admin queue operation and the
//! translation of device-reported completion statuses into that type.
//!
//! ## How it works
//!
//! The device writes a 32-bit status word back into each consumed slot. `DeviceStatus`
//! names every code the firmware is known to produce and `DeviceStatus::into_result`
//! maps it onto `AdminqError`. Failures that originate on the driver side (timeouts,
//! malformed descriptors, local bookkeeping conflicts) construct `AdminqError` directly.
//!
//! ## Main components
//!
//! - `AdminqError`: Every failure kind an operation can report.
//! - `DeviceStatus`: Completion status codes written by the device.
//! - `Result<T>`: Crate-wide result alias.

use std::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AdminqError>;

/// Errors returned by admin queue operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminqError {
    /// Malformed caller input or a device rejection of the command's arguments.
    InvalidArgument,
    /// The object being created is already present.
    AlreadyExists,
    /// The referenced object does not exist.
    NotFound,
    /// Memory, ring space or a device-advertised limit ran out.
    ResourceExhausted,
    /// The feature or opcode was not enabled by the negotiated device options.
    Unsupported,
    /// The device refused the command for lack of permission or authentication.
    PermissionDenied,
    /// The device did not acknowledge the command within the polling bound.
    Timeout,
    /// The ring is out of sync with the device and must be torn down and rebuilt.
    Unrecoverable,
    /// The device returned a malformed descriptor or option chain.
    Protocol(String),
    /// Transient device condition; the same command may succeed if re-issued.
    TryAgain,
    /// The ring was not drained when an isolated command was requested.
    InvalidState,
    /// The caller's buffer cannot hold the full result.
    BufferTooSmall,
}

impl AdminqError {
    /// Returns `true` for device conditions that may clear on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdminqError::TryAgain)
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        AdminqError::Protocol(msg.into())
    }
}

impl fmt::Display for AdminqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminqError::InvalidArgument => write!(f, "invalid argument"),
            AdminqError::AlreadyExists => write!(f, "already exists"),
            AdminqError::NotFound => write!(f, "not found"),
            AdminqError::ResourceExhausted => write!(f, "resource exhausted"),
            AdminqError::Unsupported => write!(f, "operation not supported by the device"),
            AdminqError::PermissionDenied => write!(f, "permission denied"),
            AdminqError::Timeout => write!(f, "device did not respond in time"),
            AdminqError::Unrecoverable => write!(f, "admin queue is unrecoverable"),
            AdminqError::Protocol(msg) => write!(f, "device protocol violation: {msg}"),
            AdminqError::TryAgain => write!(f, "device busy, try again"),
            AdminqError::InvalidState => write!(f, "admin queue is not drained"),
            AdminqError::BufferTooSmall => write!(f, "buffer too small"),
        }
    }
}

impl std::error::Error for AdminqError {}

/// Completion status codes written by the device into a consumed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DeviceStatus {
    Unset = 0x0,
    Passed = 0x1,
    Aborted = 0xFFFF_FFF0,
    AlreadyExists = 0xFFFF_FFF1,
    Cancelled = 0xFFFF_FFF2,
    DataLoss = 0xFFFF_FFF3,
    DeadlineExceeded = 0xFFFF_FFF4,
    FailedPrecondition = 0xFFFF_FFF5,
    Internal = 0xFFFF_FFF6,
    InvalidArgument = 0xFFFF_FFF7,
    NotFound = 0xFFFF_FFF8,
    OutOfRange = 0xFFFF_FFF9,
    PermissionDenied = 0xFFFF_FFFA,
    Unauthenticated = 0xFFFF_FFFB,
    ResourceExhausted = 0xFFFF_FFFC,
    Unavailable = 0xFFFF_FFFD,
    Unimplemented = 0xFFFF_FFFE,
    Unknown = 0xFFFF_FFFF,
}

impl DeviceStatus {
    const ALL: [DeviceStatus; 18] = [
        DeviceStatus::Unset,
        DeviceStatus::Passed,
        DeviceStatus::Aborted,
        DeviceStatus::AlreadyExists,
        DeviceStatus::Cancelled,
        DeviceStatus::DataLoss,
        DeviceStatus::DeadlineExceeded,
        DeviceStatus::FailedPrecondition,
        DeviceStatus::Internal,
        DeviceStatus::InvalidArgument,
        DeviceStatus::NotFound,
        DeviceStatus::OutOfRange,
        DeviceStatus::PermissionDenied,
        DeviceStatus::Unauthenticated,
        DeviceStatus::ResourceExhausted,
        DeviceStatus::Unavailable,
        DeviceStatus::Unimplemented,
        DeviceStatus::Unknown,
    ];

    /// Looks up a raw status word. Codes outside the known set return `None`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| *s as u32 == raw)
    }

    /// Maps a raw status word read from a slot to a result.
    ///
    /// # Returns
    /// `Ok(())` for a passed command, otherwise the error kind the status stands for.
    /// Unknown codes are logged and reported as `InvalidArgument`.
    pub fn check(raw: u32) -> crate::Result<()> {
        match Self::from_raw(raw) {
            Some(status) => status.into_result(),
            None => {
                log::error!("parse_aq_err: unknown status code {raw:#x}");
                Err(AdminqError::InvalidArgument)
            }
        }
    }

    /// Converts the status into the result the issuing caller sees.
    pub fn into_result(self) -> crate::Result<()> {
        use DeviceStatus as S;
        match self {
            S::Passed => Ok(()),
            S::Unset => {
                log::error!("parse_aq_err: command completed without a status");
                Err(AdminqError::InvalidArgument)
            }
            S::Aborted | S::Cancelled | S::DataLoss | S::FailedPrecondition | S::Unavailable => {
                Err(AdminqError::TryAgain)
            }
            S::AlreadyExists
            | S::Internal
            | S::InvalidArgument
            | S::NotFound
            | S::OutOfRange
            | S::Unknown => Err(AdminqError::InvalidArgument),
            S::DeadlineExceeded => Err(AdminqError::Timeout),
            S::PermissionDenied | S::Unauthenticated => Err(AdminqError::PermissionDenied),
            S::ResourceExhausted => Err(AdminqError::ResourceExhausted),
            S::Unimplemented => Err(AdminqError::Unsupported),
        }
    }
}

//
// ================================================================================================
//   UNITTESTS
// ================================================================================================
//
#[cfg(test)]
mod tests {
    use super::{AdminqError, DeviceStatus};

    #[test]
    fn test_status_categories() {
        assert_eq!(DeviceStatus::check(0x1), Ok(()));
        let transient = [
            0xFFFF_FFF0,
            0xFFFF_FFF2,
            0xFFFF_FFF3,
            0xFFFF_FFF5,
            0xFFFF_FFFD,
        ];
        for raw in transient {
            let err = DeviceStatus::check(raw).unwrap_err();
            assert!(err.is_retryable(), "{raw:#x} -> {err}");
        }
        let expected = [
            (0xFFFF_FFF4, AdminqError::Timeout),
            (0xFFFF_FFFA, AdminqError::PermissionDenied),
            (0xFFFF_FFFB, AdminqError::PermissionDenied),
            (0xFFFF_FFFC, AdminqError::ResourceExhausted),
            (0xFFFF_FFFE, AdminqError::Unsupported),
            (0xFFFF_FFF8, AdminqError::InvalidArgument),
        ];
        for (raw, err) in expected {
            assert_eq!(DeviceStatus::check(raw), Err(err), "{raw:#x}");
        }
    }

    #[test]
    fn test_unset_and_unknown_codes() {
        assert_eq!(DeviceStatus::check(0), Err(AdminqError::InvalidArgument));
        let unknown = DeviceStatus::check(0x1234);
        assert_eq!(unknown, Err(AdminqError::InvalidArgument));
        assert_eq!(DeviceStatus::from_raw(0x1234), None);
        let last = DeviceStatus::from_raw(0xFFFF_FFFF);
        assert_eq!(last, Some(DeviceStatus::Unknown));
    }
}
