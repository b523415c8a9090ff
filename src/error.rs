//! Unified crate error type
//!
//! Errors that originate in the underlying host stack carry the raw OS
//! error code (positive errno magnitude) exactly as the stack reported it,
//! plus the name of the operation that failed. Errors that originate in
//! this crate's lifecycle layer (revocation, handle state, type guards)
//! carry no code.
//!
//! Nothing here retries: every failure surfaces synchronously from the
//! call that triggered it.

use core::fmt;

/// The six wrapper kinds handed out by the topology layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Bus,
    Device,
    Configuration,
    Interface,
    Setting,
    Endpoint,
}

impl ObjectKind {
    /// Human-readable kind name
    pub const fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Bus => "Bus",
            ObjectKind::Device => "Device",
            ObjectKind::Configuration => "Configuration",
            ObjectKind::Interface => "Interface",
            ObjectKind::Setting => "Setting",
            ObjectKind::Endpoint => "Endpoint",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for all topology, handle, and transfer operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Access to a wrapper whose backing node was invalidated by
    /// re-enumeration. The wrapper stays referenceable; only its data
    /// is gone.
    Revoked(ObjectKind),
    /// A wrapper of the wrong kind was passed where a specific kind
    /// was expected.
    WrongType {
        expected: ObjectKind,
        found: ObjectKind,
    },
    /// Transfer or state operation on a handle that has been closed.
    ClosedHandle,
    /// Second close of an already-closed handle.
    AlreadyClosed,
    /// The stack refused to establish a device session.
    OpenFailed { errno: i32 },
    /// The stack returned a negative code from a transfer or state
    /// primitive. `op` names the primitive, `errno` is the magnitude.
    Transfer { op: &'static str, errno: i32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Revoked(kind) => write!(f, "revoked {}", kind),
            Error::WrongType { expected, found } => {
                write!(f, "wrong object type {} (expected {})", found, expected)
            }
            Error::ClosedHandle => f.write_str("operation on closed device handle"),
            Error::AlreadyClosed => f.write_str("device handle already closed"),
            Error::OpenFailed { errno: code } => {
                write!(f, "usb_open failed: {}", errno::describe(*code))
            }
            Error::Transfer { op, errno: code } => {
                write!(f, "{} failed: {}", op, errno::describe(*code))
            }
        }
    }
}

/// Result type alias for all crate operations
pub type Result<T> = core::result::Result<T, Error>;

/// Translate a C-convention return value: negative means `-errno`,
/// non-negative is the byte count (or success indicator).
pub(crate) fn check_usb_error(op: &'static str, ret: i32) -> Result<i32> {
    if ret < 0 {
        Err(Error::Transfer { op, errno: -ret })
    } else {
        Ok(ret)
    }
}

/// OS error codes as the underlying stack reports them.
///
/// Values are the Linux errno assignments, identical across the ABIs the
/// stack runs on.
pub mod errno {
    /// Operation not permitted
    pub const EPERM: i32 = 1;
    /// No such file or directory
    pub const ENOENT: i32 = 2;
    /// I/O error
    pub const EIO: i32 = 5;
    /// No such device or address
    pub const ENXIO: i32 = 6;
    /// Bad file descriptor
    pub const EBADF: i32 = 9;
    /// Resource temporarily unavailable
    pub const EAGAIN: i32 = 11;
    /// Out of memory
    pub const ENOMEM: i32 = 12;
    /// Permission denied
    pub const EACCES: i32 = 13;
    /// Device or resource busy
    pub const EBUSY: i32 = 16;
    /// No such device
    pub const ENODEV: i32 = 19;
    /// Invalid argument
    pub const EINVAL: i32 = 22;
    /// Broken pipe (endpoint stall at the stack level)
    pub const EPIPE: i32 = 32;
    /// Function not implemented
    pub const ENOSYS: i32 = 38;
    /// No data available
    pub const ENODATA: i32 = 61;
    /// Value too large for defined data type
    pub const EOVERFLOW: i32 = 75;
    /// Connection timed out
    pub const ETIMEDOUT: i32 = 110;

    /// Symbolic name for the codes the stack commonly reports.
    pub const fn name(code: i32) -> Option<&'static str> {
        match code {
            EPERM => Some("EPERM"),
            ENOENT => Some("ENOENT"),
            EIO => Some("EIO"),
            ENXIO => Some("ENXIO"),
            EBADF => Some("EBADF"),
            EAGAIN => Some("EAGAIN"),
            ENOMEM => Some("ENOMEM"),
            EACCES => Some("EACCES"),
            EBUSY => Some("EBUSY"),
            ENODEV => Some("ENODEV"),
            EINVAL => Some("EINVAL"),
            EPIPE => Some("EPIPE"),
            ENOSYS => Some("ENOSYS"),
            ENODATA => Some("ENODATA"),
            EOVERFLOW => Some("EOVERFLOW"),
            ETIMEDOUT => Some("ETIMEDOUT"),
            _ => None,
        }
    }

    /// Render a code for display: symbolic name when known, numeric
    /// otherwise.
    pub(crate) struct Describe(i32);

    impl core::fmt::Display for Describe {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            match name(self.0) {
                Some(n) => write!(f, "{} ({})", n, self.0),
                None => write!(f, "errno {}", self.0),
            }
        }
    }

    pub(crate) fn describe(code: i32) -> Describe {
        Describe(code)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_revoked() {
        let e = Error::Revoked(ObjectKind::Setting);
        assert_eq!(alloc::format!("{}", e), "revoked Setting");
    }

    #[test]
    fn test_display_transfer_known_code() {
        let e = Error::Transfer {
            op: "usb_bulk_read",
            errno: errno::EPIPE,
        };
        assert_eq!(alloc::format!("{}", e), "usb_bulk_read failed: EPIPE (32)");
    }

    #[test]
    fn test_display_transfer_unknown_code() {
        let e = Error::Transfer {
            op: "usb_reset",
            errno: 999,
        };
        assert_eq!(alloc::format!("{}", e), "usb_reset failed: errno 999");
    }

    #[test]
    fn test_check_usb_error() {
        assert_eq!(check_usb_error("op", 12), Ok(12));
        assert_eq!(check_usb_error("op", 0), Ok(0));
        assert_eq!(
            check_usb_error("usb_clear_halt", -errno::ENODEV),
            Err(Error::Transfer {
                op: "usb_clear_halt",
                errno: errno::ENODEV
            })
        );
    }
}
