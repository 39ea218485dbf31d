//! Portable result codes for socket operations.
//!
//! Raw `errno` values never leave the reactor: they are translated once, by
//! [`crate::errno`] and [`crate::classify`], into a `SockError`.

use core::fmt;

/// Result type for socket operations and completion events.
pub type SockResult<T> = Result<T, SockError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockError {
    /// Peer actively refused the connection.
    ConnectionRefused,

    /// Connection reset or aborted by the peer or the network.
    ConnectionReset,

    HostUnreachable,
    HostDown,
    NetUnreachable,
    NetDown,

    /// Kernel buffers or similar resources exhausted.
    NoResources,

    AddrInUse,
    AddrNotAvailable,

    /// Socket is not connected (or the peer is gone on send).
    NotConnected,

    NoPermission,
    TimedOut,

    /// Stream peer closed the connection.
    Eof,

    /// Request was canceled before it completed.
    Canceled,

    /// A `NORETRY` submission could not complete without waiting.
    WouldBlock,

    AlreadyBound,
    NotBound,

    /// Address family of the argument differs from the socket's.
    FamilyMismatch,

    /// Connecting to a multicast address.
    Multicast,

    /// Operation not valid in the socket's current state.
    InvalidState(&'static str),

    /// Malformed argument (empty buffer, too many buffers, ...).
    InvalidArgument(&'static str),

    /// The manager is shutting down.
    Shutdown,

    TooManyOpenFiles,
    NoMemory,

    /// An OS error with no portable mapping. Carries the errno.
    Unexpected(i32),
}

impl SockError {
    /// Errors that may go away on retry at the caller's level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SockError::NoResources
                | SockError::WouldBlock
                | SockError::TimedOut
                | SockError::HostUnreachable
                | SockError::NetUnreachable
                | SockError::NetDown
                | SockError::HostDown
        )
    }

    /// The OS error this code most commonly stands for, if any.
    pub fn as_errno_hint(&self) -> Option<i32> {
        let e = match self {
            SockError::ConnectionRefused => libc::ECONNREFUSED,
            SockError::ConnectionReset => libc::ECONNRESET,
            SockError::HostUnreachable => libc::EHOSTUNREACH,
            SockError::HostDown => libc::EHOSTDOWN,
            SockError::NetUnreachable => libc::ENETUNREACH,
            SockError::NetDown => libc::ENETDOWN,
            SockError::NoResources => libc::ENOBUFS,
            SockError::AddrInUse => libc::EADDRINUSE,
            SockError::AddrNotAvailable => libc::EADDRNOTAVAIL,
            SockError::NotConnected => libc::ENOTCONN,
            SockError::NoPermission => libc::EACCES,
            SockError::TimedOut => libc::ETIMEDOUT,
            SockError::WouldBlock => libc::EAGAIN,
            SockError::TooManyOpenFiles => libc::EMFILE,
            SockError::NoMemory => libc::ENOMEM,
            SockError::Unexpected(e) => *e,
            _ => return None,
        };
        Some(e)
    }
}

impl fmt::Display for SockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SockError::ConnectionRefused => write!(f, "connection refused"),
            SockError::ConnectionReset => write!(f, "connection reset"),
            SockError::HostUnreachable => write!(f, "host unreachable"),
            SockError::HostDown => write!(f, "host down"),
            SockError::NetUnreachable => write!(f, "network unreachable"),
            SockError::NetDown => write!(f, "network down"),
            SockError::NoResources => write!(f, "out of resources"),
            SockError::AddrInUse => write!(f, "address in use"),
            SockError::AddrNotAvailable => write!(f, "address not available"),
            SockError::NotConnected => write!(f, "socket is not connected"),
            SockError::NoPermission => write!(f, "permission denied"),
            SockError::TimedOut => write!(f, "timed out"),
            SockError::Eof => write!(f, "end of file"),
            SockError::Canceled => write!(f, "operation canceled"),
            SockError::WouldBlock => write!(f, "operation would block"),
            SockError::AlreadyBound => write!(f, "socket is already bound"),
            SockError::NotBound => write!(f, "socket is not bound"),
            SockError::FamilyMismatch => write!(f, "address family mismatch"),
            SockError::Multicast => write!(f, "multicast address not allowed"),
            SockError::InvalidState(what) => write!(f, "invalid socket state: {}", what),
            SockError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            SockError::Shutdown => write!(f, "socket manager is shutting down"),
            SockError::TooManyOpenFiles => write!(f, "too many open files"),
            SockError::NoMemory => write!(f, "out of memory"),
            SockError::Unexpected(errno) => write!(f, "unexpected error (errno {})", errno),
        }
    }
}

impl std::error::Error for SockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(SockError::ConnectionRefused.to_string(), "connection refused");
        assert_eq!(
            SockError::InvalidState("listen on unbound socket").to_string(),
            "invalid socket state: listen on unbound socket"
        );
        assert_eq!(SockError::Unexpected(71).to_string(), "unexpected error (errno 71)");
    }

    #[test]
    fn test_errno_hint() {
        assert_eq!(SockError::ConnectionReset.as_errno_hint(), Some(libc::ECONNRESET));
        assert_eq!(SockError::Unexpected(5).as_errno_hint(), Some(5));
        assert_eq!(SockError::Canceled.as_errno_hint(), None);
    }

    #[test]
    fn test_transient() {
        assert!(SockError::NoResources.is_transient());
        assert!(!SockError::ConnectionRefused.is_transient());
        assert!(!SockError::Eof.is_transient());
    }
}
