//! Generic errno → [`SockError`] translation.
//!
//! Operation-specific tables (receive, send, connect, bind, accept) live in
//! [`crate::classify`]; they fall back to [`errno_to_error`] for codes they
//! do not single out.

use std::io;

use crate::error::SockError;

/// Translate an OS error number into the portable taxonomy.
pub fn errno_to_error(errno: i32) -> SockError {
    match errno {
        libc::EACCES | libc::EPERM | libc::EROFS => SockError::NoPermission,
        libc::EMFILE | libc::ENFILE => SockError::TooManyOpenFiles,
        libc::ENOMEM => SockError::NoMemory,
        libc::ENOBUFS => SockError::NoResources,
        libc::EADDRINUSE => SockError::AddrInUse,
        libc::EADDRNOTAVAIL => SockError::AddrNotAvailable,
        libc::ECONNREFUSED => SockError::ConnectionRefused,
        libc::ECONNRESET | libc::ECONNABORTED | libc::ENETRESET => SockError::ConnectionReset,
        libc::ENOTCONN | libc::EPIPE => SockError::NotConnected,
        libc::EHOSTUNREACH => SockError::HostUnreachable,
        libc::EHOSTDOWN => SockError::HostDown,
        libc::ENETUNREACH => SockError::NetUnreachable,
        libc::ENETDOWN => SockError::NetDown,
        libc::ETIMEDOUT => SockError::TimedOut,
        libc::EISCONN => SockError::InvalidState("already connected"),
        libc::EAFNOSUPPORT => SockError::FamilyMismatch,
        e if is_would_block(e) => SockError::WouldBlock,
        e => SockError::Unexpected(e),
    }
}

/// `EAGAIN` or `EWOULDBLOCK` (distinct on some platforms).
#[inline]
pub fn is_would_block(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
}

/// The errno carried by an `io::Error`, or `0` for synthetic errors.
#[inline]
pub fn io_errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(0)
}

impl From<io::Error> for SockError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => errno_to_error(errno),
            None if err.kind() == io::ErrorKind::OutOfMemory => SockError::NoMemory,
            None => SockError::Unexpected(0),
        }
    }
}
