//! # I/O completion classifier
//!
//! Pure decision tables that turn the raw outcome of one non-blocking
//! system call into what the reactor should do next:
//!
//! ```text
//!   (kind, connected, nbytes, errno)
//!                 │
//!                 ▼
//!   ┌─────────────────────────────┐
//!   │ Success  deliver the event  │
//!   │ Soft     retry, never shown │──► WouldBlock: wait for readiness
//!   │ Hard     deliver error code │    Now:       try again right away
//!   │ Eof      deliver end-of-file│
//!   └─────────────────────────────┘
//! ```
//!
//! Errors that only mean "that one peer is gone" are Soft on sockets that
//! are not connected streams, so an unconnected datagram socket keeps
//! receiving after an ICMP error from a single peer.

use crate::errno::{errno_to_error, is_would_block};
use crate::error::SockError;
use crate::kind::SocketKind;

/// Why a Soft outcome is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Nothing to do until the socket becomes ready again.
    WouldBlock,
    /// Try the same operation again immediately.
    Now,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Success,
    Soft(Retry),
    Hard(SockError),
    Eof,
}

impl IoStatus {
    /// True for outcomes that end the request and produce an event.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IoStatus::Soft(_))
    }
}

/// What the classifier needs to know about the socket and the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoContext {
    pub kind: SocketKind,
    pub connected: bool,
    /// Source port of a received datagram, if one was received.
    pub source_port: Option<u16>,
    /// Drop datagrams whose source port is zero.
    pub drop_zero_port: bool,
}

impl IoContext {
    pub fn stream(connected: bool) -> Self {
        IoContext {
            kind: SocketKind::Stream,
            connected,
            source_port: None,
            drop_zero_port: false,
        }
    }

    pub fn datagram(connected: bool) -> Self {
        IoContext {
            kind: SocketKind::Datagram,
            connected,
            source_port: None,
            drop_zero_port: true,
        }
    }

    pub fn with_source_port(mut self, port: Option<u16>) -> Self {
        self.source_port = port;
        self
    }

    pub fn with_drop_zero_port(mut self, drop: bool) -> Self {
        self.drop_zero_port = drop;
        self
    }

    #[inline]
    fn connected_stream(&self) -> bool {
        self.kind == SocketKind::Stream && self.connected
    }

    #[inline]
    fn soft_or_hard(&self, code: SockError) -> IoStatus {
        if self.connected_stream() {
            IoStatus::Hard(code)
        } else {
            IoStatus::Soft(Retry::Now)
        }
    }
}

#[inline]
fn soft_error(errno: i32) -> Option<IoStatus> {
    if is_would_block(errno) {
        Some(IoStatus::Soft(Retry::WouldBlock))
    } else if errno == libc::EINTR {
        Some(IoStatus::Soft(Retry::Now))
    } else {
        None
    }
}

/// Classify one receive attempt. `errno == 0` means the call succeeded and
/// returned `nbytes`.
pub fn classify_recv(ctx: &IoContext, nbytes: usize, errno: i32) -> IoStatus {
    if errno != 0 {
        if let Some(status) = soft_error(errno) {
            return status;
        }
        return match errno {
            libc::ECONNREFUSED => ctx.soft_or_hard(SockError::ConnectionRefused),
            libc::ENETUNREACH => ctx.soft_or_hard(SockError::NetUnreachable),
            libc::EHOSTUNREACH => ctx.soft_or_hard(SockError::HostUnreachable),
            libc::EHOSTDOWN => ctx.soft_or_hard(SockError::HostDown),
            libc::ECONNRESET | libc::ENETRESET | libc::ECONNABORTED | libc::EPIPE => {
                ctx.soft_or_hard(SockError::ConnectionReset)
            }
            libc::ENETDOWN => ctx.soft_or_hard(SockError::NetDown),
            libc::ENOBUFS | libc::ENOMEM => IoStatus::Hard(SockError::NoResources),
            e => IoStatus::Hard(errno_to_error(e)),
        };
    }

    match ctx.kind {
        SocketKind::Stream if nbytes == 0 => IoStatus::Eof,
        SocketKind::Stream => IoStatus::Success,
        SocketKind::Datagram => {
            if ctx.drop_zero_port && ctx.source_port == Some(0) {
                IoStatus::Soft(Retry::Now)
            } else {
                IoStatus::Success
            }
        }
    }
}

/// Classify one send attempt. A partial stream write is reported by the
/// caller as Soft; this table only covers the error path.
pub fn classify_send(ctx: &IoContext, errno: i32) -> IoStatus {
    if errno == 0 {
        return IoStatus::Success;
    }
    if let Some(status) = soft_error(errno) {
        return status;
    }
    match errno {
        libc::EACCES => ctx.soft_or_hard(SockError::NoPermission),
        libc::EAFNOSUPPORT => ctx.soft_or_hard(SockError::AddrNotAvailable),
        libc::ECONNREFUSED | libc::ENOTCONN => ctx.soft_or_hard(SockError::ConnectionRefused),
        libc::ECONNRESET | libc::ECONNABORTED | libc::ENETRESET => {
            ctx.soft_or_hard(SockError::ConnectionReset)
        }
        libc::ENETDOWN => ctx.soft_or_hard(SockError::NetDown),

        libc::EADDRNOTAVAIL => IoStatus::Hard(SockError::AddrNotAvailable),
        libc::EHOSTUNREACH => IoStatus::Hard(SockError::HostUnreachable),
        libc::EHOSTDOWN => IoStatus::Hard(SockError::HostDown),
        libc::ENETUNREACH => IoStatus::Hard(SockError::NetUnreachable),
        libc::ENOBUFS => IoStatus::Hard(SockError::NoResources),
        libc::EPERM => IoStatus::Hard(SockError::HostUnreachable),
        libc::EPIPE => IoStatus::Hard(SockError::NotConnected),
        e => IoStatus::Hard(SockError::Unexpected(e)),
    }
}

/// Downgrade a successful receive that has not yet reached its minimum.
#[inline]
pub fn apply_minimum(status: IoStatus, received: usize, minimum: usize) -> IoStatus {
    match status {
        IoStatus::Success if received < minimum => IoStatus::Soft(Retry::Now),
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Connected,
    /// Still in progress; keep waiting for readiness.
    Pending,
    Failed(SockError),
}

/// Classify the errno of `connect(2)` or of `SO_ERROR` after readiness.
pub fn classify_connect(errno: i32) -> ConnectStatus {
    if errno == 0 {
        return ConnectStatus::Connected;
    }
    if errno == libc::EINPROGRESS || errno == libc::EALREADY || soft_error(errno).is_some() {
        return ConnectStatus::Pending;
    }
    let code = match errno {
        libc::EACCES | libc::EPERM => SockError::NoPermission,
        libc::EADDRNOTAVAIL | libc::EAFNOSUPPORT => SockError::AddrNotAvailable,
        libc::ECONNREFUSED => SockError::ConnectionRefused,
        libc::EHOSTUNREACH => SockError::HostUnreachable,
        libc::EHOSTDOWN => SockError::HostDown,
        libc::ENETUNREACH => SockError::NetUnreachable,
        libc::ENETDOWN => SockError::NetDown,
        libc::ENOBUFS => SockError::NoResources,
        libc::ECONNRESET | libc::ECONNABORTED => SockError::ConnectionReset,
        libc::ETIMEDOUT => SockError::TimedOut,
        e => SockError::Unexpected(e),
    };
    ConnectStatus::Failed(code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStatus {
    /// Nothing usable yet (or the connection died in the backlog).
    Retry,
    Failed(SockError),
}

/// Classify a failed `accept(2)`.
pub fn classify_accept(errno: i32) -> AcceptStatus {
    if soft_error(errno).is_some() {
        return AcceptStatus::Retry;
    }
    match errno {
        libc::ECONNABORTED | libc::EPROTO | libc::ECONNRESET => AcceptStatus::Retry,
        libc::ENFILE | libc::EMFILE | libc::ENOBUFS | libc::ENOMEM => {
            AcceptStatus::Failed(SockError::NoResources)
        }
        e => AcceptStatus::Failed(SockError::Unexpected(e)),
    }
}

/// Map a failed `bind(2)`.
pub fn bind_error(errno: i32) -> SockError {
    match errno {
        libc::EACCES => SockError::NoPermission,
        libc::EADDRNOTAVAIL => SockError::AddrNotAvailable,
        libc::EADDRINUSE => SockError::AddrInUse,
        libc::EINVAL => SockError::AlreadyBound,
        e => SockError::Unexpected(e),
    }
}
