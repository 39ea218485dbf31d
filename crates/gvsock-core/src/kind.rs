//! Socket kind and address family.

use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    /// Connection-oriented byte stream (TCP).
    Stream,
    /// Connectionless datagrams (UDP).
    Datagram,
}

impl SocketKind {
    #[inline]
    pub fn is_stream(self) -> bool {
        self == SocketKind::Stream
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Inet,
    Inet6,
}

impl Family {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Family::Inet,
            SocketAddr::V6(_) => Family::Inet6,
        }
    }

    #[inline]
    pub fn matches(self, addr: &SocketAddr) -> bool {
        Family::of(addr) == self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_of() {
        let v4: SocketAddr = "127.0.0.1:53".parse().unwrap();
        let v6: SocketAddr = "[::1]:53".parse().unwrap();
        assert_eq!(Family::of(&v4), Family::Inet);
        assert!(Family::Inet6.matches(&v6));
        assert!(!Family::Inet.matches(&v6));
        assert!(SocketKind::Stream.is_stream());
    }
}
