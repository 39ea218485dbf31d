//! # Buffer/region model and scatter-gather builders
//!
//! A request carries its memory as a [`Payload`]: one contiguous region or an
//! ordered list of [`Buffer`]s. The builders turn the unfinished part of a
//! payload into an I/O vector for `sendmsg`/`recvmsg`:
//!
//! ```text
//!  Buffer:  [ used ............ | available ........ ]
//!            ▲ send reads here    ▲ recv writes here
//!
//!  send, list:  skip fully sent buffers, emit used[skip..] of the rest
//!  recv, list:  skip full buffers, emit available of the rest
//! ```
//!
//! The emitted lengths always add up to the remaining work, and a vector
//! never has more than `MAX_SCATTER_GATHER` entries. Payloads with more
//! buffers than that are rejected at submission by [`Payload::validate`].

use std::io::IoSlice;

use crate::error::{SockError, SockResult};

/// Upper bound on I/O vector entries per system call.
pub const MAX_SCATTER_GATHER: usize = 64;

/// A byte buffer with a used region followed by an available region.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Buffer {
    data: Vec<u8>,
    used: usize,
}

impl Buffer {
    /// Empty buffer with `capacity` bytes available for receiving.
    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            data: vec![0; capacity],
            used: 0,
        }
    }

    /// Buffer whose whole contents are used (ready to be sent).
    pub fn from_vec(data: Vec<u8>) -> Self {
        let used = data.len();
        Buffer { data, used }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn used_len(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn available_len(&self) -> usize {
        self.data.len() - self.used
    }

    pub fn used(&self) -> &[u8] {
        &self.data[..self.used]
    }

    pub fn available_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.used..]
    }

    /// Mark `n` more bytes of the available region as used.
    pub fn add(&mut self, n: usize) {
        debug_assert!(n <= self.available_len());
        self.used = (self.used + n).min(self.data.len());
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }

    /// The used bytes, dropping the unused tail.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.truncate(self.used);
        self.data
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Buffer::from_vec(data)
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Buffer::from_vec(data.to_vec())
    }
}

/// The memory a send or receive request operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// One contiguous region. Progress is tracked by the request.
    Region(Vec<u8>),
    /// Ordered buffers. Receive progress is recorded in each buffer.
    List(Vec<Buffer>),
}

impl Payload {
    pub fn empty() -> Self {
        Payload::Region(Vec::new())
    }

    /// Reject payloads no vector could describe.
    pub fn validate(&self) -> SockResult<()> {
        match self {
            Payload::List(list) if list.is_empty() => {
                Err(SockError::InvalidArgument("empty buffer list"))
            }
            Payload::List(list) if list.len() > MAX_SCATTER_GATHER => {
                Err(SockError::InvalidArgument("too many buffers"))
            }
            _ => Ok(()),
        }
    }

    /// Total bytes a send of this payload transfers.
    pub fn send_len(&self) -> usize {
        match self {
            Payload::Region(data) => data.len(),
            Payload::List(list) => list.iter().map(Buffer::used_len).sum(),
        }
    }

    /// Total bytes a receive into this payload can still take, before any
    /// progress is counted for a region.
    pub fn recv_capacity(&self) -> usize {
        match self {
            Payload::Region(data) => data.len(),
            Payload::List(list) => list.iter().map(Buffer::available_len).sum(),
        }
    }

    /// Vector over the bytes not yet sent, given `done` bytes already sent.
    pub fn send_slices(&self, done: usize) -> Vec<IoSlice<'_>> {
        let mut iov = Vec::new();
        match self {
            Payload::Region(data) => {
                if done < data.len() {
                    iov.push(IoSlice::new(&data[done..]));
                }
            }
            Payload::List(list) => {
                let mut skip = done;
                for buf in list {
                    if iov.len() == MAX_SCATTER_GATHER {
                        break;
                    }
                    let used = buf.used();
                    if skip >= used.len() {
                        skip -= used.len();
                        continue;
                    }
                    iov.push(IoSlice::new(&used[skip..]));
                    skip = 0;
                }
            }
        }
        iov
    }

    /// Vector over the space still free, given `done` bytes already received.
    ///
    /// For a list, `done` is ignored: each buffer's used region already
    /// reflects earlier progress.
    pub fn recv_slices(&mut self, done: usize) -> Vec<&mut [u8]> {
        let mut iov = Vec::new();
        match self {
            Payload::Region(data) => {
                if done < data.len() {
                    iov.push(&mut data[done..]);
                }
            }
            Payload::List(list) => {
                for buf in list.iter_mut() {
                    if iov.len() == MAX_SCATTER_GATHER {
                        break;
                    }
                    if buf.available_len() > 0 {
                        iov.push(buf.available_mut());
                    }
                }
            }
        }
        iov
    }

    /// Account for `n` bytes that `recvmsg` wrote through [`recv_slices`].
    ///
    /// [`recv_slices`]: Payload::recv_slices
    pub fn commit_recv(&mut self, mut n: usize) {
        if let Payload::List(list) = self {
            for buf in list.iter_mut() {
                if n == 0 {
                    break;
                }
                let take = n.min(buf.available_len());
                buf.add(take);
                n -= take;
            }
        }
    }

    pub fn as_region(&self) -> Option<&[u8]> {
        match self {
            Payload::Region(data) => Some(data),
            Payload::List(_) => None,
        }
    }

    pub fn into_region(self) -> Option<Vec<u8>> {
        match self {
            Payload::Region(data) => Some(data),
            Payload::List(_) => None,
        }
    }

    pub fn into_buffers(self) -> Option<Vec<Buffer>> {
        match self {
            Payload::List(list) => Some(list),
            Payload::Region(_) => None,
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Region(data)
    }
}

impl From<Vec<Buffer>> for Payload {
    fn from(list: Vec<Buffer>) -> Self {
        Payload::List(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(iov: &[IoSlice<'_>]) -> usize {
        iov.iter().map(|s| s.len()).sum()
    }

    #[test]
    fn test_buffer_regions() {
        let mut b = Buffer::with_capacity(8);
        assert_eq!(b.available_len(), 8);
        b.available_mut()[..3].copy_from_slice(b"abc");
        b.add(3);
        assert_eq!(b.used(), b"abc");
        assert_eq!(b.available_len(), 5);
        assert_eq!(b.into_vec(), b"abc".to_vec());
    }

    #[test]
    fn test_send_region_skips_done() {
        let p = Payload::Region(b"hello world".to_vec());
        let iov = p.send_slices(6);
        assert_eq!(iov.len(), 1);
        assert_eq!(&*iov[0], b"world");
        assert!(p.send_slices(11).is_empty());
    }

    #[test]
    fn test_send_list_skips_consumed_buffers() {
        let p = Payload::List(vec![
            Buffer::from(&b"abc"[..]),
            Buffer::from(&b"defg"[..]),
            Buffer::with_capacity(4),
            Buffer::from(&b"hi"[..]),
        ]);
        assert_eq!(p.send_len(), 9);

        let iov = p.send_slices(5);
        assert_eq!(total(&iov), 4);
        assert_eq!(&*iov[0], b"fg");
        assert_eq!(&*iov[1], b"hi");
        assert_eq!(iov.len(), 2);
    }

    #[test]
    fn test_recv_list_fills_in_order() {
        let mut p = Payload::List(vec![
            Buffer::with_capacity(2),
            Buffer::with_capacity(3),
            Buffer::with_capacity(4),
        ]);
        {
            let mut iov = p.recv_slices(0);
            assert_eq!(iov.len(), 3);
            iov[0].copy_from_slice(b"ab");
            iov[1][..2].copy_from_slice(b"cd");
        }
        p.commit_recv(4);
        let lens: Vec<usize> = p.recv_slices(0).iter().map(|s| s.len()).collect();
        assert_eq!(lens, vec![1, 4]);
        assert_eq!(p.recv_capacity(), 5);

        let bufs = p.into_buffers().unwrap();
        assert_eq!(bufs[0].used(), b"ab");
        assert_eq!(bufs[1].used(), b"cd");
        assert_eq!(bufs[2].used_len(), 0);
    }

    #[test]
    fn test_recv_region_progress() {
        let mut p = Payload::Region(vec![0; 10]);
        assert_eq!(p.recv_slices(4)[0].len(), 6);
        assert!(p.recv_slices(10).is_empty());
    }

    #[test]
    fn test_vector_bounded_by_limit() {
        let list: Vec<Buffer> = (0..MAX_SCATTER_GATHER)
            .map(|_| Buffer::from(&b"x"[..]))
            .collect();
        let p = Payload::List(list);
        assert!(p.validate().is_ok());
        assert_eq!(p.send_slices(0).len(), MAX_SCATTER_GATHER);
        assert_eq!(total(&p.send_slices(0)), MAX_SCATTER_GATHER);

        let mut big = p.into_buffers().unwrap();
        big.push(Buffer::from(&b"y"[..]));
        assert_eq!(
            Payload::List(big).validate(),
            Err(SockError::InvalidArgument("too many buffers"))
        );
        assert!(Payload::List(Vec::new()).validate().is_err());
    }
}
