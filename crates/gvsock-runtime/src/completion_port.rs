//! # Completion port
//!
//! The queue the dispatcher pool blocks on. Linux has no native completion
//! queue for plain sockets, so one is assembled from two sources that
//! share a single epoll instance:
//!
//! ```text
//!   arm(sock, IN|OUT) ──► epoll (EPOLLONESHOT per socket) ──┐
//!                                                          ├──► get() ──► Packet
//!   post(Aborted/Exit) ─► posted queue + wake eventfd ──────┘
//! ```
//!
//! Every armed socket fires at most once per arm. Whichever worker's
//! `epoll_wait` returns the event owns that I/O until it re-arms. Posted
//! packets are handed out one per wakeup, so N exit tokens stop exactly N
//! workers.
//!
//! The port is generic over the item it hands back so it can be exercised
//! without real sockets.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::sync::{Mutex, MutexGuard, PoisonError};

use gvsock_core::kwarn;

use crate::platform_linux::{Epoll, WakeFd};

/// Token reserved for the posted-packet wake eventfd.
const WAKE_TOKEN: u64 = u64::MAX;

pub(crate) const READABLE: u32 = libc::EPOLLIN as u32;
pub(crate) const WRITABLE: u32 = libc::EPOLLOUT as u32;
/// Error or hang-up; reported whatever was armed.
pub(crate) const BROKEN: u32 = (libc::EPOLLERR | libc::EPOLLHUP) as u32;
const ONESHOT: u32 = libc::EPOLLONESHOT as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Recv,
    Send,
}

#[derive(Debug)]
pub(crate) enum Packet<T> {
    /// An armed item became ready. `events` holds the epoll bits.
    Ready { item: T, events: u32 },
    /// The operation was aborted because the item was closed.
    Aborted { item: T, direction: Direction },
    /// No more work: the receiving worker must exit.
    Exit,
}

pub(crate) struct CompletionPort<T> {
    epoll: Epoll,
    wake: WakeFd,
    posted: Mutex<VecDeque<Packet<T>>>,
    associated: Mutex<HashMap<u64, T>>,
}

impl<T: Clone> CompletionPort<T> {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = Epoll::new()?;
        let wake = WakeFd::new()?;
        epoll.add(wake.raw(), WAKE_TOKEN, READABLE | ONESHOT)?;
        Ok(Self {
            epoll,
            wake,
            posted: Mutex::new(VecDeque::new()),
            associated: Mutex::new(HashMap::new()),
        })
    }

    fn lock_posted(&self) -> MutexGuard<'_, VecDeque<Packet<T>>> {
        self.posted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_associated(&self) -> MutexGuard<'_, HashMap<u64, T>> {
        self.associated.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach `fd` to the port, initially disarmed. The port keeps `item`
    /// alive until [`disassociate`](Self::disassociate).
    pub(crate) fn associate(&self, token: u64, fd: RawFd, item: T) -> io::Result<()> {
        debug_assert_ne!(token, WAKE_TOKEN);
        self.epoll.add(fd, token, ONESHOT)?;
        self.lock_associated().insert(token, item);
        Ok(())
    }

    /// Arm an associated fd for one notification on `interest`.
    pub(crate) fn arm(&self, token: u64, fd: RawFd, interest: u32) -> io::Result<()> {
        self.epoll.modify(fd, token, interest | ONESHOT)
    }

    /// Detach `fd`. Returns the item the port was holding, if any. Events
    /// already taken by a worker may still be processed after this.
    pub(crate) fn disassociate(&self, token: u64, fd: RawFd) -> Option<T> {
        if let Err(e) = self.epoll.delete(fd) {
            if e.raw_os_error() != Some(libc::ENOENT) {
                kwarn!("completion port: epoll delete of fd {} failed: {}", fd, e);
            }
        }
        self.lock_associated().remove(&token)
    }

    #[cfg(test)]
    pub(crate) fn is_associated(&self, token: u64) -> bool {
        self.lock_associated().contains_key(&token)
    }

    /// Queue a packet for the next free worker.
    pub(crate) fn post(&self, packet: Packet<T>) {
        let mut posted = self.lock_posted();
        posted.push_back(packet);
        self.wake.notify();
    }

    /// One exit token per worker.
    pub(crate) fn post_exit(&self, workers: usize) {
        for _ in 0..workers {
            self.post(Packet::Exit);
        }
    }

    /// Block until a packet is available.
    pub(crate) fn get(&self) -> Packet<T> {
        loop {
            let (token, events) = match self.epoll.wait_one() {
                Ok(Some(ev)) => ev,
                Ok(None) => continue,
                Err(e) => {
                    kwarn!("completion port: epoll_wait failed: {}", e);
                    std::thread::yield_now();
                    continue;
                }
            };

            if token == WAKE_TOKEN {
                if let Some(packet) = self.take_posted() {
                    return packet;
                }
                continue;
            }

            let item = self.lock_associated().get(&token).cloned();
            match item {
                Some(item) => return Packet::Ready { item, events },
                // Disassociated after the event was queued by the kernel.
                None => continue,
            }
        }
    }

    fn take_posted(&self) -> Option<Packet<T>> {
        let packet = {
            let mut posted = self.lock_posted();
            let packet = posted.pop_front();
            if posted.is_empty() {
                self.wake.drain();
            }
            packet
        };
        // Re-arm the wake slot. If packets remain the eventfd is still
        // readable and another worker picks up the next one.
        if let Err(e) = self.epoll.modify(self.wake.raw(), WAKE_TOKEN, READABLE | ONESHOT) {
            kwarn!("completion port: re-arming wake fd failed: {}", e);
        }
        packet
    }

    #[cfg(test)]
    pub(crate) fn posted_len(&self) -> usize {
        self.lock_posted().len()
    }
}
