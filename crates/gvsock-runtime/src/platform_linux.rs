//! Linux primitives used by the reactor: an eventfd wake handle, a thin
//! epoll wrapper for the completion port, and `poll(2)` for the
//! multiplexer threads.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;

use gvsock_core::kwarn;

/// errno of the last failed libc call on this thread.
#[inline]
pub(crate) fn last_errno() -> i32 {
    Errno::last() as i32
}

#[inline]
fn last_error() -> io::Error {
    io::Error::from_raw_os_error(last_errno())
}

/// Non-blocking eventfd used to wake a thread blocked in `poll`/`epoll_wait`.
///
/// Notifications coalesce: several `notify` calls before a `drain` produce
/// one wakeup.
#[derive(Debug)]
pub(crate) struct WakeFd {
    fd: OwnedFd,
}

impl WakeFd {
    pub(crate) fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(last_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub(crate) fn notify(&self) {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = last_errno();
            // EAGAIN: counter saturated, a wakeup is already pending.
            if errno != libc::EAGAIN {
                kwarn!("eventfd write failed: errno {}", errno);
            }
        }
    }

    /// Reset the counter. Returns true if any notification was pending.
    pub(crate) fn drain(&self) -> bool {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        ret == std::mem::size_of::<u64>() as isize && val > 0
    }

    #[inline]
    pub(crate) fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Owned epoll instance.
#[derive(Debug)]
pub(crate) struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub(crate) fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(last_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, events: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: token };
        let ret = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            return Err(last_error());
        }
        Ok(())
    }

    pub(crate) fn add(&self, fd: RawFd, token: u64, events: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, events)
    }

    pub(crate) fn modify(&self, fd: RawFd, token: u64, events: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, events)
    }

    pub(crate) fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0)
    }

    /// Block until one event is ready. `Ok(None)` on EINTR.
    pub(crate) fn wait_one(&self) -> io::Result<Option<(u64, u32)>> {
        let mut ev = libc::epoll_event { events: 0, u64: 0 };
        let n = unsafe { libc::epoll_wait(self.fd.as_raw_fd(), &mut ev, 1, -1) };
        if n < 0 {
            let errno = last_errno();
            if errno == libc::EINTR {
                return Ok(None);
            }
            return Err(io::Error::from_raw_os_error(errno));
        }
        if n == 0 {
            return Ok(None);
        }
        let token = ev.u64;
        let events = ev.events;
        Ok(Some((token, events)))
    }
}

/// `poll(2)` with an infinite timeout when `timeout_ms` is negative.
/// EINTR is reported as zero ready descriptors.
pub(crate) fn poll(fds: &mut [libc::pollfd], timeout_ms: i32) -> io::Result<usize> {
    let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if n < 0 {
        let errno = last_errno();
        if errno == libc::EINTR {
            return Ok(0);
        }
        return Err(io::Error::from_raw_os_error(errno));
    }
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_fd_coalesces() {
        let wake = WakeFd::new().unwrap();
        assert!(!wake.drain());
        wake.notify();
        wake.notify();
        assert!(wake.drain());
        assert!(!wake.drain());
    }

    #[test]
    fn test_poll_sees_wake() {
        let wake = WakeFd::new().unwrap();
        let mut fds = [libc::pollfd {
            fd: wake.raw(),
            events: libc::POLLIN,
            revents: 0,
        }];
        assert_eq!(poll(&mut fds, 0).unwrap(), 0);
        wake.notify();
        assert_eq!(poll(&mut fds, 1000).unwrap(), 1);
        assert!(fds[0].revents & libc::POLLIN != 0);
    }

    #[test]
    fn test_epoll_oneshot() {
        let ep = Epoll::new().unwrap();
        let wake = WakeFd::new().unwrap();
        let flags = (libc::EPOLLIN | libc::EPOLLONESHOT) as u32;
        ep.add(wake.raw(), 42, flags).unwrap();
        wake.notify();
        assert_eq!(ep.wait_one().unwrap().map(|(t, _)| t), Some(42));
        ep.modify(wake.raw(), 43, flags).unwrap();
        assert_eq!(ep.wait_one().unwrap().map(|(t, _)| t), Some(43));
        ep.delete(wake.raw()).unwrap();
    }
}
