//! # Readiness multiplexer
//!
//! Listening and connecting sockets are watched by a pool of event threads,
//! each holding at most `max_registrations_per_thread` registrations in a
//! `poll(2)` set. Slot 0 of every set is the thread's wake eventfd.
//!
//! ```text
//!   Socket::listen / connect / accept / cancel
//!        │   (manager lock)
//!        ▼
//!   MultiplexerPool::register ──► EventChange::Add ──► mailbox ──► wake
//!                                                          │
//!   gvsock-evt-N:  poll([wake, s1, s2, ...]) ◄─────────────┘
//!        │
//!        ├── wake fired   → drain mailbox, apply deletes then adds
//!        ├── close        → log and mute the slot
//!        ├── accept ready → accept(2) into the prepared child, deliver
//!        └── connect done → SO_ERROR, deliver, drop the registration
//! ```
//!
//! A new thread is spawned when every existing one is full. The registering
//! thread itself is skipped so a handler never queues work for its own set.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use gvsock_core::classify::{classify_accept, classify_connect};
use gvsock_core::errno::io_errno;
use gvsock_core::kprint::LogLevel;
use gvsock_core::{
    kdebug, ktrace, kwarn, socket_log, AcceptEvent, AcceptStatus, ConnectStatus, SockError, StatCounter,
};

use crate::mailbox::{apply_batch, EventChange, Mailbox, Registration};
use crate::manager::ManagerShared;
use crate::platform_linux::{poll, WakeFd};
use crate::socket::{Socket, SocketInner};

/// Readiness conditions a socket can ask its event thread to watch.
pub(crate) mod interest {
    pub const NONE: u32 = 0;
    /// Error or hangup. Reported by `poll` whatever else is asked for.
    pub const CLOSE: u32 = 1 << 0;
    /// Incoming connection on a listener.
    pub const ACCEPT: u32 = 1 << 1;
    /// Outgoing connection finished.
    pub const CONNECT: u32 = 1 << 2;
}

fn poll_events(mask: u32) -> i16 {
    let mut events = 0;
    if mask & interest::ACCEPT != 0 {
        events |= libc::POLLIN;
    }
    if mask & interest::CONNECT != 0 {
        events |= libc::POLLOUT;
    }
    events
}

/// What the event loop does with a slot after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Keep,
    /// Stop polling until the socket's interest changes.
    Mute,
    /// The registration is finished; remove it now.
    Deregister,
}

/// One multiplexer thread, shared between the pool and its registrations.
pub(crate) struct EventThread {
    index: usize,
    wake: WakeFd,
    mailbox: Mailbox<Arc<SocketInner>>,
    /// Registrations held plus adds posted but not yet applied.
    reserved: AtomicUsize,
    stop: AtomicBool,
    thread_id: OnceLock<ThreadId>,
}

impl EventThread {
    fn new(index: usize) -> io::Result<Self> {
        Ok(Self {
            index,
            wake: WakeFd::new()?,
            mailbox: Mailbox::new(),
            reserved: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            thread_id: OnceLock::new(),
        })
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Make the thread rebuild its poll set.
    #[inline]
    pub(crate) fn wake(&self) {
        self.wake.notify();
    }

    /// Queue a registration change and wake the thread.
    pub(crate) fn post(&self, change: EventChange<Arc<SocketInner>>) {
        self.mailbox.push(change);
        self.wake.notify();
    }

    pub(crate) fn load(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Claim a slot. Only called under the manager lock, so the
    /// check-then-add cannot race another registration.
    fn try_reserve(&self, cap: usize) -> bool {
        if self.reserved.load(Ordering::Acquire) >= cap {
            return false;
        }
        self.reserved.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn release(&self, n: usize) {
        if n > 0 {
            self.reserved.fetch_sub(n, Ordering::AcqRel);
        }
    }

    fn is_current(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }
}

/// The set of event threads. Lives inside the manager state and is only
/// touched under the manager lock.
#[derive(Default)]
pub(crate) struct MultiplexerPool {
    threads: Vec<Arc<EventThread>>,
    handles: Vec<JoinHandle<()>>,
}

impl MultiplexerPool {
    pub(crate) fn len(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn loads(&self) -> Vec<usize> {
        self.threads.iter().map(|t| t.load()).collect()
    }

    /// Start one more event thread.
    pub(crate) fn spawn(&mut self, shared: &Arc<ManagerShared>) -> io::Result<Arc<EventThread>> {
        let index = self.threads.len();
        let thread = Arc::new(EventThread::new(index)?);
        let worker = thread.clone();
        let shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("gvsock-evt-{}", index))
            .spawn(move || event_thread_main(worker, shared))?;
        self.threads.push(thread.clone());
        self.handles.push(handle);
        Ok(thread)
    }

    /// Hand `sock` to a thread with room for it, spawning one if needed.
    pub(crate) fn register(
        &mut self,
        shared: &Arc<ManagerShared>,
        sock: &Arc<SocketInner>,
    ) -> io::Result<Arc<EventThread>> {
        let cap = shared.config.max_registrations_per_thread;
        let found = self
            .threads
            .iter()
            .find(|t| !t.is_current() && t.try_reserve(cap))
            .cloned();
        let thread = match found {
            Some(thread) => thread,
            None => {
                let thread = self.spawn(shared)?;
                kdebug!("multiplexer: spawned gvsock-evt-{} ({} threads)", thread.index, self.threads.len());
                thread.reserved.fetch_add(1, Ordering::AcqRel);
                thread
            }
        };
        thread.post(EventChange::add(sock.clone()));
        Ok(thread)
    }

    /// Stop and join every event thread.
    pub(crate) fn shutdown(self) {
        for thread in &self.threads {
            thread.stop.store(true, Ordering::Release);
            thread.wake();
        }
        for handle in self.handles {
            if handle.join().is_err() {
                kwarn!("multiplexer: event thread panicked");
            }
        }
    }
}

fn event_thread_main(thread: Arc<EventThread>, shared: Arc<ManagerShared>) {
    let _ = thread.thread_id.set(thread::current().id());
    kdebug!("gvsock-evt-{} started", thread.index);

    let mut slots: Vec<Registration<Arc<SocketInner>>> = Vec::new();
    let mut fds: Vec<libc::pollfd> = Vec::new();

    while !thread.stop.load(Ordering::Acquire) {
        fds.clear();
        fds.push(libc::pollfd {
            fd: thread.wake.raw(),
            events: libc::POLLIN,
            revents: 0,
        });
        for reg in slots.iter_mut() {
            let mask = reg.item.interest();
            if reg.muted_interest.is_some_and(|m| m != mask) {
                reg.muted_interest = None;
            }
            let fd = match (reg.muted_interest, reg.item.raw_fd()) {
                (None, Some(fd)) if mask != interest::NONE => fd,
                // poll ignores negative descriptors.
                _ => -1,
            };
            fds.push(libc::pollfd {
                fd,
                events: poll_events(mask),
                revents: 0,
            });
        }

        match poll(&mut fds, -1) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(e) => {
                kwarn!("gvsock-evt-{}: poll failed: {}", thread.index, e);
                continue;
            }
        }

        if fds[0].revents != 0 {
            thread.wake.drain();
            process_mailbox(&thread, &mut slots, &shared);
            continue;
        }

        let fired: Vec<(usize, Disposition)> = fds[1..]
            .iter()
            .enumerate()
            .filter(|(_, pfd)| pfd.revents != 0)
            .map(|(i, pfd)| (i, dispatch(&slots[i].item, pfd.revents, &shared)))
            .collect();

        let mut released = Vec::new();
        for (i, disposition) in fired.into_iter().rev() {
            match disposition {
                Disposition::Keep => {}
                Disposition::Mute => slots[i].muted_interest = Some(slots[i].item.interest()),
                Disposition::Deregister => released.push(slots.remove(i)),
            }
        }
        thread.release(released.len());
        drop(released);
    }

    kdebug!("gvsock-evt-{} exiting with {} registrations", thread.index, slots.len());
}

fn process_mailbox(
    thread: &EventThread,
    slots: &mut Vec<Registration<Arc<SocketInner>>>,
    shared: &ManagerShared,
) {
    let batch = thread.mailbox.drain();
    if batch.is_empty() {
        return;
    }
    let applied = {
        let _mgr = shared.lock_state();
        apply_batch(slots, batch, |a, b| Arc::ptr_eq(a, b))
    };
    thread.release(applied.removed.len());
    ktrace!(
        "gvsock-evt-{}: +{} -{} ({} held)",
        thread.index,
        applied.added,
        applied.removed.len(),
        slots.len()
    );
    for change in &applied.dropped {
        kwarn!("gvsock-evt-{}: dropping delete for unknown socket {}", thread.index, change.item.id);
    }
    if !applied.deferred.is_empty() {
        for change in applied.deferred {
            thread.mailbox.push(change);
        }
        thread.wake();
    }
    // Registrations removed here may hold the last reference; released
    // after the manager lock is gone.
    drop(applied.removed);
}

fn dispatch(sock: &Arc<SocketInner>, revents: i16, shared: &Arc<ManagerShared>) -> Disposition {
    let closed = revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
    let listener = {
        let st = sock.lock_state();
        if st.references == 0 || st.pending_close {
            // A delete is on its way.
            return Disposition::Mute;
        }
        st.listener
    };
    if listener {
        handle_accept(sock, closed, shared)
    } else {
        handle_connect(sock, closed, shared)
    }
}

fn handle_accept(sock: &Arc<SocketInner>, closed: bool, shared: &Arc<ManagerShared>) -> Disposition {
    let Some(fd) = sock.fd() else {
        return Disposition::Mute;
    };
    let mut st = sock.lock_state();

    if closed {
        let errno = match fd.take_error() {
            Ok(Some(e)) => io_errno(&e),
            _ => 0,
        };
        socket_log!(LogLevel::Debug, sock, None, "listener reported close (errno {})", errno);
        return Disposition::Mute;
    }
    if st.accept_list.is_empty() {
        return Disposition::Mute;
    }

    let (child_fd, from) = match fd.accept() {
        Ok(pair) => pair,
        Err(e) => match classify_accept(io_errno(&e)) {
            AcceptStatus::Retry => return Disposition::Keep,
            AcceptStatus::Failed(code) => {
                socket_log!(LogLevel::Warn, sock, None, "accept failed: {}", code);
                shared.stats.bump(StatCounter::AcceptFail);
                let req = st.accept_list.pop_front();
                if st.accept_list.is_empty() {
                    sock.set_interest(interest::CLOSE);
                }
                drop(st);
                if let Some(req) = req {
                    req.fail(code);
                }
                return Disposition::Keep;
            }
        },
    };

    let Some(req) = st.accept_list.pop_front() else {
        return Disposition::Keep;
    };
    if st.accept_list.is_empty() {
        sock.set_interest(interest::CLOSE);
    }
    drop(st);

    let (child, completer) = req.into_parts();
    let peer = from.as_socket();
    let linked = child_fd
        .set_nonblocking(true)
        .map_err(SockError::from)
        .and_then(|()| {
            child.adopt_accepted(child_fd, peer);
            shared.try_link(&mut shared.lock_state(), &child)
        });
    if let Err(code) = linked {
        socket_log!(LogLevel::Warn, sock, peer, "accepted connection dropped: {}", code);
        shared.stats.bump(StatCounter::AcceptFail);
        // The unlinked child closes the connection when it drops.
        drop(child);
        completer.complete(AcceptEvent {
            result: Err(code),
            socket: None,
            address: None,
        });
        return Disposition::Keep;
    }
    shared.stats.bump(StatCounter::Accept);
    socket_log!(LogLevel::Debug, child, peer, "accepted on listener {}", sock);

    // Delivered with no lock held: an abandoned event drops the child,
    // which destroys it.
    completer.complete(AcceptEvent {
        result: Ok(()),
        socket: Some(Socket::from_inner(child)),
        address: peer,
    });
    Disposition::Keep
}

fn handle_connect(sock: &Arc<SocketInner>, closed: bool, shared: &ManagerShared) -> Disposition {
    let Some(fd) = sock.fd() else {
        return Disposition::Mute;
    };
    let mut st = sock.lock_state();
    if !st.connecting || st.connect.is_none() {
        // Canceled; the delete is on its way.
        return Disposition::Mute;
    }

    let errno = match fd.take_error() {
        Ok(None) => 0,
        Ok(Some(e)) | Err(e) => io_errno(&e),
    };
    let status = match classify_connect(errno) {
        // A hangup with no pending error still needs a peer to count.
        ConnectStatus::Connected if closed => match fd.peer_addr() {
            Ok(_) => ConnectStatus::Connected,
            Err(e) => ConnectStatus::Failed(SockError::from(e)),
        },
        status => status,
    };

    let result = match status {
        ConnectStatus::Pending if closed => return Disposition::Mute,
        ConnectStatus::Pending => return Disposition::Keep,
        ConnectStatus::Connected => Ok(()),
        ConnectStatus::Failed(code) => Err(code),
    };

    st.connecting = false;
    let req = st.connect.take();
    shared.stats.bump(if result.is_ok() { StatCounter::Connect } else { StatCounter::ConnectFail });
    let stranded = match result {
        Ok(()) => {
            st.connected = true;
            st.bound = true;
            st.peer = req.as_ref().map(|r| r.address);
            None
        }
        Err(code) => Some((sock.take_queued_io(&mut st), code)),
    };
    sock.set_interest(interest::NONE);
    st.registration = None;
    socket_log!(LogLevel::Debug, sock, req.as_ref().map(|r| r.address), "connect finished: {:?}", result);
    drop(st);

    if let Some(req) = req {
        req.finish(result);
    }
    // Receives and sends queued while connecting start only now.
    match stranded {
        None => sock.resume_queued_io(),
        Some((queued, code)) => queued.fail(code),
    }
    Disposition::Deregister
}
