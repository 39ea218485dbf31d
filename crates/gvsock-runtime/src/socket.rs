//! # Socket entity
//!
//! ```text
//!   Socket (user handle) ──clone/drop = attach/detach──► references
//!        │
//!        ▼
//!   Arc<SocketInner> ◄── registry, completion port, multiplexer slot,
//!        │               Aborted packets (each holds its own Arc)
//!        ▼
//!   Mutex<SocketState>: flags, recv/send/accept queues, pending connect,
//!                       pending_recv / pending_send counters
//! ```
//!
//! When `references` drops to zero the socket is destroyed: queued requests
//! are canceled, the readiness registration and completion association are
//! removed, and it is unlinked from the registry. The memory goes away when
//! the last `Arc` does, so a worker holding one can never touch freed state.
//!
//! Lock order: manager lock, then socket lock.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use socket2::SockAddr;

use gvsock_core::classify::{bind_error, classify_connect};
use gvsock_core::errno::io_errno;
use gvsock_core::kprint::LogLevel;
use gvsock_core::{
    completion_pair, socket_log, AcceptEvent, Buffer, CancelFlags, Completion, CompletionEvent,
    ConnectEvent, ConnectStatus, Family, IoContext, IoStatus, Payload, RecvEvent, Retry,
    SendEvent, SockError, SockResult, SocketId, SocketKind, StatCounter, SubmitFlags, Submission,
    Task, TaskId,
};

use crate::completion_port::{Direction, Packet, READABLE, WRITABLE};
use crate::mailbox::EventChange;
use crate::manager::ManagerShared;
use crate::multiplexer::{interest, EventThread};
use crate::request::{status_result, AcceptRequest, ConnectRequest, RecvRequest, SendRequest};

/// Mutable per-socket bookkeeping, guarded by the socket lock.
pub(crate) struct SocketState {
    pub(crate) references: u32,

    pub(crate) bound: bool,
    pub(crate) connected: bool,
    /// Set together with `connect`.
    pub(crate) connecting: bool,
    pub(crate) listener: bool,
    pub(crate) pending_close: bool,
    /// Associated with the completion port.
    pub(crate) associated: bool,

    pub(crate) peer: Option<SocketAddr>,

    pub(crate) recv_list: VecDeque<RecvRequest>,
    pub(crate) send_list: VecDeque<SendRequest>,
    pub(crate) accept_list: VecDeque<AcceptRequest>,
    pub(crate) connect: Option<ConnectRequest>,

    /// Armed receive notifications not yet consumed by a dispatcher.
    pub(crate) pending_recv: u32,
    pub(crate) pending_send: u32,

    /// Multiplexer thread that owns this socket's readiness registration.
    pub(crate) registration: Option<Arc<EventThread>>,
}

impl SocketState {
    fn new(references: u32) -> Self {
        Self {
            references,
            bound: false,
            connected: false,
            connecting: false,
            listener: false,
            pending_close: false,
            associated: false,
            peer: None,
            recv_list: VecDeque::new(),
            send_list: VecDeque::new(),
            accept_list: VecDeque::new(),
            connect: None,
            pending_recv: 0,
            pending_send: 0,
            registration: None,
        }
    }
}

/// Requests pulled off a socket for cancellation, delivered once every lock
/// is released.
#[derive(Default)]
pub(crate) struct Canceled {
    recv: Vec<RecvRequest>,
    send: Vec<SendRequest>,
    accept: Vec<AcceptRequest>,
    connect: Option<ConnectRequest>,
}

impl Canceled {
    fn is_empty(&self) -> bool {
        self.recv.is_empty() && self.send.is_empty() && self.accept.is_empty() && self.connect.is_none()
    }

    fn deliver(self) {
        self.fail(SockError::Canceled);
    }

    /// End every request with `code`.
    pub(crate) fn fail(self, code: SockError) {
        for req in self.recv {
            req.finish(Err(code));
        }
        for req in self.send {
            req.finish(Err(code));
        }
        for req in self.accept {
            req.fail(code);
        }
        if let Some(req) = self.connect {
            req.finish(Err(code));
        }
    }
}

/// Longest name kept by [`Socket::set_name`], in bytes.
pub const MAX_NAME_LEN: usize = 15;

fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Move out the requests of `queue` owned by `task` (all when `None`),
/// keeping the others in order.
fn take_matching<R>(queue: &mut VecDeque<R>, task: Option<TaskId>, owner: impl Fn(&R) -> TaskId) -> Vec<R> {
    let (hit, keep): (Vec<R>, Vec<R>) = queue
        .drain(..)
        .partition(|r| task.map_or(true, |t| owner(r) == t));
    queue.extend(keep);
    hit
}

pub(crate) struct SocketInner {
    pub(crate) id: SocketId,
    pub(crate) kind: SocketKind,
    pub(crate) family: Family,
    fd: OnceLock<socket2::Socket>,
    state: Mutex<SocketState>,
    /// Readiness conditions the owning multiplexer thread should watch.
    interest: AtomicU32,
    /// Leaf lock; taken only to set, read or log the name.
    name: Mutex<Option<String>>,
    pub(crate) manager: Arc<ManagerShared>,
}

impl SocketInner {
    pub(crate) fn new(
        manager: &Arc<ManagerShared>,
        kind: SocketKind,
        family: Family,
        fd: Option<socket2::Socket>,
    ) -> Arc<Self> {
        manager.socket_allocated();
        let cell = OnceLock::new();
        if let Some(fd) = fd {
            let _ = cell.set(fd);
        }
        Arc::new(Self {
            id: SocketId::next(),
            kind,
            family,
            fd: cell,
            state: Mutex::new(SocketState::new(1)),
            interest: AtomicU32::new(interest::NONE),
            name: Mutex::new(None),
            manager: manager.clone(),
        })
    }

    #[inline]
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SocketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn name(&self) -> Option<String> {
        self.name.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[inline]
    pub(crate) fn fd(&self) -> Option<&socket2::Socket> {
        self.fd.get()
    }

    #[inline]
    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.fd.get().map(|s| s.as_raw_fd())
    }

    fn fd_or_err(&self) -> SockResult<&socket2::Socket> {
        self.fd().ok_or(SockError::InvalidState("socket has no descriptor"))
    }

    #[inline]
    pub(crate) fn interest(&self) -> u32 {
        self.interest.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_interest(&self, mask: u32) {
        self.interest.store(mask, Ordering::Release);
    }

    /// Install the descriptor of an accepted connection into a prepared
    /// child socket.
    pub(crate) fn adopt_accepted(&self, fd: socket2::Socket, peer: Option<SocketAddr>) {
        let _ = self.fd.set(fd);
        let mut st = self.lock_state();
        st.bound = true;
        st.connected = true;
        st.peer = peer;
    }

    pub(crate) fn io_context(&self, st: &SocketState) -> IoContext {
        IoContext {
            kind: self.kind,
            connected: st.connected,
            source_port: None,
            drop_zero_port: self.manager.config.drop_zero_port_datagrams,
        }
    }

    fn peer_for_log(&self, st: &SocketState) -> Option<SocketAddr> {
        st.peer
    }

    pub(crate) fn snapshot(&self) -> SocketSnapshot {
        let name = self.name();
        let local = self
            .fd()
            .and_then(|fd| fd.local_addr().ok())
            .and_then(|addr| addr.as_socket());
        let st = self.lock_state();
        let flags = [
            (st.pending_recv > 0, "pending-receive"),
            (st.pending_send > 0, "pending-send"),
            (!st.accept_list.is_empty(), "pending-accept"),
            (st.listener, "listener"),
            (st.connected, "connected"),
            (st.connecting, "connecting"),
            (st.bound, "bound"),
        ];
        SocketSnapshot {
            id: self.id,
            name,
            kind: self.kind,
            references: st.references,
            local: if st.bound { local } else { None },
            peer: if st.connected { st.peer } else { None },
            states: flags.iter().filter(|(on, _)| *on).map(|&(_, label)| label).collect(),
        }
    }

    // ── Non-blocking attempts ──────────────────────────────────────────

    /// Attempt a receive, retrying immediate Soft outcomes up to the
    /// configured limit. A non-terminal result always means "wait".
    fn attempt_recv(&self, fd: &socket2::Socket, req: &mut RecvRequest, ctx: &IoContext) -> IoStatus {
        let limit = self.manager.config.soft_retry_limit;
        let mut tries = 0;
        loop {
            match req.attempt(fd, ctx) {
                IoStatus::Soft(Retry::Now) => {
                    tries += 1;
                    if tries >= limit {
                        return IoStatus::Soft(Retry::WouldBlock);
                    }
                }
                status => return status,
            }
        }
    }

    fn attempt_send(&self, fd: &socket2::Socket, req: &mut SendRequest, ctx: &IoContext) -> IoStatus {
        let limit = self.manager.config.soft_retry_limit;
        let mut tries = 0;
        loop {
            match req.attempt(fd, ctx) {
                IoStatus::Soft(Retry::Now) => {
                    tries += 1;
                    if tries >= limit {
                        return IoStatus::Soft(Retry::WouldBlock);
                    }
                }
                status => return status,
            }
        }
    }

    #[inline]
    fn count_failure(&self, counter: StatCounter, status: IoStatus) {
        if matches!(status, IoStatus::Hard(_)) {
            self.manager.stats.bump(counter);
        }
    }

    /// Service queued receives in order until one has to wait.
    pub(crate) fn drain_recv(self: &Arc<Self>, st: &mut SocketState) {
        let Some(fd) = self.fd() else { return };
        let ctx = self.io_context(st);
        let peer = self.peer_for_log(st);
        while let Some(req) = st.recv_list.front_mut() {
            let status = self.attempt_recv(fd, req, &ctx);
            if !status.is_terminal() {
                st.pending_recv = st.pending_recv.max(1);
                break;
            }
            self.count_failure(StatCounter::RecvFail, status);
            if let Some(req) = st.recv_list.pop_front() {
                socket_log!(LogLevel::Trace, self, peer, "recv done: {} bytes, {:?}", req.n, status);
                req.finish(status_result(status));
            }
        }
    }

    /// Service queued sends in order until one has to wait.
    pub(crate) fn drain_send(self: &Arc<Self>, st: &mut SocketState) {
        let Some(fd) = self.fd() else { return };
        let ctx = self.io_context(st);
        let peer = self.peer_for_log(st);
        while let Some(req) = st.send_list.front_mut() {
            let status = self.attempt_send(fd, req, &ctx);
            if !status.is_terminal() {
                st.pending_send = st.pending_send.max(1);
                break;
            }
            self.count_failure(StatCounter::SendFail, status);
            if let Some(req) = st.send_list.pop_front() {
                socket_log!(LogLevel::Trace, self, peer, "send done: {} bytes, {:?}", req.n, status);
                req.finish(status_result(status));
            }
        }
    }

    /// Pull out the receives and sends queued behind a connect that did
    /// not succeed. None of them was ever armed.
    pub(crate) fn take_queued_io(&self, st: &mut SocketState) -> Canceled {
        Canceled {
            recv: st.recv_list.drain(..).collect(),
            send: st.send_list.drain(..).collect(),
            ..Canceled::default()
        }
    }

    /// Start the receives and sends that waited for the connect to finish.
    pub(crate) fn resume_queued_io(self: &Arc<Self>) {
        let mut st = self.lock_state();
        if st.pending_close || st.connecting || !st.connected {
            return;
        }
        self.drain_recv(&mut st);
        self.drain_send(&mut st);
        self.rearm(&mut st);
    }

    /// Arm the completion port for every direction with a pending
    /// notification, associating the socket first if needed.
    pub(crate) fn rearm(self: &Arc<Self>, st: &mut SocketState) {
        let mut mask = 0;
        if st.pending_recv > 0 {
            mask |= READABLE;
        }
        if st.pending_send > 0 {
            mask |= WRITABLE;
        }
        if mask == 0 || st.pending_close {
            return;
        }
        let Some(fd) = self.raw_fd() else { return };
        let port = &self.manager.port;
        let token = self.id.as_u64();

        if !st.associated {
            if let Err(e) = port.associate(token, fd, self.clone()) {
                socket_log!(LogLevel::Warn, self, st.peer, "completion port associate failed: {}", e);
                self.fail_queued(st, SockError::from(e));
                return;
            }
            st.associated = true;
        }
        if let Err(e) = port.arm(token, fd, mask) {
            socket_log!(LogLevel::Warn, self, st.peer, "completion port arm failed: {}", e);
            self.fail_queued(st, SockError::from(e));
        }
    }

    /// The port cannot watch this socket; end everything queued on it.
    fn fail_queued(&self, st: &mut SocketState, code: SockError) {
        st.pending_recv = 0;
        st.pending_send = 0;
        for req in st.recv_list.drain(..) {
            req.finish(Err(code));
        }
        for req in st.send_list.drain(..) {
            req.finish(Err(code));
        }
    }

    // ── Destruction ────────────────────────────────────────────────────

    /// Called when the last user reference is gone.
    fn destroy(self: &Arc<Self>) {
        let shared = self.manager.clone();
        let canceled;
        let unlinked;
        let released;
        let mut aborts = (0, 0);
        {
            let mut mgr = shared.lock_state();
            let mut st = self.lock_state();
            st.pending_close = true;

            canceled = Canceled {
                recv: st.recv_list.drain(..).collect(),
                send: st.send_list.drain(..).collect(),
                accept: st.accept_list.drain(..).collect(),
                connect: st.connect.take(),
            };
            st.connecting = false;

            self.set_interest(interest::NONE);
            if let Some(thread) = st.registration.take() {
                thread.post(EventChange::delete(self.clone()));
            }

            released = if st.associated {
                st.associated = false;
                aborts = (st.pending_recv, st.pending_send);
                self.raw_fd()
                    .and_then(|fd| shared.port.disassociate(self.id.as_u64(), fd))
            } else {
                None
            };

            unlinked = shared.unlink(&mut mgr, self.id);
            socket_log!(LogLevel::Debug, self, st.peer, "destroyed ({} in flight)", aborts.0 + aborts.1);
        }

        for _ in 0..aborts.0 {
            shared.port.post(Packet::Aborted {
                item: self.clone(),
                direction: Direction::Recv,
            });
        }
        for _ in 0..aborts.1 {
            shared.port.post(Packet::Aborted {
                item: self.clone(),
                direction: Direction::Send,
            });
        }

        canceled.deliver();
        drop(released);
        drop(unlinked);
    }
}

/// State of one socket as reported by [`SocketManager::dump`](crate::SocketManager::dump).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSnapshot {
    pub id: SocketId,
    pub name: Option<String>,
    pub kind: SocketKind,
    pub references: u32,
    pub local: Option<SocketAddr>,
    /// Only reported once connected.
    pub peer: Option<SocketAddr>,
    pub states: Vec<&'static str>,
}

impl fmt::Display for SocketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(name) = &self.name {
            write!(f, " ({})", name)?;
        }
        write!(f, " {:?} refs={}", self.kind, self.references)?;
        if let Some(local) = self.local {
            write!(f, " local={}", local)?;
        }
        if let Some(peer) = self.peer {
            write!(f, " peer={}", peer)?;
        }
        write!(f, " [{}]", self.states.join(", "))
    }
}

/// `#id`, followed by the name when one is set.
impl fmt::Display for SocketInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.lock().unwrap_or_else(PoisonError::into_inner);
        match name.as_deref() {
            Some(name) => write!(f, "{} ({})", self.id, name),
            None => write!(f, "{}", self.id),
        }
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let inflight = st.pending_recv + st.pending_send;
        if inflight > 0 {
            gvsock_core::kerror!("socket {} released with {} operations in flight", self.id, inflight);
        }
        self.manager.socket_released(inflight > 0);
    }
}

/// Shared handle to a socket.
///
/// Cloning is `attach`; dropping is `detach`. The socket is destroyed when
/// the last handle goes, even if a worker thread still holds the object.
pub struct Socket {
    inner: Arc<SocketInner>,
}

impl Socket {
    /// Wrap an object whose reference count already includes this handle.
    pub(crate) fn from_inner(inner: Arc<SocketInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> SocketId {
        self.inner.id
    }

    pub fn kind(&self) -> SocketKind {
        self.inner.kind
    }

    pub fn family(&self) -> Family {
        self.inner.family
    }

    /// Label the socket in logs and state dumps. Names longer than
    /// [`MAX_NAME_LEN`] bytes are cut at a character boundary.
    pub fn set_name(&self, name: &str) {
        let name = truncate_name(name);
        *self.inner.name.lock().unwrap_or_else(PoisonError::into_inner) = Some(name.to_owned());
    }

    pub fn name(&self) -> Option<String> {
        self.inner.name()
    }

    /// Restrict an IPv6 socket to IPv6 traffic (`IPV6_V6ONLY`). A no-op on
    /// IPv4 sockets.
    pub fn set_ipv6_only(&self, only: bool) -> SockResult<()> {
        if self.inner.family != Family::Inet6 {
            return Ok(());
        }
        let fd = self.inner.fd_or_err()?;
        fd.set_only_v6(only).map_err(SockError::from)
    }

    /// `IPV6_V6ONLY` as currently set; always false for IPv4 sockets.
    pub fn is_ipv6_only(&self) -> SockResult<bool> {
        if self.inner.family != Family::Inet6 {
            return Ok(false);
        }
        self.inner.fd_or_err()?.only_v6().map_err(SockError::from)
    }

    /// Take another reference.
    pub fn attach(&self) -> Socket {
        self.inner.lock_state().references += 1;
        Socket {
            inner: self.inner.clone(),
        }
    }

    /// Give up this reference.
    pub fn detach(self) {
        drop(self);
    }

    pub fn references(&self) -> u32 {
        self.inner.lock_state().references
    }

    pub fn is_bound(&self) -> bool {
        self.inner.lock_state().bound
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().connected
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.lock_state().connecting
    }

    pub fn is_listening(&self) -> bool {
        self.inner.lock_state().listener
    }

    pub fn bind(&self, addr: SocketAddr) -> SockResult<()> {
        let inner = &self.inner;
        if !inner.family.matches(&addr) {
            return Err(SockError::FamilyMismatch);
        }
        let fd = inner.fd_or_err()?;
        let mut st = inner.lock_state();
        if st.bound {
            return Err(SockError::AlreadyBound);
        }
        if addr.port() != 0 {
            fd.set_reuse_address(true)
                .map_err(|e| SockError::Unexpected(io_errno(&e)))?;
        }
        if let Err(e) = fd.bind(&SockAddr::from(addr)) {
            inner.manager.stats.bump(StatCounter::BindFail);
            return Err(bind_error(io_errno(&e)));
        }
        st.bound = true;
        socket_log!(LogLevel::Debug, inner, None, "bound to {}", addr);
        Ok(())
    }

    /// Start listening. A `backlog` of 0 uses the configured default
    /// (`SOMAXCONN` unless overridden).
    pub fn listen(&self, backlog: u32) -> SockResult<()> {
        let inner = &self.inner;
        {
            let mut st = inner.lock_state();
            if !inner.kind.is_stream() {
                return Err(SockError::InvalidState("listen on datagram socket"));
            }
            if !st.bound {
                return Err(SockError::InvalidState("listen on unbound socket"));
            }
            if st.listener {
                return Err(SockError::InvalidState("socket is already listening"));
            }
            if st.connected || st.connecting {
                return Err(SockError::InvalidState("listen on connected socket"));
            }
            let fd = inner.fd_or_err()?;
            fd.listen(inner.manager.config.resolved_backlog(backlog))
                .map_err(SockError::from)?;
            st.listener = true;
            inner.set_interest(interest::CLOSE);
        }
        inner.manager.register_readiness(inner)
    }

    /// Queue an accept. The event carries the connected child socket.
    pub fn accept(&self, task: &Task) -> SockResult<Completion<AcceptEvent<Socket>>> {
        let inner = &self.inner;
        let (completer, completion) = completion_pair();
        let child = SocketInner::new(&inner.manager, SocketKind::Stream, inner.family, None);

        let wake = {
            let mut st = inner.lock_state();
            if !st.listener {
                return Err(SockError::InvalidState("accept on socket that is not listening"));
            }
            let was_empty = st.accept_list.is_empty();
            st.accept_list
                .push_back(AcceptRequest::new(task.id(), child, completer));
            if was_empty {
                inner.set_interest(interest::ACCEPT | interest::CLOSE);
                st.registration.clone()
            } else {
                None
            }
        };
        if let Some(thread) = wake {
            thread.wake();
        }
        Ok(completion)
    }

    pub fn connect(&self, addr: SocketAddr, task: &Task) -> SockResult<Completion<ConnectEvent>> {
        let inner = &self.inner;
        if !inner.family.matches(&addr) {
            return Err(SockError::FamilyMismatch);
        }
        if addr.ip().is_multicast() {
            return Err(SockError::Multicast);
        }
        let fd = inner.fd_or_err()?;
        let (completer, completion) = completion_pair();

        {
            let mut st = inner.lock_state();
            if st.connecting {
                return Err(SockError::InvalidState("connect already in progress"));
            }
            if st.listener {
                return Err(SockError::InvalidState("connect on listening socket"));
            }

            let errno = match fd.connect(&SockAddr::from(addr)) {
                Ok(()) => 0,
                Err(e) => io_errno(&e),
            };
            match classify_connect(errno) {
                ConnectStatus::Connected => {
                    st.connected = true;
                    st.bound = true;
                    st.peer = Some(addr);
                    socket_log!(LogLevel::Debug, inner, st.peer, "connected");
                    inner.manager.stats.bump(StatCounter::Connect);
                    completer.complete(ConnectEvent { result: Ok(()) });
                    return Ok(completion);
                }
                ConnectStatus::Failed(code) => {
                    socket_log!(LogLevel::Debug, inner, Some(addr), "connect failed: {}", code);
                    inner.manager.stats.bump(StatCounter::ConnectFail);
                    completer.complete(ConnectEvent { result: Err(code) });
                    return Ok(completion);
                }
                ConnectStatus::Pending => {
                    st.connecting = true;
                    st.bound = true;
                    st.connect = Some(ConnectRequest::new(task.id(), addr, completer));
                    inner.set_interest(interest::CONNECT | interest::CLOSE);
                }
            }
        }

        if let Err(code) = inner.manager.register_readiness(inner) {
            inner.manager.stats.bump(StatCounter::ConnectFail);
            let failed = {
                let mut st = inner.lock_state();
                st.connecting = false;
                inner.set_interest(interest::NONE);
                let mut failed = inner.take_queued_io(&mut st);
                failed.connect = st.connect.take();
                failed
            };
            failed.fail(code);
        }
        Ok(completion)
    }

    // ── Receive ────────────────────────────────────────────────────────

    /// Receive into a single region. For streams, `minimum` bytes must
    /// arrive before the event fires (0 = the whole region). Datagram
    /// receives complete with one datagram.
    pub fn recv(&self, region: Vec<u8>, minimum: usize, task: &Task) -> SockResult<Completion<RecvEvent>> {
        self.recv_with(Payload::Region(region), minimum, task, SubmitFlags::NONE)
            .map(into_completion)
    }

    /// Receive into an ordered list of buffers, filling each one's
    /// available region in turn.
    pub fn recvv(&self, buffers: Vec<Buffer>, minimum: usize, task: &Task) -> SockResult<Completion<RecvEvent>> {
        self.recv_with(Payload::List(buffers), minimum, task, SubmitFlags::NONE)
            .map(into_completion)
    }

    /// Receive with explicit submission flags.
    ///
    /// With `SubmitFlags::IMMEDIATE`, a receive that finishes during the
    /// call comes back as `Submission::Done`. Otherwise the event is
    /// delivered through the returned completion.
    pub fn recv_with(
        &self,
        payload: Payload,
        minimum: usize,
        task: &Task,
        flags: SubmitFlags,
    ) -> SockResult<Submission<RecvEvent>> {
        let inner = &self.inner;
        payload.validate()?;
        let capacity = payload.recv_capacity();
        if capacity == 0 {
            return Err(SockError::InvalidArgument("receive buffer has no space"));
        }
        let minimum = match inner.kind {
            SocketKind::Datagram => 1,
            SocketKind::Stream if minimum == 0 => capacity,
            SocketKind::Stream if minimum > capacity => {
                return Err(SockError::InvalidArgument("minimum exceeds buffer space"));
            }
            SocketKind::Stream => minimum,
        };
        let fd = inner.fd_or_err()?;
        let (completer, completion) = completion_pair();
        let mut req = RecvRequest::new(task.id(), payload, minimum, completer);

        let mut st = inner.lock_state();
        if st.listener {
            return Err(SockError::InvalidState("receive on listening socket"));
        }
        if !(st.bound || st.connected || st.connecting) {
            return Err(SockError::InvalidState("receive on unbound socket"));
        }
        if inner.kind.is_stream() && !(st.connected || st.connecting) {
            return Err(SockError::NotConnected);
        }

        if st.recv_list.is_empty() && !st.connecting {
            let ctx = inner.io_context(&st);
            let status = inner.attempt_recv(fd, &mut req, &ctx);
            if status.is_terminal() {
                inner.count_failure(StatCounter::RecvFail, status);
                socket_log!(LogLevel::Trace, inner, st.peer, "recv immediate: {} bytes, {:?}", req.n, status);
                let (completer, event) = req.into_event(status_result(status));
                if flags.contains(SubmitFlags::IMMEDIATE) {
                    return Ok(Submission::Done(event));
                }
                completer.complete(event);
                return Ok(Submission::InProgress(completion));
            }
        }

        st.recv_list.push_back(req);
        // While connecting nothing is armed; the connect handler starts
        // the queue once the outcome is known.
        if st.pending_recv == 0 && !st.connecting {
            st.pending_recv = 1;
            inner.rearm(&mut st);
        }
        Ok(Submission::InProgress(completion))
    }

    // ── Send ───────────────────────────────────────────────────────────

    pub fn send(&self, data: Vec<u8>, task: &Task) -> SockResult<Completion<SendEvent>> {
        self.send_with(Payload::Region(data), None, task, SubmitFlags::NONE)
            .map(into_completion)
    }

    pub fn sendto(&self, data: Vec<u8>, dest: SocketAddr, task: &Task) -> SockResult<Completion<SendEvent>> {
        self.send_with(Payload::Region(data), Some(dest), task, SubmitFlags::NONE)
            .map(into_completion)
    }

    pub fn sendv(&self, buffers: Vec<Buffer>, task: &Task) -> SockResult<Completion<SendEvent>> {
        self.send_with(Payload::List(buffers), None, task, SubmitFlags::NONE)
            .map(into_completion)
    }

    pub fn sendtov(&self, buffers: Vec<Buffer>, dest: SocketAddr, task: &Task) -> SockResult<Completion<SendEvent>> {
        self.send_with(Payload::List(buffers), Some(dest), task, SubmitFlags::NONE)
            .map(into_completion)
    }

    /// Send with explicit submission flags. `dest` is ignored on streams.
    ///
    /// `SubmitFlags::NORETRY` fails a send that would have to wait with
    /// `NoResources` instead of queueing it.
    pub fn send_with(
        &self,
        payload: Payload,
        dest: Option<SocketAddr>,
        task: &Task,
        flags: SubmitFlags,
    ) -> SockResult<Submission<SendEvent>> {
        let inner = &self.inner;
        payload.validate()?;
        if let Some(dest) = dest {
            if !inner.family.matches(&dest) {
                return Err(SockError::FamilyMismatch);
            }
        }
        let dest = if inner.kind.is_stream() { None } else { dest };
        let fd = inner.fd_or_err()?;
        let (completer, completion) = completion_pair();
        let mut req = SendRequest::new(task.id(), payload, dest, completer);

        let mut st = inner.lock_state();
        match inner.kind {
            SocketKind::Stream if !(st.connected || st.connecting) => {
                return Err(SockError::NotConnected);
            }
            SocketKind::Datagram if dest.is_none() && !st.connected => {
                return Err(SockError::InvalidState("datagram send needs a destination"));
            }
            _ => {}
        }

        if st.send_list.is_empty() && !st.connecting {
            let ctx = inner.io_context(&st);
            let mut status = inner.attempt_send(fd, &mut req, &ctx);
            if !status.is_terminal() && flags.contains(SubmitFlags::NORETRY) {
                status = IoStatus::Hard(SockError::NoResources);
            }
            if status.is_terminal() {
                inner.count_failure(StatCounter::SendFail, status);
                socket_log!(LogLevel::Trace, inner, st.peer, "send immediate: {} bytes, {:?}", req.n, status);
                let (completer, event) = req.into_event(status_result(status));
                if flags.contains(SubmitFlags::IMMEDIATE) {
                    return Ok(Submission::Done(event));
                }
                completer.complete(event);
                return Ok(Submission::InProgress(completion));
            }
        }

        st.send_list.push_back(req);
        if st.pending_send == 0 && !st.connecting {
            st.pending_send = 1;
            inner.rearm(&mut st);
        }
        Ok(Submission::InProgress(completion))
    }

    // ── Cancellation ───────────────────────────────────────────────────

    /// Cancel queued requests of the kinds in `how`, only those issued by
    /// `task` when one is given. Each canceled request gets one `Canceled`
    /// event; requests already delivered are untouched.
    pub fn cancel(&self, task: Option<&Task>, how: CancelFlags) {
        let inner = &self.inner;
        let task = task.map(Task::id);
        let mut canceled = Canceled::default();
        let mut wake = None;
        let mut delete = None;
        {
            let mut st = inner.lock_state();
            if how.contains(CancelFlags::RECV) {
                canceled.recv = take_matching(&mut st.recv_list, task, |r| r.task);
            }
            if how.contains(CancelFlags::SEND) {
                canceled.send = take_matching(&mut st.send_list, task, |r| r.task);
            }
            if how.contains(CancelFlags::ACCEPT) && !st.accept_list.is_empty() {
                canceled.accept = take_matching(&mut st.accept_list, task, |r| r.task);
                if st.accept_list.is_empty() && !canceled.accept.is_empty() {
                    inner.set_interest(interest::CLOSE);
                    wake = st.registration.clone();
                }
            }
            if how.contains(CancelFlags::CONNECT) && st.connecting {
                let owned = st
                    .connect
                    .as_ref()
                    .map_or(false, |r| task.map_or(true, |t| r.task == t));
                if owned {
                    // I/O queued behind the connect can never start now.
                    let queued = inner.take_queued_io(&mut st);
                    canceled.recv.extend(queued.recv);
                    canceled.send.extend(queued.send);
                    canceled.connect = st.connect.take();
                    st.connecting = false;
                    inner.set_interest(interest::NONE);
                    delete = st.registration.take();
                }
            }
            if !canceled.is_empty() {
                socket_log!(LogLevel::Debug, inner, st.peer, "canceled {} recv, {} send, {} accept, {} connect",
                    canceled.recv.len(), canceled.send.len(), canceled.accept.len(),
                    canceled.connect.is_some() as usize);
            }
        }
        if let Some(thread) = wake {
            thread.wake();
        }
        if let Some(thread) = delete {
            thread.post(EventChange::delete(inner.clone()));
        }
        canceled.deliver();
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn peer_name(&self) -> SockResult<SocketAddr> {
        let st = self.inner.lock_state();
        if !st.connected {
            return Err(SockError::NotConnected);
        }
        st.peer.ok_or(SockError::NotConnected)
    }

    pub fn sock_name(&self) -> SockResult<SocketAddr> {
        let fd = self.inner.fd_or_err()?;
        if !self.inner.lock_state().bound {
            return Err(SockError::NotBound);
        }
        let addr = fd.local_addr().map_err(SockError::from)?;
        addr.as_socket().ok_or(SockError::Unexpected(libc::EAFNOSUPPORT))
    }

    #[cfg(test)]
    pub(crate) fn readiness_interest(&self) -> u32 {
        self.inner.interest()
    }

    #[cfg(test)]
    pub(crate) fn readiness_owner(&self) -> Option<usize> {
        self.inner.lock_state().registration.as_ref().map(|t| t.index())
    }
}

impl Clone for Socket {
    fn clone(&self) -> Self {
        self.attach()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let last = {
            let mut st = self.inner.lock_state();
            st.references -= 1;
            st.references == 0
        };
        if last {
            self.inner.destroy();
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("family", &self.inner.family)
            .field("name", &self.inner.name())
            .finish()
    }
}

fn into_completion<E: CompletionEvent>(submission: Submission<E>) -> Completion<E> {
    match submission {
        Submission::InProgress(completion) => completion,
        Submission::Done(event) => {
            let (completer, completion) = completion_pair();
            completer.complete(event);
            completion
        }
    }
}
