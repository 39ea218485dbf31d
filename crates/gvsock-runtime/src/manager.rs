//! # Socket manager
//!
//! Owns the completion port, the dispatcher pool, the multiplexer pool and
//! the registry of live sockets.
//!
//! ```text
//!   SocketManager
//!     ├── ManagerShared (Arc, shared with every socket and worker)
//!     │     ├── config
//!     │     ├── port: CompletionPort<Arc<SocketInner>>
//!     │     ├── state: Mutex<ManagerState>       ◄── manager lock
//!     │     │     ├── registry: id → socket
//!     │     │     ├── multiplexer: event threads
//!     │     │     └── shutting_down
//!     │     ├── stats: SocketStats (atomic counters)
//!     │     └── live: Mutex<usize> + Condvar     ◄── leaf lock
//!     └── DispatcherPool (gvsock-io-N)
//! ```
//!
//! Shutdown waits until every socket object is gone, then stops the
//! multiplexer threads and sends one exit packet per dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use gvsock_core::kprint::LogLevel;
use gvsock_core::{
    kdebug, kinfo, kwarn, socket_log, Family, SockError, SockResult, SocketId, SocketKind,
    SocketStats, StatCounter, StatsSnapshot,
};

use crate::completion_port::CompletionPort;
use crate::config::ManagerConfig;
use crate::dispatcher::DispatcherPool;
use crate::multiplexer::MultiplexerPool;
use crate::socket::{Socket, SocketInner, SocketSnapshot};

pub(crate) struct ManagerState {
    registry: HashMap<SocketId, Arc<SocketInner>>,
    pub(crate) multiplexer: MultiplexerPool,
    shutting_down: bool,
}

pub(crate) struct ManagerShared {
    pub(crate) config: ManagerConfig,
    pub(crate) port: CompletionPort<Arc<SocketInner>>,
    pub(crate) stats: SocketStats,
    state: Mutex<ManagerState>,
    /// Socket objects still allocated, registry or not.
    live: Mutex<usize>,
    shutdown_ok: Condvar,
    /// Objects freed while a notification was still armed. Must stay 0.
    inflight_releases: AtomicUsize,
}

impl ManagerShared {
    #[inline]
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_live(&self) -> MutexGuard<'_, usize> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn socket_allocated(&self) {
        *self.lock_live() += 1;
    }

    pub(crate) fn socket_released(&self, had_inflight: bool) {
        if had_inflight {
            self.inflight_releases.fetch_add(1, Ordering::Relaxed);
        }
        let mut live = self.lock_live();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.shutdown_ok.notify_all();
        }
    }

    /// Add a socket to the registry, unless it already holds
    /// `max_sockets`.
    pub(crate) fn try_link(&self, mgr: &mut ManagerState, sock: &Arc<SocketInner>) -> SockResult<()> {
        if mgr.registry.len() >= self.config.max_sockets {
            kwarn!("manager: socket limit {} reached", self.config.max_sockets);
            return Err(SockError::NoResources);
        }
        mgr.registry.insert(sock.id, sock.clone());
        self.stats.bump(StatCounter::Active);
        Ok(())
    }

    /// Remove a socket from the registry. The caller drops the returned
    /// reference after releasing its locks.
    pub(crate) fn unlink(&self, mgr: &mut ManagerState, id: SocketId) -> Option<Arc<SocketInner>> {
        let removed = mgr.registry.remove(&id);
        if removed.is_some() {
            self.stats.bump(StatCounter::Close);
            self.stats.drop_one(StatCounter::Active);
            if mgr.registry.is_empty() {
                kdebug!("manager: registry empty");
            }
        }
        removed
    }

    /// Make sure a multiplexer thread watches `sock`. A socket that already
    /// has an owner just gets that thread woken so it picks up the new
    /// interest.
    pub(crate) fn register_readiness(self: &Arc<Self>, sock: &Arc<SocketInner>) -> SockResult<()> {
        let mut mgr = self.lock_state();
        let mut st = sock.lock_state();
        if st.pending_close {
            return Ok(());
        }
        if let Some(thread) = &st.registration {
            thread.wake();
            return Ok(());
        }
        let thread = mgr
            .multiplexer
            .register(self, sock)
            .map_err(SockError::from)?;
        socket_log!(LogLevel::Trace, sock, st.peer, "watched by gvsock-evt-{}", thread.index());
        st.registration = Some(thread);
        Ok(())
    }
}

/// Creates sockets and runs the threads that serve them.
pub struct SocketManager {
    shared: Arc<ManagerShared>,
    dispatchers: Option<DispatcherPool>,
}

impl SocketManager {
    pub fn new(config: ManagerConfig) -> SockResult<Self> {
        config.validate().map_err(SockError::InvalidArgument)?;
        let port = CompletionPort::new().map_err(SockError::from)?;
        let io_threads = config.resolved_io_threads();

        let shared = Arc::new(ManagerShared {
            config,
            port,
            stats: SocketStats::new(),
            state: Mutex::new(ManagerState {
                registry: HashMap::new(),
                multiplexer: MultiplexerPool::default(),
                shutting_down: false,
            }),
            live: Mutex::new(0),
            shutdown_ok: Condvar::new(),
            inflight_releases: AtomicUsize::new(0),
        });

        // One event thread up front; more are added as registrations grow.
        let first = shared.lock_state().multiplexer.spawn(&shared);
        if let Err(e) = first {
            let pool = std::mem::take(&mut shared.lock_state().multiplexer);
            pool.shutdown();
            return Err(SockError::from(e));
        }

        let dispatchers = match DispatcherPool::start(&shared, io_threads) {
            Ok(pool) => pool,
            Err(e) => {
                let pool = std::mem::take(&mut shared.lock_state().multiplexer);
                pool.shutdown();
                return Err(SockError::from(e));
            }
        };

        kinfo!("manager: started with {} I/O threads", dispatchers.len());
        Ok(Self {
            shared,
            dispatchers: Some(dispatchers),
        })
    }

    /// Manager configured from `GVSOCK_*` environment variables.
    pub fn from_env() -> SockResult<Self> {
        Self::new(ManagerConfig::from_env())
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Create a non-blocking socket.
    pub fn create(&self, kind: SocketKind, family: Family) -> SockResult<Socket> {
        if self.shared.lock_state().shutting_down {
            return Err(SockError::Shutdown);
        }
        let fd = match open_socket(kind, family) {
            Ok(fd) => fd,
            Err(code) => {
                self.shared.stats.bump(StatCounter::OpenFail);
                return Err(code);
            }
        };

        let mut mgr = self.shared.lock_state();
        if mgr.shutting_down {
            return Err(SockError::Shutdown);
        }
        let inner = SocketInner::new(&self.shared, kind, family, Some(fd));
        let linked = self.shared.try_link(&mut mgr, &inner);
        drop(mgr);
        if let Err(code) = linked {
            // Never linked: dropping the object closes the descriptor.
            self.shared.stats.bump(StatCounter::OpenFail);
            return Err(code);
        }

        self.shared.stats.bump(StatCounter::Open);
        socket_log!(LogLevel::Debug, inner, None, "created {:?} {:?}", kind, family);
        Ok(Socket::from_inner(inner))
    }

    /// Sockets currently in the registry.
    pub fn socket_count(&self) -> usize {
        self.shared.lock_state().registry.len()
    }

    /// Registry capacity.
    pub fn max_sockets(&self) -> usize {
        self.shared.config.max_sockets
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// State of every socket in the registry, ordered by id.
    pub fn dump(&self) -> Vec<SocketSnapshot> {
        let sockets: Vec<Arc<SocketInner>> = self.shared.lock_state().registry.values().cloned().collect();
        let mut dump: Vec<SocketSnapshot> = sockets.iter().map(|s| s.snapshot()).collect();
        dump.sort_by_key(|s| s.id);
        dump
    }

    /// [`dump`](Self::dump) as text, one socket per line.
    pub fn dump_string(&self) -> String {
        let mut out = String::new();
        for snap in self.dump() {
            out.push_str(&snap.to_string());
            out.push('\n');
        }
        out
    }

    /// Socket objects still allocated, including prepared accept children.
    pub fn live_sockets(&self) -> usize {
        *self.shared.lock_live()
    }

    pub fn io_threads(&self) -> usize {
        self.dispatchers.as_ref().map_or(0, DispatcherPool::len)
    }

    pub fn multiplexer_threads(&self) -> usize {
        self.shared.lock_state().multiplexer.len()
    }

    /// Registrations held (or about to be) by each multiplexer thread.
    pub fn multiplexer_load(&self) -> Vec<usize> {
        self.shared.lock_state().multiplexer.loads()
    }

    #[cfg(test)]
    pub(crate) fn inflight_releases(&self) -> usize {
        self.shared.inflight_releases.load(Ordering::Relaxed)
    }

    /// Block until every socket is destroyed, then stop all threads.
    pub fn destroy(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(dispatchers) = self.dispatchers.take() else {
            return;
        };
        self.shared.lock_state().shutting_down = true;

        {
            let mut live = self.shared.lock_live();
            while *live > 0 {
                kdebug!("manager: waiting for {} sockets", *live);
                live = self
                    .shared
                    .shutdown_ok
                    .wait(live)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        let multiplexer = std::mem::take(&mut self.shared.lock_state().multiplexer);
        multiplexer.shutdown();
        dispatchers.shutdown(&self.shared);
        kinfo!("manager: shut down");
    }
}

fn open_socket(kind: SocketKind, family: Family) -> SockResult<socket2::Socket> {
    let domain = match family {
        Family::Inet => socket2::Domain::IPV4,
        Family::Inet6 => socket2::Domain::IPV6,
    };
    let (ty, protocol) = match kind {
        SocketKind::Stream => (socket2::Type::STREAM, socket2::Protocol::TCP),
        SocketKind::Datagram => (socket2::Type::DGRAM, socket2::Protocol::UDP),
    };
    let fd = socket2::Socket::new(domain, ty, Some(protocol)).map_err(SockError::from)?;
    fd.set_nonblocking(true).map_err(SockError::from)?;
    Ok(fd)
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
