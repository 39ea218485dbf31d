//! Socket manager configuration.
//!
//! Three ways to build one, same as everywhere else in the workspace:
//!
//! ```ignore
//! let cfg = ManagerConfig::default();
//! let cfg = ManagerConfig::new().io_threads(4).max_registrations_per_thread(32);
//! let cfg = ManagerConfig::from_env(); // GVSOCK_* variables
//! ```

use gvsock_core::env::{env_get, env_get_bool};

pub mod defaults {
    /// 0 = derive from the CPU count.
    pub const IO_THREADS: usize = 0;
    pub const MAX_IO_THREADS: usize = 20;
    /// Readiness handles per multiplexer thread (slot 0 is the wake handle
    /// and is not counted).
    pub const MAX_REGISTRATIONS_PER_THREAD: usize = 64;
    /// 0 = `SOMAXCONN`.
    pub const LISTEN_BACKLOG: u32 = 0;
    pub const DROP_ZERO_PORT_DATAGRAMS: bool = true;
    /// Consecutive immediate retries before waiting for readiness again.
    pub const SOFT_RETRY_LIMIT: u32 = 10;
    /// Sockets one manager may hold in its registry.
    pub const MAX_SOCKETS: usize = 4096;
}

pub mod limits {
    pub const MAX_IO_THREADS: usize = 256;
    /// Bounded by a single `poll(2)` array staying cheap to rebuild.
    pub const MAX_REGISTRATIONS_PER_THREAD: usize = 1024;
    pub const MAX_SOCKETS: usize = 1 << 20;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Completion dispatcher threads. 0 means `min(cpus + 1, max_io_threads)`.
    pub io_threads: usize,

    /// Cap applied to the automatic dispatcher pool size.
    pub max_io_threads: usize,

    /// Socket registrations one multiplexer thread may own before a new
    /// thread is started.
    pub max_registrations_per_thread: usize,

    /// Backlog used when `listen(0)` is called. 0 means `SOMAXCONN`.
    pub listen_backlog: u32,

    /// Silently drop datagrams whose source port is 0.
    pub drop_zero_port_datagrams: bool,

    pub soft_retry_limit: u32,

    /// Registry size past which `create` and accepted connections fail
    /// with `NoResources`.
    pub max_sockets: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            io_threads: defaults::IO_THREADS,
            max_io_threads: defaults::MAX_IO_THREADS,
            max_registrations_per_thread: defaults::MAX_REGISTRATIONS_PER_THREAD,
            listen_backlog: defaults::LISTEN_BACKLOG,
            drop_zero_port_datagrams: defaults::DROP_ZERO_PORT_DATAGRAMS,
            soft_retry_limit: defaults::SOFT_RETRY_LIMIT,
            max_sockets: defaults::MAX_SOCKETS,
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `GVSOCK_*` environment variables, defaulting the rest.
    pub fn from_env() -> Self {
        Self {
            io_threads: env_get("GVSOCK_IO_THREADS", defaults::IO_THREADS),
            max_io_threads: env_get("GVSOCK_MAX_IO_THREADS", defaults::MAX_IO_THREADS),
            max_registrations_per_thread: env_get(
                "GVSOCK_MAX_REGISTRATIONS",
                defaults::MAX_REGISTRATIONS_PER_THREAD,
            ),
            listen_backlog: env_get("GVSOCK_LISTEN_BACKLOG", defaults::LISTEN_BACKLOG),
            drop_zero_port_datagrams: env_get_bool(
                "GVSOCK_DROP_ZERO_PORT",
                defaults::DROP_ZERO_PORT_DATAGRAMS,
            ),
            soft_retry_limit: env_get("GVSOCK_SOFT_RETRY_LIMIT", defaults::SOFT_RETRY_LIMIT),
            max_sockets: env_get("GVSOCK_MAX_SOCKETS", defaults::MAX_SOCKETS),
        }
    }

    pub fn io_threads(mut self, n: usize) -> Self {
        self.io_threads = n;
        self
    }

    pub fn max_io_threads(mut self, n: usize) -> Self {
        self.max_io_threads = n;
        self
    }

    pub fn max_registrations_per_thread(mut self, n: usize) -> Self {
        self.max_registrations_per_thread = n;
        self
    }

    pub fn listen_backlog(mut self, n: u32) -> Self {
        self.listen_backlog = n;
        self
    }

    pub fn drop_zero_port_datagrams(mut self, enable: bool) -> Self {
        self.drop_zero_port_datagrams = enable;
        self
    }

    pub fn soft_retry_limit(mut self, n: u32) -> Self {
        self.soft_retry_limit = n;
        self
    }

    pub fn max_sockets(mut self, n: usize) -> Self {
        self.max_sockets = n;
        self
    }

    /// Dispatcher pool size after resolving the automatic setting.
    pub fn resolved_io_threads(&self) -> usize {
        if self.io_threads != 0 {
            return self.io_threads;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus + 1).min(self.max_io_threads).max(1)
    }

    /// Effective backlog for `listen`.
    pub fn resolved_backlog(&self, requested: u32) -> i32 {
        let backlog = if requested != 0 { requested } else { self.listen_backlog };
        if backlog == 0 {
            libc::SOMAXCONN
        } else {
            backlog.min(i32::MAX as u32) as i32
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_io_threads == 0 {
            return Err("max_io_threads must be at least 1");
        }
        if self.max_io_threads > limits::MAX_IO_THREADS {
            return Err("max_io_threads exceeds maximum");
        }
        if self.io_threads > self.max_io_threads {
            return Err("io_threads must not exceed max_io_threads");
        }
        if self.max_registrations_per_thread == 0 {
            return Err("max_registrations_per_thread must be at least 1");
        }
        if self.max_registrations_per_thread > limits::MAX_REGISTRATIONS_PER_THREAD {
            return Err("max_registrations_per_thread exceeds maximum");
        }
        if self.soft_retry_limit == 0 {
            return Err("soft_retry_limit must be at least 1");
        }
        if self.max_sockets == 0 {
            return Err("max_sockets must be at least 1");
        }
        if self.max_sockets > limits::MAX_SOCKETS {
            return Err("max_sockets exceeds maximum");
        }
        Ok(())
    }
}
