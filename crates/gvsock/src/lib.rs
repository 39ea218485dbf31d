//! # gvsock - Asynchronous socket reactor
//!
//! Task-oriented, reference-counted sockets served by two worker pools:
//! a fixed set of I/O dispatchers draining an epoll-based completion port,
//! and a growing set of `poll(2)` threads watching listeners and pending
//! connects.
//!
//! ## Features
//!
//! - **Never blocks the caller**: `recv`, `send`, `accept` and `connect`
//!   return a [`Completion`] that resolves to exactly one event
//! - **FIFO per direction**: queued receives and sends finish in order,
//!   stream receives honour a minimum byte count
//! - **Scatter-gather**: buffer lists of up to [`MAX_SCATTER_GATHER`] entries
//! - **Scoped cancellation**: per task and per operation kind
//! - **Statistics and state dumps**: per-manager counters and a snapshot
//!   of every live socket
//! - **Safe teardown**: a socket is freed only after every in-flight
//!   notification is accounted for, and the manager waits for all sockets
//!
//! ## Quick Start
//!
//! ```ignore
//! use gvsock::prelude::*;
//!
//! let mgr = SocketManager::new(ManagerConfig::default())?;
//! let task = Task::named("echo");
//!
//! let listener = mgr.create(SocketKind::Stream, Family::Inet)?;
//! listener.bind("127.0.0.1:7000".parse().unwrap())?;
//! listener.listen(0)?;
//!
//! let conn = listener.accept(&task)?.wait().socket.unwrap();
//! let ev = conn.recv(vec![0; 512], 1, &task)?.wait();
//! conn.send(ev.data().to_vec(), &task)?.wait();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │         Socket::recv / send / accept / connect / cancel     │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                               │
//!        queued I/O (recv/send)          listen / connect
//!                 ▼                               ▼
//!    ┌──────────────────────────┐     ┌──────────────────────────┐
//!    │  Completion port (epoll) │     │  Multiplexer pool (poll) │
//!    │  one-shot arm per socket │     │  ≤64 sockets per thread  │
//!    └──────────────────────────┘     └──────────────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//!    ┌──────────────────────────┐     ┌──────────────────────────┐
//!    │   gvsock-io-N threads    │     │   gvsock-evt-N threads   │
//!    └──────────────────────────┘     └──────────────────────────┘
//!                 │                               │
//!                 └───────────► Completion ◄──────┘
//! ```

pub use gvsock_core::{
    Buffer, CancelFlags, Completion, CompletionEvent, ConnectEvent, Family, Payload, RecvEvent,
    SendEvent, SockError, SockResult, SocketId, SocketKind, StatCounter, StatsSnapshot, SubmitFlags,
    Submission, Task, TaskId, MAX_SCATTER_GATHER,
};

// Logging
pub use gvsock_core::{kdebug, kerror, kinfo, ktrace, kwarn, socket_log};
pub use gvsock_core::kprint::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

pub use gvsock_core::env::{env_get, env_get_bool, env_get_opt};

pub use gvsock_runtime::config::{defaults, limits};
pub use gvsock_runtime::{AcceptEvent, ManagerConfig, Socket, SocketManager, SocketSnapshot, MAX_NAME_LEN};

/// Everything needed to drive sockets.
pub mod prelude {
    pub use crate::{
        AcceptEvent, Buffer, CancelFlags, Completion, ConnectEvent, Family, ManagerConfig,
        Payload, RecvEvent, SendEvent, SockError, SockResult, Socket, SocketKind, SocketManager,
        SubmitFlags, Submission, Task,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use super::StatCounter;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_echo_round_trip() {
        let mgr = SocketManager::new(ManagerConfig::new().io_threads(1)).unwrap();
        let task = Task::named("echo");

        let listener = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
        listener.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        listener.listen(0).unwrap();
        let accepted = listener.accept(&task).unwrap();

        let client = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
        let connected = client.connect(listener.sock_name().unwrap(), &task).unwrap();

        futures::executor::block_on(async {
            assert_eq!(connected.await.result, Ok(()));
            let server = accepted.await.socket.unwrap();

            client.send(b"ping".to_vec(), &task).unwrap().await;
            let ev = server.recv(vec![0; 4], 0, &task).unwrap().await;
            server.send(ev.data().to_vec(), &task).unwrap().await;

            let reply = client.recv(vec![0; 4], 0, &task).unwrap();
            let reply = reply.wait_timeout(WAIT).ok().unwrap();
            assert_eq!(reply.data(), b"ping");
        });
    }

    #[test]
    fn test_manager_lifecycle() {
        let mgr = SocketManager::new(ManagerConfig::new().io_threads(1)).unwrap();
        assert_eq!(mgr.io_threads(), 1);
        assert_eq!(mgr.multiplexer_threads(), 1);
        let sock = mgr.create(SocketKind::Datagram, Family::Inet).unwrap();
        assert_eq!(sock.kind(), SocketKind::Datagram);
        assert_eq!(mgr.stats().get(StatCounter::Open), 1);
        drop(sock);
        assert_eq!(mgr.stats().get(StatCounter::Close), 1);
        mgr.destroy();
    }
}
