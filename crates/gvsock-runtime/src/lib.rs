//! # gvsock-runtime
//!
//! Linux runtime for the gvsock socket reactor.
//!
//! This crate provides:
//! - The socket manager, its registry and statistics
//! - Socket handles with queued receive/send/accept/connect
//! - The completion port (epoll, one-shot arming, posted packets)
//! - The I/O dispatcher pool draining the completion port
//! - The readiness multiplexer for listening and connecting sockets

pub mod config;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod completion_port;
        mod dispatcher;
        mod mailbox;
        mod manager;
        mod multiplexer;
        mod platform_linux;
        mod request;
        mod socket;

        pub use manager::SocketManager;
        pub use socket::{Socket, SocketSnapshot, MAX_NAME_LEN};
    } else {
        compile_error!("gvsock-runtime supports Linux only");
    }
}

#[cfg(test)]
mod scenario_tests;

pub use config::ManagerConfig;
pub use gvsock_core::{
    Buffer, CancelFlags, Completion, ConnectEvent, Family, Payload, RecvEvent, SendEvent,
    SockError, SockResult, SocketId, SocketKind, StatCounter, StatsSnapshot, SubmitFlags,
    Submission, Task, TaskId,
};

/// Accept result carrying the connected child socket.
pub type AcceptEvent = gvsock_core::AcceptEvent<Socket>;
