//! # gvsock-core
//!
//! Platform-agnostic building blocks of the gvsock socket reactor.
//!
//! This crate contains:
//! - Portable result codes ([`SockError`]) and the errno translation table
//! - The I/O completion classifier (Soft / Hard / Eof decisions)
//! - The buffer/region model and scatter-gather builders
//! - Completion events and the single-delivery [`Completion`] future
//! - Socket and task identifiers
//! - Per-manager statistics counters
//! - Leveled logging macros and environment helpers
//!
//! Sockets, threads and the OS primitives live in `gvsock-runtime`.

pub mod buffer;
pub mod classify;
pub mod completion;
pub mod env;
pub mod errno;
pub mod error;
pub mod event;
pub mod flags;
pub mod id;
pub mod kind;
pub mod kprint;
pub mod stats;

pub use buffer::{Buffer, Payload, MAX_SCATTER_GATHER};
pub use classify::{AcceptStatus, ConnectStatus, IoContext, IoStatus, Retry};
pub use completion::{completion_pair, Completer, Completion, CompletionEvent};
pub use error::{SockError, SockResult};
pub use event::{AcceptEvent, ConnectEvent, RecvEvent, SendEvent, Submission};
pub use flags::{CancelFlags, SubmitFlags};
pub use id::{SocketId, Task, TaskId};
pub use kind::{Family, SocketKind};
pub use stats::{SocketStats, StatCounter, StatsSnapshot};
