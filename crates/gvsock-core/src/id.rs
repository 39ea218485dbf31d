//! Identifier types for sockets and tasks.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a socket.
///
/// Ids are never reused within a process. `0` is the "no socket" sentinel.
/// The id doubles as the completion-port token for the socket.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SocketId(u64);

impl SocketId {
    pub const NONE: SocketId = SocketId(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        SocketId(raw)
    }

    /// Allocate a fresh process-unique id.
    pub fn next() -> Self {
        SocketId(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "SocketId(NONE)")
        } else {
            write!(f, "SocketId({})", self.0)
        }
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of the logical owner of a request.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct TaskId(u64);

impl TaskId {
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// The logical consumer that issues operations and receives their events.
///
/// A `Task` carries no executor of its own: completions come back through
/// the `Completion` returned at submission time. The task identity is what
/// `Socket::cancel` uses to pick which requests to cancel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Task {
    id: TaskId,
    name: Option<String>,
}

impl Task {
    pub fn new() -> Self {
        Task {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            name: None,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Task {
            name: Some(name.into()),
            ..Task::new()
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Default for Task {
    fn default() -> Self {
        Task::new()
    }
}
