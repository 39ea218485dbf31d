//! Pending I/O requests and the single non-blocking attempt for each.
//!
//! A request lives on exactly one socket queue until it is finished, at
//! which point its completer is consumed and the event goes to the task.

use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{MaybeUninitSlice, SockAddr};

use gvsock_core::classify::{apply_minimum, classify_recv, classify_send};
use gvsock_core::errno::io_errno;
use gvsock_core::{
    AcceptEvent, Completer, ConnectEvent, IoContext, IoStatus, Payload, RecvEvent, Retry,
    SendEvent, SockError, SockResult, TaskId,
};

use crate::socket::{Socket, SocketInner};

/// Result carried by the event of a finished request.
pub(crate) fn status_result(status: IoStatus) -> SockResult<()> {
    match status {
        IoStatus::Success => Ok(()),
        IoStatus::Hard(code) => Err(code),
        IoStatus::Eof => Err(SockError::Eof),
        // Never delivered; mapped for completeness.
        IoStatus::Soft(_) => Err(SockError::WouldBlock),
    }
}

pub(crate) struct RecvRequest {
    pub(crate) task: TaskId,
    pub(crate) payload: Payload,
    /// Bytes that satisfy the request.
    pub(crate) minimum: usize,
    /// Bytes received so far.
    pub(crate) n: usize,
    pub(crate) truncated: bool,
    pub(crate) address: Option<SocketAddr>,
    completer: Completer<RecvEvent>,
}

impl RecvRequest {
    pub(crate) fn new(
        task: TaskId,
        payload: Payload,
        minimum: usize,
        completer: Completer<RecvEvent>,
    ) -> Self {
        Self {
            task,
            payload,
            minimum,
            n: 0,
            truncated: false,
            address: None,
            completer,
        }
    }

    /// Split into the completer and the event it should deliver.
    pub(crate) fn into_event(self, result: SockResult<()>) -> (Completer<RecvEvent>, RecvEvent) {
        let event = RecvEvent {
            result,
            n: self.n,
            truncated: self.truncated,
            address: self.address,
            payload: self.payload,
        };
        (self.completer, event)
    }

    pub(crate) fn finish(self, result: SockResult<()>) {
        let (completer, event) = self.into_event(result);
        completer.complete(event);
    }

    /// One `recvmsg`. Progress is recorded in the request; the returned
    /// status says whether it is satisfied.
    pub(crate) fn attempt(&mut self, fd: &socket2::Socket, ctx: &IoContext) -> IoStatus {
        let outcome = {
            let slices = self.payload.recv_slices(self.n);
            let mut bufs: Vec<MaybeUninitSlice<'_>> = slices
                .into_iter()
                .map(|s| MaybeUninitSlice::new(as_uninit(s)))
                .collect();
            if ctx.kind.is_stream() {
                fd.recv_vectored(&mut bufs)
                    .map(|(n, flags)| (n, flags.is_truncated(), None))
            } else {
                fd.recv_from_vectored(&mut bufs)
                    .map(|(n, flags, from)| (n, flags.is_truncated(), from.as_socket()))
            }
        };

        match outcome {
            Ok((nbytes, truncated, from)) => {
                let ctx = ctx.with_source_port(from.map(|a| a.port()));
                let status = classify_recv(&ctx, nbytes, 0);
                if status != IoStatus::Success {
                    return status;
                }
                self.payload.commit_recv(nbytes);
                self.n += nbytes;
                if from.is_some() {
                    self.address = from;
                }
                self.truncated |= truncated;
                if ctx.kind.is_stream() {
                    apply_minimum(status, self.n, self.minimum)
                } else {
                    status
                }
            }
            Err(e) => classify_recv(ctx, 0, io_errno(&e)),
        }
    }
}

/// Received bytes are written by the kernel, so viewing initialised memory
/// as possibly-uninitialised is sound.
fn as_uninit(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

pub(crate) struct SendRequest {
    pub(crate) task: TaskId,
    pub(crate) payload: Payload,
    pub(crate) dest: Option<SocketAddr>,
    /// Bytes sent so far.
    pub(crate) n: usize,
    total: usize,
    completer: Completer<SendEvent>,
}

impl SendRequest {
    pub(crate) fn new(
        task: TaskId,
        payload: Payload,
        dest: Option<SocketAddr>,
        completer: Completer<SendEvent>,
    ) -> Self {
        let total = payload.send_len();
        Self {
            task,
            payload,
            dest,
            n: 0,
            total,
            completer,
        }
    }

    pub(crate) fn into_event(self, result: SockResult<()>) -> (Completer<SendEvent>, SendEvent) {
        let event = SendEvent {
            result,
            n: self.n,
            payload: self.payload,
        };
        (self.completer, event)
    }

    pub(crate) fn finish(self, result: SockResult<()>) {
        let (completer, event) = self.into_event(result);
        completer.complete(event);
    }

    /// One `sendmsg`. A short stream write is Soft; the rest goes later.
    pub(crate) fn attempt(&mut self, fd: &socket2::Socket, ctx: &IoContext) -> IoStatus {
        let sent = {
            let slices = self.payload.send_slices(self.n);
            match self.dest {
                Some(dest) if !ctx.kind.is_stream() => {
                    fd.send_to_vectored_with_flags(&slices, &SockAddr::from(dest), libc::MSG_NOSIGNAL)
                }
                _ => fd.send_vectored_with_flags(&slices, libc::MSG_NOSIGNAL),
            }
        };

        match sent {
            Ok(n) => {
                self.n += n;
                if self.n < self.total && ctx.kind.is_stream() {
                    IoStatus::Soft(Retry::Now)
                } else {
                    IoStatus::Success
                }
            }
            Err(e) => classify_send(ctx, io_errno(&e)),
        }
    }
}

pub(crate) struct AcceptRequest {
    pub(crate) task: TaskId,
    /// Socket object prepared for the incoming connection.
    pub(crate) child: Arc<SocketInner>,
    completer: Completer<AcceptEvent<Socket>>,
}

impl AcceptRequest {
    pub(crate) fn new(
        task: TaskId,
        child: Arc<SocketInner>,
        completer: Completer<AcceptEvent<Socket>>,
    ) -> Self {
        Self {
            task,
            child,
            completer,
        }
    }

    /// Deliver a failure. The prepared child is released with the request.
    pub(crate) fn fail(self, code: SockError) {
        self.completer.complete(AcceptEvent {
            result: Err(code),
            socket: None,
            address: None,
        });
    }

    pub(crate) fn into_parts(self) -> (Arc<SocketInner>, Completer<AcceptEvent<Socket>>) {
        (self.child, self.completer)
    }
}

pub(crate) struct ConnectRequest {
    pub(crate) task: TaskId,
    pub(crate) address: SocketAddr,
    completer: Completer<ConnectEvent>,
}

impl ConnectRequest {
    pub(crate) fn new(task: TaskId, address: SocketAddr, completer: Completer<ConnectEvent>) -> Self {
        Self {
            task,
            address,
            completer,
        }
    }

    pub(crate) fn finish(self, result: SockResult<()>) {
        self.completer.complete(ConnectEvent { result });
    }
}
