//! Completion event records.
//!
//! Every request produces exactly one of these. The payload a request was
//! submitted with travels back in its event, so callers get their buffers
//! back whatever the outcome.

use std::net::SocketAddr;

use crate::buffer::Payload;
use crate::completion::{Completion, CompletionEvent};
use crate::error::{SockError, SockResult};

#[derive(Debug)]
pub struct RecvEvent {
    pub result: SockResult<()>,
    /// Bytes received into the payload.
    pub n: usize,
    /// Datagram was larger than the payload and got cut.
    pub truncated: bool,
    /// Source address (datagram sockets).
    pub address: Option<SocketAddr>,
    pub payload: Payload,
}

impl RecvEvent {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The received bytes of a region payload.
    pub fn data(&self) -> &[u8] {
        match self.payload.as_region() {
            Some(region) => &region[..self.n.min(region.len())],
            None => &[],
        }
    }
}

impl CompletionEvent for RecvEvent {
    fn canceled() -> Self {
        RecvEvent {
            result: Err(SockError::Canceled),
            n: 0,
            truncated: false,
            address: None,
            payload: Payload::empty(),
        }
    }
}

#[derive(Debug)]
pub struct SendEvent {
    pub result: SockResult<()>,
    /// Bytes handed to the kernel.
    pub n: usize,
    pub payload: Payload,
}

impl SendEvent {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl CompletionEvent for SendEvent {
    fn canceled() -> Self {
        SendEvent {
            result: Err(SockError::Canceled),
            n: 0,
            payload: Payload::empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectEvent {
    pub result: SockResult<()>,
}

impl CompletionEvent for ConnectEvent {
    fn canceled() -> Self {
        ConnectEvent {
            result: Err(SockError::Canceled),
        }
    }
}

/// Result of an accept. `S` is the runtime's socket handle type.
#[derive(Debug)]
pub struct AcceptEvent<S> {
    pub result: SockResult<()>,
    /// The connected child socket, present only on success.
    pub socket: Option<S>,
    /// Peer address of the child.
    pub address: Option<SocketAddr>,
}

impl<S: Send + 'static> CompletionEvent for AcceptEvent<S> {
    fn canceled() -> Self {
        AcceptEvent {
            result: Err(SockError::Canceled),
            socket: None,
            address: None,
        }
    }
}

/// Outcome of a submission made with `SubmitFlags::IMMEDIATE`.
#[derive(Debug)]
pub enum Submission<E> {
    /// Finished during submission; no completion will fire.
    Done(E),
    /// Queued. The event arrives through the completion.
    InProgress(Completion<E>),
}

impl<E: CompletionEvent> Submission<E> {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Submission::InProgress(_))
    }

    /// Block until the event is available either way.
    pub fn wait(self) -> E {
        match self {
            Submission::Done(event) => event,
            Submission::InProgress(completion) => completion.wait(),
        }
    }
}
