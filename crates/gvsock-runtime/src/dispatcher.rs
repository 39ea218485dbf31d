//! # I/O dispatchers
//!
//! A fixed pool of `gvsock-io-N` threads blocks on the completion port.
//! Each `Ready` packet names a socket whose armed direction fired; the
//! dispatcher consumes the matching pending notification, services that
//! queue in order, and re-arms whatever is still waiting.
//!
//! ```text
//!   CompletionPort::get()
//!     ├── Ready { sock, events } → lock sock
//!     │      ├── pending_close?        → ignore (destroy posts Aborted)
//!     │      ├── pending_recv && IN    → drain recv queue
//!     │      ├── pending_send && OUT   → drain send queue
//!     │      └── rearm(pending counters)
//!     ├── Aborted { sock, dir }  → consume the counter, drop the Arc
//!     └── Exit                   → thread ends
//! ```

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use gvsock_core::{kdebug, kwarn};

use crate::completion_port::{Direction, Packet, BROKEN, READABLE, WRITABLE};
use crate::manager::ManagerShared;
use crate::socket::SocketInner;

pub(crate) struct DispatcherPool {
    handles: Vec<JoinHandle<()>>,
}

impl DispatcherPool {
    /// Start `count` dispatcher threads.
    pub(crate) fn start(shared: &Arc<ManagerShared>, count: usize) -> io::Result<Self> {
        let mut pool = Self {
            handles: Vec::with_capacity(count),
        };
        for i in 0..count {
            let worker = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("gvsock-io-{}", i))
                .spawn(move || io_thread_main(i, worker));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    pool.shutdown(shared);
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Post one exit per thread and join them all.
    pub(crate) fn shutdown(self, shared: &ManagerShared) {
        shared.port.post_exit(self.handles.len());
        for handle in self.handles {
            if handle.join().is_err() {
                kwarn!("dispatcher: I/O thread panicked");
            }
        }
    }
}

fn io_thread_main(index: usize, shared: Arc<ManagerShared>) {
    kdebug!("gvsock-io-{} started", index);
    loop {
        match shared.port.get() {
            Packet::Exit => break,
            Packet::Ready { item, events } => io_ready(&item, events),
            Packet::Aborted { item, direction } => io_aborted(&item, direction),
        }
    }
    kdebug!("gvsock-io-{} exiting", index);
}

fn io_ready(sock: &Arc<SocketInner>, events: u32) {
    let mut st = sock.lock_state();
    if st.pending_close {
        return;
    }
    let broken = events & BROKEN != 0;
    if st.pending_recv > 0 && (events & READABLE != 0 || broken) {
        st.pending_recv -= 1;
        sock.drain_recv(&mut st);
    }
    if st.pending_send > 0 && (events & WRITABLE != 0 || broken) {
        st.pending_send -= 1;
        sock.drain_send(&mut st);
    }
    sock.rearm(&mut st);
}

/// The socket was destroyed while this notification was armed.
fn io_aborted(sock: &Arc<SocketInner>, direction: Direction) {
    let mut st = sock.lock_state();
    match direction {
        Direction::Recv => st.pending_recv = st.pending_recv.saturating_sub(1),
        Direction::Send => st.pending_send = st.pending_send.saturating_sub(1),
    }
}
