//! End-to-end scenarios over loopback sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gvsock_core::CompletionEvent;

use crate::multiplexer::interest;
use crate::*;

const WAIT: Duration = Duration::from_secs(5);

fn manager() -> SocketManager {
    SocketManager::new(ManagerConfig::new().io_threads(2)).unwrap()
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn wait<E: CompletionEvent>(completion: Completion<E>) -> E {
    match completion.wait_timeout(WAIT) {
        Ok(event) => event,
        Err(_) => panic!("completion did not fire in time"),
    }
}

fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Listener, connected client, and the server side accepted from it.
fn tcp_pair(mgr: &SocketManager) -> (Socket, Socket, Socket) {
    let task = Task::named("pair");
    let listener = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    listener.bind(loopback()).unwrap();
    listener.listen(0).unwrap();
    let addr = listener.sock_name().unwrap();

    let accepted = listener.accept(&task).unwrap();
    let client = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    let connected = client.connect(addr, &task).unwrap();

    assert_eq!(wait(connected).result, Ok(()));
    let ev = wait(accepted);
    assert_eq!(ev.result, Ok(()));
    let server = ev.socket.unwrap();
    (listener, client, server)
}

#[test]
fn test_connect_refused() {
    let mgr = manager();
    let closed = {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        closed.local_addr().unwrap()
    };
    let task = Task::new();
    let client = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    let ev = wait(client.connect(closed, &task).unwrap());

    assert_eq!(ev.result, Err(SockError::ConnectionRefused));
    assert!(!client.is_connecting());
    assert!(!client.is_connected());
    assert_eq!(client.readiness_owner(), None);
    assert!(eventually(|| mgr.multiplexer_load().iter().all(|&n| n == 0)));
}

#[test]
fn test_stream_minimums_complete_in_order() {
    let mgr = manager();
    let (_listener, client, server) = tcp_pair(&mgr);
    let task = Task::new();

    let mut r10 = server.recv(vec![0; 10], 10, &task).unwrap();
    let r20 = server.recv(vec![0; 20], 20, &task).unwrap();
    let r30 = server.recv(vec![0; 30], 30, &task).unwrap();

    let data: Vec<u8> = (0..60).collect();

    // Five bytes do not satisfy the first minimum.
    assert_eq!(wait(client.send(data[0..5].to_vec(), &task).unwrap()).n, 5);
    thread::sleep(Duration::from_millis(50));
    assert!(r10.try_take().is_none());

    // Twenty-five more finish the first two, in order.
    assert_eq!(wait(client.send(data[5..30].to_vec(), &task).unwrap()).n, 25);
    let ev = wait(r10);
    assert_eq!((ev.result, ev.n), (Ok(()), 10));
    assert_eq!(ev.data(), &data[0..10]);
    let ev = wait(r20);
    assert_eq!((ev.result, ev.n), (Ok(()), 20));
    assert_eq!(ev.data(), &data[10..30]);

    assert_eq!(wait(client.send(data[30..60].to_vec(), &task).unwrap()).n, 30);
    let ev = wait(r30);
    assert_eq!((ev.result, ev.n), (Ok(()), 30));
    assert_eq!(ev.data(), &data[30..60]);
}

#[test]
fn test_sends_complete_in_order() {
    const CHUNK: usize = 16 << 20;
    let mgr = manager();
    let (_listener, client, server) = tcp_pair(&mgr);
    let task = Task::new();

    // More than the loopback buffers hold, so the later sends queue.
    let mut s1 = client.send(vec![1u8; CHUNK], &task).unwrap();
    let mut s2 = client.send(vec![2u8; CHUNK], &task).unwrap();
    let s3 = client.send(vec![3u8; CHUNK], &task).unwrap();

    let mut seen = 0usize;
    while seen < 3 * CHUNK {
        let ev = wait(server.recv(vec![0; 1 << 18], 1, &task).unwrap());
        assert_eq!(ev.result, Ok(()));
        for (i, &b) in ev.data().iter().enumerate() {
            assert_eq!(b as usize, 1 + (seen + i) / CHUNK, "byte {}", seen + i);
        }
        seen += ev.n;
    }
    assert_eq!(seen, 3 * CHUNK);

    let ev = wait(s3);
    assert_eq!((ev.result, ev.n), (Ok(()), CHUNK));
    // FIFO: the earlier sends were delivered before the last one.
    let ev = s1.try_take().unwrap();
    assert_eq!((ev.result, ev.n), (Ok(()), CHUNK));
    let ev = s2.try_take().unwrap();
    assert_eq!((ev.result, ev.n), (Ok(()), CHUNK));
}

#[test]
fn test_io_queued_behind_refused_connect() {
    let mgr = manager();
    let task = Task::new();
    let closed = {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        closed.local_addr().unwrap()
    };

    for round in 0..200 {
        let client = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
        let connected = client.connect(closed, &task).unwrap();
        let recv = client.recv(vec![0; 4], 0, &task);
        let sent = client.send(b"abc".to_vec(), &task);

        assert_eq!(wait(connected).result, Err(SockError::ConnectionRefused), "round {}", round);
        // Queued while connecting: ends with the connect's error. Issued
        // after the failure: refused up front.
        match recv {
            Ok(c) => assert_eq!(wait(c).result, Err(SockError::ConnectionRefused), "round {}", round),
            Err(e) => assert_eq!(e, SockError::NotConnected, "round {}", round),
        }
        match sent {
            Ok(c) => assert_eq!(wait(c).result, Err(SockError::ConnectionRefused), "round {}", round),
            Err(e) => assert_eq!(e, SockError::NotConnected, "round {}", round),
        }
        assert!(!client.is_connected());
    }
    assert!(eventually(|| mgr.multiplexer_load().iter().all(|&n| n == 0)));
}

#[test]
fn test_io_queued_while_connecting_is_not_armed() {
    let mgr = manager();
    let task = Task::new();
    let listener = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    listener.bind(loopback()).unwrap();
    listener.listen(0).unwrap();
    let accepted = listener.accept(&task).unwrap();

    let client = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    let connected = client.connect(listener.sock_name().unwrap(), &task).unwrap();
    let reply = client.recv(vec![0; 4], 0, &task).unwrap();

    assert_eq!(wait(connected).result, Ok(()));
    let server = wait(accepted).socket.unwrap();
    wait(server.send(b"pong".to_vec(), &task).unwrap());
    let ev = wait(reply);
    assert_eq!((ev.result, ev.n), (Ok(()), 4));
    assert_eq!(ev.data(), b"pong");
}

#[test]
fn test_scatter_gather_receive() {
    let mgr = manager();
    let (_listener, client, server) = tcp_pair(&mgr);
    let task = Task::new();

    let bufs = vec![Buffer::with_capacity(3), Buffer::with_capacity(5)];
    let recv = server.recvv(bufs, 0, &task).unwrap();
    let sent = wait(client.sendv(vec![Buffer::from_vec(b"abcdefgh".to_vec())], &task).unwrap());
    assert_eq!(sent.n, 8);

    let ev = wait(recv);
    assert_eq!((ev.result, ev.n), (Ok(()), 8));
    let bufs = ev.payload.into_buffers().unwrap();
    assert_eq!(bufs[0].used(), b"abc");
    assert_eq!(bufs[1].used(), b"defgh");
}

#[test]
fn test_send_queued_while_connecting() {
    let mgr = manager();
    let task = Task::new();
    let listener = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    listener.bind(loopback()).unwrap();
    listener.listen(0).unwrap();
    let accepted = listener.accept(&task).unwrap();

    let client = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    let connected = client.connect(listener.sock_name().unwrap(), &task).unwrap();
    let sent = client.send(b"early".to_vec(), &task).unwrap();

    assert_eq!(wait(connected).result, Ok(()));
    assert_eq!(wait(sent).result, Ok(()));
    let server = wait(accepted).socket.unwrap();
    let ev = wait(server.recv(vec![0; 5], 0, &task).unwrap());
    assert_eq!(ev.data(), b"early");
}

#[test]
fn test_accept_cancel_frees_child() {
    let mgr = manager();
    let task = Task::new();
    let listener = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    listener.bind(loopback()).unwrap();
    listener.listen(0).unwrap();
    assert_eq!(listener.readiness_interest(), interest::CLOSE);

    let live = mgr.live_sockets();
    let accepted = listener.accept(&task).unwrap();
    assert_eq!(mgr.live_sockets(), live + 1);
    assert_eq!(listener.readiness_interest(), interest::ACCEPT | interest::CLOSE);

    listener.cancel(Some(&task), CancelFlags::ACCEPT);
    let ev = wait(accepted);
    assert_eq!(ev.result, Err(SockError::Canceled));
    assert!(ev.socket.is_none());
    assert_eq!(mgr.live_sockets(), live);
    assert_eq!(listener.readiness_interest(), interest::CLOSE);
}

#[test]
fn test_cancel_is_idempotent_and_task_scoped() {
    let mgr = manager();
    let (_listener, client, server) = tcp_pair(&mgr);
    let owner = Task::named("owner");
    let other = Task::named("other");

    let mut recv = server.recv(vec![0; 4], 0, &owner).unwrap();
    server.cancel(Some(&other), CancelFlags::ALL);
    thread::sleep(Duration::from_millis(20));
    assert!(recv.try_take().is_none());

    server.cancel(Some(&owner), CancelFlags::RECV);
    server.cancel(Some(&owner), CancelFlags::RECV);
    let ev = wait(recv);
    assert_eq!(ev.result, Err(SockError::Canceled));
    assert_eq!(ev.n, 0);

    // A delivered request is out of reach of cancel.
    let recv = server.recv(vec![0; 2], 0, &owner).unwrap();
    wait(client.send(b"hi".to_vec(), &owner).unwrap());
    let ev = wait(recv);
    assert_eq!(ev.result, Ok(()));
    server.cancel(None, CancelFlags::ALL);
    assert_eq!(ev.data(), b"hi");
}

#[test]
fn test_connect_cancel() {
    let mgr = manager();
    let task = Task::new();
    // Non-routable address keeps the connect pending.
    let client = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    let connected = client.connect("10.255.255.1:9".parse().unwrap(), &task).unwrap();
    let recv = client.recv(vec![0; 4], 0, &task);
    client.cancel(None, CancelFlags::CONNECT);

    let ev = wait(connected);
    assert!(ev.result.is_err());
    // A receive queued behind the connect never hangs.
    if let Ok(recv) = recv {
        assert!(wait(recv).result.is_err());
    }
    assert!(!client.is_connecting());
    assert_eq!(client.readiness_owner(), None);
    assert!(eventually(|| mgr.multiplexer_load().iter().all(|&n| n == 0)));
}

#[test]
fn test_manager_destroy_waits_for_sockets() {
    let mgr = manager();
    let (listener, client, server) = tcp_pair(&mgr);
    let task = Task::new();

    // More than loopback buffers hold while the peer is not reading.
    let sent = client.send(vec![7u8; 32 << 20], &task).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    let handle = thread::spawn(move || {
        mgr.destroy();
        flag.store(true, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::SeqCst));

    drop(client);
    let ev = wait(sent);
    assert_eq!(ev.result, Err(SockError::Canceled));
    assert!(ev.n < 32 << 20);

    drop(server);
    drop(listener);
    handle.join().unwrap();
    assert!(done.load(Ordering::SeqCst));
}

#[test]
fn test_registration_spawns_thread_when_full() {
    let mgr = manager();
    let mut listeners = Vec::new();
    for _ in 0..64 {
        let l = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
        l.bind(loopback()).unwrap();
        l.listen(0).unwrap();
        listeners.push(l);
    }
    assert_eq!(mgr.multiplexer_threads(), 1);
    assert_eq!(mgr.multiplexer_load(), vec![64]);

    let extra = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    extra.bind(loopback()).unwrap();
    extra.listen(0).unwrap();
    assert_eq!(mgr.multiplexer_threads(), 2);
    assert_eq!(mgr.multiplexer_load(), vec![64, 1]);
    assert_eq!(extra.readiness_owner(), Some(1));

    drop(listeners);
    assert!(eventually(|| mgr.multiplexer_load() == vec![0, 1]));
}

#[test]
fn test_small_registration_cap() {
    let mgr = SocketManager::new(
        ManagerConfig::new()
            .io_threads(1)
            .max_registrations_per_thread(2),
    )
    .unwrap();
    let listeners: Vec<Socket> = (0..5)
        .map(|_| {
            let l = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
            l.bind(loopback()).unwrap();
            l.listen(0).unwrap();
            l
        })
        .collect();
    assert_eq!(mgr.multiplexer_threads(), 3);
    assert_eq!(mgr.multiplexer_load(), vec![2, 2, 1]);

    // Accepts still work on a socket owned by a later thread.
    let task = Task::new();
    let accepted = listeners[4].accept(&task).unwrap();
    let client = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    wait(client.connect(listeners[4].sock_name().unwrap(), &task).unwrap());
    assert_eq!(wait(accepted).result, Ok(()));
}

#[test]
fn test_destroy_with_armed_receive() {
    let mgr = manager();
    let (listener, client, server) = tcp_pair(&mgr);
    let task = Task::new();

    let recv = server.recv(vec![0; 8], 0, &task).unwrap();
    drop(server);
    assert_eq!(wait(recv).result, Err(SockError::Canceled));

    let remaining = 2;
    assert!(eventually(|| mgr.live_sockets() == remaining));
    assert_eq!(mgr.inflight_releases(), 0);
    drop((listener, client));
}

#[test]
fn test_peer_closed_reads_eof() {
    let mgr = manager();
    let (_listener, client, server) = tcp_pair(&mgr);
    let task = Task::new();

    let recv = server.recv(vec![0; 8], 0, &task).unwrap();
    drop(client);
    let ev = wait(recv);
    assert_eq!(ev.result, Err(SockError::Eof));
    assert_eq!(ev.n, 0);
}

#[test]
fn test_udp_sendto_and_recv_with_address() {
    let mgr = manager();
    let task = Task::new();
    let a = mgr.create(SocketKind::Datagram, Family::Inet).unwrap();
    let b = mgr.create(SocketKind::Datagram, Family::Inet).unwrap();
    a.bind(loopback()).unwrap();
    b.bind(loopback()).unwrap();

    let recv = a.recv(vec![0; 64], 0, &task).unwrap();
    let sent = wait(b.sendto(b"hello".to_vec(), a.sock_name().unwrap(), &task).unwrap());
    assert_eq!((sent.result, sent.n), (Ok(()), 5));

    let ev = wait(recv);
    assert_eq!((ev.result, ev.n), (Ok(()), 5));
    assert_eq!(ev.data(), b"hello");
    assert_eq!(ev.address, Some(b.sock_name().unwrap()));
    assert!(!ev.truncated);
}

#[test]
fn test_udp_truncated_datagram() {
    let mgr = manager();
    let task = Task::new();
    let a = mgr.create(SocketKind::Datagram, Family::Inet).unwrap();
    let b = mgr.create(SocketKind::Datagram, Family::Inet).unwrap();
    a.bind(loopback()).unwrap();
    b.bind(loopback()).unwrap();

    wait(b.sendto(b"0123456789".to_vec(), a.sock_name().unwrap(), &task).unwrap());
    let ev = wait(a.recv(vec![0; 4], 0, &task).unwrap());
    assert_eq!((ev.result, ev.n), (Ok(()), 4));
    assert!(ev.truncated);
    assert_eq!(ev.data(), b"0123");
}

#[test]
fn test_immediate_submission() {
    let mgr = manager();
    let (_listener, client, server) = tcp_pair(&mgr);
    let task = Task::new();

    let sub = client
        .send_with(Payload::Region(b"now".to_vec()), None, &task, SubmitFlags::IMMEDIATE)
        .unwrap();
    match sub {
        Submission::Done(ev) => assert_eq!((ev.result, ev.n), (Ok(()), 3)),
        Submission::InProgress(_) => panic!("small send should finish at once"),
    }

    let sub = server
        .recv_with(Payload::Region(vec![0; 3]), 0, &task, SubmitFlags::IMMEDIATE)
        .unwrap();
    let ev = sub.wait();
    assert_eq!(ev.data(), b"now");

    let sub = client
        .send_with(Payload::Region(b"x".to_vec()), None, &task, SubmitFlags::NORETRY)
        .unwrap();
    assert_eq!(sub.wait().result, Ok(()));
}

#[test]
fn test_bind_errors() {
    let mgr = manager();
    let a = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    a.bind(loopback()).unwrap();
    a.listen(0).unwrap();
    let addr = a.sock_name().unwrap();

    let b = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    assert_eq!(b.bind(addr), Err(SockError::AddrInUse));
    assert_eq!(b.bind("[::1]:0".parse().unwrap()), Err(SockError::FamilyMismatch));
    assert_eq!(a.bind(loopback()), Err(SockError::AlreadyBound));
    assert!(!b.is_bound());
}

#[test]
fn test_argument_and_state_errors() {
    let mgr = manager();
    let task = Task::new();
    let udp = mgr.create(SocketKind::Datagram, Family::Inet).unwrap();
    let tcp = mgr.create(SocketKind::Stream, Family::Inet).unwrap();

    assert!(matches!(udp.recv(vec![0; 4], 0, &task), Err(SockError::InvalidState(_))));
    assert!(matches!(udp.send(b"x".to_vec(), &task), Err(SockError::InvalidState(_))));
    assert!(matches!(udp.listen(0), Err(SockError::InvalidState(_))));
    assert!(matches!(udp.accept(&task), Err(SockError::InvalidState(_))));
    assert!(matches!(tcp.send(b"x".to_vec(), &task), Err(SockError::NotConnected)));
    assert!(matches!(tcp.listen(0), Err(SockError::InvalidState(_))));
    assert!(matches!(
        tcp.connect("224.0.0.1:53".parse().unwrap(), &task),
        Err(SockError::Multicast)
    ));
    assert!(matches!(
        udp.sendto(b"x".to_vec(), "[::1]:53".parse().unwrap(), &task),
        Err(SockError::FamilyMismatch)
    ));

    tcp.bind(loopback()).unwrap();
    assert!(matches!(tcp.recv(vec![0; 4], 8, &task), Err(SockError::InvalidArgument(_))));
    assert!(matches!(tcp.recv(Vec::new(), 0, &task), Err(SockError::InvalidArgument(_))));
    assert!(matches!(tcp.recvv(Vec::new(), 0, &task), Err(SockError::InvalidArgument(_))));
}

#[test]
fn test_names() {
    let mgr = manager();
    let fresh = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    assert_eq!(fresh.sock_name(), Err(SockError::NotBound));
    assert_eq!(fresh.peer_name(), Err(SockError::NotConnected));

    let (listener, client, server) = tcp_pair(&mgr);
    assert_eq!(client.peer_name().unwrap(), listener.sock_name().unwrap());
    assert_eq!(server.peer_name().unwrap(), client.sock_name().unwrap());
    assert!(server.is_connected());
    assert!(listener.is_listening());
}

#[test]
fn test_attach_detach() {
    let mgr = manager();
    let sock = mgr.create(SocketKind::Datagram, Family::Inet).unwrap();
    let count = mgr.socket_count();
    assert_eq!(sock.references(), 1);

    let other = sock.attach();
    assert_eq!(sock.references(), 2);
    assert_eq!(other.id(), sock.id());
    other.detach();
    assert_eq!(sock.references(), 1);
    assert_eq!(mgr.socket_count(), count);

    drop(sock);
    assert_eq!(mgr.socket_count(), count - 1);
}

#[test]
fn test_invalid_config_rejected() {
    let cfg = ManagerConfig::new().max_registrations_per_thread(0);
    assert!(matches!(SocketManager::new(cfg), Err(SockError::InvalidArgument(_))));
}

#[test]
fn test_stats_counters() {
    let mgr = manager();
    let (listener, client, server) = tcp_pair(&mgr);
    let stats = mgr.stats();
    assert_eq!(stats.get(StatCounter::Open), 2);
    assert_eq!(stats.get(StatCounter::Accept), 1);
    assert_eq!(stats.get(StatCounter::Connect), 1);
    assert_eq!(stats.get(StatCounter::Active), 3);
    assert_eq!(stats.get(StatCounter::Active) as usize, mgr.socket_count());

    let other = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    assert_eq!(other.bind(listener.sock_name().unwrap()), Err(SockError::AddrInUse));
    assert_eq!(mgr.stats().get(StatCounter::BindFail), 1);

    // The peer is not reading, so the immediate attempt cannot finish.
    let task = Task::new();
    let sub = client
        .send_with(Payload::Region(vec![0; 64 << 20]), None, &task, SubmitFlags::NORETRY)
        .unwrap();
    assert_eq!(sub.wait().result, Err(SockError::NoResources));
    assert_eq!(mgr.stats().get(StatCounter::SendFail), 1);

    drop((other, server));
    let stats = mgr.stats();
    assert_eq!(stats.get(StatCounter::Close), 2);
    assert_eq!(stats.get(StatCounter::Active), 2);
    assert_eq!(stats.get(StatCounter::RecvFail), 0);
    drop((listener, client));
    assert_eq!(mgr.stats().get(StatCounter::Active), 0);
}

#[test]
fn test_connect_failure_counted() {
    let mgr = manager();
    let closed = {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        closed.local_addr().unwrap()
    };
    let client = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    wait(client.connect(closed, &Task::new()).unwrap());
    assert_eq!(mgr.stats().get(StatCounter::ConnectFail), 1);
    assert_eq!(mgr.stats().get(StatCounter::Connect), 0);
}

#[test]
fn test_socket_limit() {
    let mgr = SocketManager::new(ManagerConfig::new().io_threads(1).max_sockets(2)).unwrap();
    assert_eq!(mgr.max_sockets(), 2);
    let task = Task::new();

    let listener = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    listener.bind(loopback()).unwrap();
    listener.listen(0).unwrap();
    let client = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    assert_eq!(
        mgr.create(SocketKind::Datagram, Family::Inet).unwrap_err(),
        SockError::NoResources
    );
    assert_eq!(mgr.stats().get(StatCounter::OpenFail), 1);

    // The kernel completes the handshake; the full registry refuses the child.
    let accepted = listener.accept(&task).unwrap();
    let connected = client.connect(listener.sock_name().unwrap(), &task).unwrap();
    assert_eq!(wait(connected).result, Ok(()));
    let ev = wait(accepted);
    assert_eq!(ev.result, Err(SockError::NoResources));
    assert!(ev.socket.is_none());
    assert_eq!(mgr.stats().get(StatCounter::AcceptFail), 1);
    assert!(eventually(|| mgr.live_sockets() == 2));

    drop(client);
    assert!(mgr.create(SocketKind::Datagram, Family::Inet).is_ok());
}

#[test]
fn test_names_in_dump() {
    let mgr = manager();
    let listener = mgr.create(SocketKind::Stream, Family::Inet).unwrap();
    listener.bind(loopback()).unwrap();
    listener.listen(0).unwrap();
    assert_eq!(listener.name(), None);
    listener.set_name("resolver-upstream-1");
    assert_eq!(listener.name().as_deref(), Some("resolver-upstre"));

    let udp = mgr.create(SocketKind::Datagram, Family::Inet).unwrap();
    // Cut on a character boundary.
    udp.set_name("éééééééééé");
    assert_eq!(udp.name().as_deref(), Some("ééééééé"));
    assert!(udp.name().unwrap().len() <= MAX_NAME_LEN);

    let dump = mgr.dump();
    assert_eq!(dump.len(), 2);
    assert!(dump[0].id < dump[1].id);
    let snap = &dump[0];
    assert_eq!(snap.id, listener.id());
    assert_eq!(snap.name.as_deref(), Some("resolver-upstre"));
    assert_eq!(snap.kind, SocketKind::Stream);
    assert_eq!(snap.references, 1);
    assert_eq!(snap.local, Some(listener.sock_name().unwrap()));
    assert_eq!(snap.peer, None);
    assert_eq!(snap.states, vec!["listener", "bound"]);
    assert!(dump[1].states.is_empty());
    assert_eq!(dump[1].local, None);

    let text = mgr.dump_string();
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains("(resolver-upstre)"));
    assert!(text.contains("[listener, bound]"));
}

#[test]
fn test_dump_reports_connection() {
    let mgr = manager();
    let (listener, client, server) = tcp_pair(&mgr);
    let task = Task::new();
    let _recv = server.recv(vec![0; 4], 0, &task).unwrap();

    let dump = mgr.dump();
    let snap = dump.iter().find(|s| s.id == server.id()).unwrap();
    assert_eq!(snap.peer, Some(client.sock_name().unwrap()));
    assert!(snap.states.contains(&"connected"));
    assert!(snap.states.contains(&"pending-receive"));

    let _accept = listener.accept(&task).unwrap();
    let dump = mgr.dump();
    let snap = dump.iter().find(|s| s.id == listener.id()).unwrap();
    assert!(snap.states.contains(&"pending-accept"));
}

#[test]
fn test_ipv6_only() {
    let mgr = manager();
    let v4 = mgr.create(SocketKind::Datagram, Family::Inet).unwrap();
    assert_eq!(v4.set_ipv6_only(true), Ok(()));
    assert_eq!(v4.is_ipv6_only(), Ok(false));

    // Hosts without IPv6 cannot create the socket at all.
    let Ok(v6) = mgr.create(SocketKind::Stream, Family::Inet6) else {
        return;
    };
    v6.set_ipv6_only(true).unwrap();
    assert_eq!(v6.is_ipv6_only(), Ok(true));
    v6.set_ipv6_only(false).unwrap();
    assert_eq!(v6.is_ipv6_only(), Ok(false));
}
