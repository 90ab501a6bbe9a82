mod common;

use cancellable_socket::{CancellableSocket, SocketError};
use common::{CANCEL_BOUND, cancel_while_blocked, init_tracing, loopback_listener};
use std::io::Read;
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[test]
fn cancel_unblocks_idle_read() {
    init_tracing();
    let (listener, address) = loopback_listener();

    let mut socket = CancellableSocket::new().expect("socket");
    socket.connect(address).expect("connect");
    let (_peer, _) = listener.accept().expect("accept");

    let canceller = socket.canceller();
    let (result, elapsed) = cancel_while_blocked(&canceller, move || {
        let mut buffer = [0u8; 16];
        socket.read(&mut buffer)
    });

    // Never conflated with end of stream, even though the abort shut the
    // connection down underneath the read.
    assert_eq!(result, Err(SocketError::Cancelled));
    assert!(elapsed < CANCEL_BOUND);
}

#[test]
fn cancel_unblocks_single_byte_read_on_accepted_stream() {
    init_tracing();
    let (listener, address) = loopback_listener();

    let _client = TcpStream::connect(address).expect("connect");
    let (accepted, _) = listener.accept().expect("accept");

    let mut socket = CancellableSocket::from_std(accepted).expect("wrap");
    assert!(socket.is_open());

    let canceller = socket.canceller();
    let (result, _) = cancel_while_blocked(&canceller, move || socket.read_byte());

    assert_eq!(result, Err(SocketError::Cancelled));
}

#[test]
fn cancel_unblocks_full_send_buffer() {
    init_tracing();
    let (listener, address) = loopback_listener();

    let mut socket = CancellableSocket::new().expect("socket");
    socket.connect(address).expect("connect");
    // The peer never reads, so the send path eventually stops accepting bytes.
    let (_peer, _) = listener.accept().expect("accept");

    let canceller = socket.canceller();
    let (result, elapsed) = cancel_while_blocked(&canceller, move || -> Result<(), SocketError> {
        let chunk = vec![0x5a; 64 * 1024];
        loop {
            socket.write(&chunk)?;
        }
    });

    assert_eq!(result, Err(SocketError::Cancelled));
    assert!(elapsed < CANCEL_BOUND);
}

/// User plus system CPU time consumed by the calling thread.
#[cfg(target_os = "linux")]
fn thread_cpu_time() -> Duration {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_THREAD, &mut usage) };
    assert_eq!(rc, 0, "getrusage failed");

    let to_duration = |time: libc::timeval| {
        Duration::from_secs(time.tv_sec as u64) + Duration::from_micros(time.tv_usec as u64)
    };

    to_duration(usage.ru_utime) + to_duration(usage.ru_stime)
}

#[cfg(target_os = "linux")]
#[test]
fn blocked_write_after_peer_half_close_stays_idle() {
    init_tracing();
    let (listener, address) = loopback_listener();

    let mut socket = CancellableSocket::new().expect("socket");
    socket.connect(address).expect("connect");
    // The peer stops sending but never reads either.
    let (peer, _) = listener.accept().expect("accept");
    peer.shutdown(Shutdown::Write).expect("half close");

    let canceller = socket.canceller();
    let (done_tx, done_rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        let before = thread_cpu_time();
        let chunk = vec![0x5a; 64 * 1024];

        let error = loop {
            if let Err(error) = socket.write(&chunk) {
                break error;
            }
        };

        let _ = done_tx.send(());
        (error, thread_cpu_time() - before)
    });

    let blocked_for = Duration::from_secs(1);
    assert!(
        done_rx.recv_timeout(blocked_for).is_err(),
        "write never blocked"
    );

    canceller.cancel();
    done_rx
        .recv_timeout(CANCEL_BOUND)
        .expect("worker did not return after cancel");

    let (error, cpu) = worker.join().expect("worker panicked");
    assert_eq!(error, SocketError::Cancelled);
    assert!(cpu < blocked_for / 4, "blocked write used {cpu:?} of CPU");
}

#[test]
fn cancel_between_operations_closes_on_next_call() {
    init_tracing();
    let (listener, address) = loopback_listener();

    let mut socket = CancellableSocket::new().expect("socket");
    socket.connect(address).expect("connect");
    let (mut peer, _) = listener.accept().expect("accept");

    socket.cancel();
    assert!(socket.is_open(), "idle cancel only flips the state");

    let mut buffer = [0u8; 4];
    assert_eq!(socket.read(&mut buffer), Err(SocketError::AlreadyCancelled));
    assert!(!socket.is_open());

    // Our side is closed, so the peer sees end of stream.
    let mut rest = Vec::new();
    peer.read_to_end(&mut rest).expect("peer read");
    assert!(rest.is_empty());
}
