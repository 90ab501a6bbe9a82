#![allow(dead_code)]

use cancellable_socket::{Canceller, SocketError};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// How long a cancelled operation may take to return.
pub const CANCEL_BOUND: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn loopback_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind listener");
    let address = listener.local_addr().expect("local addr");

    (listener, address)
}

/// A listener whose accept queue is already full, so further connection
/// attempts hang in the handshake.
pub struct SaturatedListener {
    pub address: SocketAddr,
    _listener: Socket,
    _busy: TcpStream,
}

pub fn saturated_listener() -> SaturatedListener {
    let listener = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).expect("socket");
    listener
        .bind(&SockAddr::from(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))))
        .expect("bind");

    // macOS treats a backlog of 0 as SOMAXCONN.
    let backlog = if cfg!(target_vendor = "apple") { 1 } else { 0 };
    listener.listen(backlog).expect("listen");

    let address = listener
        .local_addr()
        .expect("local addr")
        .as_socket()
        .expect("inet address");
    let busy = TcpStream::connect(address).expect("busy keeper");

    SaturatedListener {
        address,
        _listener: listener,
        _busy: busy,
    }
}

/// Runs `task` on a worker thread, cancels it twice once it has had time to
/// block, and returns its result together with the time it took to return
/// after the first cancel.
pub fn cancel_while_blocked<T, F>(canceller: &Canceller, task: F) -> (Result<T, SocketError>, Duration)
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SocketError> + Send + 'static,
{
    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        started_tx.send(()).expect("signal start");
        let _ = done_tx.send(task());
    });

    started_rx.recv().expect("worker started");

    // The worker cannot signal from inside the blocking call, so give it
    // time to get there.
    assert!(
        done_rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "operation finished before it could be cancelled"
    );

    let cancelled_at = Instant::now();
    canceller.cancel();
    canceller.cancel();

    let result = done_rx
        .recv_timeout(CANCEL_BOUND)
        .expect("worker did not return after cancel");
    let elapsed = cancelled_at.elapsed();

    worker.join().expect("worker panicked");

    (result, elapsed)
}
