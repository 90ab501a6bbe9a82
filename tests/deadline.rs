mod common;

use cancellable_socket::{SocketBuilder, SocketError};
use common::{CANCEL_BOUND, init_tracing, loopback_listener, saturated_listener};
use std::time::{Duration, Instant};

#[test]
fn deadline_cancels_hanging_connect() {
    init_tracing();
    let remote = saturated_listener();

    let mut socket = SocketBuilder::new()
        .deadline(Duration::from_millis(200))
        .build()
        .expect("socket");

    let started = Instant::now();
    let result = socket.connect(remote.address);
    let elapsed = started.elapsed();

    assert_eq!(result, Err(SocketError::Cancelled));
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < CANCEL_BOUND);
    assert!(socket.is_cancelled());
}

#[test]
fn deadline_cancels_idle_read() {
    init_tracing();
    let (listener, address) = loopback_listener();

    let mut socket = SocketBuilder::new()
        .deadline(Duration::from_millis(100))
        .build()
        .expect("socket");
    socket.connect(address).expect("connect");
    let (_peer, _) = listener.accept().expect("accept");

    let mut buffer = [0u8; 4];
    assert_eq!(socket.read(&mut buffer), Err(SocketError::Cancelled));
    assert!(!socket.is_open());
}

#[test]
fn deadline_does_not_outlive_completed_operation() {
    init_tracing();
    let (listener, address) = loopback_listener();

    let mut socket = SocketBuilder::new()
        .deadline(Duration::from_millis(100))
        .build()
        .expect("socket");
    socket.connect(address).expect("connect");
    let (_peer, _) = listener.accept().expect("accept");

    // Longer than the deadline, but no operation is running.
    std::thread::sleep(Duration::from_millis(250));

    assert!(!socket.is_cancelled());
    assert_eq!(socket.write(b"still alive"), Ok(11));
}
