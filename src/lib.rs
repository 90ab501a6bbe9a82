//! Blocking TCP sockets whose operations can be cancelled from another thread.
//!
//! A [`CancellableSocket`] exposes ordinary blocking `connect`, `read` and
//! `write` calls. Any of them can be aborted through a [`Canceller`], which
//! may be cloned and sent to other threads. Cancelling never blocks, never
//! fails, and is idempotent; the blocked operation returns
//! [`SocketError::Cancelled`] promptly.
//!
//! # Architecture
//!
//! - **Socket adapter** ([`CancellableSocket`]): owns the handle and the event
//!   loop, and runs one operation at a time
//! - **Cancellation controller**: lock-guarded `Idle`/`Armed`/`Cancelled` state
//!   plus the handle that a cancel may abort
//! - **Event loop**: epoll or kqueue reactor presenting a non-blocking
//!   operation as a blocking call
//! - **Error state**: outcome of the last operation, readable from any thread
//!
//! # Example
//!
//! ```no_run
//! use cancellable_socket::{CancellableSocket, ErrorKind};
//! use std::thread;
//! use std::time::Duration;
//!
//! let mut socket = CancellableSocket::new()?;
//! socket.connect("127.0.0.1:7000".parse().unwrap())?;
//!
//! let canceller = socket.canceller();
//! let reader = thread::spawn(move || {
//!     let mut buffer = [0u8; 64];
//!     socket.read(&mut buffer)
//! });
//!
//! thread::sleep(Duration::from_millis(100));
//! canceller.cancel();
//!
//! let error = reader.join().unwrap().unwrap_err();
//! assert_eq!(error.kind(), ErrorKind::Cancelled);
//! # Ok::<(), cancellable_socket::SocketError>(())
//! ```

mod builder;
mod cancel;
mod error;
mod handle;
mod reactor;
mod socket;

pub use builder::{SocketBuilder, SocketOptions};
pub use cancel::Canceller;
pub use error::{ErrorKind, ErrorState, Result, SocketError};
pub use socket::CancellableSocket;
