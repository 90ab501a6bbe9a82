//! Cross-thread cancellation of blocking socket operations.
//!
//! The [`CancellationController`] owns a tri-state guarded by one lock:
//!
//! - `Idle`: no operation in flight, not cancelled
//! - `Armed`: an operation is in flight and its handle may be aborted
//! - `Cancelled`: terminal, nothing leaves this state
//!
//! Arming installs the handle and checks for a prior cancellation in the same
//! critical section, so a `cancel()` racing with operation setup either finds
//! the handle and aborts it, or leaves `Cancelled` behind for the arming call
//! to report. It is never lost.
//!
//! # Example
//!
//! ```no_run
//! use cancellable_socket::CancellableSocket;
//! use std::thread;
//!
//! let mut socket = CancellableSocket::new()?;
//! let canceller = socket.canceller();
//!
//! let worker = thread::spawn(move || socket.connect("127.0.0.1:9000".parse().unwrap()));
//!
//! canceller.cancel();
//! canceller.cancel(); // no-op
//!
//! let result = worker.join().unwrap();
//! assert!(result.unwrap_err().is_cancelled());
//! # Ok::<(), cancellable_socket::SocketError>(())
//! ```

use crate::error::{ErrorState, SocketError};
use crate::handle::Handle;
use crate::reactor::core::Notifier;

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// What `cancel()` needs to interrupt the operation currently in flight.
#[derive(Debug)]
struct Target {
    /// Never upgraded outside the controller's lock; the adapter cannot drop
    /// its handle while armed because disarming takes the same lock.
    handle: Weak<Handle>,
    notifier: Notifier,
}

#[derive(Debug)]
enum CancelState {
    Idle,
    Armed(Target),
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct CancellationController {
    state: Mutex<CancelState>,
}

impl CancellationController {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CancelState::Idle),
        }
    }

    /// Makes `handle` the abort target of the operation about to start.
    ///
    /// Fails with [`SocketError::AlreadyCancelled`] if cancellation happened
    /// first, in which case the caller must not start the operation.
    pub(crate) fn arm(&self, handle: &Arc<Handle>, notifier: Notifier) -> Result<(), SocketError> {
        let mut state = self.state.lock();

        if matches!(*state, CancelState::Cancelled) {
            return Err(SocketError::AlreadyCancelled);
        }

        *state = CancelState::Armed(Target {
            handle: Arc::downgrade(handle),
            notifier,
        });
        debug!(fd = handle.raw_fd(), "armed");

        Ok(())
    }

    /// Clears the abort target once the operation has returned.
    ///
    /// Reports [`SocketError::Cancelled`] if a cancellation arrived while the
    /// operation was armed; that outcome supersedes whatever the operation
    /// itself produced.
    pub(crate) fn disarm(&self) -> Result<(), SocketError> {
        let mut state = self.state.lock();

        match *state {
            CancelState::Cancelled => Err(SocketError::Cancelled),
            CancelState::Armed(_) => {
                *state = CancelState::Idle;
                debug!("disarmed");
                Ok(())
            }
            CancelState::Idle => Ok(()),
        }
    }

    /// Moves to `Cancelled`, aborting the armed handle if there is one.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub(crate) fn cancel(&self) -> bool {
        let mut state = self.state.lock();

        match std::mem::replace(&mut *state, CancelState::Cancelled) {
            CancelState::Cancelled => false,
            CancelState::Idle => {
                info!("cancelled while idle");
                true
            }
            CancelState::Armed(target) => {
                info!("cancelled in-flight operation");

                if let Some(handle) = target.handle.upgrade() {
                    handle.abort();
                }
                target.notifier.notify();

                true
            }
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(*self.state.lock(), CancelState::Cancelled)
    }
}

/// State shared between a socket and all of its cancellers.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) controller: CancellationController,
    pub(crate) errors: ErrorState,
}

impl Shared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            controller: CancellationController::new(),
            errors: ErrorState::new(),
        })
    }
}

/// Thread-safe handle that cancels a [`CancellableSocket`](crate::CancellableSocket).
///
/// Obtained from [`CancellableSocket::canceller`](crate::CancellableSocket::canceller).
/// Cloning is cheap, and every clone controls the same socket.
#[derive(Clone)]
pub struct Canceller {
    shared: Arc<Shared>,
}

impl Canceller {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Cancels the socket permanently.
    ///
    /// Never blocks on I/O and never fails. If an operation is in flight it
    /// returns [`SocketError::Cancelled`] shortly afterwards; every later
    /// operation fails at once with [`SocketError::AlreadyCancelled`]. Calls
    /// after the first have no effect.
    pub fn cancel(&self) {
        self.shared.controller.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.controller.is_cancelled()
    }

    /// Outcome of the socket's most recent operation; see
    /// [`CancellableSocket::last_error`](crate::CancellableSocket::last_error).
    pub fn last_error(&self) -> Option<SocketError> {
        self.shared.errors.get()
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
