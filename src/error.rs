//! Error kinds and the per-socket error state.
//!
//! Every blocking call reports its outcome through its return value and also
//! records it in an [`ErrorState`], which other threads may read at any time.

use parking_lot::Mutex;
use std::fmt;
use std::io;
use thiserror::Error;

/// Coarse classification of a [`SocketError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotConnected,
    ConnectionRefused,
    ConnectionReset,
    EndOfStream,
    Cancelled,
    AlreadyCancelled,
    AlreadyOpen,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotConnected => "not connected",
            ErrorKind::ConnectionRefused => "connection refused",
            ErrorKind::ConnectionReset => "connection reset",
            ErrorKind::EndOfStream => "end of stream",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::AlreadyCancelled => "already cancelled",
            ErrorKind::AlreadyOpen => "already open",
            ErrorKind::Unknown => "unknown",
        };

        f.write_str(name)
    }
}

/// Failure of a socket operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    #[error("socket is not connected")]
    NotConnected,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("peer closed the connection")]
    EndOfStream,

    #[error("operation cancelled")]
    Cancelled,

    #[error("socket was previously cancelled")]
    AlreadyCancelled,

    #[error("socket already has an open handle")]
    AlreadyOpen,

    #[error("{message}")]
    Unknown { code: Option<i32>, message: String },
}

impl SocketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SocketError::NotConnected => ErrorKind::NotConnected,
            SocketError::ConnectionRefused => ErrorKind::ConnectionRefused,
            SocketError::ConnectionReset => ErrorKind::ConnectionReset,
            SocketError::EndOfStream => ErrorKind::EndOfStream,
            SocketError::Cancelled => ErrorKind::Cancelled,
            SocketError::AlreadyCancelled => ErrorKind::AlreadyCancelled,
            SocketError::AlreadyOpen => ErrorKind::AlreadyOpen,
            SocketError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// True for both an in-flight cancellation and a call made after one.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SocketError::Cancelled | SocketError::AlreadyCancelled)
    }
}

impl From<io::Error> for SocketError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => SocketError::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => SocketError::ConnectionReset,
            io::ErrorKind::NotConnected => SocketError::NotConnected,
            io::ErrorKind::UnexpectedEof => SocketError::EndOfStream,
            _ => SocketError::Unknown {
                code: error.raw_os_error(),
                message: error.to_string(),
            },
        }
    }
}

impl From<SocketError> for io::Error {
    fn from(error: SocketError) -> Self {
        let kind = match &error {
            SocketError::NotConnected => io::ErrorKind::NotConnected,
            SocketError::ConnectionRefused => io::ErrorKind::ConnectionRefused,
            SocketError::ConnectionReset => io::ErrorKind::ConnectionReset,
            SocketError::EndOfStream => io::ErrorKind::UnexpectedEof,
            // Not `Interrupted`: std helpers would silently retry it.
            SocketError::Cancelled | SocketError::AlreadyCancelled => io::ErrorKind::Other,
            SocketError::AlreadyOpen => io::ErrorKind::AlreadyExists,
            SocketError::Unknown { code: Some(code), .. } => {
                return io::Error::from_raw_os_error(*code);
            }
            SocketError::Unknown { .. } => io::ErrorKind::Other,
        };

        io::Error::new(kind, error)
    }
}

pub type Result<T> = std::result::Result<T, SocketError>;

/// Outcome of the most recent operation, readable from any thread.
///
/// The lock is only held to clone or replace the value, so a reader never
/// waits on an in-flight operation; it sees the previous outcome until the
/// operation records its own.
#[derive(Debug, Default)]
pub struct ErrorState {
    last: Mutex<Option<SocketError>>,
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` means the last operation succeeded (or none has run yet).
    pub fn get(&self) -> Option<SocketError> {
        self.last.lock().clone()
    }

    pub(crate) fn set(&self, error: Option<SocketError>) {
        *self.last.lock() = error;
    }

    /// Stores the outcome of `result` and hands it back unchanged.
    pub(crate) fn record<T>(&self, result: Result<T>) -> Result<T> {
        self.set(result.as_ref().err().cloned());
        result
    }
}
