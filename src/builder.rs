//! Socket configuration and the fluent builder that applies it.

use crate::error::Result;
use crate::socket::CancellableSocket;

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Options applied to every handle a [`CancellableSocket`] opens or adopts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm on connected streams.
    pub nodelay: bool,
    /// Set `SO_REUSEADDR` before binding or connecting.
    pub reuse_address: bool,
    /// Bind to this local address before connecting.
    pub local_address: Option<SocketAddr>,
    /// Cancel any single operation that blocks for longer than this.
    ///
    /// The deadline is enforced through the regular cancellation path, so an
    /// expired operation fails with `Cancelled` and the socket stays cancelled.
    pub deadline: Option<Duration>,
    /// Readiness events fetched per reactor wait.
    pub event_capacity: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            reuse_address: false,
            local_address: None,
            deadline: None,
            event_capacity: 16,
        }
    }
}

/// Builder for [`CancellableSocket`] instances.
///
/// # Example
/// ```no_run
/// use cancellable_socket::SocketBuilder;
/// use std::time::Duration;
///
/// let mut socket = SocketBuilder::new()
///     .nodelay(false)
///     .deadline(Duration::from_secs(5))
///     .build()?;
///
/// socket.connect("127.0.0.1:8080".parse().unwrap())?;
/// # Ok::<(), cancellable_socket::SocketError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SocketBuilder {
    options: SocketOptions,
}

impl SocketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.options.nodelay = enabled;
        self
    }

    pub fn reuse_address(mut self, enabled: bool) -> Self {
        self.options.reuse_address = enabled;
        self
    }

    pub fn bind(mut self, local: SocketAddr) -> Self {
        self.options.local_address = Some(local);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.options.deadline = Some(deadline);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.options.event_capacity = capacity.max(1);
        self
    }

    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// Builds a socket with no handle, ready for
    /// [`connect`](CancellableSocket::connect).
    pub fn build(self) -> Result<CancellableSocket> {
        CancellableSocket::with_options(self.options)
    }

    /// Builds a socket around an already-connected stream, ready for reads
    /// and writes.
    pub fn wrap(self, stream: TcpStream) -> Result<CancellableSocket> {
        CancellableSocket::from_socket_with_options(stream.into(), self.options)
    }
}
