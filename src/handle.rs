use crate::builder::SocketOptions;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use tracing::{debug, warn};

/// An open, non-blocking OS socket.
///
/// The adapter holds the only strong reference; the descriptor is closed
/// exactly once, when that reference is dropped.
#[derive(Debug)]
pub(crate) struct Handle {
    socket: Socket,
}

impl Handle {
    /// Opens a stream socket of the endpoint's address family.
    ///
    /// Applies the pre-connect options (address reuse, local bind). No
    /// connection attempt is made here.
    pub(crate) fn open(endpoint: &SocketAddr, options: &SocketOptions) -> io::Result<Self> {
        let socket = Socket::new(
            Domain::for_address(*endpoint),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;

        if options.reuse_address {
            socket.set_reuse_address(true)?;
        }

        if let Some(local) = options.local_address {
            socket.bind(&SockAddr::from(local))?;
        }

        Self::from_socket(socket)
    }

    /// Adopts an already-open socket, switching it to non-blocking mode.
    pub(crate) fn from_socket(socket: Socket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;

        #[cfg(target_vendor = "apple")]
        socket.set_nosigpipe(true)?;

        Ok(Self { socket })
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Best effort: a failure to set TCP_NODELAY is logged and otherwise ignored.
    pub(crate) fn apply_connected_options(&self, options: &SocketOptions) {
        if let Err(error) = self.socket.set_tcp_nodelay(options.nodelay) {
            debug!(fd = self.raw_fd(), %error, "could not set TCP_NODELAY");
        }
    }

    /// Forces any operation blocked on this socket, in any thread, to wake.
    ///
    /// Shuts down both directions instead of closing, so the descriptor number
    /// stays valid (and cannot be reused) until the owner drops the handle.
    pub(crate) fn abort(&self) {
        match self.socket.shutdown(Shutdown::Both) {
            Ok(()) => debug!(fd = self.raw_fd(), "socket shut down"),
            // Never connected or already torn down; the event loop wakeup covers it.
            Err(error) if error.kind() == io::ErrorKind::NotConnected => {}
            Err(error) => warn!(fd = self.raw_fd(), %error, "failed to shut down socket"),
        }
    }
}
