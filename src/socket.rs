//! The cancellable socket adapter.
//!
//! [`CancellableSocket`] looks like an ordinary blocking stream: `connect`,
//! `read` and `write` return only when the operation is done. Underneath,
//! each call runs a non-blocking operation on a private event loop, with the
//! socket handle armed in the cancellation controller for the duration of
//! the call. A [`Canceller`] taken from the socket may abort it from any
//! other thread.

use crate::builder::{SocketBuilder, SocketOptions};
use crate::cancel::{Canceller, Shared};
use crate::error::{Result, SocketError};
use crate::handle::Handle;
use crate::reactor::core::{Completion, EventLoop};
use crate::reactor::future::{ConnectFuture, ReadFuture, WriteFuture};

use socket2::{SockAddr, Socket};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use tracing::debug;

/// Blocking TCP stream whose operations can be cancelled from another thread.
///
/// At most one operation runs at a time: `connect`, `read` and `write` take
/// `&mut self`. Cancellation goes through [`Canceller`], which is `Send + Sync`
/// and may be cloned freely.
///
/// Cancellation is terminal. Once cancelled, the handle is closed as soon as
/// the socket observes it, and every later operation fails with
/// [`SocketError::AlreadyCancelled`] without touching the network.
pub struct CancellableSocket {
    handle: Option<Arc<Handle>>,
    reactor: EventLoop,
    shared: Arc<Shared>,
    options: SocketOptions,
}

impl CancellableSocket {
    /// Creates a socket with default options and no handle; call
    /// [`connect`](Self::connect) next.
    pub fn new() -> Result<Self> {
        Self::with_options(SocketOptions::default())
    }

    pub fn builder() -> SocketBuilder {
        SocketBuilder::new()
    }

    pub(crate) fn with_options(options: SocketOptions) -> Result<Self> {
        let reactor = EventLoop::new(options.event_capacity)?;

        Ok(Self {
            handle: None,
            reactor,
            shared: Shared::new(),
            options,
        })
    }

    /// Wraps an already-connected stream, e.g. one returned by `accept`.
    pub fn from_std(stream: TcpStream) -> Result<Self> {
        Self::from_socket(stream.into())
    }

    /// Wraps an already-open socket.
    pub fn from_socket(socket: Socket) -> Result<Self> {
        Self::from_socket_with_options(socket, SocketOptions::default())
    }

    pub(crate) fn from_socket_with_options(socket: Socket, options: SocketOptions) -> Result<Self> {
        let mut this = Self::with_options(options)?;

        let handle = Handle::from_socket(socket)?;
        handle.apply_connected_options(&this.options);
        this.handle = Some(Arc::new(handle));

        Ok(this)
    }

    pub fn canceller(&self) -> Canceller {
        Canceller::new(self.shared.clone())
    }

    /// Same as [`Canceller::cancel`].
    pub fn cancel(&self) {
        self.shared.controller.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.controller.is_cancelled()
    }

    /// Outcome of the most recent operation, `None` if it succeeded.
    ///
    /// A read that hit end of stream returns `Ok(0)` and records
    /// [`SocketError::EndOfStream`] here.
    pub fn last_error(&self) -> Option<SocketError> {
        self.shared.errors.get()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let handle = self.handle.as_ref().ok_or(SocketError::NotConnected)?;

        inet_address(handle.socket().local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        let handle = self.handle.as_ref().ok_or(SocketError::NotConnected)?;

        inet_address(handle.socket().peer_addr()?)
    }

    /// Opens a handle for `endpoint`'s address family and connects it.
    ///
    /// Blocks until the connection is established, fails, or is cancelled.
    /// Fails with [`SocketError::AlreadyOpen`] if a handle is already open.
    ///
    /// A call made after cancellation fails with
    /// [`SocketError::AlreadyCancelled`] rather than [`SocketError::Cancelled`];
    /// use [`SocketError::is_cancelled`] to test for either.
    pub fn connect(&mut self, endpoint: SocketAddr) -> Result<()> {
        let result = self.try_connect(endpoint);
        self.finish(result)
    }

    /// Reads into `buffer`, blocking until at least one byte is available.
    ///
    /// Returns `Ok(0)` at end of stream (or for an empty buffer).
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let requested = buffer.len();
        let result = self.try_read(buffer);

        match result {
            Ok(0) if requested > 0 => {
                debug!("end of stream");
                self.shared.errors.set(Some(SocketError::EndOfStream));
                Ok(0)
            }
            other => self.finish(other),
        }
    }

    /// Reads a single byte; `None` at end of stream.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];

        match self.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Writes from `buffer`, blocking until the OS accepts at least one byte.
    pub fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        let result = self.try_write(buffer);
        self.finish(result)
    }

    pub fn write_all(&mut self, mut buffer: &[u8]) -> Result<()> {
        while !buffer.is_empty() {
            let written = self.write(buffer)?;
            if written == 0 {
                let error = io::Error::new(io::ErrorKind::WriteZero, "write returned zero bytes");
                return self.finish(Err(error.into()));
            }

            buffer = &buffer[written..];
        }

        Ok(())
    }

    fn try_connect(&mut self, endpoint: SocketAddr) -> Result<()> {
        if self.shared.controller.is_cancelled() {
            return Err(SocketError::AlreadyCancelled);
        }

        if self.handle.is_some() {
            return Err(SocketError::AlreadyOpen);
        }

        debug!(%endpoint, "connecting");

        let handle = Arc::new(Handle::open(&endpoint, &self.options)?);
        self.drive(&handle, ConnectFuture::new(&handle, endpoint, &self.reactor))?;

        handle.apply_connected_options(&self.options);
        debug!(fd = handle.raw_fd(), %endpoint, "connected");
        self.handle = Some(handle);

        Ok(())
    }

    fn try_read(&self, buffer: &mut [u8]) -> Result<usize> {
        let handle = self.active_handle()?;

        if buffer.is_empty() {
            return Ok(0);
        }

        self.drive(handle, ReadFuture::new(handle, buffer, &self.reactor))
    }

    fn try_write(&self, buffer: &[u8]) -> Result<usize> {
        let handle = self.active_handle()?;

        if buffer.is_empty() {
            return Ok(0);
        }

        self.drive(handle, WriteFuture::new(handle, buffer, &self.reactor))
    }

    fn active_handle(&self) -> Result<&Arc<Handle>> {
        if self.shared.controller.is_cancelled() {
            return Err(SocketError::AlreadyCancelled);
        }

        self.handle.as_ref().ok_or(SocketError::NotConnected)
    }

    /// Arms `handle`, runs `operation` on the event loop, and disarms.
    fn drive<F, T>(&self, handle: &Arc<Handle>, operation: F) -> Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        let controller = &self.shared.controller;
        controller.arm(handle, self.reactor.notifier())?;

        let deadline = self.options.deadline.map(|deadline| {
            let shared = self.shared.clone();

            self.reactor.schedule(deadline, move || {
                debug!(?deadline, "operation deadline elapsed");
                shared.controller.cancel();
            })
        });

        let completion = self
            .reactor
            .block_on(operation, || controller.is_cancelled());

        if let Some(timer) = deadline {
            self.reactor.cancel_timer(timer);
        }

        // A cancellation that raced with completion still wins.
        controller.disarm()?;

        match completion? {
            Completion::Done(result) => Ok(result?),
            Completion::Aborted => Err(SocketError::Cancelled),
        }
    }

    /// Records the outcome and closes the handle if it was cancelled.
    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            debug!(%error, "operation failed");

            if error.is_cancelled()
                && let Some(handle) = self.handle.take()
            {
                debug!(fd = handle.raw_fd(), "closing cancelled handle");
            }
        }

        self.shared.errors.record(result)
    }
}

fn inet_address(address: SockAddr) -> Result<SocketAddr> {
    address.as_socket().ok_or_else(|| SocketError::Unknown {
        code: None,
        message: "socket address is not an internet address".to_owned(),
    })
}

impl io::Read for CancellableSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        CancellableSocket::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for CancellableSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        CancellableSocket::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for CancellableSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellableSocket")
            .field("handle", &self.handle)
            .field("cancelled", &self.is_cancelled())
            .field("options", &self.options)
            .finish()
    }
}
