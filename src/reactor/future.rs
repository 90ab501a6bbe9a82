//! Connect, read and write futures for a non-blocking socket handle.
//!
//! Each future attempts its syscall first and only registers with the
//! [`EventLoop`] when the OS reports that the call would block. The
//! registration is removed when the future is dropped, so nothing outlives
//! the operation that created it.

use crate::handle::Handle;
use crate::reactor::core::EventLoop;
use crate::reactor::poller::Interest;

use libc::{recv, send};
use socket2::SockAddr;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

// Apple platforms have no MSG_NOSIGNAL; their handles set SO_NOSIGPIPE instead.
#[cfg(not(target_vendor = "apple"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(target_vendor = "apple")]
const SEND_FLAGS: libc::c_int = 0;

/// Readiness interest held by one future for the lifetime of one operation.
struct Registration<'a> {
    reactor: &'a EventLoop,
    handle: &'a Handle,
    interest: Interest,
    registered: bool,
}

impl<'a> Registration<'a> {
    fn new(reactor: &'a EventLoop, handle: &'a Handle, interest: Interest) -> Self {
        Self {
            reactor,
            handle,
            interest,
            registered: false,
        }
    }

    fn wait(&mut self, waker: &Waker) -> io::Result<()> {
        if self.registered {
            self.reactor.rearm(self.handle.raw_fd(), waker.clone());
        } else {
            self.reactor
                .register(self.handle.raw_fd(), self.interest, waker.clone())?;
            self.registered = true;
        }

        Ok(())
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.registered {
            self.reactor.deregister(self.handle.raw_fd());
        }
    }
}

fn in_progress(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock || error.raw_os_error() == Some(libc::EINPROGRESS)
}

/// Parks the future until the registration fires, or fails it if the
/// descriptor cannot be registered.
fn park<T>(registration: &mut Registration<'_>, cx: &Context<'_>) -> Poll<io::Result<T>> {
    match registration.wait(cx.waker()) {
        Ok(()) => Poll::Pending,
        Err(error) => Poll::Ready(Err(error)),
    }
}

/// Future that establishes an outgoing stream connection.
///
/// The `connect` syscall is issued on the first poll, not at construction,
/// so no network activity happens before the operation is armed.
pub(crate) struct ConnectFuture<'a> {
    endpoint: SockAddr,
    registration: Registration<'a>,
    started: bool,
}

impl<'a> ConnectFuture<'a> {
    pub(crate) fn new(handle: &'a Handle, endpoint: SocketAddr, reactor: &'a EventLoop) -> Self {
        Self {
            endpoint: SockAddr::from(endpoint),
            registration: Registration::new(reactor, handle, Interest::WRITABLE),
            started: false,
        }
    }
}

impl Future for ConnectFuture<'_> {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.as_mut().get_mut();
        let handle: &Handle = this.registration.handle;
        let socket = handle.socket();

        if !this.started {
            this.started = true;

            match socket.connect(&this.endpoint) {
                Ok(()) => return Poll::Ready(Ok(())),
                Err(error) if in_progress(&error) => {}
                Err(error) => return Poll::Ready(Err(error)),
            }

            return park(&mut this.registration, cx);
        }

        match socket.take_error() {
            Ok(None) => {}
            Ok(Some(error)) | Err(error) => return Poll::Ready(Err(error)),
        }

        match socket.peer_addr() {
            Ok(_) => Poll::Ready(Ok(())),
            // Woken before the handshake finished.
            Err(error) if error.kind() == io::ErrorKind::NotConnected => {
                park(&mut this.registration, cx)
            }
            Err(error) => Poll::Ready(Err(error)),
        }
    }
}

/// Future that reads into a buffer, resolving to the byte count.
///
/// Resolves to `Ok(0)` when the peer has closed its side of the stream.
pub(crate) struct ReadFuture<'a> {
    buffer: &'a mut [u8],
    registration: Registration<'a>,
}

impl<'a> ReadFuture<'a> {
    pub(crate) fn new(handle: &'a Handle, buffer: &'a mut [u8], reactor: &'a EventLoop) -> Self {
        Self {
            buffer,
            registration: Registration::new(reactor, handle, Interest::READABLE),
        }
    }
}

impl Future for ReadFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.as_mut().get_mut();
        let fd = this.registration.handle.raw_fd();

        loop {
            let result = unsafe {
                recv(
                    fd,
                    this.buffer.as_mut_ptr() as *mut _,
                    this.buffer.len(),
                    0,
                )
            };

            if result >= 0 {
                return Poll::Ready(Ok(result as usize));
            }

            let error = io::Error::last_os_error();

            match error.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return park(&mut this.registration, cx),
                _ => return Poll::Ready(Err(error)),
            }
        }
    }
}

/// Future that writes from a buffer, resolving to the number of bytes the OS
/// accepted.
pub(crate) struct WriteFuture<'a> {
    buffer: &'a [u8],
    registration: Registration<'a>,
}

impl<'a> WriteFuture<'a> {
    pub(crate) fn new(handle: &'a Handle, buffer: &'a [u8], reactor: &'a EventLoop) -> Self {
        Self {
            buffer,
            registration: Registration::new(reactor, handle, Interest::WRITABLE),
        }
    }
}

impl Future for WriteFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.as_mut().get_mut();
        let fd = this.registration.handle.raw_fd();

        loop {
            let result = unsafe {
                send(
                    fd,
                    this.buffer.as_ptr() as *const _,
                    this.buffer.len(),
                    SEND_FLAGS,
                )
            };

            if result >= 0 {
                return Poll::Ready(Ok(result as usize));
            }

            let error = io::Error::last_os_error();

            match error.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return park(&mut this.registration, cx),
                _ => return Poll::Ready(Err(error)),
            }
        }
    }
}
