//! OS readiness pollers.
//!
//! - [`epoll`]: Linux and Android, with an `eventfd` wakeup source
//! - [`kqueue`]: macOS, iOS and FreeBSD, with an `EVFILT_USER` wakeup source
//!
//! Both expose the same surface: `register`, `deregister`, `wait` and a
//! `notify` that may be called from any thread to interrupt a `wait`.

mod common;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
mod kqueue;

pub(crate) use common::{Interest, WAKE_TOKEN};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use epoll::{EpollPoller as Poller, Events};
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
pub(crate) use kqueue::{Events, KqueuePoller as Poller};

fn cvt(result: libc::c_int) -> std::io::Result<libc::c_int> {
    if result < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(result)
    }
}
