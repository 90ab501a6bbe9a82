//! Event-driven I/O reactor module.
//!
//! Turns one non-blocking socket operation into a blocking call:
//! - [`core`]: the event loop that drives a future to completion or abort
//! - [`future`]: connect, read and write futures over a socket handle
//! - [`poller`]: epoll/kqueue wrappers with a cross-thread wakeup
//! - [`timer`]: deferred callbacks fired by the loop

pub(crate) mod core;
pub(crate) mod future;
pub(crate) mod poller;
pub(crate) mod timer;
