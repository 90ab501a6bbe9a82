use super::common::{Event, Interest, WAKE_TOKEN, timeout_millis};
use super::cvt;

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLLERR, EPOLLHUP,
    EPOLLIN, EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event, epoll_wait, eventfd,
};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

/// Buffer of raw `epoll_event`s filled by [`EpollPoller::wait`].
pub(crate) struct Events {
    list: Vec<epoll_event>,
}

impl Events {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Vec::with_capacity(capacity.max(1)),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.list.iter().map(|raw| {
            // Copy out of the (possibly packed) struct before testing bits.
            let bits = raw.events;
            let token = raw.u64 as usize;

            Event {
                token,
                readable: bits & (EPOLLIN as u32) != 0,
                writable: bits & (EPOLLOUT as u32) != 0,
                closed: bits & ((EPOLLHUP | EPOLLERR | EPOLLRDHUP) as u32) != 0,
            }
        })
    }
}

pub(crate) struct EpollPoller {
    epoll: OwnedFd,
    wake: OwnedFd,
}

impl EpollPoller {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = cvt(unsafe { epoll_create1(EPOLL_CLOEXEC) })?;
        let epoll = unsafe { OwnedFd::from_raw_fd(epoll) };

        let wake = cvt(unsafe { eventfd(0, EFD_CLOEXEC | EFD_NONBLOCK) })?;
        let wake = unsafe { OwnedFd::from_raw_fd(wake) };

        let poller = Self { epoll, wake };
        poller.control(
            EPOLL_CTL_ADD,
            poller.wake.as_raw_fd(),
            WAKE_TOKEN,
            EPOLLIN as u32,
        )?;

        Ok(poller)
    }

    fn control(&self, op: libc::c_int, fd: RawFd, token: usize, flags: u32) -> io::Result<()> {
        let mut event = epoll_event {
            events: flags,
            u64: token as u64,
        };

        cvt(unsafe { epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) })?;

        Ok(())
    }

    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        // Level-triggered; hang-up and error are always reported. RDHUP stays
        // asserted after a peer half-close, so only readers ask for it.
        let mut flags = 0;

        if interest.read {
            flags |= (EPOLLIN | EPOLLRDHUP) as u32;
        }

        if interest.write {
            flags |= EPOLLOUT as u32;
        }

        self.control(EPOLL_CTL_ADD, fd, token, flags)
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        cvt(unsafe { epoll_ctl(self.epoll.as_raw_fd(), EPOLL_CTL_DEL, fd, ptr::null_mut()) })?;

        Ok(())
    }

    /// Blocks until at least one event arrives or `timeout` elapses.
    ///
    /// A signal interrupting the wait yields an empty batch rather than an
    /// error. Pending wakeups are drained before returning.
    pub(crate) fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        events.list.clear();

        let count = unsafe {
            epoll_wait(
                self.epoll.as_raw_fd(),
                events.list.as_mut_ptr(),
                events.list.capacity() as libc::c_int,
                timeout_millis(timeout),
            )
        };

        if count < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }

            return Err(error);
        }

        unsafe { events.list.set_len(count as usize) };

        if events.iter().any(|event| event.token == WAKE_TOKEN) {
            self.drain_wake();
        }

        Ok(())
    }

    /// Interrupts a concurrent or future [`wait`](Self::wait). Safe from any thread.
    pub(crate) fn notify(&self) -> io::Result<()> {
        let one: u64 = 1;
        let written = unsafe {
            libc::write(
                self.wake.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };

        if written < 0 {
            let error = io::Error::last_os_error();
            // Counter saturated: a wakeup is already pending.
            if error.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }

            return Err(error);
        }

        Ok(())
    }

    fn drain_wake(&self) {
        let mut counter: u64 = 0;

        unsafe {
            libc::read(
                self.wake.as_raw_fd(),
                &mut counter as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}
