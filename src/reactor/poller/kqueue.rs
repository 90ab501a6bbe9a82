use super::common::{Event, Interest, WAKE_TOKEN};
use super::cvt;

use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_USER,
    EVFILT_WRITE, NOTE_TRIGGER, kevent, kqueue,
};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

/// Buffer of raw `kevent`s filled by [`KqueuePoller::wait`].
pub(crate) struct Events {
    list: Vec<kevent>,
}

// `kevent::udata` is a raw pointer, but only ever holds a token.
unsafe impl Send for Events {}

impl Events {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Vec::with_capacity(capacity.max(1)),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.list.iter().map(|raw| {
            let token = if raw.filter == EVFILT_USER {
                WAKE_TOKEN
            } else {
                raw.udata as usize
            };

            Event {
                token,
                readable: raw.filter == EVFILT_READ,
                writable: raw.filter == EVFILT_WRITE,
                closed: raw.flags & (EV_EOF | EV_ERROR) != 0,
            }
        })
    }
}

fn change(ident: usize, filter: i16, flags: u16, token: usize) -> kevent {
    let mut event: kevent = unsafe { std::mem::zeroed() };
    event.ident = ident;
    event.filter = filter;
    event.flags = flags;
    event.udata = token as *mut _;

    event
}

pub(crate) struct KqueuePoller {
    kqueue: OwnedFd,
}

const WAKE_IDENT: usize = 1;

impl KqueuePoller {
    pub(crate) fn new() -> io::Result<Self> {
        let queue = cvt(unsafe { kqueue() })?;
        let poller = Self {
            kqueue: unsafe { OwnedFd::from_raw_fd(queue) },
        };

        let wake = change(WAKE_IDENT, EVFILT_USER, EV_ADD | EV_ENABLE | EV_CLEAR, WAKE_TOKEN);
        poller.submit(&[wake])?;

        Ok(poller)
    }

    fn submit(&self, changes: &[kevent]) -> io::Result<()> {
        cvt(unsafe {
            kevent(
                self.kqueue.as_raw_fd(),
                changes.as_ptr(),
                changes.len() as i32,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        })?;

        Ok(())
    }

    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);

        if interest.read {
            changes.push(change(fd as usize, EVFILT_READ, EV_ADD | EV_ENABLE, token));
        }

        if interest.write {
            changes.push(change(fd as usize, EVFILT_WRITE, EV_ADD | EV_ENABLE, token));
        }

        self.submit(&changes)
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        for filter in [EVFILT_READ, EVFILT_WRITE] {
            match self.submit(&[change(fd as usize, filter, EV_DELETE, 0)]) {
                Ok(()) => {}
                // The filter was never added for this descriptor.
                Err(error) if error.raw_os_error() == Some(libc::ENOENT) => {}
                Err(error) => return Err(error),
            }
        }

        Ok(())
    }

    pub(crate) fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        events.list.clear();

        let spec = timeout.map(|duration| libc::timespec {
            tv_sec: duration.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: duration.subsec_nanos() as _,
        });
        let spec_ptr = spec
            .as_ref()
            .map_or(ptr::null(), |spec| spec as *const libc::timespec);

        let count = unsafe {
            kevent(
                self.kqueue.as_raw_fd(),
                ptr::null(),
                0,
                events.list.as_mut_ptr(),
                events.list.capacity() as i32,
                spec_ptr,
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

        Ok(())
    }

    pub(crate) fn notify(&self) -> io::Result<()> {
        let mut trigger = change(WAKE_IDENT, EVFILT_USER, 0, WAKE_TOKEN);
        trigger.fflags = NOTE_TRIGGER;

        self.submit(&[trigger])
    }
}
