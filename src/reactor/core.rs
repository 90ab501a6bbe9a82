use crate::reactor::poller::{Events, Interest, Poller, WAKE_TOKEN};
use crate::reactor::timer::{TimerId, TimerQueue};

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// How a [`EventLoop::block_on`] call ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Completion<T> {
    Done(T),
    Aborted,
}

/// Cross-thread handle that interrupts a blocked [`EventLoop`].
#[derive(Clone)]
pub(crate) struct Notifier {
    poller: Arc<Poller>,
}

impl Notifier {
    pub(crate) fn notify(&self) {
        if let Err(error) = self.poller.notify() {
            warn!(%error, "failed to wake event loop");
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

/// Flag waker for the future driven by `block_on`.
#[derive(Default)]
struct Signal {
    notified: AtomicBool,
}

impl Signal {
    fn take(&self) -> bool {
        self.notified.swap(false, Ordering::AcqRel)
    }
}

impl Wake for Signal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
    }
}

/// Single-threaded reactor that presents one async operation as a blocking call.
///
/// Registrations live only as long as the future that made them; between
/// operations the loop holds nothing but its poller and an empty timer queue.
pub(crate) struct EventLoop {
    poller: Arc<Poller>,
    events: RefCell<Events>,
    registry: RefCell<HashMap<usize, Waker>>,
    timers: RefCell<TimerQueue>,
    ready: RefCell<Vec<Waker>>,
}

impl EventLoop {
    pub(crate) fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poller: Arc::new(Poller::new()?),
            events: RefCell::new(Events::with_capacity(event_capacity)),
            registry: RefCell::new(HashMap::new()),
            timers: RefCell::new(TimerQueue::new()),
            ready: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn notifier(&self) -> Notifier {
        Notifier {
            poller: self.poller.clone(),
        }
    }

    pub(crate) fn register(&self, fd: RawFd, interest: Interest, waker: Waker) -> io::Result<()> {
        self.poller.register(fd, fd as usize, interest)?;
        self.registry.borrow_mut().insert(fd as usize, waker);

        Ok(())
    }

    /// Replaces the waker of an existing registration after a spurious wake.
    pub(crate) fn rearm(&self, fd: RawFd, waker: Waker) {
        self.registry.borrow_mut().insert(fd as usize, waker);
    }

    pub(crate) fn deregister(&self, fd: RawFd) {
        self.registry.borrow_mut().remove(&(fd as usize));

        if let Err(error) = self.poller.deregister(fd) {
            warn!(fd, %error, "failed to deregister descriptor");
        }
    }

    /// Runs `callback` on the loop thread once `delay` has elapsed, provided the
    /// loop is still being driven by then.
    pub(crate) fn schedule<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.timers
            .borrow_mut()
            .register(Instant::now() + delay, Box::new(callback))
    }

    pub(crate) fn cancel_timer(&self, id: TimerId) -> bool {
        self.timers.borrow_mut().cancel(id)
    }

    /// Drives `future` until it completes or `aborted` reports true.
    ///
    /// `aborted` is consulted before every poll and after every wakeup, so a
    /// cancellation observed by another thread is acted on even if the OS never
    /// reports readiness for the registered descriptor.
    pub(crate) fn block_on<F, A>(&self, future: F, aborted: A) -> io::Result<Completion<F::Output>>
    where
        F: Future,
        A: Fn() -> bool,
    {
        let mut future = pin!(future);

        let signal = Arc::new(Signal::default());
        let waker = Waker::from(signal.clone());
        let mut cx = Context::from_waker(&waker);

        let mut poll_future = true;

        loop {
            if aborted() {
                return Ok(Completion::Aborted);
            }

            if poll_future && let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(Completion::Done(output));
            }

            let timeout = self.timers.borrow().next_remaining();
            self.turn(timeout)?;
            self.fire_timers();
            self.wake_ready();

            poll_future = signal.take();
        }
    }

    fn turn(&self, timeout: Option<Duration>) -> io::Result<()> {
        let mut events = self.events.borrow_mut();
        self.poller.wait(&mut events, timeout)?;

        let mut registry = self.registry.borrow_mut();
        let mut ready = self.ready.borrow_mut();

        for event in events.iter() {
            if event.token == WAKE_TOKEN {
                trace!("event loop woken from another thread");
                continue;
            }

            trace!(
                token = event.token,
                readable = event.readable,
                writable = event.writable,
                closed = event.closed,
                "readiness event"
            );

            if let Some(waker) = registry.remove(&event.token) {
                ready.push(waker);
            }
        }

        Ok(())
    }

    fn fire_timers(&self) {
        let expired = self.timers.borrow_mut().take_expired();

        for callback in expired {
            callback();
        }
    }

    fn wake_ready(&self) {
        let wakers: Vec<Waker> = self.ready.borrow_mut().drain(..).collect();

        for waker in wakers {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn ready_future_completes_without_waiting() {
        let event_loop = EventLoop::new(4).expect("event loop");

        let completion = event_loop
            .block_on(future::ready(42), || false)
            .expect("block_on");

        assert_eq!(completion, Completion::Done(42));
    }

    #[test]
    fn abort_predicate_checked_before_first_poll() {
        let event_loop = EventLoop::new(4).expect("event loop");
        let polled = AtomicUsize::new(0);

        let fut = future::poll_fn(|_| {
            polled.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(())
        });
        let completion = event_loop.block_on(fut, || true).expect("block_on");

        assert_eq!(completion, Completion::Aborted);
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scheduled_callback_can_abort_pending_future() {
        let event_loop = EventLoop::new(4).expect("event loop");
        let flag = Arc::new(AtomicBool::new(false));

        let setter = flag.clone();
        event_loop.schedule(Duration::from_millis(20), move || {
            setter.store(true, Ordering::SeqCst);
        });

        let completion = event_loop
            .block_on(future::pending::<()>(), || flag.load(Ordering::SeqCst))
            .expect("block_on");

        assert_eq!(completion, Completion::Aborted);
    }

    #[test]
    fn notifier_wakes_loop_from_another_thread() {
        let event_loop = EventLoop::new(4).expect("event loop");
        let flag = Arc::new(AtomicBool::new(false));

        let notifier = event_loop.notifier();
        let setter = flag.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            setter.store(true, Ordering::SeqCst);
            notifier.notify();
        });

        let completion = event_loop
            .block_on(future::pending::<()>(), || flag.load(Ordering::SeqCst))
            .expect("block_on");

        canceller.join().unwrap();
        assert_eq!(completion, Completion::Aborted);
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let event_loop = EventLoop::new(4).expect("event loop");
        let fired = Arc::new(AtomicBool::new(false));

        let setter = fired.clone();
        let id = event_loop.schedule(Duration::ZERO, move || setter.store(true, Ordering::SeqCst));
        assert!(event_loop.cancel_timer(id));

        event_loop.fire_timers();
        assert!(!fired.load(Ordering::SeqCst));
    }
}
