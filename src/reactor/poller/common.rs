use std::time::Duration;

/// Token reserved for the cross-thread wakeup source.
pub(crate) const WAKE_TOKEN: usize = usize::MAX;

/// Readiness a registration is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    pub(crate) const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };
}

/// One readiness notification, already decoded from the OS representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Event {
    pub(crate) token: usize,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    /// Hang-up or error condition. Only logged; any event on a token wakes
    /// its registration and the future retries its syscall.
    pub(crate) closed: bool,
}

/// Converts a wait timeout to whole milliseconds, rounding up so a short
/// timer deadline never turns into a busy loop.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(duration) => duration
            .as_nanos()
            .div_ceil(1_000_000)
            .min(i32::MAX as u128) as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_round_up_to_milliseconds() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_millis(250))), 250);
        assert_eq!(timeout_millis(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }
}
