use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    InitSelecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
    RenewRequested,
    Released,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerMode {
    /// No IP yet: talk over the raw link-layer socket.
    Raw,
    /// Interface is configured: the kernel UDP stack can deliver unicast.
    Kernel,
    /// No packets expected; keep no socket open.
    None,
}

impl State {
    pub fn listener_mode(self) -> ListenerMode {
        match self {
            State::InitSelecting | State::Requesting => ListenerMode::Raw,
            State::Renewing | State::Rebinding | State::RenewRequested => ListenerMode::Kernel,
            State::Bound | State::Released => ListenerMode::None,
        }
    }
}

/// Wait intervals for DISCOVER/REQUEST attempts 0, 1, 2. A timeout past the
/// last entry exhausts the schedule.
pub const RETRY_INTERVALS: [Duration; 3] =
    [Duration::from_secs(2), Duration::from_secs(2), Duration::from_secs(10)];

/// Sleep applied before restarting a fully exhausted retry schedule with a
/// fresh transaction id.
pub const RETRY_COOLDOWN: Duration = Duration::from_secs(60);

pub fn t1(lease: Duration) -> Duration {
    lease / 2
}

pub fn t2(lease: Duration) -> Duration {
    lease * 7 / 8
}

/// Retry wait while Renewing/Rebinding: halves the time remaining until
/// `target` (T2, or lease expiry while rebinding) instead of a fresh
/// exponential backoff.
pub fn halve_remaining(remaining: Duration) -> Duration {
    remaining / 2
}

/// Counts DISCOVER/REQUEST attempts through `RETRY_INTERVALS`; exhaustion
/// resets it back to zero for the caller to act on.
#[derive(Default)]
pub struct RetrySchedule {
    attempt: usize,
}

impl RetrySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(&self) -> u8 {
        self.attempt as u8
    }

    /// Interval to wait after the current attempt's send, or `None` once
    /// all `RETRY_INTERVALS` entries have been used.
    pub fn interval(&mut self) -> Option<Duration> {
        let interval = RETRY_INTERVALS.get(self.attempt).copied();
        self.attempt += 1;
        interval
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
