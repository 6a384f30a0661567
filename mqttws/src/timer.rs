//! Session timers and the receipt clock.

use std::time::{Duration, SystemTime};

use tokio::time::Instant;

/// Source of wall-clock timestamps for received messages.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;
}

/// [`Clock`] backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    ConnAck,
    Connect,
    KeepAlive,
    Reconnect,
}

/// Deadlines owned by the session task. `None` means disarmed.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Timers {
    pub connect: Option<Instant>,
    pub connack: Option<Instant>,
    pub keepalive: Option<Instant>,
    pub reconnect: Option<Instant>,
}

impl Timers {
    /// Disarm the timers that belong to a connection attempt or session.
    pub fn cancel_session(&mut self) {
        self.connect = None;
        self.connack = None;
        self.keepalive = None;
    }

    /// Disarm everything, including a pending reconnect.
    pub fn cancel_all(&mut self) {
        self.cancel_session();
        self.reconnect = None;
    }

    /// Earliest armed deadline. Ties go to the attempt timers first.
    pub fn next(&self) -> Option<(Instant, TimerKind)> {
        [
            (self.connack, TimerKind::ConnAck),
            (self.connect, TimerKind::Connect),
            (self.keepalive, TimerKind::KeepAlive),
            (self.reconnect, TimerKind::Reconnect),
        ]
        .into_iter()
        .filter_map(|(deadline, kind)| deadline.map(|d| (d, kind)))
        .fold(None, |earliest: Option<(Instant, TimerKind)>, (d, kind)| {
            match earliest {
                Some((e, _)) if e <= d => earliest,
                _ => Some((d, kind)),
            }
        })
    }
}

/// Roughly 30 years, the same horizon tokio uses for "never".
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Deadline `after` from now, saturating at a far-future instant.
pub(crate) fn deadline(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
