use std::time::{Duration, Instant};

/// A countdown timer. Each owner keeps its own; there is no shared clock state.
///
/// A timer that was never armed counts as expired.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Timer {
        Timer::default()
    }

    /// A timer already armed for `duration`.
    pub fn started(duration: Duration) -> Timer {
        let mut timer = Timer::new();
        timer.reset(duration);
        timer
    }

    /// Re-arms the timer so it expires `duration` from now.
    pub fn reset(&mut self, duration: Duration) {
        self.deadline = Some(Instant::now() + duration);
    }

    /// Time until expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::from_secs(0),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Duration::from_secs(0)
    }
}

/// Time left until `deadline`, where `None` means no deadline at all.
pub(crate) fn time_until(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
}
