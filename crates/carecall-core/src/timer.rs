//! One-second call timers: the ring countdown and the call duration clock.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

const TICK: Duration = Duration::from_secs(1);

fn ticker() -> Interval {
    let mut interval = interval_at(Instant::now() + TICK, TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    interval
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingTick {
    Remaining(u32),
    Expired,
}

/// Countdown for an unanswered outgoing call.
#[derive(Debug)]
pub struct RingTimer {
    interval: Interval,
    remaining: u32,
}

impl RingTimer {
    pub fn start(secs: u32) -> Self {
        Self {
            interval: ticker(),
            remaining: secs,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub async fn tick(&mut self) -> RingTick {
        self.interval.tick().await;
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            RingTick::Expired
        } else {
            RingTick::Remaining(self.remaining)
        }
    }
}

/// Elapsed time since the call connected.
#[derive(Debug)]
pub struct DurationTimer {
    interval: Interval,
    elapsed: u64,
}

impl DurationTimer {
    pub fn start() -> Self {
        Self {
            interval: ticker(),
            elapsed: 0,
        }
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub async fn tick(&mut self) -> u64 {
        self.interval.tick().await;
        self.elapsed += 1;
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ring_timer_expires_after_its_budget() {
        let started = Instant::now();
        let mut timer = RingTimer::start(3);
        assert_eq!(timer.remaining(), 3);
        assert_eq!(timer.tick().await, RingTick::Remaining(2));
        assert_eq!(timer.remaining(), 2);
        assert_eq!(timer.tick().await, RingTick::Remaining(1));
        assert_eq!(timer.tick().await, RingTick::Expired);
        assert_eq!(timer.remaining(), 0);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn duration_counts_whole_seconds() {
        let mut clock = DurationTimer::start();
        assert_eq!(clock.elapsed(), 0);
        clock.tick().await;
        assert_eq!(clock.tick().await, 2);
    }
}
