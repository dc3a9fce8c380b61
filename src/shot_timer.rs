//! Shot duration tracking from brew-switch edges.
//!
//! A shot is open while `stopped_at < started_at`; a rising edge always
//! starts a new shot, a falling edge only closes one that is open.

use embassy_time::Instant;
use log::debug;

pub struct ShotTimer {
    started_at: Instant,
    stopped_at: Instant,
    last_switch_state: bool,
}

impl ShotTimer {
    pub fn new() -> Self {
        Self {
            started_at: Instant::from_ticks(0),
            stopped_at: Instant::from_ticks(0),
            last_switch_state: false,
        }
    }

    /// Feed the logical brew-switch state, once per poll tick.
    pub fn observe(&mut self, brew_switch_active: bool, now: Instant) {
        if brew_switch_active && !self.last_switch_state {
            self.started_at = now;
            debug!("Shot started");
        }
        if !brew_switch_active && self.last_switch_state && self.is_open() {
            self.stopped_at = now;
            debug!("Shot stopped after {:.1}s", self.elapsed_seconds(now));
        }
        self.last_switch_state = brew_switch_active;
    }

    pub fn is_open(&self) -> bool {
        self.stopped_at < self.started_at
    }

    /// Close an open shot without a switch edge (shot-limit cutoff).
    pub fn force_close(&mut self, now: Instant) {
        if self.is_open() {
            self.stopped_at = now;
        }
    }

    /// Duration of the running shot, or the last closed one.
    pub fn elapsed_seconds(&self, now: Instant) -> f32 {
        if self.is_open() {
            seconds(now, self.started_at)
        } else {
            seconds(self.stopped_at, self.started_at)
        }
    }

    /// Time since the most recent shot start, open or not. The limiter
    /// compares this against the configured limit at 0.1 s resolution.
    pub fn seconds_since_start(&self, now: Instant) -> f32 {
        (seconds(now, self.started_at) * 10.0).round() / 10.0
    }
}

impl Default for ShotTimer {
    fn default() -> Self {
        Self::new()
    }
}

fn seconds(later: Instant, earlier: Instant) -> f32 {
    later.duration_since(earlier).as_millis() as f32 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn test_duration_counts_up_then_freezes() {
        let mut timer = ShotTimer::new();
        timer.observe(false, at(500));
        timer.observe(true, at(1000));
        assert!(timer.is_open());

        assert!((timer.elapsed_seconds(at(3000)) - 2.0).abs() < 1e-3);
        assert!((timer.elapsed_seconds(at(6000)) - 5.0).abs() < 1e-3);

        timer.observe(true, at(8999));
        timer.observe(false, at(9000));
        assert!(!timer.is_open());
        // Frozen at ~8.0s no matter how much later we ask.
        assert!((timer.elapsed_seconds(at(20000)) - 8.0).abs() < 1e-3);
    }

    #[test]
    fn test_rising_edge_starts_new_shot() {
        let mut timer = ShotTimer::new();
        timer.observe(true, at(1000));
        timer.observe(false, at(5000));
        assert!((timer.elapsed_seconds(at(5000)) - 4.0).abs() < 1e-3);

        timer.observe(true, at(10000));
        assert!(timer.is_open());
        assert!((timer.elapsed_seconds(at(11500)) - 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_falling_edge_without_open_shot_is_ignored() {
        let mut timer = ShotTimer::new();
        timer.observe(true, at(1000));
        timer.force_close(at(3000));
        assert!(!timer.is_open());

        // The switch is still held; releasing it must not move stopped_at.
        timer.observe(false, at(7000));
        assert!((timer.elapsed_seconds(at(7000)) - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_seconds_since_start_rounds_to_tenths() {
        let mut timer = ShotTimer::new();
        timer.observe(true, at(1000));
        assert_eq!(timer.seconds_since_start(at(1240)), 0.2);
        assert_eq!(timer.seconds_since_start(at(31060)), 30.1);
    }
}
