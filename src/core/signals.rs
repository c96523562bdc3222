//! # Global activity signals.
//!
//! [`Signals`] answers "is this a good time for background work?". It combines
//! three inputs:
//! - an explicit *busy* flag raised by the application during heavy foreground work,
//! - an *idle* flag maintained by the UI layer,
//! - sleep detection: the wall clock jumping forward between two checks means
//!   the machine was suspended.
//!
//! ## Sleep detection
//! ```text
//! check(now):
//!   inside grace window ─────────────► keep verdict
//!   first check ─────────────────────► just_woke = false
//!   now - last > sleep_threshold ────► just_woke = true, window = now + wake_grace
//!   otherwise ───────────────────────► just_woke = false
//!   last = now
//! ```
//! The wall clock is used on purpose: monotonic clocks may stop while suspended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::info;

use super::Config;

#[derive(Debug, Default)]
struct SleepState {
    last_check: Option<SystemTime>,
    awake_until: Option<SystemTime>,
    just_woke: bool,
}

/// Busy/idle flags and sleep detection shared by the controller and its daemons.
#[derive(Debug)]
pub struct Signals {
    sleep: Mutex<SleepState>,
    threshold: Duration,
    grace: Duration,
    busy: AtomicBool,
    idle: AtomicBool,
}

impl Signals {
    /// Creates signals with the configured sleep threshold and wake grace.
    pub fn new(cfg: &Config) -> Self {
        Self {
            sleep: Mutex::new(SleepState::default()),
            threshold: cfg.sleep_threshold,
            grace: cfg.wake_grace,
            busy: AtomicBool::new(false),
            idle: AtomicBool::new(false),
        }
    }

    /// Checks for a suspend/resume using the current wall clock.
    pub fn sleep_check(&self) -> bool {
        self.sleep_check_at(SystemTime::now())
    }

    /// Checks for a suspend/resume as of `now`; returns the resulting verdict.
    pub fn sleep_check_at(&self, now: SystemTime) -> bool {
        let mut state = self.sleep.lock();
        let in_grace = state.awake_until.is_some_and(|until| now <= until);
        if !in_grace {
            state.just_woke = match state.last_check {
                None => false,
                Some(last) => {
                    let gap = now.duration_since(last).unwrap_or(Duration::ZERO);
                    gap > self.threshold
                }
            };
            if state.just_woke {
                state.awake_until = Some(now + self.grace);
                info!(grace = ?self.grace, "machine woke from sleep; deferring background work");
            }
        }
        state.last_check = Some(now);
        state.just_woke
    }

    /// True within the grace window after a detected wake. Checks first.
    pub fn just_woke_from_sleep(&self) -> bool {
        self.sleep_check()
    }

    /// True if the application flagged heavy foreground work.
    pub fn system_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Raises or clears the busy flag.
    pub fn set_system_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// True if the UI reported the user idle.
    pub fn currently_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    /// Records whether the user is idle.
    pub fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::SeqCst);
    }

    /// False right after a wake or while the system is busy.
    pub fn good_time_to_do_background_work(&self) -> bool {
        !self.just_woke_from_sleep() && !self.system_busy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> Signals {
        Signals::new(&Config::default())
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + secs)
    }

    #[test]
    fn first_check_never_reports_wake() {
        let s = signals();
        assert!(!s.sleep_check_at(at(0)));
        assert!(!s.sleep_check_at(at(60)));
    }

    #[test]
    fn long_gap_opens_grace_window() {
        let s = signals();
        s.sleep_check_at(at(0));
        assert!(s.sleep_check_at(at(601)));
        assert!(s.sleep_check_at(at(700)));
        assert!(s.sleep_check_at(at(601 + 180)));
        assert!(!s.sleep_check_at(at(601 + 181)));
    }

    #[test]
    fn gap_at_threshold_is_not_sleep() {
        let s = signals();
        s.sleep_check_at(at(0));
        assert!(!s.sleep_check_at(at(600)));
    }

    #[test]
    fn clock_going_backwards_is_not_sleep() {
        let s = signals();
        s.sleep_check_at(at(1000));
        assert!(!s.sleep_check_at(at(10)));
    }

    #[test]
    fn busy_blocks_background_work() {
        let s = signals();
        assert!(s.good_time_to_do_background_work());
        s.set_system_busy(true);
        assert!(!s.good_time_to_do_background_work());
        s.set_system_busy(false);
        s.set_idle(true);
        assert!(s.currently_idle());
        assert!(s.good_time_to_do_background_work());
    }
}
