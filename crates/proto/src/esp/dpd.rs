//! Dead peer detection and keepalive scheduling
//!
//! Decides, from elapsed time since the last traffic in each direction,
//! which maintenance action the session loop should take next.
//!
//! # Algorithm
//!
//! Checks run in fixed priority order; the first due action wins:
//!
//! 1. **Rekey**: rekey interval elapsed since the last rekey
//! 2. **Dead peer**: nothing received for twice the DPD interval
//! 3. **DPD probe**: nothing received for one DPD interval (back-off:
//!    once a probe is outstanding, the next is due one interval after it)
//! 4. **Keepalive**: nothing sent for one keepalive interval
//!
//! Every check that is not yet due lowers the caller's timeout hint to
//! the time remaining, so the session loop wakes exactly when the next
//! action falls due.
//!
//! # Example Flow
//!
//! ```text
//! Time:   0s       30s       60s       90s
//!         |---------|---------|---------|
//!         rx        DPD       DPD       Dead
//!         traffic   probe     probe     peer
//!
//! Config: dpd interval = 30s, dead threshold = 2 * 30s
//! ```

use std::time::{Duration, Instant};

use super::config::EspConfig;

/// Maintenance action the session loop should take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// Nothing due
    None,
    /// Rekey interval elapsed
    Rekey,
    /// Peer silent for twice the DPD interval
    DpdDead,
    /// Peer silent for one DPD interval, probe it
    Dpd,
    /// Send direction idle for one keepalive interval
    Keepalive,
}

/// Direction-stamped activity times driving the keepalive checks
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveTimes {
    /// Last successful receive
    pub last_rx: Instant,
    /// Last successful send
    pub last_tx: Instant,
    /// Last DPD probe sent from this state machine
    pub last_dpd: Instant,
    /// Last completed rekey
    pub last_rekey: Instant,
}

impl KeepaliveTimes {
    /// Start all clocks at `now`
    pub fn new(now: Instant) -> Self {
        KeepaliveTimes {
            last_rx: now,
            last_tx: now,
            last_dpd: now,
            last_rekey: now,
        }
    }

    /// Compute the next due action and lower `timeout` to the nearest
    /// pending deadline
    ///
    /// Returning [`KeepaliveAction::Dpd`] records the probe as sent, so
    /// the follow-up probe is scheduled one DPD interval later rather
    /// than immediately.
    pub fn next_action(
        &mut self,
        config: &EspConfig,
        now: Instant,
        timeout: &mut Duration,
    ) -> KeepaliveAction {
        if let Some(rekey) = config.rekey_interval {
            if check_deadline(timeout, now, self.last_rekey + rekey) {
                return KeepaliveAction::Rekey;
            }
        }

        let dpd = config.dpd_interval();
        if check_deadline(timeout, now, self.last_rx + dpd * 2) {
            return KeepaliveAction::DpdDead;
        }

        // Once a probe is outstanding, pace follow-ups from the probe
        // itself rather than from the silent receive clock
        let mut dpd_due = self.last_rx + dpd;
        if self.last_dpd > self.last_rx {
            dpd_due = self.last_dpd + dpd;
        }
        if check_deadline(timeout, now, dpd_due) {
            self.last_dpd = now;
            return KeepaliveAction::Dpd;
        }

        if let Some(keepalive) = config.keepalive_interval {
            if check_deadline(timeout, now, self.last_tx + keepalive) {
                return KeepaliveAction::Keepalive;
            }
        }

        KeepaliveAction::None
    }
}

/// True when `due` has arrived; otherwise lowers `timeout` to the time
/// remaining
fn check_deadline(timeout: &mut Duration, now: Instant, due: Instant) -> bool {
    if now >= due {
        return true;
    }
    let remaining = due - now;
    if *timeout > remaining {
        *timeout = remaining;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_dpd(dpd: Duration) -> EspConfig {
        EspConfig::builder()
            .with_attempt_period(dpd)
            .build()
            .unwrap()
    }

    const HOUR: Duration = Duration::from_secs(3600);

    // --- Deadline arithmetic ---

    #[test]
    fn test_check_deadline_due_leaves_timeout_alone() {
        let now = Instant::now();
        let mut timeout = HOUR;
        assert!(check_deadline(&mut timeout, now, now));
        assert_eq!(timeout, HOUR);
    }

    #[test]
    fn test_check_deadline_lowers_timeout_to_remaining() {
        let now = Instant::now();
        let mut timeout = HOUR;
        assert!(!check_deadline(&mut timeout, now, now + Duration::from_millis(250)));
        assert_eq!(timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_check_deadline_keeps_smaller_timeout() {
        let now = Instant::now();
        let mut timeout = Duration::from_millis(10);
        assert!(!check_deadline(&mut timeout, now, now + Duration::from_millis(250)));
        assert_eq!(timeout, Duration::from_millis(10));
    }

    // --- Action priority ---

    #[test]
    fn test_no_action_when_traffic_is_recent() {
        let config = config_with_dpd(Duration::from_millis(100));
        let now = Instant::now();
        let mut times = KeepaliveTimes::new(now);
        let mut timeout = HOUR;

        assert_eq!(times.next_action(&config, now, &mut timeout), KeepaliveAction::None);
        // Timeout hint points at the next DPD deadline
        assert_eq!(timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_dpd_probe_after_one_silent_interval() {
        let config = config_with_dpd(Duration::from_millis(100));
        let now = Instant::now();
        let mut times = KeepaliveTimes::new(now);
        let mut timeout = HOUR;

        let later = now + Duration::from_millis(100);
        assert_eq!(
            times.next_action(&config, later, &mut timeout),
            KeepaliveAction::Dpd
        );
        assert_eq!(times.last_dpd, later);
    }

    #[test]
    fn test_dpd_probe_backs_off_until_next_interval() {
        let config = config_with_dpd(Duration::from_millis(100));
        let now = Instant::now();
        let mut times = KeepaliveTimes::new(now);
        let mut timeout = HOUR;

        let first = now + Duration::from_millis(100);
        assert_eq!(times.next_action(&config, first, &mut timeout), KeepaliveAction::Dpd);

        // A moment later the probe is still outstanding, nothing due
        // even though last_rx + dpd has long elapsed
        let soon = first + Duration::from_millis(10);
        let mut timeout = HOUR;
        assert_eq!(times.next_action(&config, soon, &mut timeout), KeepaliveAction::None);
        assert_eq!(timeout, Duration::from_millis(90));

        // The peer answers the probe, then goes silent again; the next
        // probe fires one interval after the reply, well before the
        // dead threshold
        times.last_rx = first + Duration::from_millis(20);
        let second = times.last_rx + Duration::from_millis(100);
        let mut timeout = HOUR;
        assert_eq!(times.next_action(&config, second, &mut timeout), KeepaliveAction::Dpd);
        assert_eq!(times.last_dpd, second);
    }

    #[test]
    fn test_dead_peer_after_two_silent_intervals() {
        let config = config_with_dpd(Duration::from_millis(100));
        let now = Instant::now();
        let mut times = KeepaliveTimes::new(now);
        let mut timeout = HOUR;

        let later = now + Duration::from_millis(200);
        assert_eq!(
            times.next_action(&config, later, &mut timeout),
            KeepaliveAction::DpdDead
        );
    }

    #[test]
    fn test_receive_traffic_resets_dpd_clock() {
        let config = config_with_dpd(Duration::from_millis(100));
        let now = Instant::now();
        let mut times = KeepaliveTimes::new(now);
        let mut timeout = HOUR;

        let first = now + Duration::from_millis(100);
        assert_eq!(times.next_action(&config, first, &mut timeout), KeepaliveAction::Dpd);

        // Fresh receive supersedes the outstanding probe
        times.last_rx = first + Duration::from_millis(10);
        let mut timeout = HOUR;
        assert_eq!(
            times.next_action(&config, times.last_rx, &mut timeout),
            KeepaliveAction::None
        );
        assert_eq!(timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_rekey_takes_priority_over_dpd() {
        let config = EspConfig::builder()
            .with_attempt_period(Duration::from_millis(100))
            .with_rekey_interval(Duration::from_millis(50))
            .build()
            .unwrap();
        let now = Instant::now();
        let mut times = KeepaliveTimes::new(now);
        let mut timeout = HOUR;

        let later = now + Duration::from_millis(300);
        assert_eq!(
            times.next_action(&config, later, &mut timeout),
            KeepaliveAction::Rekey
        );
    }

    #[test]
    fn test_keepalive_when_send_side_idle() {
        let config = EspConfig::builder()
            .with_attempt_period(Duration::from_millis(200))
            .with_keepalive_interval(Duration::from_millis(50))
            .build()
            .unwrap();
        let now = Instant::now();
        let mut times = KeepaliveTimes::new(now);
        let mut timeout = HOUR;

        // Receive side stays fresh, send side goes idle
        let later = now + Duration::from_millis(60);
        times.last_rx = later;
        assert_eq!(
            times.next_action(&config, later, &mut timeout),
            KeepaliveAction::Keepalive
        );
    }

    #[test]
    fn test_fallback_interval_drives_dpd() {
        let config = EspConfig::builder()
            .with_attempt_period(Duration::from_secs(30))
            .with_fallback_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        let now = Instant::now();
        let mut times = KeepaliveTimes::new(now);
        let mut timeout = HOUR;

        let later = now + Duration::from_millis(100);
        assert_eq!(
            times.next_action(&config, later, &mut timeout),
            KeepaliveAction::Dpd
        );
    }
}
