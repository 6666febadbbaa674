//! Congestion Control Component
//!
//! Manages the congestion window, counted in segments, and the slow start
//! threshold. The window only moves on two events: new acknowledgements and
//! retransmission timeouts.

use log::trace;

/// Congestion Control State
///
/// Only CC event handlers can write to this state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongestionControlState {
    /// Congestion window, in segments. Never below 1.
    pub cwnd: u32,
    /// Slow start threshold; 0 means not yet known
    pub threshold: u32,
    pub slow_start: bool,
}

impl CongestionControlState {
    pub fn new(initial_window: u32) -> Self {
        Self {
            cwnd: initial_window.max(1),
            threshold: 0,
            slow_start: true,
        }
    }

    // ------------------------------------------------------------------------
    // Data Transfer
    // ------------------------------------------------------------------------

    /// `acked` previously unacknowledged segments were acknowledged
    ///
    /// Slow start grows by one segment per acknowledged segment. Avoidance
    /// grows by `acked² / cwnd`, roughly one segment per round trip, and never
    /// by more than `acked`.
    pub fn on_new_ack(&mut self, acked: u32) {
        if acked == 0 {
            return;
        }

        if self.slow_start {
            self.cwnd = self.cwnd.saturating_add(acked);
            if self.threshold != 0 && self.cwnd >= self.threshold {
                trace!("cwnd {} reached threshold {}, leaving slow start", self.cwnd, self.threshold);
                self.slow_start = false;
            }
        } else {
            let n = u64::from(acked);
            let increase = ((n * n) / u64::from(self.cwnd.max(1))).min(n);
            self.cwnd = self.cwnd.saturating_add(increase as u32);
        }
    }

    // ------------------------------------------------------------------------
    // Loss Recovery
    // ------------------------------------------------------------------------

    /// A retransmission was requested for one of our segments
    pub fn on_timeout(&mut self) {
        self.cwnd = (self.cwnd / 2).max(1);
        if self.slow_start && self.threshold == 0 {
            self.threshold = self.cwnd;
        }
        trace!("timeout: cwnd {} threshold {}", self.cwnd, self.threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_start_growth() {
        let mut cc = CongestionControlState::new(10);
        cc.on_new_ack(3);
        assert_eq!(cc.cwnd, 13);
        assert!(cc.slow_start);
    }

    #[test]
    fn test_timeout_halves_and_sets_threshold_once() {
        let mut cc = CongestionControlState::new(10);
        cc.on_timeout();
        assert_eq!(cc.cwnd, 5);
        assert_eq!(cc.threshold, 5);

        cc.on_timeout();
        assert_eq!(cc.cwnd, 2);
        assert_eq!(cc.threshold, 5);
    }

    #[test]
    fn test_window_floor_is_one() {
        let mut cc = CongestionControlState::new(1);
        cc.on_timeout();
        cc.on_timeout();
        assert_eq!(cc.cwnd, 1);
    }

    #[test]
    fn test_slow_start_exits_at_threshold() {
        let mut cc = CongestionControlState::new(8);
        cc.on_timeout(); // cwnd 4, threshold 4
        cc.on_new_ack(1); // cwnd 5 >= 4
        assert!(!cc.slow_start);
        assert_eq!(cc.cwnd, 5);
    }

    #[test]
    fn test_avoidance_increase_is_bounded() {
        let mut cc = CongestionControlState {
            cwnd: 10,
            threshold: 5,
            slow_start: false,
        };
        cc.on_new_ack(5); // 25 / 10 = 2
        assert_eq!(cc.cwnd, 12);
        cc.on_new_ack(1); // 1 / 12 = 0
        assert_eq!(cc.cwnd, 12);

        let mut small = CongestionControlState {
            cwnd: 2,
            threshold: 2,
            slow_start: false,
        };
        small.on_new_ack(6); // 36 / 2 = 18, capped at 6
        assert_eq!(small.cwnd, 8);
    }

    #[test]
    fn test_zero_ack_is_noop() {
        let mut cc = CongestionControlState::new(10);
        let before = cc.clone();
        cc.on_new_ack(0);
        assert_eq!(cc, before);
    }
}
