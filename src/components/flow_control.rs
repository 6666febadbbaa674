//! Flow Control Component
//!
//! Manages the peer's advertised window, the derived send window and our own
//! receive window. All windows are counted in segments.

use crate::components::rod::{seq_geq, seq_gt};
use crate::tcp_proto::MIN_WINDOW;

/// Flow Control State
///
/// Only FC event handlers can write to this state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControlState {
    /* Peer's Receive Window */
    pub last_adv_wnd: u32, // Window the remote peer advertised last
    pub snd_wnd: u32,      // Usable send window, min(last_adv_wnd, cwnd)
    pub snd_wl1: u32,      // Sequence of the last segment that updated the window
    pub snd_wl2: u32,      // Acknowledgement of that segment

    /* Our Receive Window */
    pub rcv_wnd: u32,
}

impl FlowControlState {
    pub fn new() -> Self {
        Self {
            last_adv_wnd: MIN_WINDOW,
            snd_wnd: MIN_WINDOW,
            snd_wl1: 0,
            snd_wl2: 0,
            rcv_wnd: MIN_WINDOW,
        }
    }

    // ------------------------------------------------------------------------
    // Connection Setup (Handshake)
    // ------------------------------------------------------------------------

    /// Peer's SYN carries its first advertisement; take it unconditionally
    pub fn on_syn(&mut self, seq: u32, ack: u32, window: u32, cwnd: u32) {
        self.last_adv_wnd = window;
        self.snd_wl1 = seq;
        self.snd_wl2 = ack;
        self.refresh_send_window(cwnd);
    }

    // ------------------------------------------------------------------------
    // Data Transfer
    // ------------------------------------------------------------------------

    /// Apply the window carried by an acknowledging segment
    ///
    /// The advertisement is only taken if `(seq, ack)` is not older than the
    /// pair that last updated the window. Returns true if the send window grew.
    pub fn on_window_update(&mut self, seq: u32, ack: u32, window: u32, cwnd: u32) -> bool {
        let fresher = seq_gt(seq, self.snd_wl1) || (seq == self.snd_wl1 && seq_geq(ack, self.snd_wl2));
        if fresher {
            self.last_adv_wnd = window;
            self.snd_wl1 = seq;
            self.snd_wl2 = ack;
        }
        self.refresh_send_window(cwnd)
    }

    /// Recompute `snd_wnd` from the latest advertisement and congestion window.
    /// Returns true if it grew.
    pub fn refresh_send_window(&mut self, cwnd: u32) -> bool {
        let next = self.last_adv_wnd.min(cwnd).max(MIN_WINDOW);
        let grew = next > self.snd_wnd;
        self.snd_wnd = next;
        grew
    }

    /// Recompute the window we advertise from free receive buffer space
    pub fn update_receive_window(&mut self, rx_space: usize, mss: usize) -> u32 {
        let segments = rx_space / mss.max(1);
        self.rcv_wnd = u32::try_from(segments).unwrap_or(u32::MAX).max(MIN_WINDOW);
        self.rcv_wnd
    }
}

impl Default for FlowControlState {
    fn default() -> Self {
        Self::new()
    }
}
