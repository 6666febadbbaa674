//! Reliable Ordered Delivery Component
//!
//! Handles segment sequence numbers, acknowledgements and the delayed-ACK bits.
//! Every data segment and every SYN consumes exactly one sequence number;
//! pure ACK, RST and FIN segments consume none.

/// Sequence number comparison with wraparound
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[inline]
pub fn seq_leq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[inline]
pub fn seq_geq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

/// Reliable Ordered Delivery State
///
/// Only ROD event handlers can write to this state.
/// `snd_una <= snd_nxt <= snd_end` holds after every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliableOrderedDeliveryState {
    /* Send Sequence Space */
    pub iss: u32,     // Our initial send sequence number
    pub snd_una: u32, // Oldest unacknowledged sequence number
    pub snd_nxt: u32, // Next sequence number to send for the first time
    pub snd_end: u32, // Next sequence number to assign to queued data

    /* Receive Sequence Space */
    pub rcv_irs: u32,          // Peer's initial sequence number
    pub rcv_nxt: u32,          // Next sequence number expected from peer
    pub rcv_end: Option<u32>,  // Peer's final sequence, once announced

    /* Delayed Acknowledgement */
    pub dack_requested: bool, // An acknowledgement is owed to the peer
    pub dack_scheduled: bool, // The delayed-ACK timer is armed

    /// Our FIN has been requested but not yet emitted
    pub fin_pending: bool,
}

impl ReliableOrderedDeliveryState {
    pub fn new() -> Self {
        Self {
            iss: 0,
            snd_una: 0,
            snd_nxt: 0,
            snd_end: 0,
            rcv_irs: 0,
            rcv_nxt: 0,
            rcv_end: None,
            dack_requested: false,
            dack_scheduled: false,
            fin_pending: false,
        }
    }

    /// Segments sent but not yet acknowledged
    pub fn in_flight(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    // ------------------------------------------------------------------------
    // Connection Setup (Handshake)
    // ------------------------------------------------------------------------

    /// Our SYN consumes `iss`
    fn init_send_space(&mut self, iss: u32) {
        self.iss = iss;
        self.snd_una = iss;
        self.snd_nxt = iss.wrapping_add(1);
        self.snd_end = self.snd_nxt;
    }

    fn init_receive_space(&mut self, peer_seq: u32) {
        self.rcv_irs = peer_seq;
        self.rcv_nxt = peer_seq.wrapping_add(1);
    }

    /// CLOSED → SYN_SENT
    pub fn on_connect(&mut self, iss: u32) {
        self.init_send_space(iss);
    }

    /// LISTEN → SYN_RCVD
    pub fn on_syn_in_listen(&mut self, iss: u32, peer_seq: u32) {
        self.init_receive_space(peer_seq);
        self.init_send_space(iss);
    }

    /// SYN_SENT → SYN_RCVD: Simultaneous open keeps our send space
    pub fn on_syn_in_synsent(&mut self, peer_seq: u32) {
        self.init_receive_space(peer_seq);
    }

    /// SYN_SENT → ESTABLISHED
    pub fn on_synack_in_synsent(&mut self, peer_seq: u32, ack: u32) {
        self.init_receive_space(peer_seq);
        self.snd_una = ack;
    }

    /// Is `ack` inside `[iss, snd_nxt]`?
    pub fn is_acceptable_handshake_ack(&self, ack: u32) -> bool {
        seq_geq(ack, self.iss) && seq_leq(ack, self.snd_nxt)
    }

    // ------------------------------------------------------------------------
    // Data Transfer
    // ------------------------------------------------------------------------

    /// Cumulative acknowledgement. Returns the number of newly acknowledged
    /// segments; stale and future acknowledgements return 0 and change nothing.
    pub fn on_ack(&mut self, ack: u32) -> u32 {
        if seq_gt(ack, self.snd_una) && seq_leq(ack, self.snd_nxt) {
            let acked = ack.wrapping_sub(self.snd_una);
            self.snd_una = ack;
            acked
        } else {
            0
        }
    }

    /// Assign the next sequence number to newly queued data
    pub fn next_data_seq(&mut self) -> u32 {
        let seq = self.snd_end;
        self.snd_end = self.snd_end.wrapping_add(1);
        seq
    }

    /// A data segment with `seq` went out on the wire
    pub fn on_data_sent(&mut self, seq: u32) {
        let next = seq.wrapping_add(1);
        if seq_gt(next, self.snd_nxt) {
            self.snd_nxt = next;
        }
        self.dack_requested = false;
    }

    /// An in-order segment was accepted
    pub fn on_data_accepted(&mut self) {
        self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        self.dack_requested = true;
    }

    /// Is `seq` inside `[rcv_nxt, rcv_nxt + rcv_wnd)`?
    pub fn in_receive_window(&self, seq: u32, rcv_wnd: u32) -> bool {
        seq_geq(seq, self.rcv_nxt) && seq_lt(seq, self.rcv_nxt.wrapping_add(rcv_wnd))
    }

    // ------------------------------------------------------------------------
    // Connection Teardown (Close)
    // ------------------------------------------------------------------------

    /// Peer announced its final sequence. The first announcement wins.
    pub fn on_fin(&mut self, seq: u32) {
        if self.rcv_end.is_none() {
            self.rcv_end = Some(seq);
        }
    }

    /// Every segment up to the peer's final sequence has been received
    pub fn peer_stream_complete(&self) -> bool {
        matches!(self.rcv_end, Some(end) if seq_geq(self.rcv_nxt, end))
    }

    /// Everything we queued has been acknowledged
    pub fn all_acked(&self) -> bool {
        self.snd_una == self.snd_end
    }
}

impl Default for ReliableOrderedDeliveryState {
    fn default() -> Self {
        Self::new()
    }
}
