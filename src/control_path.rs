//! Virtual TCP Control Path
//!
//! Handles connection setup, teardown, and state transitions.
//! This is the ONLY component allowed to write to all state; the RX and TX
//! paths only act on the components it hands them.
//!
//! Processing order for one segment:
//! 1. RST short-circuits everything ([`ControlPath::handle_rst`])
//! 2. Dispatch on the current state
//! 3. Return the accumulated [`InputResult`]

use log::{debug, warn};

use crate::autotune;
use crate::components::rod::seq_gt;
use crate::error::Result;
use crate::host::HostContext;
use crate::state::{Ccb, OpenKind, ReliableOrderedDeliveryState, TcpState};
use crate::tcp_in::TcpRx;
use crate::tcp_out::TcpTx;
use crate::tcp_proto::SegmentFlags;
use crate::tcp_types::{InputResult, SegmentHeader, SegmentRef};

/// Control Path: per-state input handling
///
/// - Passive open: CLOSED -> LISTEN -> SYN_RCVD -> ESTABLISHED
/// - Active open: CLOSED -> SYN_SENT -> ESTABLISHED
/// - Simultaneous open: CLOSED -> SYN_SENT -> SYN_RCVD -> ESTABLISHED
/// - Close: ESTABLISHED/CLOSE_WAIT -> CLOSING -> (released)
pub struct ControlPath;

impl ControlPath {
    /// Process one incoming segment on a single (non-demultiplexed) connection
    pub fn process(
        ccb: &mut Ccb,
        seg: &SegmentRef,
        hdr: &SegmentHeader,
        payload_len: usize,
        ctx: &mut HostContext<'_>,
    ) -> Result<InputResult> {
        if hdr.flags.contains(SegmentFlags::RST) {
            return Ok(Self::handle_rst(ccb));
        }

        match ccb.conn_mgmt.state {
            TcpState::Closed => Ok(Self::input_closed(ccb, hdr)),
            TcpState::Listen => Ok(Self::input_listen(ccb, hdr)),
            TcpState::SynSent => Ok(Self::input_synsent(ccb, hdr, ctx)),
            TcpState::SynRcvd { .. }
            | TcpState::Established
            | TcpState::CloseWait
            | TcpState::Closing => Self::input_synchronized(ccb, seg, hdr, payload_len, ctx),
        }
    }

    // ========================================================================
    // Reset Handling
    // ========================================================================

    /// Incoming RST. The resulting state is always CLOSED, or LISTEN for a
    /// connection that was opened passively and never confirmed.
    pub fn handle_rst(ccb: &mut Ccb) -> InputResult {
        let child = ccb.conn_mgmt.is_child();
        match ccb.conn_mgmt.state {
            TcpState::SynRcvd {
                origin: OpenKind::Passive,
            } => {
                debug!("socket {}: reset during passive open", ccb.conn_mgmt.socket_id);
                ccb.conn_mgmt.on_rst_in_passive_synrcvd();
                ccb.rod = ReliableOrderedDeliveryState::new();
                ccb.buffer.take_control();
                if child {
                    InputResult::RESET | InputResult::DESTROY
                } else {
                    InputResult::RESET
                }
            }
            TcpState::SynRcvd {
                origin: OpenKind::Active,
            } => {
                ccb.conn_mgmt.on_rst();
                InputResult::RESET | InputResult::DESTROY
            }
            TcpState::Closing => {
                ccb.conn_mgmt.on_abort();
                InputResult::DESTROY
            }
            TcpState::Listen if !child => {
                // A listening socket has no connection to reset
                InputResult::DROPPED
            }
            _ => {
                debug!("socket {}: connection reset by peer", ccb.conn_mgmt.socket_id);
                ccb.conn_mgmt.on_rst();
                InputResult::RESET | InputResult::DESTROY | InputResult::READABLE | InputResult::WRITABLE
            }
        }
    }

    // ========================================================================
    // CLOSED
    // ========================================================================

    fn input_closed(ccb: &mut Ccb, hdr: &SegmentHeader) -> InputResult {
        TcpTx::queue_rst(ccb, hdr.dst, hdr.src);
        InputResult::DROPPED
    }

    // ========================================================================
    // LISTEN
    // ========================================================================

    fn input_listen(ccb: &mut Ccb, hdr: &SegmentHeader) -> InputResult {
        if hdr.flags.contains(SegmentFlags::SYN_CON) && !hdr.flags.contains(SegmentFlags::ACK) {
            Self::on_syn_in_listen(ccb, hdr);
            return InputResult::SENDABLE;
        }

        warn!(
            "socket {}: unexpected {:?} from {} in LISTEN",
            ccb.conn_mgmt.socket_id, hdr.flags, hdr.src
        );
        TcpTx::queue_rst(ccb, hdr.dst, hdr.src);
        if ccb.conn_mgmt.is_child() {
            ccb.conn_mgmt.on_abort();
            InputResult::DROPPED | InputResult::DESTROY
        } else {
            InputResult::DROPPED
        }
    }

    /// LISTEN → SYN_RCVD
    fn on_syn_in_listen(ccb: &mut Ccb, hdr: &SegmentHeader) {
        // Only fails outside LISTEN, which the caller already checked
        if ccb.conn_mgmt.on_syn_in_listen(hdr.src).is_err() {
            return;
        }
        ccb.rod.on_syn_in_listen(ccb.config.initial_sequence, hdr.seq);
        ccb.buffer.set_send_origin(ccb.rod.iss);
        ccb.flow_ctrl.on_syn(hdr.seq, hdr.ack, hdr.window, ccb.cong_ctrl.cwnd);
        ccb.refresh_receive_window();
        TcpTx::queue_synack(ccb);
    }

    // ========================================================================
    // SYN_SENT
    // ========================================================================

    fn input_synsent(ccb: &mut Ccb, hdr: &SegmentHeader, ctx: &mut HostContext<'_>) -> InputResult {
        let has_ack = hdr.flags.contains(SegmentFlags::ACK);

        if has_ack && !ccb.rod.is_acceptable_handshake_ack(hdr.ack) {
            warn!(
                "socket {}: handshake ack {} outside [{}, {}]",
                ccb.conn_mgmt.socket_id, hdr.ack, ccb.rod.iss, ccb.rod.snd_nxt
            );
            TcpTx::queue_rst(ccb, hdr.dst, hdr.src);
            return InputResult::DROPPED;
        }

        if !hdr.flags.contains(SegmentFlags::SYN_CON) {
            return InputResult::DROPPED;
        }

        if has_ack {
            // SYN_SENT → ESTABLISHED
            if ccb.conn_mgmt.on_synack_in_synsent().is_err() {
                return InputResult::DROPPED;
            }
            ccb.rod.on_synack_in_synsent(hdr.seq, hdr.ack);
            ccb.flow_ctrl.on_syn(hdr.seq, hdr.ack, hdr.window, ccb.cong_ctrl.cwnd);
            autotune::autotune(ccb, ctx.topology);
            TcpTx::queue_ack(ccb, SegmentFlags::ACK_CON);
            InputResult::WRITABLE | InputResult::SENDABLE
        } else {
            // SYN_SENT → SYN_RCVD (simultaneous open)
            if ccb.conn_mgmt.on_syn_in_synsent().is_err() {
                return InputResult::DROPPED;
            }
            ccb.rod.on_syn_in_synsent(hdr.seq);
            ccb.flow_ctrl.on_syn(hdr.seq, hdr.ack, hdr.window, ccb.cong_ctrl.cwnd);
            TcpTx::queue_synack(ccb);
            InputResult::SENDABLE
        }
    }

    // ========================================================================
    // SYN_RCVD / ESTABLISHED / CLOSE_WAIT / CLOSING
    // ========================================================================

    fn input_synchronized(
        ccb: &mut Ccb,
        seg: &SegmentRef,
        hdr: &SegmentHeader,
        payload_len: usize,
        ctx: &mut HostContext<'_>,
    ) -> Result<InputResult> {
        // The peer's final sequence is recorded wherever it falls
        if hdr.flags.contains(SegmentFlags::FIN) {
            return Ok(Self::on_fin(ccb, hdr, ctx));
        }

        if !ccb.rod.in_receive_window(hdr.seq, ccb.flow_ctrl.rcv_wnd) {
            let ahead = seq_gt(hdr.seq, ccb.rod.rcv_nxt);
            if ahead || payload_len > 0 {
                TcpRx::request_retransmit(ccb, hdr, ctx);
                if !ahead {
                    // Duplicate: our acknowledgement was lost
                    TcpRx::schedule_delayed_ack(ccb, ctx);
                }
                return Ok(InputResult::DROPPED);
            }
        }

        if hdr.flags.contains(SegmentFlags::SYN) {
            if Self::confirms_simultaneous_open(ccb, hdr) {
                return Ok(Self::complete_handshake(ccb, hdr, ctx));
            }
            return Ok(Self::on_illegal_syn(ccb, hdr));
        }

        if matches!(ccb.conn_mgmt.state, TcpState::SynRcvd { .. })
            && hdr.flags.contains(SegmentFlags::ACK_CON)
        {
            return Ok(Self::complete_handshake(ccb, hdr, ctx));
        }

        let mut result = TcpRx::process_ack(ccb, hdr)?;
        if payload_len > 0 {
            result |= TcpRx::process_data(ccb, seg, hdr, ctx)?;
        }
        result |= TcpRx::check_half_close(ccb, ctx);

        if ccb.close_complete() {
            result |= InputResult::DESTROY;
        }
        Ok(result)
    }

    /// In SYN_RCVD after a simultaneous open, the peer's own SYN+ACK+CON is
    /// the confirmation
    fn confirms_simultaneous_open(ccb: &Ccb, hdr: &SegmentHeader) -> bool {
        ccb.conn_mgmt.state
            == TcpState::SynRcvd {
                origin: OpenKind::Active,
            }
            && hdr.flags.contains(SegmentFlags::SYN_ACK_CON)
            && hdr.seq == ccb.rod.rcv_irs
    }

    /// SYN_RCVD → ESTABLISHED
    fn complete_handshake(ccb: &mut Ccb, hdr: &SegmentHeader, ctx: &mut HostContext<'_>) -> InputResult {
        let acked = ccb.rod.on_ack(hdr.ack);
        ccb.cong_ctrl.on_new_ack(acked);
        ccb.flow_ctrl.on_window_update(hdr.seq, hdr.ack, hdr.window, ccb.cong_ctrl.cwnd);

        if ccb.conn_mgmt.on_ack_in_synrcvd().is_err() {
            return InputResult::DROPPED;
        }
        autotune::autotune(ccb, ctx.topology);

        if ccb.conn_mgmt.is_child() {
            // The owning listener decides whether the pending set has room
            InputResult::PARENT_READABLE
        } else {
            InputResult::WRITABLE | InputResult::SENDABLE
        }
    }

    /// SYN in a synchronized state: protocol violation
    fn on_illegal_syn(ccb: &mut Ccb, hdr: &SegmentHeader) -> InputResult {
        warn!(
            "socket {}: SYN from {} in {}, resetting",
            ccb.conn_mgmt.socket_id, hdr.src, ccb.conn_mgmt.state
        );
        Self::abort_with_rst(ccb);
        InputResult::RESET | InputResult::DESTROY
    }

    /// Send a reset to the peer and close
    pub fn abort_with_rst(ccb: &mut Ccb) {
        let (local, remote) = (ccb.conn_mgmt.local, ccb.conn_mgmt.remote);
        TcpTx::queue_rst(ccb, local, remote);
        ccb.conn_mgmt.on_abort();
    }

    /// Peer announced its final sequence
    fn on_fin(ccb: &mut Ccb, hdr: &SegmentHeader, ctx: &mut HostContext<'_>) -> InputResult {
        debug!("socket {}: peer final sequence {}", ccb.conn_mgmt.socket_id, hdr.seq);
        ccb.rod.on_fin(hdr.seq);
        ccb.conn_mgmt.on_fin_in_established();
        TcpRx::check_half_close(ccb, ctx)
    }
}
