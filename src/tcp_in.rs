//! Virtual TCP Reception (RX Path)
//!
//! Entry point for incoming segments. Listening sockets demultiplex to their
//! children here; everything else goes straight to the control path. The
//! acknowledgement and data handlers used by the control path also live here.

use std::net::SocketAddrV4;

use log::{trace, warn};

use crate::components::rod::seq_gt;
use crate::control_path::ControlPath;
use crate::error::Result;
use crate::host::{HostContext, RetransmitRequest, TimerEvent};
use crate::state::{Ccb, TcpState};
use crate::tcp_api;
use crate::tcp_proto::SegmentFlags;
use crate::tcp_types::{InputResult, SegmentHeader, SegmentRef};

/// Virtual TCP RX Path
pub struct TcpRx;

impl TcpRx {
    /// Process an incoming segment
    ///
    /// This is the main entry point for segment reception. The returned flags
    /// tell the caller what to do next: wake readers or writers, poll
    /// [`crate::tcp_out::TcpTx::produce_outgoing_segment`], or release the connection.
    pub fn process_incoming(
        ccb: &mut Ccb,
        seg: &SegmentRef,
        ctx: &mut HostContext<'_>,
    ) -> Result<InputResult> {
        let (hdr, payload_len) = seg.read(|s| (s.header, s.payload_len()))?;
        trace!(
            "socket {}: rx {:?} seq={} ack={} wnd={} len={} in {}",
            ccb.conn_mgmt.socket_id,
            hdr.flags,
            hdr.seq,
            hdr.ack,
            hdr.window,
            payload_len,
            ccb.conn_mgmt.state
        );

        if ccb.is_listener() && ccb.conn_mgmt.state == TcpState::Listen {
            return Self::demultiplex(ccb, seg, &hdr, payload_len, ctx);
        }
        ControlPath::process(ccb, seg, &hdr, payload_len, ctx)
    }

    // ------------------------------------------------------------------------
    // Demultiplexing
    // ------------------------------------------------------------------------

    /// Route a segment arriving at a listening socket to the child for its
    /// remote endpoint, spawning one for a new handshake
    fn demultiplex(
        ccb: &mut Ccb,
        seg: &SegmentRef,
        hdr: &SegmentHeader,
        payload_len: usize,
        ctx: &mut HostContext<'_>,
    ) -> Result<InputResult> {
        let remote = hdr.src;
        let known = ccb
            .demux
            .as_ref()
            .is_some_and(|demux| demux.locate(&remote).is_some());

        if !known {
            if hdr.flags.contains(SegmentFlags::SYN_CON) && !hdr.flags.contains(SegmentFlags::ACK) {
                tcp_api::create_child_for_handshake(ccb, remote)?;
            } else {
                return ControlPath::process(ccb, seg, hdr, payload_len, ctx);
            }
        }

        let child_result = match ccb.demux.as_mut().and_then(|d| d.child_mut(&remote)) {
            Some(child) => ControlPath::process(child, seg, hdr, payload_len, ctx)?,
            None => return Ok(InputResult::DROPPED),
        };
        Ok(Self::settle_child(ccb, remote, child_result))
    }

    /// Apply a child's input result to the listener's bookkeeping
    ///
    /// Only flags meaningful to the listener are passed up.
    fn settle_child(ccb: &mut Ccb, remote: SocketAddrV4, child_result: InputResult) -> InputResult {
        let mut result = child_result & (InputResult::DROPPED | InputResult::SENDABLE | InputResult::RESET);

        if child_result.contains(InputResult::DESTROY) {
            Self::release_child(ccb, remote);
            return result;
        }

        if child_result.contains(InputResult::PARENT_READABLE) {
            let promoted = ccb.demux.as_mut().is_some_and(|demux| demux.promote(&remote));
            if promoted {
                result |= InputResult::PARENT_READABLE;
            } else {
                warn!(
                    "socket {}: pending connections full, resetting {}",
                    ccb.conn_mgmt.socket_id, remote
                );
                if let Some(child) = ccb.demux.as_mut().and_then(|d| d.child_mut(&remote)) {
                    ControlPath::abort_with_rst(child);
                }
                Self::release_child(ccb, remote);
                result |= InputResult::RESET | InputResult::SENDABLE;
            }
        }
        result
    }

    /// Drop a child, keeping any segments it still had to send
    fn release_child(ccb: &mut Ccb, remote: SocketAddrV4) {
        let Some(mut child) = ccb.demux.as_mut().and_then(|d| d.remove(&remote)) else {
            return;
        };
        trace!(
            "socket {}: releasing child {} for {}",
            ccb.conn_mgmt.socket_id,
            child.conn_mgmt.socket_id,
            remote
        );
        for seg in child.buffer.take_control() {
            ccb.buffer.add_control(seg);
        }
    }

    // ------------------------------------------------------------------------
    // Acknowledgement Processing
    // ------------------------------------------------------------------------

    /// Apply the acknowledgement and window carried by `hdr`
    ///
    /// An acknowledgement that does not advance `snd_una` leaves every
    /// congestion and flow field unchanged.
    pub fn process_ack(ccb: &mut Ccb, hdr: &SegmentHeader) -> Result<InputResult> {
        let mut result = InputResult::empty();
        if !hdr.flags.contains(SegmentFlags::ACK) {
            return Ok(result);
        }

        let acked = ccb.rod.on_ack(hdr.ack);
        if acked > 0 {
            let released = ccb.buffer.clear_retransmit(hdr.ack)?;
            ccb.cong_ctrl.on_new_ack(acked);
            trace!(
                "socket {}: {} acked, {} released, cwnd={}",
                ccb.conn_mgmt.socket_id,
                acked,
                released,
                ccb.cong_ctrl.cwnd
            );
            if !ccb.conn_mgmt.app_closed {
                result |= InputResult::WRITABLE;
            }
        }

        if ccb
            .flow_ctrl
            .on_window_update(hdr.seq, hdr.ack, hdr.window, ccb.cong_ctrl.cwnd)
        {
            result |= InputResult::SENDABLE;
        }
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Data Processing
    // ------------------------------------------------------------------------

    /// Accept, stage, or refuse a data segment that passed the window check
    pub fn process_data(
        ccb: &mut Ccb,
        seg: &SegmentRef,
        hdr: &SegmentHeader,
        ctx: &mut HostContext<'_>,
    ) -> Result<InputResult> {
        let rcv_nxt = ccb.rod.rcv_nxt;

        if seq_gt(hdr.seq, rcv_nxt) {
            // Ahead of a gap: stage it, and ask for the missing segment once
            let first_gap = ccb.buffer.unprocessed_len() == 0;
            if !ccb.buffer.add_receive(hdr.seq, seg.clone())? {
                Self::request_retransmit(ccb, hdr, ctx);
                return Ok(InputResult::DROPPED);
            }
            if first_gap {
                Self::request_retransmit_of(ccb, hdr.src, rcv_nxt, ctx);
            }
            return Ok(InputResult::empty());
        }

        // Anything behind rcv_nxt was turned away by the window check
        debug_assert_eq!(hdr.seq, rcv_nxt);

        if !ccb.buffer.add_read(seg.clone())? {
            Self::request_retransmit(ccb, hdr, ctx);
            return Ok(InputResult::DROPPED);
        }
        ccb.rod.on_data_accepted();

        // Gap fill
        while let Some(staged) = ccb.buffer.remove_unprocessed(ccb.rod.rcv_nxt)? {
            let seq = ccb.rod.rcv_nxt;
            if !ccb.buffer.add_read(staged)? {
                Self::request_retransmit_of(ccb, hdr.src, seq, ctx);
                break;
            }
            ccb.rod.on_data_accepted();
        }

        Self::schedule_delayed_ack(ccb, ctx);
        Ok(InputResult::READABLE)
    }

    // ------------------------------------------------------------------------
    // Scheduler Requests
    // ------------------------------------------------------------------------

    /// Ask the sender of `hdr` to retransmit it
    pub fn request_retransmit(ccb: &Ccb, hdr: &SegmentHeader, ctx: &mut HostContext<'_>) {
        Self::request_retransmit_of(ccb, hdr.src, hdr.seq, ctx);
    }

    fn request_retransmit_of(ccb: &Ccb, sender: SocketAddrV4, seq: u32, ctx: &mut HostContext<'_>) {
        trace!("socket {}: requesting retransmit of seq={} from {}", ccb.conn_mgmt.socket_id, seq, sender);
        ctx.scheduler.request_retransmit(RetransmitRequest {
            requester: ccb.conn_mgmt.local,
            sender,
            seq,
        });
    }

    /// Note that an acknowledgement is owed and arm the timer if it is idle
    pub fn schedule_delayed_ack(ccb: &mut Ccb, ctx: &mut HostContext<'_>) {
        ccb.rod.dack_requested = true;
        if !ccb.rod.dack_scheduled {
            ccb.rod.dack_scheduled = true;
            ctx.scheduler.schedule_timer(
                ccb.config.delayed_ack_millis,
                TimerEvent::DelayedAck(ccb.conn_mgmt.socket_id),
            );
        }
    }

    /// Hand the half-close notice to the scheduler once the peer's stream has
    /// been fully received
    pub fn check_half_close(ccb: &mut Ccb, ctx: &mut HostContext<'_>) -> InputResult {
        if ccb.conn_mgmt.half_close_scheduled || !ccb.rod.peer_stream_complete() {
            return InputResult::empty();
        }
        ccb.conn_mgmt.half_close_scheduled = true;
        ctx.scheduler.schedule_half_close(ccb.conn_mgmt.socket_id);
        InputResult::READABLE
    }
}
