//! Virtual TCP Transmission (TX Path)
//!
//! Builds control and data segments, and hands them to the simulator one wire
//! opportunity at a time. Acknowledgement number and advertised window are
//! stamped at emission, so a segment that waited in a queue always carries
//! current values.

use std::net::SocketAddrV4;

use log::trace;

use crate::components::rod::seq_lt;
use crate::error::{Result, TcpError};
use crate::state::{Ccb, TcpState};
use crate::tcp_proto::SegmentFlags;
use crate::tcp_types::{InputResult, Segment, SegmentRef};

/// Virtual TCP TX Path
pub struct TcpTx;

impl TcpTx {
    // ------------------------------------------------------------------------
    // Control Segments
    // ------------------------------------------------------------------------

    fn control_segment(src: SocketAddrV4, dst: SocketAddrV4, flags: SegmentFlags, seq: u32) -> SegmentRef {
        SegmentRef::new(Segment::new(src, dst, flags, seq, 0, 0, Vec::new()))
    }

    /// Queue a control segment to the connection's peer
    pub fn queue_control(ccb: &mut Ccb, flags: SegmentFlags, seq: u32) {
        let seg = Self::control_segment(ccb.conn_mgmt.local, ccb.conn_mgmt.remote, flags, seq);
        ccb.buffer.add_control(seg);
    }

    /// SYN + CON carrying our initial sequence number
    pub fn queue_syn(ccb: &mut Ccb) {
        let iss = ccb.rod.iss;
        Self::queue_control(ccb, SegmentFlags::SYN_CON, iss);
    }

    /// SYN + ACK + CON carrying our initial sequence number
    pub fn queue_synack(ccb: &mut Ccb) {
        let iss = ccb.rod.iss;
        Self::queue_control(ccb, SegmentFlags::SYN_ACK_CON, iss);
    }

    /// Bare acknowledgement; `flags` is `ACK` or `ACK_CON`
    pub fn queue_ack(ccb: &mut Ccb, flags: SegmentFlags) {
        let seq = ccb.rod.snd_nxt;
        Self::queue_control(ccb, flags, seq);
    }

    /// Reset addressed to `dst`, which need not be the connection's peer
    pub fn queue_rst(ccb: &mut Ccb, src: SocketAddrV4, dst: SocketAddrV4) {
        let seq = ccb.rod.snd_nxt;
        ccb.buffer.add_control(Self::control_segment(src, dst, SegmentFlags::RST, seq));
    }

    // ------------------------------------------------------------------------
    // Data Segments
    // ------------------------------------------------------------------------

    /// Queue `payload` as one data segment. Returns its sequence number.
    pub fn queue_data(ccb: &mut Ccb, payload: Vec<u8>) -> Result<u32> {
        if payload.len() > ccb.buffer.tx_space_available() {
            return Err(TcpError::Mem);
        }
        let seq = ccb.rod.next_data_seq();
        let seg = SegmentRef::new(Segment::new(
            ccb.conn_mgmt.local,
            ccb.conn_mgmt.remote,
            SegmentFlags::ACK,
            seq,
            0,
            0,
            payload,
        ));
        ccb.buffer.add_send(seq, seg)?;
        Ok(seq)
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    /// Fill in the fields that are only known at emission time
    fn stamp(ccb: &mut Ccb, seg: &SegmentRef, is_control: bool) -> Result<()> {
        let rcv_wnd = ccb.refresh_receive_window();
        let rcv_nxt = ccb.rod.rcv_nxt;
        let snd_nxt = ccb.rod.snd_nxt;
        let has_ack = seg.write(|s| {
            let flags = s.header.flags;
            s.header.window = rcv_wnd;
            if flags.contains(SegmentFlags::ACK) {
                s.header.ack = rcv_nxt;
            }
            if is_control && !flags.intersects(SegmentFlags::SYN | SegmentFlags::FIN) {
                s.header.seq = snd_nxt;
            }
            flags.contains(SegmentFlags::ACK)
        })?;
        if has_ack {
            ccb.rod.dack_requested = false;
        }
        Ok(())
    }

    /// Produce the next segment for the wire, if any
    ///
    /// Queued control segments go first. Data follows, bounded by
    /// `snd_una + snd_wnd`. A FIN is emitted once every queued data segment has
    /// been sent at least once. A listening socket emits its own control
    /// segments, then those of its children.
    ///
    /// Callers check [`Ccb::close_complete`] after each emission.
    pub fn produce_outgoing_segment(ccb: &mut Ccb) -> Result<Option<SegmentRef>> {
        if let Some(seg) = ccb.buffer.pop_control() {
            Self::stamp(ccb, &seg, true)?;
            trace!("socket {}: emit control {:?}", ccb.conn_mgmt.socket_id, seg.header()?.flags);
            return Ok(Some(seg));
        }

        if let Some(demux) = ccb.demux.as_mut() {
            for child in demux.children_mut() {
                if let Some(seg) = Self::produce_outgoing_segment(child)? {
                    return Ok(Some(seg));
                }
            }
            return Ok(None);
        }

        let state = ccb.conn_mgmt.state;
        if state.can_send_data() {
            let window_end = ccb.rod.snd_una.wrapping_add(ccb.flow_ctrl.snd_wnd);
            if let Some(key) = ccb.buffer.first_send_key().filter(|k| seq_lt(*k, window_end)) {
                if let Some(seg) = ccb.buffer.remove_send(key) {
                    Self::stamp(ccb, &seg, false)?;
                    ccb.buffer.add_retransmit(key, seg.clone());
                    ccb.rod.on_data_sent(key);
                    trace!("socket {}: emit data seq={}", ccb.conn_mgmt.socket_id, key);
                    return Ok(Some(seg));
                }
            }
        }

        if state == TcpState::Closing && ccb.rod.fin_pending && ccb.buffer.send_is_empty() {
            ccb.rod.fin_pending = false;
            let fin = Self::control_segment(
                ccb.conn_mgmt.local,
                ccb.conn_mgmt.remote,
                SegmentFlags::FIN,
                ccb.rod.snd_end,
            );
            Self::stamp(ccb, &fin, true)?;
            trace!("socket {}: emit FIN seq={}", ccb.conn_mgmt.socket_id, ccb.rod.snd_end);
            return Ok(Some(fin));
        }

        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Timer & Retransmission Callbacks
    // ------------------------------------------------------------------------

    /// The delayed-ACK timer armed for this connection fired
    ///
    /// Queues a bare acknowledgement if one is still owed. Returns true if
    /// output is now pending.
    pub fn on_delayed_ack_timer_fired(ccb: &mut Ccb) -> bool {
        ccb.rod.dack_scheduled = false;
        if !ccb.rod.dack_requested || !ccb.conn_mgmt.state.is_synchronized() {
            return false;
        }
        Self::queue_ack(ccb, SegmentFlags::ACK);
        true
    }

    /// The peer asked for segment `seq` again
    ///
    /// Moves it back to the send queue and treats the loss as a congestion
    /// timeout. Keys that are no longer tracked are ignored.
    pub fn on_retransmit_requested(ccb: &mut Ccb, seq: u32) -> InputResult {
        if !ccb.buffer.requeue_retransmit(seq) {
            trace!("socket {}: ignoring retransmit of untracked seq={}", ccb.conn_mgmt.socket_id, seq);
            return InputResult::empty();
        }
        ccb.cong_ctrl.on_timeout();
        ccb.flow_ctrl.refresh_send_window(ccb.cong_ctrl.cwnd);
        trace!(
            "socket {}: retransmit seq={} cwnd={}",
            ccb.conn_mgmt.socket_id,
            seq,
            ccb.cong_ctrl.cwnd
        );
        InputResult::SENDABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcpConfig;
    use std::net::Ipv4Addr;

    fn established() -> Ccb {
        let mut ccb = Ccb::new(TcpConfig::default().without_autotune());
        ccb.conn_mgmt.local = SocketAddrV4::new(Ipv4Addr::new(11, 0, 0, 1), 1000);
        ccb.conn_mgmt.remote = SocketAddrV4::new(Ipv4Addr::new(11, 0, 0, 2), 2000);
        ccb.conn_mgmt.state = TcpState::Established;
        ccb.rod.on_connect(1);
        ccb.rod.on_synack_in_synsent(50, 2);
        ccb.flow_ctrl.on_syn(50, 2, 2, ccb.cong_ctrl.cwnd);
        ccb
    }

    #[test]
    fn test_control_before_data() {
        let mut ccb = established();
        TcpTx::queue_data(&mut ccb, b"x".to_vec()).unwrap();
        TcpTx::queue_ack(&mut ccb, SegmentFlags::ACK);

        let first = TcpTx::produce_outgoing_segment(&mut ccb).unwrap().unwrap();
        assert_eq!(first.payload_len().unwrap(), 0);
        let second = TcpTx::produce_outgoing_segment(&mut ccb).unwrap().unwrap();
        assert_eq!(second.header().unwrap().seq, 2);
    }

    #[test]
    fn test_data_bounded_by_send_window() {
        let mut ccb = established();
        for _ in 0..3 {
            TcpTx::queue_data(&mut ccb, b"abc".to_vec()).unwrap();
        }
        // snd_wnd = min(2, 10)
        assert!(TcpTx::produce_outgoing_segment(&mut ccb).unwrap().is_some());
        assert!(TcpTx::produce_outgoing_segment(&mut ccb).unwrap().is_some());
        assert!(TcpTx::produce_outgoing_segment(&mut ccb).unwrap().is_none());
        assert_eq!(ccb.rod.snd_nxt, 4);
        assert_eq!(ccb.buffer.retransmit_len(), 2);
    }

    #[test]
    fn test_stamp_sets_ack_and_window() {
        let mut ccb = established();
        TcpTx::queue_data(&mut ccb, b"abc".to_vec()).unwrap();
        ccb.rod.dack_requested = true;
        let seg = TcpTx::produce_outgoing_segment(&mut ccb).unwrap().unwrap();
        let hdr = seg.header().unwrap();
        assert_eq!(hdr.ack, 51);
        assert_eq!(hdr.window, ccb.flow_ctrl.rcv_wnd);
        assert!(!ccb.rod.dack_requested);
    }

    #[test]
    fn test_queue_data_rejects_when_full() {
        let mut ccb = Ccb::new(TcpConfig::default().with_buffers(10, 4));
        ccb.conn_mgmt.state = TcpState::Established;
        let before = ccb.rod.snd_end;
        assert_eq!(TcpTx::queue_data(&mut ccb, b"hello".to_vec()), Err(TcpError::Mem));
        assert_eq!(ccb.rod.snd_end, before);
    }

    #[test]
    fn test_retransmit_request_requeues_and_halves_cwnd() {
        let mut ccb = established();
        TcpTx::queue_data(&mut ccb, b"abc".to_vec()).unwrap();
        TcpTx::produce_outgoing_segment(&mut ccb).unwrap();

        assert_eq!(TcpTx::on_retransmit_requested(&mut ccb, 2), InputResult::SENDABLE);
        assert_eq!(ccb.cong_ctrl.cwnd, 5);
        assert_eq!(ccb.buffer.first_send_key(), Some(2));

        assert_eq!(TcpTx::on_retransmit_requested(&mut ccb, 2), InputResult::empty());
        assert_eq!(TcpTx::on_retransmit_requested(&mut ccb, 99), InputResult::empty());
        assert_eq!(ccb.cong_ctrl.cwnd, 5);

        let again = TcpTx::produce_outgoing_segment(&mut ccb).unwrap().unwrap();
        assert_eq!(again.header().unwrap().seq, 2);
        assert_eq!(ccb.rod.snd_nxt, 3);
    }

    #[test]
    fn test_delayed_ack_timer() {
        let mut ccb = established();
        ccb.rod.dack_scheduled = true;
        assert!(!TcpTx::on_delayed_ack_timer_fired(&mut ccb));
        assert!(!ccb.rod.dack_scheduled);

        ccb.rod.dack_requested = true;
        ccb.rod.dack_scheduled = true;
        assert!(TcpTx::on_delayed_ack_timer_fired(&mut ccb));
        let ack = TcpTx::produce_outgoing_segment(&mut ccb).unwrap().unwrap();
        assert_eq!(ack.header().unwrap().flags, SegmentFlags::ACK);
        assert!(!ccb.rod.dack_requested);
        assert!(!ccb.rod.dack_scheduled);
    }

    #[test]
    fn test_fin_waits_for_queued_data() {
        let mut ccb = established();
        TcpTx::queue_data(&mut ccb, b"abc".to_vec()).unwrap();
        ccb.conn_mgmt.state = TcpState::Closing;
        ccb.rod.fin_pending = true;

        let data = TcpTx::produce_outgoing_segment(&mut ccb).unwrap().unwrap();
        assert!(data.header().unwrap().flags.contains(SegmentFlags::ACK));
        let fin = TcpTx::produce_outgoing_segment(&mut ccb).unwrap().unwrap();
        assert_eq!(fin.header().unwrap().flags, SegmentFlags::FIN);
        assert_eq!(fin.header().unwrap().seq, 3);
        assert!(!ccb.close_complete());

        ccb.rod.on_ack(3);
        assert!(ccb.close_complete());
    }
}
