//! Connection Control Block
//!
//! This module provides the complete per-connection state by aggregating
//! the five disjoint state components from the components module.

use std::fmt;

pub use crate::components::{
    CongestionControlState, ConnectionManagementState, DemuxState, FlowControlState,
    ReliableOrderedDeliveryState,
};
use crate::config::TcpConfig;
use crate::host::SocketId;
use crate::vbuffer::VBuffer;

/// How a connection reached SYN_RCVD
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenKind {
    /// From LISTEN: a peer's SYN arrived first
    Passive,
    /// From SYN_SENT: simultaneous open
    Active,
}

/// Virtual TCP State Machine States
///
/// There is no TIME_WAIT: a closing connection is released as soon as
/// everything it sent has been acknowledged.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynRcvd { origin: OpenKind },
    Established,
    CloseWait,
    Closing,
}

impl TcpState {
    /// States that have exchanged initial sequence numbers
    pub fn is_synchronized(&self) -> bool {
        matches!(
            self,
            TcpState::SynRcvd { .. } | TcpState::Established | TcpState::CloseWait | TcpState::Closing
        )
    }

    /// States in which data segments may be emitted
    pub fn can_send_data(&self) -> bool {
        matches!(self, TcpState::Established | TcpState::CloseWait | TcpState::Closing)
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TcpState::Closed => "CLOSED",
            TcpState::Listen => "LISTEN",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynRcvd { origin: OpenKind::Passive } => "SYN_RCVD(passive)",
            TcpState::SynRcvd { origin: OpenKind::Active } => "SYN_RCVD(active)",
            TcpState::Established => "ESTABLISHED",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::Closing => "CLOSING",
        };
        f.write_str(name)
    }
}

/// Connection control block
///
/// Aggregates all five state components plus the connection's buffers.
/// This structure enforces the separation of concerns.
pub struct Ccb {
    pub conn_mgmt: ConnectionManagementState,
    pub rod: ReliableOrderedDeliveryState,
    pub flow_ctrl: FlowControlState,
    pub cong_ctrl: CongestionControlState,
    /// Present only on listening sockets
    pub demux: Option<DemuxState>,

    pub buffer: VBuffer,
    pub config: TcpConfig,
}

impl Ccb {
    pub fn new(config: TcpConfig) -> Self {
        let mut ccb = Self {
            conn_mgmt: ConnectionManagementState::new(SocketId::next()),
            rod: ReliableOrderedDeliveryState::new(),
            flow_ctrl: FlowControlState::new(),
            cong_ctrl: CongestionControlState::new(config.initial_congestion_window),
            demux: None,
            buffer: VBuffer::new(config.default_receive_buffer, config.default_send_buffer),
            config,
        };
        ccb.refresh_receive_window();
        ccb
    }

    pub fn socket_id(&self) -> SocketId {
        self.conn_mgmt.socket_id
    }

    pub fn state(&self) -> TcpState {
        self.conn_mgmt.state
    }

    pub fn is_listener(&self) -> bool {
        self.demux.is_some()
    }

    /// Recompute the advertised receive window from free buffer space
    pub fn refresh_receive_window(&mut self) -> u32 {
        self.flow_ctrl
            .update_receive_window(self.buffer.rx_space_available(), self.config.mss)
    }

    /// A closing connection may be released: everything it queued has been
    /// acknowledged and nothing is left to emit.
    pub fn close_complete(&self) -> bool {
        self.conn_mgmt.state == TcpState::Closing
            && self.rod.all_acked()
            && !self.rod.fin_pending
            && self.buffer.is_empty_control_queue()
    }
}

impl fmt::Debug for Ccb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ccb")
            .field("socket_id", &self.conn_mgmt.socket_id)
            .field("local", &self.conn_mgmt.local)
            .field("remote", &self.conn_mgmt.remote)
            .field("state", &self.conn_mgmt.state)
            .field("rod", &self.rod)
            .field("flow_ctrl", &self.flow_ctrl)
            .field("cong_ctrl", &self.cong_ctrl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ccb_defaults() {
        let ccb = Ccb::new(TcpConfig::default());
        assert_eq!(ccb.state(), TcpState::Closed);
        assert_eq!(ccb.cong_ctrl.cwnd, 10);
        assert!(ccb.cong_ctrl.slow_start);
        // 131072 / 1460
        assert_eq!(ccb.flow_ctrl.rcv_wnd, 89);
        assert!(!ccb.is_listener());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TcpState::SynSent.to_string(), "SYN_SENT");
        assert_eq!(
            TcpState::SynRcvd { origin: OpenKind::Active }.to_string(),
            "SYN_RCVD(active)"
        );
    }

    #[test]
    fn test_synchronized_states() {
        assert!(!TcpState::Listen.is_synchronized());
        assert!(TcpState::SynRcvd { origin: OpenKind::Passive }.is_synchronized());
        assert!(TcpState::Closing.is_synchronized());
        assert!(!TcpState::SynRcvd { origin: OpenKind::Passive }.can_send_data());
    }
}
