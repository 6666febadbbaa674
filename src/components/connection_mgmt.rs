//! Connection Management Component
//!
//! This component owns the state machine state and all connection lifecycle data.

use std::net::{Ipv4Addr, SocketAddrV4};

use log::debug;

use crate::error::{Result, TcpError};
use crate::host::SocketId;
use crate::state::{OpenKind, TcpState};

/// Connection Management State
///
/// Identity, current state, and the lifecycle flags that decide how the
/// connection is torn down. Only the control path writes to this state.
pub struct ConnectionManagementState {
    pub socket_id: SocketId,

    /* Connection Identifier (Tuple) */
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,

    /* Lifecycle State */
    pub state: TcpState,
    /// Owning listener, for children spawned by a multiplexer
    pub parent_socket_id: Option<SocketId>,
    /// Set when a peer reset aborted the connection
    pub connection_was_reset: bool,
    /// The application has called close
    pub app_closed: bool,
    /// Buffers have been sized for this connection
    pub autotuned: bool,
    /// The half-close notice has been handed to the scheduler
    pub half_close_scheduled: bool,
}

impl ConnectionManagementState {
    pub fn new(socket_id: SocketId) -> Self {
        Self {
            socket_id,
            local: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            remote: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            state: TcpState::Closed,
            parent_socket_id: None,
            connection_was_reset: false,
            app_closed: false,
            autotuned: false,
            half_close_scheduled: false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.local.port() != 0
    }

    pub fn is_child(&self) -> bool {
        self.parent_socket_id.is_some()
    }

    /// Move to `next`, logging the transition
    pub fn transition(&mut self, next: TcpState) {
        if self.state != next {
            debug!("socket {}: {} -> {}", self.socket_id, self.state, next);
        }
        self.state = next;
    }

    // ------------------------------------------------------------------------
    // Connection Setup (Handshake)
    // ------------------------------------------------------------------------

    /// LISTEN → SYN_RCVD: Handle incoming synchronize + connection-request
    pub fn on_syn_in_listen(&mut self, remote: SocketAddrV4) -> Result<()> {
        if self.state != TcpState::Listen {
            return Err(TcpError::Val("not in LISTEN state"));
        }
        self.remote = remote;
        self.transition(TcpState::SynRcvd {
            origin: OpenKind::Passive,
        });
        Ok(())
    }

    /// SYN_SENT → ESTABLISHED: Handshake reply acknowledged our SYN
    pub fn on_synack_in_synsent(&mut self) -> Result<()> {
        if self.state != TcpState::SynSent {
            return Err(TcpError::Val("not in SYN_SENT state"));
        }
        self.transition(TcpState::Established);
        Ok(())
    }

    /// SYN_SENT → SYN_RCVD: Simultaneous open
    pub fn on_syn_in_synsent(&mut self) -> Result<()> {
        if self.state != TcpState::SynSent {
            return Err(TcpError::Val("not in SYN_SENT state"));
        }
        self.transition(TcpState::SynRcvd {
            origin: OpenKind::Active,
        });
        Ok(())
    }

    /// SYN_RCVD → ESTABLISHED: Handshake confirmed
    pub fn on_ack_in_synrcvd(&mut self) -> Result<()> {
        if !matches!(self.state, TcpState::SynRcvd { .. }) {
            return Err(TcpError::Val("not in SYN_RCVD state"));
        }
        self.transition(TcpState::Established);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Connection Teardown (Close)
    // ------------------------------------------------------------------------

    /// ESTABLISHED → CLOSE_WAIT: Peer announced its final sequence
    pub fn on_fin_in_established(&mut self) {
        if self.state == TcpState::Established {
            self.transition(TcpState::CloseWait);
        }
    }

    /// Application close
    ///
    /// Returns `Ok(true)` if a FIN must be announced (the connection lingers
    /// in CLOSING), `Ok(false)` if it can be released right away.
    pub fn on_close(&mut self) -> Result<bool> {
        if self.app_closed {
            return Err(TcpError::Clsd);
        }
        self.app_closed = true;
        match self.state {
            TcpState::Closed | TcpState::Listen | TcpState::SynSent => {
                self.transition(TcpState::Closed);
                Ok(false)
            }
            TcpState::SynRcvd { .. } | TcpState::Established | TcpState::CloseWait => {
                self.transition(TcpState::Closing);
                Ok(true)
            }
            TcpState::Closing => Ok(false),
        }
    }

    // ------------------------------------------------------------------------
    // Reset Handling
    // ------------------------------------------------------------------------

    /// ANY → CLOSED: Peer reset, terminal
    pub fn on_rst(&mut self) {
        self.connection_was_reset = true;
        self.transition(TcpState::Closed);
    }

    /// SYN_RCVD (passive) → LISTEN: Discard the half-formed connection
    pub fn on_rst_in_passive_synrcvd(&mut self) {
        self.remote = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        self.transition(TcpState::Listen);
    }

    /// ANY → CLOSED: Local abort or protocol violation
    pub fn on_abort(&mut self) {
        self.transition(TcpState::Closed);
    }

    // ------------------------------------------------------------------------
    // API-Initiated State Changes
    // ------------------------------------------------------------------------

    /// CLOSED → CLOSED: Bind to local address/port
    pub fn on_bind(&mut self, local: SocketAddrV4) -> Result<()> {
        if self.state != TcpState::Closed {
            return Err(TcpError::Val("can only bind in CLOSED state"));
        }
        if self.is_bound() {
            return Err(TcpError::Use);
        }
        if local.port() == 0 {
            return Err(TcpError::Val("port 0 is not bindable"));
        }
        self.local = local;
        Ok(())
    }

    /// CLOSED → LISTEN
    pub fn on_listen(&mut self) -> Result<()> {
        if self.state != TcpState::Closed {
            return Err(TcpError::Val("can only listen from CLOSED state"));
        }
        if !self.is_bound() {
            return Err(TcpError::Val("must bind before listening"));
        }
        self.transition(TcpState::Listen);
        Ok(())
    }

    /// CLOSED → SYN_SENT
    pub fn on_connect(&mut self, remote: SocketAddrV4) -> Result<()> {
        match self.state {
            TcpState::Closed => {}
            TcpState::SynSent | TcpState::SynRcvd { .. } => return Err(TcpError::Already),
            TcpState::Listen => return Err(TcpError::Val("socket is listening")),
            _ => return Err(TcpError::IsConn),
        }
        if self.connection_was_reset || self.app_closed {
            return Err(TcpError::Clsd);
        }
        if !self.is_bound() {
            return Err(TcpError::Val("must bind before connecting"));
        }
        self.remote = remote;
        self.transition(TcpState::SynSent);
        Ok(())
    }
}
