//! Virtual TCP API Functions
//!
//! Application-facing operations (bind, listen, connect, send, recv, close,
//! abort, accept) and the listener's child management. None of them block:
//! anything that would wait returns [`TcpError::WouldBlock`] and the caller
//! retries after the matching readiness flag.

use std::net::SocketAddrV4;

use log::{debug, trace};

use crate::control_path::ControlPath;
use crate::error::{Result, TcpError};
use crate::host::SocketId;
use crate::state::{Ccb, DemuxState, TcpState};
use crate::tcp_out::TcpTx;
use crate::tcp_types::InputResult;

/// Bind to a local address and port
///
/// Transition: CLOSED -> CLOSED (with address assigned)
pub fn tcp_bind(ccb: &mut Ccb, local: SocketAddrV4) -> Result<()> {
    ccb.conn_mgmt.on_bind(local)
}

/// Start listening for connections
///
/// Transition: CLOSED -> LISTEN. A `backlog` of 0 selects the configured
/// default pending-set capacity.
pub fn tcp_listen(ccb: &mut Ccb, backlog: usize) -> Result<()> {
    ccb.conn_mgmt.on_listen()?;
    let backlog = if backlog == 0 {
        ccb.config.listen_backlog
    } else {
        backlog
    };
    ccb.demux = Some(DemuxState::new(backlog));
    Ok(())
}

/// Initiate active connection
///
/// Transition: CLOSED -> SYN_SENT. The SYN is queued for the TX path.
pub fn tcp_connect(ccb: &mut Ccb, remote: SocketAddrV4) -> Result<()> {
    ccb.conn_mgmt.on_connect(remote)?;
    ccb.rod.on_connect(ccb.config.initial_sequence);
    ccb.buffer.set_send_origin(ccb.rod.iss);
    TcpTx::queue_syn(ccb);
    Ok(())
}

/// Queue application data, one segment per `mss` bytes
///
/// Returns the number of bytes accepted, which may be less than `data.len()`
/// when the send buffer fills.
pub fn tcp_send(ccb: &mut Ccb, data: &[u8]) -> Result<usize> {
    if ccb.conn_mgmt.connection_was_reset {
        return Err(TcpError::Rst);
    }
    if ccb.conn_mgmt.app_closed {
        return Err(TcpError::Clsd);
    }
    match ccb.conn_mgmt.state {
        TcpState::Established | TcpState::CloseWait => {}
        TcpState::SynSent | TcpState::SynRcvd { .. } => return Err(TcpError::WouldBlock),
        _ => return Err(TcpError::Conn),
    }
    if data.is_empty() {
        return Ok(0);
    }

    let mut written = 0;
    for chunk in data.chunks(ccb.config.mss.max(1)) {
        if chunk.len() > ccb.buffer.tx_space_available() {
            break;
        }
        TcpTx::queue_data(ccb, chunk.to_vec())?;
        written += chunk.len();
    }

    if written == 0 {
        return Err(TcpError::WouldBlock);
    }
    trace!("socket {}: queued {} bytes", ccb.conn_mgmt.socket_id, written);
    Ok(written)
}

/// Read in-order data
///
/// Returns `Ok(0)` at end of stream, once everything up to the peer's final
/// sequence has been read.
pub fn tcp_recv(ccb: &mut Ccb, buf: &mut [u8]) -> Result<usize> {
    if ccb.is_listener() {
        return Err(TcpError::Val("cannot read from a listening socket"));
    }
    let n = ccb.buffer.read(buf)?;
    if n > 0 || buf.is_empty() {
        return Ok(n);
    }
    if ccb.conn_mgmt.connection_was_reset {
        return Err(TcpError::Rst);
    }
    if ccb.rod.peer_stream_complete() {
        return Ok(0);
    }
    match ccb.conn_mgmt.state {
        TcpState::Closed | TcpState::Listen => Err(TcpError::Conn),
        _ => Err(TcpError::WouldBlock),
    }
}

/// Initiate graceful close
///
/// Connections that never synchronized are released at once (`DESTROY`).
/// Others queue a FIN and linger in CLOSING until
/// [`Ccb::close_complete`] holds.
pub fn tcp_close(ccb: &mut Ccb) -> Result<InputResult> {
    if ccb.demux.take().is_some() {
        debug!("socket {}: listener closed, dropping children", ccb.conn_mgmt.socket_id);
    }
    if ccb.conn_mgmt.on_close()? {
        ccb.rod.fin_pending = true;
        Ok(InputResult::SENDABLE)
    } else {
        Ok(InputResult::DESTROY)
    }
}

/// Abort connection
///
/// Transition: ANY -> CLOSED. Synchronized connections send a RST first; the
/// caller polls output once more before releasing the connection.
pub fn tcp_abort(ccb: &mut Ccb) -> InputResult {
    ccb.demux = None;
    let state = ccb.conn_mgmt.state;
    if state.is_synchronized() || state == TcpState::SynSent {
        ControlPath::abort_with_rst(ccb);
        InputResult::DESTROY | InputResult::SENDABLE
    } else {
        ccb.conn_mgmt.on_abort();
        InputResult::DESTROY
    }
}

// ----------------------------------------------------------------------------
// Listener Children
// ----------------------------------------------------------------------------

/// Spawn a child for a handshake from `remote`
///
/// The child is connected to `remote`, pre-seeded to LISTEN, and filed as
/// incomplete. It inherits the listener's local address and configuration.
pub fn create_child_for_handshake(listener: &mut Ccb, remote: SocketAddrV4) -> Result<SocketId> {
    let local = listener.conn_mgmt.local;
    let parent = listener.conn_mgmt.socket_id;
    let config = listener.config.clone();
    let Some(demux) = listener.demux.as_mut() else {
        return Err(TcpError::Val("not a listening socket"));
    };
    if demux.locate(&remote).is_some() {
        return Err(TcpError::IsConn);
    }

    let mut child = Ccb::new(config);
    child.conn_mgmt.local = local;
    child.conn_mgmt.remote = remote;
    child.conn_mgmt.parent_socket_id = Some(parent);
    child.conn_mgmt.transition(TcpState::Listen);

    let id = child.conn_mgmt.socket_id;
    debug!("socket {}: spawned child {} for {}", parent, id, remote);
    demux.insert_incomplete(remote, child);
    Ok(id)
}

/// Remove the oldest confirmed child, if any
pub fn accept_pending(listener: &mut Ccb) -> Option<Ccb> {
    listener.demux.as_mut()?.accept()
}

/// Accept a confirmed connection
pub fn tcp_accept(listener: &mut Ccb) -> Result<Ccb> {
    if !listener.is_listener() {
        return Err(TcpError::Val("not a listening socket"));
    }
    accept_pending(listener).ok_or(TcpError::WouldBlock)
}
