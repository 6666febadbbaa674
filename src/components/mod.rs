//! Virtual TCP State Components
//!
//! This module contains the five disjoint state components of a control block:
//! 1. Connection Management - state machine state and connection lifecycle
//! 2. Reliable Ordered Delivery - sequence numbers, acknowledgements, delayed ACK
//! 3. Flow Control - advertised, send and receive windows
//! 4. Congestion Control - congestion window and slow start
//! 5. Demultiplexing - child connections owned by a listening socket

mod connection_mgmt;
mod congestion_control;
mod demux;
mod flow_control;
pub(crate) mod rod;

pub use congestion_control::CongestionControlState;
pub use connection_mgmt::ConnectionManagementState;
pub use demux::{ChildSet, DemuxState};
pub use flow_control::FlowControlState;
pub use rod::{seq_geq, seq_gt, seq_leq, seq_lt, ReliableOrderedDeliveryState};
