//! Virtual TCP engine for a discrete-event network simulator
//!
//! A segment-granularity reliable transport: every data segment (and every
//! SYN) consumes exactly one sequence number. The engine never blocks; the
//! simulator drives it by delivering segments, polling for output, and firing
//! timers, and it talks back through the [`host`] traits.
//!
//! Entry points:
//! - [`TcpRx::process_incoming`] for each delivered segment
//! - [`TcpTx::produce_outgoing_segment`] once per wire opportunity
//! - [`TcpTx::on_delayed_ack_timer_fired`] and [`TcpTx::on_retransmit_requested`]
//!   for scheduler callbacks
//! - the `tcp_*` functions in [`tcp_api`] for the application side

pub mod autotune;
pub mod components;
pub mod config;
pub mod control_path;
pub mod error;
pub mod host;
pub mod state;
pub mod tcp_api;
pub mod tcp_in;
pub mod tcp_out;
pub mod tcp_proto;
pub mod tcp_types;
pub mod vbuffer;

pub use config::TcpConfig;
pub use error::{Result, TcpError};
pub use host::{EventScheduler, HostContext, RetransmitRequest, SocketId, TimerEvent, TopologyOracle};
pub use state::{Ccb, OpenKind, TcpState};
pub use tcp_api::{
    accept_pending, create_child_for_handshake, tcp_abort, tcp_accept, tcp_bind, tcp_close,
    tcp_connect, tcp_listen, tcp_recv, tcp_send,
};
pub use tcp_in::TcpRx;
pub use tcp_out::TcpTx;
pub use tcp_proto::SegmentFlags;
pub use tcp_types::{InputResult, Segment, SegmentHeader, SegmentRef};
