//! Simulator boundary
//!
//! The engine never blocks, sleeps, or routes. Everything it needs from the
//! surrounding simulator is expressed through the two traits below:
//! - [`EventScheduler`]: timers, retransmission requests, half-close notices
//! - [`TopologyOracle`]: latency and bandwidth estimates for autotuning
//!
//! Both are handed to every engine entry point through a [`HostContext`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, Ordering};

/// Identity of a simulated socket within its host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u32);

static NEXT_SOCKET_ID: AtomicU32 = AtomicU32::new(1);

impl SocketId {
    /// Allocate a fresh, process-unique id. Zero is never handed out.
    pub fn next() -> Self {
        SocketId(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback token for [`EventScheduler::schedule_timer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Fire [`crate::tcp_out::TcpTx::on_delayed_ack_timer_fired`] on this socket
    DelayedAck(SocketId),
}

/// Receiver-side report that a segment must be sent again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitRequest {
    /// Endpoint that detected the loss
    pub requester: SocketAddrV4,
    /// Endpoint that must retransmit
    pub sender: SocketAddrV4,
    /// Sequence number (retransmit key) of the segment
    pub seq: u32,
}

/// Event scheduling services provided by the simulator
pub trait EventScheduler {
    /// Arm a one-shot timer that delivers `event` after `delay_millis`
    fn schedule_timer(&mut self, delay_millis: u64, event: TimerEvent);

    /// Ask the sending host to retransmit a segment
    fn request_retransmit(&mut self, request: RetransmitRequest);

    /// The peer's final sequence has been reached on this socket
    fn schedule_half_close(&mut self, socket: SocketId);
}

/// Network topology estimates provided by the simulator
pub trait TopologyOracle {
    /// One-way latency in milliseconds at `percentile`, if known
    fn latency(&self, from: Ipv4Addr, to: Ipv4Addr, percentile: f64) -> Option<f64>;

    /// Worst-case one-way latency across the whole network, in milliseconds
    fn max_global_latency(&self) -> f64;

    /// Upstream bandwidth of `host` in KiB/s
    fn bandwidth_up(&self, host: Ipv4Addr) -> Option<u64>;

    /// Downstream bandwidth of `host` in KiB/s
    fn bandwidth_down(&self, host: Ipv4Addr) -> Option<u64>;
}

/// Collaborators for one engine call
pub struct HostContext<'a> {
    pub scheduler: &'a mut dyn EventScheduler,
    pub topology: &'a dyn TopologyOracle,
}

impl<'a> HostContext<'a> {
    pub fn new(scheduler: &'a mut dyn EventScheduler, topology: &'a dyn TopologyOracle) -> Self {
        Self {
            scheduler,
            topology,
        }
    }
}
