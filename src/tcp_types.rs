//! Virtual TCP Common Types
//!
//! Shared types used across the engine: the segment model handed to and from
//! the simulator, and the result flags returned by input processing.

use std::net::SocketAddrV4;
use std::sync::{Arc, RwLock};

use bitflags::bitflags;

use crate::error::{Result, TcpError};
use crate::tcp_proto::SegmentFlags;

/// Parsed segment header
///
/// Sequence and acknowledgement numbers count segments, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub flags: SegmentFlags,
    pub seq: u32,
    pub ack: u32,
    /// Advertised receive window, in segments
    pub window: u32,
}

/// One simulated segment: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(
        src: SocketAddrV4,
        dst: SocketAddrV4,
        flags: SegmentFlags,
        seq: u32,
        ack: u32,
        window: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            header: SegmentHeader {
                src,
                dst,
                flags,
                seq,
                ack,
                window,
            },
            payload,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Shared handle to a segment
///
/// The retransmit set and the wire path may hold the same segment at once.
/// Field access only happens inside [`SegmentRef::read`] / [`SegmentRef::write`],
/// whose guards are released when the closure returns, on every exit path.
#[derive(Debug, Clone)]
pub struct SegmentRef(Arc<RwLock<Segment>>);

impl SegmentRef {
    pub fn new(segment: Segment) -> Self {
        Self(Arc::new(RwLock::new(segment)))
    }

    /// Run `f` under the segment's read lock
    pub fn read<R>(&self, f: impl FnOnce(&Segment) -> R) -> Result<R> {
        let guard = self.0.read().map_err(|_| TcpError::SegmentLock)?;
        Ok(f(&guard))
    }

    /// Run `f` under the segment's write lock
    pub fn write<R>(&self, f: impl FnOnce(&mut Segment) -> R) -> Result<R> {
        let mut guard = self.0.write().map_err(|_| TcpError::SegmentLock)?;
        Ok(f(&mut guard))
    }

    /// Copy of the header
    pub fn header(&self) -> Result<SegmentHeader> {
        self.read(|seg| seg.header)
    }

    pub fn payload_len(&self) -> Result<usize> {
        self.read(Segment::payload_len)
    }

    /// Number of live handles to this segment
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// True when both handles alias the same segment
    pub fn ptr_eq(&self, other: &SegmentRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Segment> for SegmentRef {
    fn from(segment: Segment) -> Self {
        SegmentRef::new(segment)
    }
}

bitflags! {
    /// Outcome of processing one incoming segment
    ///
    /// Flags are not mutually exclusive. The caller uses them to wake blocked
    /// readers/writers, poll for output, or release the connection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputResult: u8 {
        /// The segment was not applied
        const DROPPED = 0x01;
        /// The connection was reset (sent or received)
        const RESET = 0x02;
        /// Output may now be produced
        const SENDABLE = 0x04;
        /// Application data or end-of-stream is available
        const READABLE = 0x08;
        /// The application may write
        const WRITABLE = 0x10;
        /// The owning listener has a connection ready to accept
        const PARENT_READABLE = 0x20;
        /// The caller must release the connection
        const DESTROY = 0x40;
    }
}
