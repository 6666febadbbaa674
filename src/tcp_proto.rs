//! Virtual TCP Protocol Definitions
//!
//! Header flags and protocol constants shared by the receive and transmit paths.

use bitflags::bitflags;

bitflags! {
    /// Segment header flags
    ///
    /// `CON` is the connection-request flag. The handshake always pairs it with
    /// `SYN`, and the final handshake acknowledgement pairs it with `ACK`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SegmentFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const ACK = 0x10;
        const CON = 0x40;
    }
}

impl SegmentFlags {
    /// Handshake start: synchronize + connection-request
    pub const SYN_CON: Self = Self::SYN.union(Self::CON);

    /// Handshake reply: synchronize + acknowledge + connection-request
    pub const SYN_ACK_CON: Self = Self::SYN.union(Self::ACK).union(Self::CON);

    /// Handshake confirmation: acknowledge + connection-request
    pub const ACK_CON: Self = Self::ACK.union(Self::CON);

    /// True when every flag in `other` is set
    #[inline]
    pub fn has(self, other: Self) -> bool {
        self.contains(other)
    }
}

/// Minimum window, in segments, after any flow or congestion update
pub const MIN_WINDOW: u32 = 1;
