//! Send/Receive Buffer
//!
//! Per-connection segment storage, keyed by sequence number.
//!
//! Transmit side:
//! - control queue: handshake, acknowledgement, reset and FIN segments, FIFO
//! - send queue: data segments waiting for window, lowest sequence first
//! - retransmit set: data segments sent but not yet acknowledged
//!
//! Receive side:
//! - unprocessed set: in-window segments that arrived ahead of a gap
//! - read queue: in-order payload waiting for the application
//!
//! Transmit-side keys are ordered by their distance from the connection's
//! initial sequence number, so the queues stay in send order when sequence
//! numbers wrap. Receive-side lookups are exact and need no ordering.
//!
//! Capacity is counted in payload bytes. Send and retransmit share the transmit
//! capacity; unprocessed and read share the receive capacity.

use std::collections::{BTreeMap, VecDeque};

use crate::error::{Result, TcpError};
use crate::tcp_types::SegmentRef;

pub struct VBuffer {
    rx_capacity: usize,
    tx_capacity: usize,

    control: VecDeque<SegmentRef>,
    /// Sequence number that transmit-side offsets count from
    send_origin: u32,
    send: BTreeMap<u32, SegmentRef>,
    retransmit: BTreeMap<u32, SegmentRef>,
    tx_used: usize,

    unprocessed: BTreeMap<u32, SegmentRef>,
    unprocessed_bytes: usize,
    read: VecDeque<SegmentRef>,
    read_offset: usize,
    read_bytes: usize,
}

impl VBuffer {
    pub fn new(rx_capacity: usize, tx_capacity: usize) -> Self {
        Self {
            rx_capacity,
            tx_capacity,
            control: VecDeque::new(),
            send_origin: 0,
            send: BTreeMap::new(),
            retransmit: BTreeMap::new(),
            tx_used: 0,
            unprocessed: BTreeMap::new(),
            unprocessed_bytes: 0,
            read: VecDeque::new(),
            read_offset: 0,
            read_bytes: 0,
        }
    }

    /// Resize both directions. Existing contents are kept even if they exceed
    /// the new capacity; space simply reads as zero until they drain.
    pub fn set_capacity(&mut self, rx_capacity: usize, tx_capacity: usize) {
        self.rx_capacity = rx_capacity;
        self.tx_capacity = tx_capacity;
    }

    pub fn rx_capacity(&self) -> usize {
        self.rx_capacity
    }

    pub fn tx_capacity(&self) -> usize {
        self.tx_capacity
    }

    // ------------------------------------------------------------------------
    // Control queue
    // ------------------------------------------------------------------------

    pub fn add_control(&mut self, seg: SegmentRef) {
        self.control.push_back(seg);
    }

    pub fn pop_control(&mut self) -> Option<SegmentRef> {
        self.control.pop_front()
    }

    /// Remove every queued control segment, oldest first
    pub fn take_control(&mut self) -> Vec<SegmentRef> {
        self.control.drain(..).collect()
    }

    pub fn is_empty_control_queue(&self) -> bool {
        self.control.is_empty()
    }

    // ------------------------------------------------------------------------
    // Transmit side
    // ------------------------------------------------------------------------

    /// Anchor transmit-side ordering at `iss`. Called when the send sequence
    /// space is initialized, before any data is queued.
    pub fn set_send_origin(&mut self, iss: u32) {
        self.send_origin = iss;
    }

    fn tx_offset(&self, key: u32) -> u32 {
        key.wrapping_sub(self.send_origin)
    }

    fn tx_key(&self, offset: u32) -> u32 {
        offset.wrapping_add(self.send_origin)
    }

    pub fn tx_space_available(&self) -> usize {
        self.tx_capacity.saturating_sub(self.tx_used)
    }

    /// Queue a data segment for its first transmission
    pub fn add_send(&mut self, key: u32, seg: SegmentRef) -> Result<()> {
        let len = seg.payload_len()?;
        if len > self.tx_space_available() {
            return Err(TcpError::Mem);
        }
        self.tx_used += len;
        self.send.insert(self.tx_offset(key), seg);
        Ok(())
    }

    /// Earliest queued sequence number
    pub fn first_send_key(&self) -> Option<u32> {
        self.send.keys().next().map(|offset| self.tx_key(*offset))
    }

    pub fn remove_send(&mut self, key: u32) -> Option<SegmentRef> {
        let offset = self.tx_offset(key);
        self.send.remove(&offset)
    }

    pub fn send_is_empty(&self) -> bool {
        self.send.is_empty()
    }

    /// Track a just-sent segment until it is acknowledged. The bytes were
    /// already charged by [`VBuffer::add_send`].
    pub fn add_retransmit(&mut self, key: u32, seg: SegmentRef) {
        let offset = self.tx_offset(key);
        self.retransmit.insert(offset, seg);
    }

    pub fn remove_retransmit(&mut self, key: u32) -> Option<SegmentRef> {
        let offset = self.tx_offset(key);
        self.retransmit.remove(&offset)
    }

    /// Move a sent segment back to the send queue without recharging its bytes
    pub fn requeue_retransmit(&mut self, key: u32) -> bool {
        match self.remove_retransmit(key) {
            Some(seg) => {
                let offset = self.tx_offset(key);
                self.send.insert(offset, seg);
                true
            }
            None => false,
        }
    }

    /// Release every tracked segment sent before `before_key`.
    /// Returns the number of segments released.
    pub fn clear_retransmit(&mut self, before_key: u32) -> Result<usize> {
        let before = self.tx_offset(before_key);
        let keep = self.retransmit.split_off(&before);
        let acked = std::mem::replace(&mut self.retransmit, keep);

        // A retransmission request may have moved an acked key back to send.
        let still_queued: Vec<u32> = self.send.range(..before).map(|(k, _)| *k).collect();

        let mut released = 0;
        for seg in acked.values() {
            self.tx_used = self.tx_used.saturating_sub(seg.payload_len()?);
            released += 1;
        }
        for key in still_queued {
            if let Some(seg) = self.send.remove(&key) {
                self.tx_used = self.tx_used.saturating_sub(seg.payload_len()?);
                released += 1;
            }
        }
        Ok(released)
    }

    pub fn retransmit_is_empty(&self) -> bool {
        self.retransmit.is_empty()
    }

    pub fn retransmit_len(&self) -> usize {
        self.retransmit.len()
    }

    pub fn contains_retransmit(&self, key: u32) -> bool {
        self.retransmit.contains_key(&self.tx_offset(key))
    }

    // ------------------------------------------------------------------------
    // Receive side
    // ------------------------------------------------------------------------

    pub fn rx_space_available(&self) -> usize {
        self.rx_capacity
            .saturating_sub(self.unprocessed_bytes + self.read_bytes)
    }

    /// Stage an out-of-order segment. Returns false when there is no room.
    pub fn add_receive(&mut self, key: u32, seg: SegmentRef) -> Result<bool> {
        if self.unprocessed.contains_key(&key) {
            return Ok(true);
        }
        let len = seg.payload_len()?;
        if len > self.rx_space_available() {
            return Ok(false);
        }
        self.unprocessed_bytes += len;
        self.unprocessed.insert(key, seg);
        Ok(true)
    }

    /// Take the staged segment that fills the gap at `key`, if any
    pub fn remove_unprocessed(&mut self, key: u32) -> Result<Option<SegmentRef>> {
        match self.unprocessed.remove(&key) {
            Some(seg) => {
                self.unprocessed_bytes = self.unprocessed_bytes.saturating_sub(seg.payload_len()?);
                Ok(Some(seg))
            }
            None => Ok(None),
        }
    }

    pub fn unprocessed_len(&self) -> usize {
        self.unprocessed.len()
    }

    /// Deliver an in-order segment to the application. Returns false when
    /// there is no room.
    pub fn add_read(&mut self, seg: SegmentRef) -> Result<bool> {
        let len = seg.payload_len()?;
        if len > self.rx_space_available() {
            return Ok(false);
        }
        self.read_bytes += len;
        self.read.push_back(seg);
        Ok(true)
    }

    pub fn readable_bytes(&self) -> usize {
        self.read_bytes
    }

    /// Copy in-order payload into `buf`, consuming it
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = self.read.front() else {
                break;
            };
            let offset = self.read_offset;
            let (n, exhausted) = front.read(|seg| {
                let remaining = &seg.payload[offset..];
                let n = remaining.len().min(buf.len() - copied);
                buf[copied..copied + n].copy_from_slice(&remaining[..n]);
                (n, n == remaining.len())
            })?;

            copied += n;
            self.read_bytes -= n;
            if exhausted {
                self.read.pop_front();
                self.read_offset = 0;
            } else {
                self.read_offset += n;
            }
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp_proto::SegmentFlags;
    use crate::tcp_types::Segment;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn data(seq: u32, payload: &[u8]) -> SegmentRef {
        let a = SocketAddrV4::new(Ipv4Addr::new(11, 0, 0, 1), 1000);
        let b = SocketAddrV4::new(Ipv4Addr::new(11, 0, 0, 2), 2000);
        SegmentRef::new(Segment::new(a, b, SegmentFlags::ACK, seq, 0, 1, payload.to_vec()))
    }

    #[test]
    fn test_send_charges_tx_space() {
        let mut vb = VBuffer::new(100, 10);
        vb.add_send(1, data(1, b"hello")).unwrap();
        assert_eq!(vb.tx_space_available(), 5);
        assert_eq!(vb.add_send(2, data(2, b"too long")), Err(TcpError::Mem));
        assert_eq!(vb.first_send_key(), Some(1));
    }

    #[test]
    fn test_retransmit_lifecycle() {
        let mut vb = VBuffer::new(100, 100);
        for seq in 1..=3 {
            vb.add_send(seq, data(seq, b"abcd")).unwrap();
            let seg = vb.remove_send(seq).unwrap();
            vb.add_retransmit(seq, seg);
        }
        assert_eq!(vb.tx_space_available(), 88);

        assert!(vb.requeue_retransmit(2));
        assert_eq!(vb.first_send_key(), Some(2));
        assert!(!vb.requeue_retransmit(9));

        // Keys 1 and 2 are acknowledged; 2 sits in the send queue again.
        assert_eq!(vb.clear_retransmit(3).unwrap(), 2);
        assert!(vb.send_is_empty());
        assert!(vb.contains_retransmit(3));
        assert_eq!(vb.tx_space_available(), 96);
    }

    #[test]
    fn test_send_order_across_wrap() {
        let mut vb = VBuffer::new(100, 100);
        vb.set_send_origin(u32::MAX - 2);
        for seq in [u32::MAX - 1, u32::MAX, 0, 1] {
            vb.add_send(seq, data(seq, b"ab")).unwrap();
        }
        assert_eq!(vb.first_send_key(), Some(u32::MAX - 1));

        let mut order = Vec::new();
        while let Some(key) = vb.first_send_key() {
            let seg = vb.remove_send(key).unwrap();
            vb.add_retransmit(key, seg);
            order.push(key);
        }
        assert_eq!(order, vec![u32::MAX - 1, u32::MAX, 0, 1]);

        // Acknowledging up to 1 releases both sides of the wrap
        assert_eq!(vb.clear_retransmit(1).unwrap(), 3);
        assert!(vb.contains_retransmit(1));
        assert!(!vb.contains_retransmit(u32::MAX));
        assert_eq!(vb.tx_space_available(), 98);
    }

    #[test]
    fn test_gap_fill_and_read() {
        let mut vb = VBuffer::new(16, 16);
        assert!(vb.add_receive(3, data(3, b"cc")).unwrap());
        assert!(vb.add_read(data(1, b"aa")).unwrap());
        assert!(vb.remove_unprocessed(2).unwrap().is_none());

        assert!(vb.add_read(data(2, b"bb")).unwrap());
        let staged = vb.remove_unprocessed(3).unwrap().unwrap();
        assert!(vb.add_read(staged).unwrap());

        let mut buf = [0u8; 3];
        assert_eq!(vb.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"aab");
        let mut rest = [0u8; 8];
        assert_eq!(vb.read(&mut rest).unwrap(), 3);
        assert_eq!(&rest[..3], b"bcc");
        assert_eq!(vb.readable_bytes(), 0);
    }

    #[test]
    fn test_receive_space_exhaustion() {
        let mut vb = VBuffer::new(4, 4);
        assert!(vb.add_read(data(1, b"abc")).unwrap());
        assert!(!vb.add_read(data(2, b"de")).unwrap());
        assert!(!vb.add_receive(3, data(3, b"de")).unwrap());
        assert_eq!(vb.rx_space_available(), 1);
    }

    #[test]
    fn test_control_queue_fifo() {
        let mut vb = VBuffer::new(4, 4);
        assert!(vb.is_empty_control_queue());
        vb.add_control(data(1, b""));
        vb.add_control(data(2, b""));
        assert_eq!(vb.pop_control().unwrap().header().unwrap().seq, 1);
        assert_eq!(vb.take_control().len(), 1);
        assert!(vb.is_empty_control_queue());
    }
}
