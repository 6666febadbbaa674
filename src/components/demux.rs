//! Demultiplexing Component
//!
//! A listening control block owns one child per remote endpoint that began a
//! handshake. Children move by value from `incomplete` to `pending` when the
//! handshake is confirmed, and leave `pending` when the application accepts.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddrV4;

use crate::host::SocketId;
use crate::state::Ccb;

/// Where a child currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSet {
    Incomplete,
    Pending,
}

/// Demultiplexing State
///
/// A child is in at most one of the two sets.
pub struct DemuxState {
    /// Pending-set capacity
    pub backlog: usize,
    incomplete: BTreeMap<SocketAddrV4, Ccb>,
    pending: BTreeMap<SocketAddrV4, Ccb>,
    /// Accept order of `pending`
    pending_order: VecDeque<SocketAddrV4>,
}

impl DemuxState {
    pub fn new(backlog: usize) -> Self {
        Self {
            backlog,
            incomplete: BTreeMap::new(),
            pending: BTreeMap::new(),
            pending_order: VecDeque::new(),
        }
    }

    pub fn locate(&self, remote: &SocketAddrV4) -> Option<ChildSet> {
        if self.incomplete.contains_key(remote) {
            Some(ChildSet::Incomplete)
        } else if self.pending.contains_key(remote) {
            Some(ChildSet::Pending)
        } else {
            None
        }
    }

    pub fn child_mut(&mut self, remote: &SocketAddrV4) -> Option<&mut Ccb> {
        match self.incomplete.get_mut(remote) {
            Some(child) => Some(child),
            None => self.pending.get_mut(remote),
        }
    }

    /// Find a child by its socket id, e.g. when one of its timers fires
    pub fn child_by_id_mut(&mut self, id: SocketId) -> Option<&mut Ccb> {
        self.incomplete
            .values_mut()
            .chain(self.pending.values_mut())
            .find(|child| child.conn_mgmt.socket_id == id)
    }

    pub fn insert_incomplete(&mut self, remote: SocketAddrV4, child: Ccb) {
        self.incomplete.insert(remote, child);
    }

    pub fn pending_has_room(&self) -> bool {
        self.pending.len() < self.backlog
    }

    /// Move a confirmed child from `incomplete` to `pending`.
    /// Returns false (and leaves the child in place) if it was not incomplete
    /// or the pending set is full.
    pub fn promote(&mut self, remote: &SocketAddrV4) -> bool {
        if !self.pending_has_room() {
            return false;
        }
        match self.incomplete.remove(remote) {
            Some(child) => {
                self.pending.insert(*remote, child);
                self.pending_order.push_back(*remote);
                true
            }
            None => false,
        }
    }

    /// Take a child out of whichever set holds it
    pub fn remove(&mut self, remote: &SocketAddrV4) -> Option<Ccb> {
        if let Some(child) = self.incomplete.remove(remote) {
            return Some(child);
        }
        let child = self.pending.remove(remote)?;
        self.pending_order.retain(|r| r != remote);
        Some(child)
    }

    /// Oldest confirmed child, handed to the application
    pub fn accept(&mut self) -> Option<Ccb> {
        while let Some(remote) = self.pending_order.pop_front() {
            if let Some(child) = self.pending.remove(&remote) {
                return Some(child);
            }
        }
        None
    }

    pub fn incomplete_len(&self) -> usize {
        self.incomplete.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Every child, incomplete first, by remote address within a set
    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut Ccb> {
        self.incomplete.values_mut().chain(self.pending.values_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcpConfig;
    use std::net::Ipv4Addr;

    fn remote(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(11, 0, 0, 2), port)
    }

    fn child() -> Ccb {
        Ccb::new(TcpConfig::default())
    }

    #[test]
    fn test_child_in_one_set_only() {
        let mut demux = DemuxState::new(2);
        demux.insert_incomplete(remote(1), child());
        assert_eq!(demux.locate(&remote(1)), Some(ChildSet::Incomplete));

        assert!(demux.promote(&remote(1)));
        assert_eq!(demux.locate(&remote(1)), Some(ChildSet::Pending));
        assert_eq!(demux.incomplete_len(), 0);
        assert_eq!(demux.pending_len(), 1);

        assert!(!demux.promote(&remote(1)));
    }

    #[test]
    fn test_promote_respects_backlog() {
        let mut demux = DemuxState::new(1);
        demux.insert_incomplete(remote(1), child());
        demux.insert_incomplete(remote(2), child());
        assert!(demux.promote(&remote(1)));
        assert!(!demux.promote(&remote(2)));
        assert_eq!(demux.locate(&remote(2)), Some(ChildSet::Incomplete));
    }

    #[test]
    fn test_accept_is_fifo() {
        let mut demux = DemuxState::new(4);
        let first = child();
        let first_id = first.conn_mgmt.socket_id;
        demux.insert_incomplete(remote(1), first);
        demux.insert_incomplete(remote(2), child());
        demux.promote(&remote(1));
        demux.promote(&remote(2));

        let accepted = demux.accept().unwrap();
        assert_eq!(accepted.conn_mgmt.socket_id, first_id);
        assert!(demux.accept().is_some());
        assert!(demux.accept().is_none());
    }

    #[test]
    fn test_children_in_address_order() {
        let mut demux = DemuxState::new(4);
        for port in [7, 3, 9, 5] {
            let mut c = child();
            c.conn_mgmt.remote = remote(port);
            demux.insert_incomplete(remote(port), c);
        }
        demux.promote(&remote(3));

        let ports: Vec<u16> = demux.children_mut().map(|c| c.conn_mgmt.remote.port()).collect();
        assert_eq!(ports, vec![5, 7, 9, 3]);
    }

    #[test]
    fn test_child_by_id() {
        let mut demux = DemuxState::new(4);
        let pending = child();
        let id = pending.conn_mgmt.socket_id;
        demux.insert_incomplete(remote(1), child());
        demux.insert_incomplete(remote(2), pending);
        demux.promote(&remote(2));

        let found = demux.child_by_id_mut(id).unwrap();
        assert_eq!(found.conn_mgmt.socket_id, id);
        assert!(demux.child_by_id_mut(SocketId(0)).is_none());
    }

    #[test]
    fn test_remove_from_pending_drops_order_entry() {
        let mut demux = DemuxState::new(4);
        demux.insert_incomplete(remote(1), child());
        demux.promote(&remote(1));
        assert!(demux.remove(&remote(1)).is_some());
        assert!(demux.accept().is_none());
    }
}
