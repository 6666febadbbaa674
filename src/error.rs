//! Engine error type
//!
//! Variants follow the classic socket error taxonomy. Protocol outcomes such as
//! drops and resets are reported through [`crate::tcp_types::InputResult`]
//! instead; this type covers API misuse and segment lock failures.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TcpError {
    /// Not connected
    #[error("socket is not connected")]
    Conn,

    /// Connection already established
    #[error("socket is already connected")]
    IsConn,

    /// Connect already in progress
    #[error("connection attempt already in progress")]
    Already,

    /// Local address already bound
    #[error("address already in use")]
    Use,

    /// Illegal value or operation for the current state
    #[error("invalid argument: {0}")]
    Val(&'static str),

    /// Operation would block
    #[error("operation would block")]
    WouldBlock,

    /// Connection reset by peer
    #[error("connection reset by peer")]
    Rst,

    /// Connection closed
    #[error("connection closed")]
    Clsd,

    /// Buffer space exhausted
    #[error("out of buffer space")]
    Mem,

    /// A segment's lock was poisoned by a panicking holder
    #[error("segment lock poisoned")]
    SegmentLock,
}

pub type Result<T> = core::result::Result<T, TcpError>;
