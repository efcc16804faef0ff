//! Logical Link Control and Adaptation Protocol ([Vol 3] Part A) transport
//! capabilities.
//!
//! The peripheral only needs a listening socket for the ATT fixed channel and
//! the connection-oriented sockets it produces. Sockets are packet-oriented:
//! each `recv` returns exactly one SDU and each `send` transmits one SDU.

use std::fmt::Debug;
use std::io;

use bytes::Bytes;
use futures_core::future::BoxFuture;

use crate::le::{Addr, AddrKind};

/// Factory for listening sockets.
pub trait Transport: Send + Sync + 'static {
    /// Opens a listening ATT socket bound to the local address `addr` of the
    /// specified kind.
    fn listen(&self, addr: Addr, kind: AddrKind, backlog: u32) -> io::Result<Box<dyn Listener>>;
}

/// Listening socket.
pub trait Listener: Debug + Send + Sync + 'static {
    /// Waits for the next incoming connection. This method must be cancel
    /// safe.
    fn accept(&self) -> BoxFuture<'_, io::Result<Box<dyn Socket>>>;
}

/// Connected ATT socket. `recv` and `send` may be called concurrently from
/// different tasks.
pub trait Socket: Debug + Send + Sync + 'static {
    /// Returns the remote device address.
    fn peer_addr(&self) -> Addr;

    /// Receives the next SDU. Returns [`None`] once the remote device has
    /// disconnected.
    fn recv(&self) -> BoxFuture<'_, io::Result<Option<Bytes>>>;

    /// Sends one SDU.
    fn send(&self, sdu: Bytes) -> BoxFuture<'_, io::Result<()>>;
}
