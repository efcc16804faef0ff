//! Per-peer connection contract.
//!
//! A [`Connection`] is the protocol engine serving one remote central over a
//! connected L2CAP socket. It asks the server for permission through
//! [`Authorize`] before answering reads and applying writes, and reports
//! completed writes and disconnects through [`Observe`].

use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use tracing::trace;

use crate::att::{self, ErrorCode, Handle};
use crate::gap::Uuid;
use crate::gatt::Db;
use crate::l2cap::Socket;
use crate::le::Addr;

/// Authorization callback result type.
pub type IoResult = std::result::Result<(), ErrorCode>;

/// Remote central identity derived from its transport address.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Central(Addr);

impl Central {
    /// Creates a central identity from its device address.
    #[inline]
    #[must_use]
    pub const fn new(addr: Addr) -> Self {
        Self(addr)
    }

    /// Returns the central's device address.
    #[inline]
    #[must_use]
    pub const fn addr(self) -> Addr {
        self.0
    }
}

impl From<Addr> for Central {
    #[inline]
    fn from(addr: Addr) -> Self {
        Self(addr)
    }
}

impl Display for Central {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Connection identifier. Identifiers increase monotonically and are never
/// reused by the same server.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct ConnId(pub(crate) u64);

impl Display for ConnId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<ConnId> for u64 {
    #[inline]
    fn from(id: ConnId) -> Self {
        id.0
    }
}

/// Per-connection configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Maximum ATT MTU accepted during MTU exchange.
    pub mtu: u16,
    /// Maximum number of queued prepared writes.
    pub max_prepared_writes: usize,
}

impl Config {
    /// Creates a new configuration, clamping `mtu` to the valid ATT range.
    #[inline]
    #[must_use]
    pub fn new(mtu: u16, max_prepared_writes: usize) -> Self {
        Self {
            mtu: mtu.clamp(att::MIN_MTU, att::MAX_MTU),
            max_prepared_writes,
        }
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            mtu: att::MAX_MTU,
            max_prepared_writes: 50,
        }
    }
}

/// Read request passed to [`Authorize::will_read`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ReadReq {
    pub central: Central,
    pub hdl: Handle,
    pub uuid: Uuid,
    /// Current attribute value.
    pub value: Bytes,
    pub offset: u16,
    pub mtu: u16,
}

/// Write request passed to [`Authorize::will_write`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct WriteReq {
    pub central: Central,
    pub hdl: Handle,
    pub uuid: Uuid,
    /// Current attribute value.
    pub value: Bytes,
    /// Value that will be stored if the write is permitted.
    pub new_value: Bytes,
    pub mtu: u16,
}

/// Confirmation of a write that was applied by a connection.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct WriteCfm {
    pub central: Central,
    pub hdl: Handle,
    pub uuid: Uuid,
    pub value: Bytes,
}

impl WriteCfm {
    /// Creates a write confirmation.
    #[inline]
    #[must_use]
    pub const fn new(central: Central, hdl: Handle, uuid: Uuid, value: Bytes) -> Self {
        Self {
            central,
            hdl,
            uuid,
            value,
        }
    }
}

/// Authorization capability consulted before answering a read or applying a
/// write. An [`Err`] denies the operation and is sent to the peer.
pub trait Authorize: Send + Sync {
    fn will_read(&self, req: &ReadReq) -> IoResult;
    fn will_write(&self, req: &WriteReq) -> IoResult;
}

/// Completion capability informed about applied writes and disconnects.
pub trait Observe: Send + Sync {
    /// Called after a peer write was applied locally by its connection.
    /// Confirmations from one connection are delivered in order and the next
    /// one is not delivered until the returned future completes.
    fn did_write(&self, cfm: WriteCfm) -> BoxFuture<'_, ()>;

    /// Called exactly once when the connection ends. `err` is [`None`] if the
    /// peer disconnected normally.
    fn did_disconnect(&self, id: ConnId, central: Central, err: Option<att::Error>);

    /// Diagnostic message from the connection.
    fn log(&self, central: Central, msg: &str) {
        trace!("[{central}] {msg}");
    }
}

/// Parameters used to open a new [`Connection`].
#[non_exhaustive]
pub struct ConnParams {
    pub id: ConnId,
    pub central: Central,
    pub sock: Box<dyn Socket>,
    pub cfg: Config,
    /// Attribute database snapshot used to initialize the local mirror.
    pub db: Db,
    pub auth: Arc<dyn Authorize>,
    pub obs: Arc<dyn Observe>,
}

impl Debug for ConnParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(crate::name_of!(ConnParams))
            .field("id", &self.id)
            .field("central", &self.central)
            .field("sock", &self.sock)
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

/// Protocol engine serving a single remote central.
pub trait Connection: Send + Sync + 'static {
    /// Starts serving the socket in `p`. Must not block on network I/O.
    /// The engine must call [`Observe::did_disconnect`] when the connection
    /// ends.
    fn open(p: ConnParams) -> Arc<Self>
    where
        Self: Sized;

    /// Returns the remote central identity.
    fn central(&self) -> Central;

    /// Updates the locally mirrored attribute value and notifies or indicates
    /// the new value to the peer if it subscribed to it. An error only
    /// affects this connection.
    fn update_value(&self, hdl: Handle, val: Bytes) -> BoxFuture<'_, att::Result<()>>;
}

#[cfg(test)]
mod tests {
    use crate::le::RawAddr;

    use super::*;

    #[test]
    fn config() {
        assert_eq!(Config::default(), Config::new(517, 50));
        assert_eq!(Config::new(10, 1).mtu, att::MIN_MTU);
        assert_eq!(Config::new(1000, 1).mtu, att::MAX_MTU);
        assert_eq!(Config::new(100, 1).mtu, 100);
    }

    #[test]
    fn central_identity() {
        let raw = RawAddr::from([1, 2, 3, 4, 5, 6]);
        let a = Central::new(Addr::Public(raw));
        assert_eq!(a, Central::from(Addr::Public(raw)));
        assert_ne!(a, Central::new(Addr::Random(raw)));
        assert_eq!(a.to_string(), "06:05:04:03:02:01 (public)");
        assert_eq!(ConnId(7).to_string(), "#7");
    }
}
