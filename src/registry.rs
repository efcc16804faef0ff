use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::att::Handle;
use crate::gap::Uuid;
use crate::gatt::{Db, Service};
use crate::l2cap::Socket;
use crate::peer::{Authorize, Central, ConnId, ConnParams, Config, Connection, Observe};
use crate::SyncMutex;

/// Owner of the shared attribute database and the set of live connections.
///
/// Every operation acquires the same lock, so their effects never interleave.
/// The lock is never held while awaiting or while calling into a connection
/// other than [`Connection::open`].
pub struct Registry<C> {
    inner: SyncMutex<Inner<C>>,
}

struct Inner<C> {
    db: Db,
    conns: BTreeMap<ConnId, Entry<C>>,
    next_id: u64,
    seq: u64,
}

/// Registered connection.
pub struct Entry<C> {
    pub id: ConnId,
    pub central: Central,
    pub conn: Arc<C>,
    /// Sequence number of the last value write offered to the connection,
    /// per handle.
    pub(crate) applied: Arc<tokio::sync::Mutex<BTreeMap<Handle, u64>>>,
}

impl<C> Clone for Entry<C> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            central: self.central,
            conn: Arc::clone(&self.conn),
            applied: Arc::clone(&self.applied),
        }
    }
}

impl<C> Debug for Entry<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("central", &self.central)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Default for Registry<C> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> Registry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SyncMutex::new(Inner {
                db: Db::new(),
                conns: BTreeMap::new(),
                next_id: 1,
                seq: 0,
            }),
        }
    }

    /// Adds a service to the database. Returns [`None`] if the handle space is
    /// exhausted.
    #[inline]
    pub fn add_service(&self, s: &Service) -> Option<Handle> {
        self.inner.lock().db.add_service(s)
    }

    /// Removes the service declared at `hdl`.
    #[inline]
    pub fn remove_service(&self, hdl: Handle) {
        self.inner.lock().db.remove_service(hdl);
    }

    /// Removes all services.
    #[inline]
    pub fn remove_all_services(&self) {
        self.inner.lock().db.remove_all();
    }

    /// Replaces the attribute value at `hdl`. Returns the sequence number of
    /// the write, which increases with every call.
    pub fn write_attribute(&self, val: Bytes, hdl: Handle) -> u64 {
        let mut inner = self.inner.lock();
        inner.db.write(val, hdl);
        inner.seq += 1;
        inner.seq
    }

    /// Returns the attribute value at `hdl`.
    #[inline]
    #[must_use]
    pub fn read_value(&self, hdl: Handle) -> Option<Bytes> {
        self.inner.lock().db.value(hdl)
    }

    /// Returns the handles of all attributes of type `uuid`.
    #[inline]
    #[must_use]
    pub fn characteristics(&self, uuid: Uuid) -> Vec<Handle> {
        self.inner.lock().db.characteristics(uuid)
    }

    /// Returns a copy of the database.
    #[inline]
    #[must_use]
    pub fn db(&self) -> Db {
        self.inner.lock().db.clone()
    }

    /// Opens a new connection for `sock` and registers it under a new
    /// identifier. The connection receives a snapshot of the current database.
    pub fn register(
        &self,
        sock: Box<dyn Socket>,
        cfg: Config,
        auth: Arc<dyn Authorize>,
        obs: Arc<dyn Observe>,
    ) -> ConnId {
        let central = Central::from(sock.peer_addr());
        let mut inner = self.inner.lock();
        let id = ConnId(inner.next_id);
        inner.next_id += 1;
        // The lock is held across open() so that a connection that ends
        // immediately cannot be unregistered before it is inserted.
        let conn = C::open(ConnParams {
            id,
            central,
            sock,
            cfg,
            db: inner.db.clone(),
            auth,
            obs,
        });
        let applied = Arc::default();
        (inner.conns).insert(id, Entry { id, central, conn, applied });
        debug!("Registered connection {id} for {central}");
        id
    }

    /// Removes a connection. Returns `false` if the connection was already
    /// removed.
    pub fn unregister(&self, id: ConnId) -> bool {
        let e = self.inner.lock().conns.remove(&id);
        // The entry is dropped outside of the lock
        match e {
            Some(e) => {
                debug!("Unregistered connection {id} for {}", e.central);
                true
            }
            None => false,
        }
    }

    /// Returns the identities of all registered centrals.
    #[must_use]
    pub fn active_centrals(&self) -> Vec<Central> {
        (self.inner.lock().conns.values()).map(|e| e.central).collect()
    }

    /// Returns a snapshot of all registered connections.
    #[must_use]
    pub fn connections(&self) -> Vec<Entry<C>> {
        (self.inner.lock().conns.values()).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crate::att::Perms;
    use crate::gap::uuid16;
    use crate::gatt::{Characteristic, Prop};
    use crate::mock::{self, Delegate, Recorder};

    use super::*;

    fn svc() -> Service {
        Service::primary(uuid16(0x180F)).with(Characteristic::new(
            uuid16(0x2A19),
            Prop::READ | Prop::NOTIFY,
            Perms::READ,
            vec![0x64],
        ))
    }

    fn register(r: &Registry<Recorder>, n: u8) -> ConnId {
        let (sock, _) = mock::socket(mock::addr(n));
        let (dlg, _) = Delegate::new();
        r.register(sock, Config::default(), Arc::clone(&dlg) as _, dlg)
    }

    #[test]
    fn database() {
        let r = Registry::<Recorder>::new();
        let h = r.add_service(&svc()).unwrap();
        let v = r.characteristics(uuid16(0x2A19).as_uuid());
        assert_eq!(v.len(), 1);
        assert_eq!(r.read_value(v[0]).unwrap().as_ref(), [0x64]);
        let a = r.write_attribute(Bytes::from_static(&[0x32]), v[0]);
        assert_eq!(r.read_value(v[0]).unwrap().as_ref(), [0x32]);
        assert!(r.write_attribute(Bytes::from_static(&[0x32]), v[0]) > a);
        assert_eq!(r.db().len(), 4);
        r.remove_service(h);
        assert!(r.read_value(v[0]).is_none());
        r.add_service(&svc()).unwrap();
        r.remove_all_services();
        assert!(r.db().is_empty());
    }

    #[test]
    fn connections() {
        let r = Registry::<Recorder>::new();
        r.add_service(&svc()).unwrap();
        let a = register(&r, 1);
        let b = register(&r, 2);
        assert!(a < b);
        assert_eq!(
            r.active_centrals(),
            [Central::new(mock::addr(1)), Central::new(mock::addr(2))]
        );
        let snap = r.connections();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].conn.peer_addr(), mock::addr(1));
        assert_eq!(snap[0].conn.central(), snap[0].central);

        assert!(r.unregister(a));
        assert!(!r.unregister(a));
        assert_eq!(r.active_centrals(), [Central::new(mock::addr(2))]);
        // Snapshot entries remain usable
        assert_eq!(snap[0].id, a);

        // Identifiers are never reused
        let c = register(&r, 1);
        assert!(c > b);
    }

    #[test]
    fn serialized() {
        let r = Arc::new(Registry::<Recorder>::new());
        let hs: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&r);
                thread::spawn(move || {
                    (0..50)
                        .map(|_| r.add_service(&svc()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<Handle> = hs.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 8 * 50);
        let db = r.db();
        let v: Vec<Handle> = db.iter().map(|(h, _, _)| h).collect();
        assert!(v.windows(2).all(|w| w[0] < w[1]));
    }
}
