use std::sync::Arc;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::att::{self, Handle};
use crate::gap::Uuid;
use crate::gatt::{self, Db, Service};
use crate::hci::{self, Controller};
use crate::l2cap::{Listener, Socket, Transport};
use crate::peer::*;
use crate::{Error, Registry, Result, SyncMutex};

/// Listening socket backlog.
pub const LISTEN_BACKLOG: u32 = 10;

/// Read authorization hook.
pub type ReadHook = Arc<dyn Fn(&ReadReq) -> IoResult + Send + Sync>;

/// Write authorization hook.
pub type WriteHook = Arc<dyn Fn(&WriteReq) -> IoResult + Send + Sync>;

/// Write completion hook.
pub type WriteCfmHook = Arc<dyn Fn(&WriteCfm) + Send + Sync>;

/// GATT peripheral server.
///
/// The server accepts connections from remote centrals, serves each one with a
/// `C` engine, and keeps all engines consistent with the shared attribute
/// database by propagating every value change to them.
pub struct Peripheral<C: Connection = gatt::Server> {
    shared: Arc<Shared<C>>,
    transport: Arc<dyn Transport>,
}

/// Server lifecycle state.
#[derive(Debug, Default)]
enum State {
    #[default]
    Stopped,
    Starting,
    Running {
        ct: CancellationToken,
        task: JoinHandle<()>,
        listener: Arc<dyn Listener>,
    },
}

impl<C: Connection> Peripheral<C> {
    /// Creates a stopped server.
    #[must_use]
    pub fn new(ctlr: Arc<dyn Controller>, transport: Arc<dyn Transport>, cfg: Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                reg: Registry::new(),
                ctlr,
                cfg,
                state: SyncMutex::default(),
                will_read: SyncMutex::default(),
                will_write: SyncMutex::default(),
                did_write: SyncMutex::default(),
            }),
            transport,
        }
    }

    /// Starts advertising and accepting connections. If accepting a
    /// connection later fails, the server returns to the stopped state and
    /// must be started again.
    ///
    /// # Panics
    ///
    /// If the server is not stopped.
    pub async fn start(&self) -> Result<()> {
        {
            let mut st = self.shared.state.lock();
            assert!(
                matches!(*st, State::Stopped),
                "peripheral server is already started"
            );
            *st = State::Starting;
        }
        let listener = match self.listen().await {
            Ok(l) => l,
            Err(e) => {
                *self.shared.state.lock() = State::Stopped;
                error!("Failed to start peripheral server: {e}");
                return Err(e);
            }
        };
        let ct = CancellationToken::new();
        let mut st = self.shared.state.lock();
        // The accept loop cannot report a failure before the state is set
        let task = tokio::spawn(Arc::clone(&self.shared).accept_loop(
            Arc::clone(&listener),
            ct.clone(),
        ));
        *st = State::Running { ct, task, listener };
        info!("Peripheral server started");
        Ok(())
    }

    /// Enables advertising and opens the listening socket.
    async fn listen(&self) -> Result<Arc<dyn Listener>> {
        let addr = self.shared.ctlr.read_device_address().await?;
        hci::ensure_advertising(self.shared.ctlr.as_ref()).await?;
        let l = self.transport.listen(addr, addr.kind(), LISTEN_BACKLOG)?;
        debug!("Listening on {addr}");
        Ok(Arc::from(l))
    }

    /// Stops accepting connections. Existing connections are not affected.
    ///
    /// # Panics
    ///
    /// If the server is not running.
    pub fn stop(&self) {
        let st = std::mem::take(&mut *self.shared.state.lock());
        let State::Running { ct, task, listener } = st else {
            panic!("peripheral server is not running");
        };
        drop(listener);
        ct.cancel();
        drop(task);
        info!("Peripheral server stopped");
    }

    /// Returns whether the server is running.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Adds a service to the attribute database and returns its handle.
    /// Connections that are already open do not see the new service.
    pub fn add_service(&self, s: &Service) -> Result<Handle> {
        (self.shared.reg.add_service(s)).ok_or(Error::HandleSpaceExhausted)
    }

    /// Removes the service declared at `hdl`.
    #[inline]
    pub fn remove_service(&self, hdl: Handle) {
        self.shared.reg.remove_service(hdl);
    }

    /// Removes all services.
    #[inline]
    pub fn remove_all_services(&self) {
        self.shared.reg.remove_all_services();
    }

    /// Sets the value of the characteristic at `hdl` and propagates it to all
    /// connected centrals. Returns after every connection was offered the
    /// update.
    pub async fn write(&self, val: impl Into<Bytes>, hdl: Handle) {
        self.shared.propagate(val.into(), hdl, None).await;
    }

    /// Returns the current attribute value at `hdl`.
    #[inline]
    #[must_use]
    pub fn read_value(&self, hdl: Handle) -> Option<Bytes> {
        self.shared.reg.read_value(hdl)
    }

    /// Returns the handles of all attributes of type `uuid`.
    #[inline]
    #[must_use]
    pub fn characteristics(&self, uuid: impl Into<Uuid>) -> Vec<Handle> {
        self.shared.reg.characteristics(uuid.into())
    }

    /// Returns the identities of all connected centrals.
    #[inline]
    #[must_use]
    pub fn active_centrals(&self) -> Vec<Central> {
        self.shared.reg.active_centrals()
    }

    /// Returns a copy of the attribute database.
    #[inline]
    #[must_use]
    pub fn db_snapshot(&self) -> Db {
        self.shared.reg.db()
    }

    /// Sets a hook that can deny peer reads.
    pub fn set_will_read(&self, f: impl Fn(&ReadReq) -> IoResult + Send + Sync + 'static) {
        *self.shared.will_read.lock() = Some(Arc::new(f));
    }

    /// Sets a hook that can deny peer writes.
    pub fn set_will_write(&self, f: impl Fn(&WriteReq) -> IoResult + Send + Sync + 'static) {
        *self.shared.will_write.lock() = Some(Arc::new(f));
    }

    /// Sets a hook that is called after a peer write was propagated.
    pub fn set_did_write(&self, f: impl Fn(&WriteCfm) + Send + Sync + 'static) {
        *self.shared.did_write.lock() = Some(Arc::new(f));
    }
}

impl<C: Connection> Drop for Peripheral<C> {
    fn drop(&mut self) {
        let st = std::mem::take(&mut *self.shared.state.lock());
        if let State::Running { ct, .. } = st {
            ct.cancel();
        }
    }
}

/// State shared by the server, its accept loop, and its connections.
struct Shared<C> {
    reg: Registry<C>,
    ctlr: Arc<dyn Controller>,
    cfg: Config,
    state: SyncMutex<State>,
    will_read: SyncMutex<Option<ReadHook>>,
    will_write: SyncMutex<Option<WriteHook>>,
    did_write: SyncMutex<Option<WriteCfmHook>>,
}

impl<C: Connection> Shared<C> {
    #[inline]
    fn is_running(&self) -> bool {
        matches!(*self.state.lock(), State::Running { .. })
    }

    /// Accepts connections until cancelled or until accept fails. A failure
    /// stops the server.
    async fn accept_loop(self: Arc<Self>, l: Arc<dyn Listener>, ct: CancellationToken) {
        while !ct.is_cancelled() {
            let r = tokio::select! {
                biased;
                _ = ct.cancelled() => break,
                r = l.accept() => r,
            };
            match r {
                Ok(sock) => self.accept(sock),
                Err(e) => {
                    error!("Accept loop terminated: {e}");
                    self.listener_failed(&l);
                    return;
                }
            }
        }
        debug!("Accept loop cancelled");
    }

    /// Moves the server to the stopped state if `l` is still the active
    /// listener.
    fn listener_failed(&self, l: &Arc<dyn Listener>) {
        let mut st = self.state.lock();
        let active = matches!(&*st, State::Running { listener, .. }
            if Arc::as_ptr(listener).cast::<()>() == Arc::as_ptr(l).cast::<()>());
        if !active {
            return;
        }
        let old = std::mem::take(&mut *st);
        drop(st);
        drop(old);
        info!("Peripheral server stopped");
    }

    /// Registers a new connection.
    fn accept(self: &Arc<Self>, sock: Box<dyn Socket>) {
        let central = Central::from(sock.peer_addr());
        let auth: Arc<dyn Authorize> = Arc::clone(self) as _;
        let obs: Arc<dyn Observe> = Arc::clone(self) as _;
        let id = self.reg.register(sock, self.cfg, auth, obs);
        info!("Accepted connection {id} from {central}");
    }

    /// Writes a new value to the shared database and offers it to every
    /// connection except those of `exclude`.
    ///
    /// Updates of one connection are applied one at a time. An update that
    /// is older than the last one applied to the same handle is dropped, so
    /// every connection ends up with the value of the latest database write.
    async fn propagate(&self, val: Bytes, hdl: Handle, exclude: Option<Central>) {
        let seq = self.reg.write_attribute(val.clone(), hdl);
        let mut js = JoinSet::new();
        for e in self.reg.connections() {
            let skip = Some(e.central) == exclude;
            let val = val.clone();
            js.spawn(async move {
                let mut applied = e.applied.lock().await;
                let last = applied.entry(hdl).or_default();
                if *last > seq {
                    trace!("Dropped stale update of {hdl} for {}", e.id);
                    return;
                }
                *last = seq;
                if skip {
                    return;
                }
                if let Err(err) = e.conn.update_value(hdl, val).await {
                    warn!("Failed to update {hdl} for {} ({}): {err}", e.central, e.id);
                }
            });
        }
        while let Some(r) = js.join_next().await {
            if let Err(e) = r {
                error!("Update task failed: {e}");
            }
        }
    }
}

impl<C: Connection> Authorize for Shared<C> {
    fn will_read(&self, req: &ReadReq) -> IoResult {
        let f = self.will_read.lock().clone();
        f.map_or(Ok(()), |f| f(req))
    }

    fn will_write(&self, req: &WriteReq) -> IoResult {
        let f = self.will_write.lock().clone();
        f.map_or(Ok(()), |f| f(req))
    }
}

impl<C: Connection> Observe for Shared<C> {
    fn did_write(&self, cfm: WriteCfm) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            (self.propagate(cfm.value.clone(), cfm.hdl, Some(cfm.central))).await;
            let f = self.did_write.lock().clone();
            if let Some(f) = f {
                f(&cfm);
            }
        })
    }

    fn did_disconnect(&self, id: ConnId, central: Central, err: Option<att::Error>) {
        match err {
            None => info!("Connection {id} from {central} closed"),
            Some(e) => info!("Connection {id} from {central} closed: {e}"),
        }
        if !self.reg.unregister(id) || !self.is_running() {
            return;
        }
        let ctlr = Arc::clone(&self.ctlr);
        tokio::spawn(async move {
            if let Err(e) = hci::ensure_advertising(ctlr.as_ref()).await {
                warn!("Failed to re-enable advertising: {e}");
            }
        });
    }

    fn log(&self, central: Central, msg: &str) {
        debug!("[{central}] {msg}");
    }
}
