//! In-memory controller, transport, and connection doubles.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::att::{self, ErrorCode, Handle};
use crate::hci::{self, Status};
use crate::l2cap::{Listener, Socket, Transport};
use crate::le::{Addr, AddrKind, RawAddr};
use crate::peer::*;
use crate::SyncMutex;

/// Maximum time to wait for an expected event.
const WAIT: Duration = Duration::from_secs(5);

/// Installs a test log subscriber. Set `RUST_LOG` to see the output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Returns a random device address ending in `n`.
pub fn addr(n: u8) -> Addr {
    Addr::Random(RawAddr::from([n, 0x00, 0x00, 0x00, 0x00, 0xC0]))
}

/// Returns a connected socket and its remote end.
pub fn socket(peer: Addr) -> (Box<dyn Socket>, Peer) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    let sock = MockSocket {
        peer,
        tx: tx_a,
        rx: tokio::sync::Mutex::new(rx_b),
    };
    (Box::new(sock), Peer { tx: Some(tx_b), rx: rx_a })
}

/// Packet socket backed by unbounded channels.
#[derive(Debug)]
struct MockSocket {
    peer: Addr,
    tx: UnboundedSender<Bytes>,
    rx: tokio::sync::Mutex<UnboundedReceiver<Bytes>>,
}

impl Socket for MockSocket {
    fn peer_addr(&self) -> Addr {
        self.peer
    }

    fn recv(&self) -> BoxFuture<'_, io::Result<Option<Bytes>>> {
        Box::pin(async move { Ok(self.rx.lock().await.recv().await) })
    }

    fn send(&self, sdu: Bytes) -> BoxFuture<'_, io::Result<()>> {
        let r = (self.tx.send(sdu)).map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe));
        Box::pin(async move { r })
    }
}

/// Remote end of a [`MockSocket`].
#[derive(Debug)]
pub struct Peer {
    tx: Option<UnboundedSender<Bytes>>,
    rx: UnboundedReceiver<Bytes>,
}

impl Peer {
    /// Sends a PDU to the local socket.
    pub fn send(&self, pdu: &[u8]) {
        if let Some(tx) = self.tx.as_ref() {
            let _ = tx.send(Bytes::copy_from_slice(pdu));
        }
    }

    /// Receives the next PDU sent by the local socket.
    pub async fn recv(&mut self) -> Bytes {
        match tokio::time::timeout(WAIT, self.rx.recv()).await {
            Ok(Some(pdu)) => pdu,
            Ok(None) => panic!("socket closed"),
            Err(_) => panic!("timeout waiting for PDU"),
        }
    }

    /// Sends a request and returns the response.
    pub async fn req(&mut self, pdu: &[u8]) -> Bytes {
        self.send(pdu);
        self.recv().await
    }

    /// Closes the connection, causing the local socket to return EOF.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

type Incoming = io::Result<Box<dyn Socket>>;

/// Transport that produces connections on demand.
#[derive(Debug)]
pub struct MockTransport {
    tx: UnboundedSender<Incoming>,
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<Incoming>>>,
    listen: SyncMutex<Vec<(Addr, AddrKind, u32)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            listen: SyncMutex::default(),
        })
    }

    /// Queues an incoming connection from `peer`.
    pub fn connect(&self, peer: Addr) -> Peer {
        let (sock, p) = socket(peer);
        let _ = self.tx.send(Ok(sock));
        p
    }

    /// Causes the next accept to fail.
    pub fn fail(&self, e: io::ErrorKind) {
        let _ = self.tx.send(Err(io::Error::from(e)));
    }

    /// Returns the parameters of all `listen` calls.
    pub fn listen_calls(&self) -> Vec<(Addr, AddrKind, u32)> {
        self.listen.lock().clone()
    }
}

impl Transport for MockTransport {
    fn listen(&self, addr: Addr, kind: AddrKind, backlog: u32) -> io::Result<Box<dyn Listener>> {
        self.listen.lock().push((addr, kind, backlog));
        Ok(Box::new(MockListener(Arc::clone(&self.rx))))
    }
}

#[derive(Debug)]
struct MockListener(Arc<tokio::sync::Mutex<UnboundedReceiver<Incoming>>>);

impl Listener for MockListener {
    fn accept(&self) -> BoxFuture<'_, io::Result<Box<dyn Socket>>> {
        Box::pin(async move {
            (self.0.lock().await.recv().await)
                .unwrap_or_else(|| Err(io::Error::from(io::ErrorKind::NotConnected)))
        })
    }
}

/// Controller with scripted responses.
#[derive(Debug)]
pub struct MockController {
    addr: Addr,
    /// Status returned by the next advertising enable commands.
    pub adv_status: SyncMutex<Option<Status>>,
    adv_calls: AtomicUsize,
}

impl MockController {
    pub fn new(addr: Addr) -> Arc<Self> {
        Arc::new(Self {
            addr,
            adv_status: SyncMutex::default(),
            adv_calls: AtomicUsize::new(0),
        })
    }

    /// Returns the number of advertising enable commands.
    pub fn adv_calls(&self) -> usize {
        self.adv_calls.load(Ordering::Acquire)
    }
}

impl hci::Controller for MockController {
    fn read_device_address(&self) -> BoxFuture<'_, hci::Result<Addr>> {
        Box::pin(async move { Ok(self.addr) })
    }

    fn enable_le_advertising(&self) -> BoxFuture<'_, hci::Result<()>> {
        self.adv_calls.fetch_add(1, Ordering::AcqRel);
        let r = (*self.adv_status.lock()).map_or(Ok(()), |status| Err(hci::Error::Hci { status }));
        Box::pin(async move { r })
    }
}

/// Connection that records mirrored value updates.
pub struct Recorder {
    id: ConnId,
    central: Central,
    sock: Box<dyn Socket>,
    obs: Arc<dyn Observe>,
    updates: SyncMutex<Vec<(Handle, Bytes)>>,
    /// Causes `update_value` calls to fail.
    pub fail: AtomicBool,
    /// Value whose update is delayed.
    pub slow: SyncMutex<Option<Bytes>>,
}

impl Recorder {
    /// Returns all recorded updates.
    pub fn updates(&self) -> Vec<(Handle, Bytes)> {
        self.updates.lock().clone()
    }

    /// Returns the last value recorded for `hdl`.
    pub fn value(&self, hdl: Handle) -> Option<Bytes> {
        let u = self.updates.lock();
        u.iter().rev().find(|(h, _)| *h == hdl).map(|(_, v)| v.clone())
    }

    /// Simulates a write by the peer that was applied locally.
    pub async fn peer_write(&self, hdl: Handle, val: &[u8]) {
        let val = Bytes::copy_from_slice(val);
        self.updates.lock().push((hdl, val.clone()));
        let cfm = WriteCfm::new(self.central, hdl, crate::gap::uuid16(0x2A00).as_uuid(), val);
        self.obs.did_write(cfm).await;
    }

    /// Simulates the peer disconnecting.
    pub fn disconnect(&self) {
        self.obs.did_disconnect(self.id, self.central, None);
    }

    /// Returns the socket peer address.
    pub fn peer_addr(&self) -> Addr {
        self.sock.peer_addr()
    }
}

impl Connection for Recorder {
    fn open(p: ConnParams) -> Arc<Self> {
        Arc::new(Self {
            id: p.id,
            central: p.central,
            sock: p.sock,
            obs: p.obs,
            updates: SyncMutex::default(),
            fail: AtomicBool::new(false),
            slow: SyncMutex::default(),
        })
    }

    fn central(&self) -> Central {
        self.central
    }

    fn update_value(&self, hdl: Handle, val: Bytes) -> BoxFuture<'_, att::Result<()>> {
        Box::pin(async move {
            let slow = self.slow.lock().as_ref() == Some(&val);
            if slow {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            tokio::task::yield_now().await;
            if self.fail.load(Ordering::Acquire) {
                return Err(att::Error::Disconnected);
            }
            self.updates.lock().push((hdl, val));
            Ok(())
        })
    }
}

/// Event reported to a [`Delegate`].
#[derive(Debug)]
pub enum Event {
    Write(WriteCfm),
    Disconnect(ConnId, Option<String>),
}

/// Authorization and completion capabilities that forward all events to a
/// channel.
#[derive(Debug)]
pub struct Delegate {
    pub deny_read: SyncMutex<Option<ErrorCode>>,
    pub deny_write: SyncMutex<Option<ErrorCode>>,
    tx: UnboundedSender<Event>,
}

impl Delegate {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = Self {
            deny_read: SyncMutex::default(),
            deny_write: SyncMutex::default(),
            tx,
        };
        (Arc::new(this), rx)
    }
}

impl Authorize for Delegate {
    fn will_read(&self, _: &ReadReq) -> IoResult {
        self.deny_read.lock().map_or(Ok(()), Err)
    }

    fn will_write(&self, _: &WriteReq) -> IoResult {
        self.deny_write.lock().map_or(Ok(()), Err)
    }
}

impl Observe for Delegate {
    fn did_write(&self, cfm: WriteCfm) -> BoxFuture<'_, ()> {
        let _ = self.tx.send(Event::Write(cfm));
        Box::pin(async {})
    }

    fn did_disconnect(&self, id: ConnId, _: Central, err: Option<att::Error>) {
        let _ = self.tx.send(Event::Disconnect(id, err.map(|e| e.to_string())));
    }
}
