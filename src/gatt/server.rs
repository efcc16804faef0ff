use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use crate::att::{self, Bearer, ErrorCode, Handle, HandleRange, Opcode, Pdu};
use crate::gap::Uuid;
use crate::peer::{
    Authorize, Central, ConnId, ConnParams, Config, Connection, Observe, ReadReq, WriteCfm,
    WriteReq,
};
use crate::{name_of, SyncMutex};

use super::*;

/// Maximum time to wait for `ATT_HANDLE_VALUE_CFM` ([Vol 3] Part F,
/// Section 3.3.3).
const IND_TIMEOUT: Duration = Duration::from_secs(30);

type CfmTx = mpsc::UnboundedSender<WriteCfm>;

/// GATT server providing the attribute database to a single client.
///
/// The server keeps a private mirror of the database, which is updated by its
/// own peer's writes and by [`Connection::update_value`]. Client
/// Characteristic Configuration descriptors are per-client state and only
/// exist in the mirror.
pub struct Server {
    id: ConnId,
    central: Central,
    br: Bearer,
    cfg: Config,
    db: SyncMutex<Db>,
    prep: SyncMutex<Vec<Prepared>>,
    ind: tokio::sync::Mutex<()>,
    cfm: Notify,
    closed: AtomicBool,
    auth: Arc<dyn Authorize>,
    obs: Arc<dyn Observe>,
}

impl Connection for Server {
    fn open(p: ConnParams) -> Arc<Self> {
        let this = Arc::new(Self {
            id: p.id,
            central: p.central,
            br: Bearer::new(p.sock, p.cfg.mtu),
            cfg: p.cfg,
            db: SyncMutex::new(p.db),
            prep: SyncMutex::default(),
            ind: tokio::sync::Mutex::default(),
            cfm: Notify::new(),
            closed: AtomicBool::new(false),
            auth: p.auth,
            obs: p.obs,
        });
        tokio::spawn(Arc::clone(&this).serve());
        this
    }

    #[inline]
    fn central(&self) -> Central {
        self.central
    }

    fn update_value(&self, hdl: Handle, val: Bytes) -> BoxFuture<'_, att::Result<()>> {
        Box::pin(self.update(hdl, val))
    }
}

impl Server {
    /// Serves client requests until the peer disconnects. Write confirmations
    /// are delivered by a separate task so that the receive loop keeps
    /// running while they are being processed.
    async fn serve(self: Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteCfm>();
        let obs = Arc::clone(&self.obs);
        let done = tokio::spawn(async move {
            while let Some(cfm) = rx.recv().await {
                obs.did_write(cfm).await;
            }
        });
        debug!("GATT server started for {} ({})", self.central, self.id);
        let r = self.run(&tx).await;
        self.closed.store(true, Ordering::Release);
        self.cfm.notify_waiters();
        drop(tx);
        if let Err(e) = done.await {
            warn!("Write confirmation task for {} failed: {e}", self.id);
        }
        let err = match r {
            Ok(()) => {
                debug!("Peer {} ({}) disconnected", self.central, self.id);
                None
            }
            Err(e) => {
                warn!("GATT server for {} ({}) failed: {e}", self.central, self.id);
                Some(e)
            }
        };
        self.obs.did_disconnect(self.id, self.central, err);
    }

    /// Runs the main receive loop.
    async fn run(&self, tx: &CfmTx) -> att::Result<()> {
        while let Some(pdu) = self.br.recv().await? {
            if pdu.opcode() == Opcode::HandleValueCfm {
                self.cfm.notify_waiters();
                continue;
            }
            self.handle(&pdu, tx).await?;
        }
        Ok(())
    }

    /// Handles one client request or command.
    async fn handle(&self, pdu: &Pdu, tx: &CfmTx) -> att::Result<()> {
        let r = match pdu.opcode() {
            Opcode::ExchangeMtuReq => {
                let mtu = self.br.exchange_mtu(pdu).await?;
                debug!("ATT MTU for {}: {mtu}", self.central);
                return Ok(());
            }
            Opcode::FindInformationReq => self.find_information(pdu).await,
            Opcode::FindByTypeValueReq => self.find_by_type_value(pdu).await,
            Opcode::ReadByTypeReq => self.read_by_type(pdu).await,
            Opcode::ReadReq | Opcode::ReadBlobReq => self.read(pdu).await,
            Opcode::ReadByGroupTypeReq => self.read_by_group_type(pdu).await,
            Opcode::WriteReq | Opcode::WriteCmd => self.write(pdu, tx).await,
            Opcode::PrepareWriteReq => self.prepare_write(pdu).await,
            Opcode::ExecuteWriteReq => self.execute_write(pdu, tx).await,
            _ => Err(pdu.err(ErrorCode::RequestNotSupported).into()),
        };
        match r {
            Err(att::Error::Att(e)) => {
                (self.obs).log(self.central, &format!("Request denied: {e}"));
                self.br.error_rsp(e.req, e.hdl, e.err).await
            }
            r => r,
        }
    }

    /// Handles `ATT_FIND_INFORMATION_REQ` ([Vol 3] Part F, Section 3.4.3.1).
    async fn find_information(&self, pdu: &Pdu) -> att::Result<()> {
        let hdls = pdu.find_information_req()?;
        let v: Vec<(Handle, Uuid)> = (self.db.lock().subset(hdls).iter())
            .map(|at| (at.hdl, at.typ))
            .collect();
        if v.is_empty() {
            return Err(pdu.hdl_err(ErrorCode::AttributeNotFound, hdls.start()).into());
        }
        self.br.find_information_rsp(v.into_iter()).await
    }

    /// Handles `ATT_FIND_BY_TYPE_VALUE_REQ` ([Vol 3] Part F, Section 3.4.3.3).
    async fn find_by_type_value(&self, pdu: &Pdu) -> att::Result<()> {
        let (hdls, typ, val) = pdu.find_by_type_value_req()?;
        let v: Vec<HandleRange> = {
            let db = self.db.lock();
            (db.subset(hdls).iter())
                .filter(|at| at.typ == typ && at.val.as_ref() == val)
                .map(|at| (db.service_range(at.hdl)).unwrap_or(HandleRange::new(at.hdl, at.hdl)))
                .collect()
        };
        if v.is_empty() {
            return Err(pdu.hdl_err(ErrorCode::AttributeNotFound, hdls.start()).into());
        }
        self.br.find_by_type_value_rsp(v.into_iter()).await
    }

    /// Handles `ATT_READ_BY_TYPE_REQ` ([Vol 3] Part F, Section 3.4.4.1). The
    /// response ends at the first attribute that cannot be read.
    async fn read_by_type(&self, pdu: &Pdu) -> att::Result<()> {
        let (hdls, typ) = pdu.read_by_type_req()?;
        let v: Vec<(Attr, IoResult)> = {
            let db = self.db.lock();
            (db.subset(hdls).iter())
                .filter(|at| at.typ == typ)
                .map(|at| (at.clone(), readable(&db, at)))
                .collect()
        };
        let Some(first) = v.first().map(|(at, _)| at.hdl) else {
            return Err(pdu.hdl_err(ErrorCode::AttributeNotFound, hdls.start()).into());
        };
        let mut out = Vec::with_capacity(v.len());
        for (at, r) in v {
            match r.and_then(|_| self.will_read(&at, 0)) {
                Ok(()) => out.push((at.hdl, at.val)),
                Err(e) if at.hdl == first => return Err(pdu.hdl_err(e, at.hdl).into()),
                Err(_) => break,
            }
        }
        (self.br)
            .read_by_type_rsp(out.iter().map(|(h, v)| (*h, v.as_ref())))
            .await
    }

    /// Handles `ATT_READ_REQ` and `ATT_READ_BLOB_REQ`
    /// ([Vol 3] Part F, Sections 3.4.4.3 and 3.4.4.5).
    async fn read(&self, pdu: &Pdu) -> att::Result<()> {
        let (hdl, off, rsp) = if pdu.opcode() == Opcode::ReadReq {
            (pdu.read_req()?, 0, Opcode::ReadRsp)
        } else {
            let (hdl, off) = pdu.read_blob_req()?;
            (hdl, off, Opcode::ReadBlobRsp)
        };
        let at = {
            let db = self.db.lock();
            let at = (db.get(hdl).cloned()).ok_or_else(|| pdu.hdl_err(ErrorCode::InvalidHandle, hdl))?;
            readable(&db, &at).map_err(|e| pdu.hdl_err(e, hdl))?;
            at
        };
        self.will_read(&at, off).map_err(|e| pdu.hdl_err(e, hdl))?;
        let Some(v) = at.val.get(usize::from(off)..) else {
            return Err(pdu.hdl_err(ErrorCode::InvalidOffset, hdl).into());
        };
        self.br.read_rsp(rsp, v).await
    }

    /// Handles `ATT_READ_BY_GROUP_TYPE_REQ` ([Vol 3] Part F,
    /// Section 3.4.4.9). Only primary services are grouping attributes
    /// ([Vol 3] Part G, Section 4.4.1).
    async fn read_by_group_type(&self, pdu: &Pdu) -> att::Result<()> {
        let (hdls, typ) = pdu.read_by_group_type_req()?;
        if typ != Declaration::PRIMARY_SERVICE {
            return Err(pdu.hdl_err(ErrorCode::UnsupportedGroupType, hdls.start()).into());
        }
        let v: Vec<(HandleRange, Bytes)> = (self.db.lock())
            .services(hdls, Declaration::PRIMARY_SERVICE)
            .map(|(r, at)| (r, at.val.clone()))
            .collect();
        if v.is_empty() {
            return Err(pdu.hdl_err(ErrorCode::AttributeNotFound, hdls.start()).into());
        }
        (self.br)
            .read_by_group_type_rsp(v.iter().map(|(r, v)| (*r, v.as_ref())))
            .await
    }

    /// Handles `ATT_WRITE_REQ` and `ATT_WRITE_CMD`
    /// ([Vol 3] Part F, Sections 3.4.5.1 and 3.4.5.3).
    async fn write(&self, pdu: &Pdu, tx: &CfmTx) -> att::Result<()> {
        let (hdl, v) = pdu.write_req()?;
        let cmd = pdu.opcode() == Opcode::WriteCmd;
        let prop = if cmd { Prop::WRITE_CMD } else { Prop::WRITE };
        let cfm = (self.commit(hdl, 0, v, prop)).map_err(|e| pdu.hdl_err(e, hdl))?;
        self.confirm(tx, cfm);
        if cmd {
            return Ok(());
        }
        self.br.write_rsp().await
    }

    /// Handles `ATT_PREPARE_WRITE_REQ` ([Vol 3] Part F, Section 3.4.6.1).
    async fn prepare_write(&self, pdu: &Pdu) -> att::Result<()> {
        let (hdl, off, v) = pdu.prepare_write_req()?;
        {
            let db = self.db.lock();
            let at = db.get(hdl).ok_or_else(|| pdu.hdl_err(ErrorCode::InvalidHandle, hdl))?;
            writable(&db, at, Prop::WRITE).map_err(|e| pdu.hdl_err(e, hdl))?;
        }
        {
            let mut q = self.prep.lock();
            if q.len() >= self.cfg.max_prepared_writes {
                return Err(pdu.hdl_err(ErrorCode::PrepareQueueFull, hdl).into());
            }
            q.push(Prepared {
                hdl,
                off,
                val: Bytes::copy_from_slice(v),
            });
        }
        self.br.prepare_write_rsp(hdl, off, v).await
    }

    /// Handles `ATT_EXECUTE_WRITE_REQ` ([Vol 3] Part F, Section 3.4.6.3).
    /// Queued writes are applied in order. The first failure discards the
    /// remaining writes.
    async fn execute_write(&self, pdu: &Pdu, tx: &CfmTx) -> att::Result<()> {
        let exec = pdu.execute_write_req()?;
        let q = std::mem::take(&mut *self.prep.lock());
        if exec {
            for w in q {
                let cfm = (self.commit(w.hdl, usize::from(w.off), &w.val, Prop::WRITE))
                    .map_err(|e| pdu.hdl_err(e, w.hdl))?;
                self.confirm(tx, cfm);
            }
        } else {
            trace!("Cancelled {} prepared writes", q.len());
        }
        self.br.execute_write_rsp().await
    }

    /// Applies a write of `v` at offset `off` to the local mirror. Returns the
    /// confirmation to deliver to the observer, or [`None`] for descriptor
    /// writes that only change per-client state.
    fn commit(
        &self,
        hdl: Handle,
        off: usize,
        v: &[u8],
        prop: Prop,
    ) -> std::result::Result<Option<WriteCfm>, ErrorCode> {
        let (at, info) = {
            let db = self.db.lock();
            let at = db.get(hdl).ok_or(ErrorCode::InvalidHandle)?;
            writable(&db, at, prop)?;
            (at.clone(), db.characteristic(hdl))
        };
        let Some(head) = at.val.get(..off) else {
            return Err(ErrorCode::InvalidOffset);
        };
        if off + v.len() > att::MAX_VAL_LEN {
            return Err(ErrorCode::InvalidAttributeValueLength);
        }
        let new = Bytes::from([head, v].concat());
        if at.typ == Descriptor::CLIENT_CHARACTERISTIC_CONFIGURATION {
            let cccd = Cccd::from_value(&new).ok_or(ErrorCode::InvalidAttributeValueLength)?;
            let props = info.map_or(Prop::empty(), |c| c.props);
            if (cccd.contains(Cccd::NOTIFY) && !props.contains(Prop::NOTIFY))
                || (cccd.contains(Cccd::INDICATE) && !props.contains(Prop::INDICATE))
            {
                return Err(ErrorCode::CccdImproperlyConfigured);
            }
            debug!("{} subscription for {hdl}: {cccd:?}", self.central);
            self.db.lock().write(new, hdl);
            return Ok(None);
        }
        self.auth.will_write(&WriteReq {
            central: self.central,
            hdl,
            uuid: at.typ,
            value: at.val,
            new_value: new.clone(),
            mtu: self.br.mtu(),
        })?;
        self.db.lock().write(new.clone(), hdl);
        Ok(Some(WriteCfm::new(self.central, hdl, at.typ, new)))
    }

    /// Queues a write confirmation for delivery to the observer.
    #[inline]
    fn confirm(&self, tx: &CfmTx, cfm: Option<WriteCfm>) {
        if let Some(cfm) = cfm {
            // The receiver only goes away after the receive loop ends
            let _ = tx.send(cfm);
        }
    }

    /// Calls the read authorization hook for a non-declaration attribute.
    fn will_read(&self, at: &Attr, off: u16) -> IoResult {
        if at.is_decl() {
            return Ok(());
        }
        self.auth.will_read(&ReadReq {
            central: self.central,
            hdl: at.hdl,
            uuid: at.typ,
            value: at.val.clone(),
            offset: off,
            mtu: self.br.mtu(),
        })
    }

    /// Updates the mirrored value at `hdl` and sends a notification or
    /// indication if the client subscribed to it.
    async fn update(&self, hdl: Handle, val: Bytes) -> att::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(att::Error::Disconnected);
        }
        let cccd = {
            let mut db = self.db.lock();
            if db.get(hdl).is_none() {
                trace!("{} has no attribute {hdl}", self.id);
                return Ok(());
            }
            db.write(val.clone(), hdl);
            let Some(c) = db.characteristic(hdl).filter(|c| c.vhdl == hdl) else {
                return Ok(());
            };
            (c.cccd.and_then(|h| db.get(h)))
                .and_then(|at| Cccd::from_value(&at.val))
                .unwrap_or_default()
        };
        if cccd.contains(Cccd::NOTIFY) {
            self.br.handle_value(Opcode::HandleValueNtf, hdl, &val).await
        } else if cccd.contains(Cccd::INDICATE) {
            self.indicate(hdl, &val).await
        } else {
            Ok(())
        }
    }

    /// Sends an indication and waits for the client to confirm it. Only one
    /// indication may be outstanding at a time.
    async fn indicate(&self, hdl: Handle, val: &[u8]) -> att::Result<()> {
        let _g = self.ind.lock().await;
        let mut cfm = std::pin::pin!(self.cfm.notified());
        cfm.as_mut().enable();
        if self.closed.load(Ordering::Acquire) {
            return Err(att::Error::Disconnected);
        }
        self.br.handle_value(Opcode::HandleValueInd, hdl, val).await?;
        match tokio::time::timeout(IND_TIMEOUT, cfm).await {
            Ok(()) if !self.closed.load(Ordering::Acquire) => Ok(()),
            Ok(()) => Err(att::Error::Disconnected),
            Err(_) => Err(att::Error::Timeout(Opcode::HandleValueInd)),
        }
    }
}

impl Debug for Server {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(name_of!(Server))
            .field("id", &self.id)
            .field("central", &self.central)
            .field("br", &self.br)
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

/// Queued prepared write.
#[derive(Debug)]
struct Prepared {
    hdl: Handle,
    off: u16,
    val: Bytes,
}

type IoResult = std::result::Result<(), ErrorCode>;

/// Checks attribute permissions and characteristic properties for a read.
fn readable(db: &Db, at: &Attr) -> IoResult {
    at.perms.test_read()?;
    match db.characteristic(at.hdl) {
        Some(c) if c.vhdl == at.hdl && !c.props.contains(Prop::READ) => {
            Err(ErrorCode::ReadNotPermitted)
        }
        _ => Ok(()),
    }
}

/// Checks attribute permissions and characteristic properties for a write
/// performed with a procedure that requires `prop`.
fn writable(db: &Db, at: &Attr, prop: Prop) -> IoResult {
    at.perms.test_write()?;
    match db.characteristic(at.hdl) {
        Some(c) if c.vhdl == at.hdl && !c.props.contains(prop) => Err(ErrorCode::WriteNotPermitted),
        _ => Ok(()),
    }
}
