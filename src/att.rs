//! Attribute Protocol ([Vol 3] Part F).

use std::sync::atomic::{AtomicU16, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

pub use {consts::*, handle::*, pdu::*, perm::*};

use crate::l2cap::Socket;

mod consts;
mod handle;
mod pdu;
mod perm;

/// Error type returned by the ATT layer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Att(#[from] ErrorRsp),
    #[error("timeout while waiting for {0}")]
    Timeout(Opcode),
    #[error("peer disconnected")]
    Disconnected,
}

/// Common ATT result type.
pub type Result<T> = std::result::Result<T, Error>;

/// `ATT_ERROR_RSP` PDU ([Vol 3] Part F, Section 3.4.1.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("ATT {req:#04X}{} failed with {err}", .hdl.map_or(String::new(), |h| format!(" for handle {:#06X}", u16::from(h))))]
pub struct ErrorRsp {
    pub req: u8,
    pub hdl: Option<Handle>,
    pub err: ErrorCode,
}

impl ErrorRsp {
    /// Creates a new error response for the raw request opcode `req`.
    #[inline]
    #[must_use]
    pub const fn new(req: u8, hdl: Option<Handle>, err: ErrorCode) -> Self {
        Self { req, hdl, err }
    }
}

/// ATT bearer ([Vol 3] Part F, Section 3.2.11) over a connected L2CAP socket.
#[derive(Debug)]
pub struct Bearer {
    sock: Box<dyn Socket>,
    mtu: AtomicU16,
    max_mtu: u16,
}

impl Bearer {
    /// Creates an ATT bearer that will accept an MTU of up to `max_mtu`.
    #[inline]
    #[must_use]
    pub fn new(sock: Box<dyn Socket>, max_mtu: u16) -> Self {
        Self {
            sock,
            mtu: AtomicU16::new(MIN_MTU),
            max_mtu: max_mtu.clamp(MIN_MTU, MAX_MTU),
        }
    }

    /// Returns the current ATT MTU.
    #[inline]
    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Acquire)
    }

    /// Returns the next command, request, or confirmation PDU, or [`None`] if
    /// the peer disconnected. Malformed and unknown PDUs are answered with an
    /// error response internally.
    pub async fn recv(&self) -> Result<Option<Pdu>> {
        loop {
            let Some(sdu) = self.sock.recv().await? else {
                return Ok(None);
            };
            // [Vol 3] Part F, Section 3.3
            let Some(&op) = sdu.first() else {
                warn!("Empty PDU");
                self.error_rsp(0, None, ErrorCode::InvalidPdu).await?;
                continue;
            };
            let Ok(op) = Opcode::try_from(op) else {
                warn!("Unknown ATT opcode: {op:#04X}");
                self.error_rsp(op, None, ErrorCode::RequestNotSupported).await?;
                continue;
            };
            if op.is_server_pdu() {
                warn!("Unexpected ATT PDU: {op}");
                continue;
            }
            trace!("ATT recv: {op} ({} bytes)", sdu.len());
            return Ok(Some(Pdu::new(op, sdu)));
        }
    }

    /// Handles `ATT_EXCHANGE_MTU_REQ` ([Vol 3] Part F, Section 3.4.2). The
    /// server MTU is sent in the response and the new MTU takes effect
    /// immediately after.
    pub async fn exchange_mtu(&self, pdu: &Pdu) -> Result<u16> {
        let client = match pdu.exchange_mtu_req() {
            Ok(mtu) => mtu,
            Err(e) => return self.error_rsp(e.req, e.hdl, e.err).await.map(|_| self.mtu()),
        };
        self.exchange_mtu_rsp(self.max_mtu).await?;
        let mtu = client.clamp(MIN_MTU, self.max_mtu);
        self.mtu.store(mtu, Ordering::Release);
        Ok(mtu)
    }

    /// Sends an `ATT_ERROR_RSP` PDU in response to a request that cannot be
    /// performed ([Vol 3] Part F, Section 3.4.1.1). Command-related errors are
    /// ignored.
    pub async fn error_rsp(&self, req: u8, hdl: Option<Handle>, err: ErrorCode) -> Result<()> {
        warn!("ATT response: opcode {req:#04X} for {hdl:?} failed with {err}");
        if Opcode::is_cmd(req) {
            return Ok(());
        }
        let pdu = self.pack(Opcode::ErrorRsp, |p| {
            p.put_u8(req);
            p.put_u16_le(hdl.map_or(0, u16::from));
            p.put_u8(err.into());
        });
        self.send(pdu).await
    }

    /// Returns an outbound PDU, calling `f` to encode it after writing the
    /// opcode. `f` must not exceed the current MTU.
    #[inline]
    fn pack(&self, op: Opcode, f: impl FnOnce(&mut BytesMut)) -> BytesMut {
        let mut pdu = BytesMut::with_capacity(usize::from(self.mtu()));
        pdu.put_u8(op.into());
        f(&mut pdu);
        debug_assert!(pdu.len() <= usize::from(self.mtu()));
        pdu
    }

    /// Sends a PDU over the channel.
    #[inline]
    async fn send(&self, pdu: BytesMut) -> Result<()> {
        let pdu: Bytes = pdu.freeze();
        trace!("ATT send: {:#04X} ({} bytes)", pdu[0], pdu.len());
        Ok(self.sock.send(pdu).await?)
    }
}
