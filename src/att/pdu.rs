use bytes::Buf;

use crate::gap::{Uuid, Uuid16};

use super::*;

/// PDU response result.
pub type RspResult<T> = std::result::Result<T, ErrorRsp>;

/// Received ATT protocol data unit ([Vol 3] Part F, Section 3.3).
#[derive(Clone, Debug)]
pub struct Pdu {
    op: Opcode,
    sdu: Bytes,
}

impl Pdu {
    /// Creates a PDU from the received L2CAP SDU, which starts with the opcode.
    #[inline]
    #[must_use]
    pub fn new(op: Opcode, sdu: Bytes) -> Self {
        Self { op, sdu }
    }

    /// Returns the PDU opcode.
    #[inline]
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.op
    }

    /// Returns a non-handle error response.
    #[inline]
    pub const fn err(&self, err: ErrorCode) -> ErrorRsp {
        ErrorRsp::new(self.op as _, None, err)
    }

    /// Returns a handle-specific error response.
    #[inline]
    pub const fn hdl_err(&self, err: ErrorCode, hdl: Handle) -> ErrorRsp {
        ErrorRsp::new(self.op as _, Some(hdl), err)
    }

    /// Returns the result of calling `f` to unpack PDU parameters, which must
    /// be at least `min` bytes long.
    #[inline]
    fn unpack<'a, V>(
        &'a self,
        op: Opcode,
        min: usize,
        f: impl FnOnce(&mut &'a [u8]) -> RspResult<V>,
    ) -> RspResult<V> {
        debug_assert_eq!(self.op, op);
        match self.sdu.get(1..) {
            Some(mut p) if p.len() >= min => f(&mut p),
            _ => Err(self.err(ErrorCode::InvalidPdu)),
        }
    }

    /// Unpacks start/end handle range ([Vol 3] Part F, Section 3.4.3.1).
    #[inline]
    fn handle_range(&self, p: &mut &[u8]) -> RspResult<HandleRange> {
        let (start, end) = (p.get_u16_le(), p.get_u16_le());
        match (Handle::new(start), Handle::new(end)) {
            (Some(s), Some(e)) if s <= e => Ok(HandleRange::new(s, e)),
            // [Vol 3] Part F, Section 3.4.3.1
            (Some(s), _) => Err(self.hdl_err(ErrorCode::InvalidHandle, s)),
            (None, _) => Err(self.err(ErrorCode::InvalidHandle)),
        }
    }

    /// Unpacks a handle.
    #[inline]
    fn handle(&self, p: &mut &[u8]) -> RspResult<Handle> {
        Handle::new(p.get_u16_le()).ok_or_else(|| self.err(ErrorCode::InvalidHandle))
    }

    /// Unpacks a 16- or 128-bit UUID occupying the rest of the PDU.
    #[inline]
    fn uuid(&self, p: &mut &[u8], hdls: HandleRange) -> RspResult<Uuid> {
        let u = match p.len() {
            2 | 16 => Uuid::try_from(*p).ok(),
            _ => return Err(self.err(ErrorCode::InvalidPdu)),
        };
        p.advance(p.len());
        u.ok_or_else(|| self.hdl_err(ErrorCode::AttributeNotFound, hdls.start()))
    }
}

impl AsRef<[u8]> for Pdu {
    /// Returns PDU bytes.
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.sdu.as_ref()
    }
}

/// Request parameter decoders.
impl Pdu {
    /// Returns `ATT_EXCHANGE_MTU_REQ` PDU parameters
    /// ([Vol 3] Part F, Section 3.4.2.1).
    pub fn exchange_mtu_req(&self) -> RspResult<u16> {
        self.unpack(Opcode::ExchangeMtuReq, 2, |p| Ok(p.get_u16_le()))
    }

    /// Returns `ATT_FIND_INFORMATION_REQ` PDU parameters
    /// ([Vol 3] Part F, Section 3.4.3.1).
    pub fn find_information_req(&self) -> RspResult<HandleRange> {
        self.unpack(Opcode::FindInformationReq, 4, |p| self.handle_range(p))
    }

    /// Returns `ATT_FIND_BY_TYPE_VALUE_REQ` PDU parameters
    /// ([Vol 3] Part F, Section 3.4.3.3).
    pub fn find_by_type_value_req(&self) -> RspResult<(HandleRange, Uuid16, &[u8])> {
        self.unpack(Opcode::FindByTypeValueReq, 6, |p| {
            let hdls = self.handle_range(p)?;
            let typ = Uuid16::new(p.get_u16_le())
                .ok_or_else(|| self.hdl_err(ErrorCode::AttributeNotFound, hdls.start()))?;
            Ok((hdls, typ, *p))
        })
    }

    /// Returns `ATT_READ_BY_TYPE_REQ` PDU parameters
    /// ([Vol 3] Part F, Section 3.4.4.1).
    pub fn read_by_type_req(&self) -> RspResult<(HandleRange, Uuid)> {
        self.unpack(Opcode::ReadByTypeReq, 6, |p| {
            let hdls = self.handle_range(p)?;
            Ok((hdls, self.uuid(p, hdls)?))
        })
    }

    /// Returns `ATT_READ_REQ` PDU parameters ([Vol 3] Part F, Section 3.4.4.3).
    pub fn read_req(&self) -> RspResult<Handle> {
        self.unpack(Opcode::ReadReq, 2, |p| self.handle(p))
    }

    /// Returns `ATT_READ_BLOB_REQ` PDU parameters
    /// ([Vol 3] Part F, Section 3.4.4.5).
    pub fn read_blob_req(&self) -> RspResult<(Handle, u16)> {
        self.unpack(Opcode::ReadBlobReq, 4, |p| Ok((self.handle(p)?, p.get_u16_le())))
    }

    /// Returns `ATT_READ_BY_GROUP_TYPE_REQ` PDU parameters
    /// ([Vol 3] Part F, Section 3.4.4.9).
    pub fn read_by_group_type_req(&self) -> RspResult<(HandleRange, Uuid)> {
        self.unpack(Opcode::ReadByGroupTypeReq, 6, |p| {
            let hdls = self.handle_range(p)?;
            Ok((hdls, self.uuid(p, hdls)?))
        })
    }

    /// Returns `ATT_WRITE_REQ` or `ATT_WRITE_CMD` PDU parameters
    /// ([Vol 3] Part F, Sections 3.4.5.1 and 3.4.5.3).
    pub fn write_req(&self) -> RspResult<(Handle, &[u8])> {
        debug_assert!(matches!(self.op, Opcode::WriteReq | Opcode::WriteCmd));
        self.unpack(self.op, 2, |p| Ok((self.handle(p)?, *p)))
    }

    /// Returns `ATT_PREPARE_WRITE_REQ` PDU parameters
    /// ([Vol 3] Part F, Section 3.4.6.1).
    pub fn prepare_write_req(&self) -> RspResult<(Handle, u16, &[u8])> {
        self.unpack(Opcode::PrepareWriteReq, 4, |p| {
            let hdl = self.handle(p)?;
            Ok((hdl, p.get_u16_le(), *p))
        })
    }

    /// Returns `ATT_EXECUTE_WRITE_REQ` PDU parameters
    /// ([Vol 3] Part F, Section 3.4.6.3). Returns `true` to write all pending
    /// prepared values and `false` to cancel them.
    pub fn execute_write_req(&self) -> RspResult<bool> {
        self.unpack(Opcode::ExecuteWriteReq, 1, |p| match p.get_u8() {
            0x00 => Ok(false),
            0x01 => Ok(true),
            _ => Err(self.err(ErrorCode::InvalidPdu)),
        })
    }
}

/// Response encoders.
impl Bearer {
    /// Sends an `ATT_EXCHANGE_MTU_RSP` PDU ([Vol 3] Part F, Section 3.4.2.2).
    pub(super) async fn exchange_mtu_rsp(&self, mtu: u16) -> Result<()> {
        let rsp = self.pack(Opcode::ExchangeMtuRsp, |p| p.put_u16_le(mtu));
        self.send(rsp).await
    }

    /// Sends an `ATT_FIND_INFORMATION_RSP` PDU
    /// ([Vol 3] Part F, Section 3.4.3.2). The format is determined by the first
    /// entry and the response ends at the first entry with a different UUID
    /// size.
    pub async fn find_information_rsp(
        &self,
        it: impl Iterator<Item = (Handle, Uuid)> + Send,
    ) -> Result<()> {
        let lim = usize::from(self.mtu());
        let rsp = self.pack(Opcode::FindInformationRsp, move |p| {
            let mut it = it.peekable();
            let Some(&(_, first)) = it.peek() else { return };
            let short = first.as_u16().is_some();
            p.put_u8(if short { 0x01 } else { 0x02 });
            for (h, u) in it {
                let v = u.to_vec();
                if (v.len() == 2) != short || p.len() + 2 + v.len() > lim {
                    break;
                }
                p.put_u16_le(h.into());
                p.put_slice(&v);
            }
        });
        self.send(rsp).await
    }

    /// Sends an `ATT_FIND_BY_TYPE_VALUE_RSP` PDU
    /// ([Vol 3] Part F, Section 3.4.3.4).
    pub async fn find_by_type_value_rsp(
        &self,
        it: impl Iterator<Item = HandleRange> + Send,
    ) -> Result<()> {
        let lim = usize::from(self.mtu());
        let rsp = self.pack(Opcode::FindByTypeValueRsp, move |p| {
            for r in it.take((lim - p.len()) / 4) {
                p.put_u16_le(r.start().into());
                p.put_u16_le(r.end().into());
            }
        });
        self.send(rsp).await
    }

    /// Sends an `ATT_READ_BY_TYPE_RSP` PDU ([Vol 3] Part F, Section 3.4.4.2).
    /// All entries must have the same value length as the first one.
    pub async fn read_by_type_rsp<'a>(
        &self,
        it: impl Iterator<Item = (Handle, &'a [u8])> + Send,
    ) -> Result<()> {
        let lim = usize::from(self.mtu());
        let rsp = self.pack(Opcode::ReadByTypeRsp, move |p| {
            let mut it = it.peekable();
            let Some(&(_, first)) = it.peek() else { return };
            let n = first.len().min(lim - 4).min(usize::from(u8::MAX) - 2);
            #[allow(clippy::cast_possible_truncation)]
            p.put_u8(2 + n as u8);
            for (h, v) in it.take_while(|&(_, v)| v.len() == first.len()) {
                if p.len() + 2 + n > lim {
                    break;
                }
                p.put_u16_le(h.into());
                p.put_slice(&v[..n]);
            }
        });
        self.send(rsp).await
    }

    /// Sends an `ATT_READ_RSP` or `ATT_READ_BLOB_RSP` PDU
    /// ([Vol 3] Part F, Sections 3.4.4.4 and 3.4.4.6). The value is truncated
    /// to fit within the MTU.
    pub async fn read_rsp(&self, op: Opcode, v: &[u8]) -> Result<()> {
        debug_assert!(matches!(op, Opcode::ReadRsp | Opcode::ReadBlobRsp));
        let n = v.len().min(usize::from(self.mtu()) - 1);
        let rsp = self.pack(op, |p| p.put_slice(&v[..n]));
        self.send(rsp).await
    }

    /// Sends an `ATT_READ_BY_GROUP_TYPE_RSP` PDU
    /// ([Vol 3] Part F, Section 3.4.4.10). All entries must have the same value
    /// length as the first one.
    pub async fn read_by_group_type_rsp<'a>(
        &self,
        it: impl Iterator<Item = (HandleRange, &'a [u8])> + Send,
    ) -> Result<()> {
        let lim = usize::from(self.mtu());
        let rsp = self.pack(Opcode::ReadByGroupTypeRsp, move |p| {
            let mut it = it.peekable();
            let Some(&(_, first)) = it.peek() else { return };
            let n = first.len().min(lim - 6).min(usize::from(u8::MAX) - 4);
            #[allow(clippy::cast_possible_truncation)]
            p.put_u8(4 + n as u8);
            for (r, v) in it.take_while(|&(_, v)| v.len() == first.len()) {
                if p.len() + 4 + n > lim {
                    break;
                }
                p.put_u16_le(r.start().into());
                p.put_u16_le(r.end().into());
                p.put_slice(&v[..n]);
            }
        });
        self.send(rsp).await
    }

    /// Sends an `ATT_WRITE_RSP` PDU ([Vol 3] Part F, Section 3.4.5.2).
    pub async fn write_rsp(&self) -> Result<()> {
        self.send(self.pack(Opcode::WriteRsp, |_| {})).await
    }

    /// Sends an `ATT_PREPARE_WRITE_RSP` PDU ([Vol 3] Part F, Section 3.4.6.2)
    /// echoing the request parameters.
    pub async fn prepare_write_rsp(&self, hdl: Handle, off: u16, v: &[u8]) -> Result<()> {
        let n = v.len().min(usize::from(self.mtu()) - 5);
        let rsp = self.pack(Opcode::PrepareWriteRsp, |p| {
            p.put_u16_le(hdl.into());
            p.put_u16_le(off);
            p.put_slice(&v[..n]);
        });
        self.send(rsp).await
    }

    /// Sends an `ATT_EXECUTE_WRITE_RSP` PDU ([Vol 3] Part F, Section 3.4.6.4).
    pub async fn execute_write_rsp(&self) -> Result<()> {
        self.send(self.pack(Opcode::ExecuteWriteRsp, |_| {})).await
    }

    /// Sends an `ATT_HANDLE_VALUE_NTF` or `ATT_HANDLE_VALUE_IND` PDU
    /// ([Vol 3] Part F, Sections 3.4.7.1 and 3.4.7.2). The value is truncated
    /// to `MTU - 3` bytes.
    pub async fn handle_value(&self, op: Opcode, hdl: Handle, v: &[u8]) -> Result<()> {
        debug_assert!(matches!(op, Opcode::HandleValueNtf | Opcode::HandleValueInd));
        let n = v.len().min(usize::from(self.mtu()) - 3);
        let pdu = self.pack(op, |p| {
            p.put_u16_le(hdl.into());
            p.put_slice(&v[..n]);
        });
        self.send(pdu).await
    }
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;

    use super::*;

    fn pdu(b: &[u8]) -> Pdu {
        Pdu::new(Opcode::try_from(b[0]).unwrap(), Bytes::copy_from_slice(b))
    }

    #[test]
    fn decode_read() {
        assert_eq!(pdu(&[0x0A, 0x03, 0x00]).read_req(), Ok(Handle::new(3).unwrap()));
        assert_eq!(
            pdu(&[0x0C, 0x03, 0x00, 0x10, 0x00]).read_blob_req(),
            Ok((Handle::new(3).unwrap(), 16))
        );
        let e = pdu(&[0x0A, 0x03]).read_req().unwrap_err();
        assert_eq!(e.err, ErrorCode::InvalidPdu);
        let e = pdu(&[0x0A, 0x00, 0x00]).read_req().unwrap_err();
        assert_eq!(e.err, ErrorCode::InvalidHandle);
    }

    #[test]
    fn decode_handle_range() {
        let (r, u) = pdu(&[0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28])
            .read_by_group_type_req()
            .unwrap();
        assert_eq!(r, HandleRange::ALL);
        assert_eq!(u.as_u16(), Some(0x2800));

        let e = pdu(&[0x08, 0x05, 0x00, 0x01, 0x00, 0x03, 0x28])
            .read_by_type_req()
            .unwrap_err();
        assert_eq!((e.hdl, e.err), (Handle::new(5), ErrorCode::InvalidHandle));

        let e = pdu(&[0x08, 0x01, 0x00, 0x05, 0x00, 0x03])
            .read_by_type_req()
            .unwrap_err();
        assert_eq!(e.err, ErrorCode::InvalidPdu);
    }

    #[test]
    fn decode_write() {
        let p = pdu(&[0x12, 0x07, 0x00, 0xAA, 0xBB]);
        assert_eq!(p.write_req(), Ok((Handle::new(7).unwrap(), [0xAA, 0xBB].as_ref())));
        let p = pdu(&[0x16, 0x07, 0x00, 0x02, 0x00, 0xCC]);
        assert_eq!(
            p.prepare_write_req(),
            Ok((Handle::new(7).unwrap(), 2, [0xCC].as_ref()))
        );
        assert_eq!(pdu(&[0x18, 0x01]).execute_write_req(), Ok(true));
        assert_eq!(pdu(&[0x18, 0x00]).execute_write_req(), Ok(false));
        assert_matches!(pdu(&[0x18, 0x02]).execute_write_req(), Err(_));
    }
}
