/// Minimum ATT MTU for an LE-U link ([Vol 3] Part F, Section 3.2.8).
pub const MIN_MTU: u16 = 23;

/// Maximum ATT MTU accepted by the server. Fits a 512-byte attribute value
/// together with the 5-byte `ATT_PREPARE_WRITE_REQ` header.
pub const MAX_MTU: u16 = 517;

/// Maximum attribute value length ([Vol 3] Part F, Section 3.2.9).
pub const MAX_VAL_LEN: usize = 512;

/// Attribute opcode ([Vol 3] Part F, Section 3.3.1 and
/// [Vol 3] Part F, Section 3.4.8).
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum Opcode {
    ErrorRsp = 0x01,
    ExchangeMtuReq = 0x02,
    ExchangeMtuRsp = 0x03,
    FindInformationReq = 0x04,
    FindInformationRsp = 0x05,
    FindByTypeValueReq = 0x06,
    FindByTypeValueRsp = 0x07,
    ReadByTypeReq = 0x08,
    ReadByTypeRsp = 0x09,
    ReadReq = 0x0A,
    ReadRsp = 0x0B,
    ReadBlobReq = 0x0C,
    ReadBlobRsp = 0x0D,
    ReadMultipleReq = 0x0E,
    ReadMultipleRsp = 0x0F,
    ReadByGroupTypeReq = 0x10,
    ReadByGroupTypeRsp = 0x11,
    WriteReq = 0x12,
    WriteRsp = 0x13,
    WriteCmd = 0x52,
    PrepareWriteReq = 0x16,
    PrepareWriteRsp = 0x17,
    ExecuteWriteReq = 0x18,
    ExecuteWriteRsp = 0x19,
    ReadMultipleVariableReq = 0x20,
    ReadMultipleVariableRsp = 0x21,
    MultipleHandleValueNtf = 0x23,
    HandleValueNtf = 0x1B,
    HandleValueInd = 0x1D,
    HandleValueCfm = 0x1E,
    SignedWriteCmd = 0xD2,
}

impl Opcode {
    /// Returns whether the raw opcode has the Command Flag set, meaning that
    /// the server must not respond to it, even with an error.
    #[inline]
    #[must_use]
    pub const fn is_cmd(op: u8) -> bool {
        op & (1 << 6) != 0
    }

    /// Returns whether the opcode identifies a response, notification, or
    /// indication. Only a server sends these, so a server ignores them.
    #[must_use]
    pub const fn is_server_pdu(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            ErrorRsp
                | ExchangeMtuRsp
                | FindInformationRsp
                | FindByTypeValueRsp
                | ReadByTypeRsp
                | ReadRsp
                | ReadBlobRsp
                | ReadMultipleRsp
                | ReadByGroupTypeRsp
                | WriteRsp
                | PrepareWriteRsp
                | ExecuteWriteRsp
                | ReadMultipleVariableRsp
                | MultipleHandleValueNtf
                | HandleValueNtf
                | HandleValueInd
        )
    }
}

/// ATT and Common Profile and Service error codes
/// ([Vol 3] Part F, Section 3.4.1.1 and \[CSS\] Part B, Section 1.2).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    thiserror::Error,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorCode {
    InvalidHandle = 0x01,
    ReadNotPermitted = 0x02,
    WriteNotPermitted = 0x03,
    InvalidPdu = 0x04,
    InsufficientAuthentication = 0x05,
    RequestNotSupported = 0x06,
    /// Read or write offset is past the end of the value.
    InvalidOffset = 0x07,
    /// Returned by user hooks to deny access to an attribute.
    InsufficientAuthorization = 0x08,
    /// The client exceeded the prepared write limit of its connection.
    PrepareQueueFull = 0x09,
    AttributeNotFound = 0x0A,
    AttributeNotLong = 0x0B,
    EncryptionKeySizeTooShort = 0x0C,
    InvalidAttributeValueLength = 0x0D,
    UnlikelyError = 0x0E,
    InsufficientEncryption = 0x0F,
    /// Only primary services can be discovered by group type.
    UnsupportedGroupType = 0x10,
    InsufficientResources = 0x11,
    DatabaseOutOfSync = 0x12,
    ValueNotAllowed = 0x13,
    // Common Profile and Service error codes
    WriteRequestRejected = 0xFC,
    /// A client tried to enable notifications or indications that the
    /// characteristic does not support.
    CccdImproperlyConfigured = 0xFD,
    ProcedureAlreadyInProgress = 0xFE,
    OutOfRange = 0xFF,
}

crate::impl_display_via_debug! { Opcode, ErrorCode }
