//! Host Controller Interface capabilities used by the peripheral.

use futures_core::future::BoxFuture;

use crate::le::Addr;

/// Error type returned by the HCI layer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("HCI error: {status}")]
    Hci {
        #[from]
        status: Status,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the controller status code or [`None`] if the error did not
    /// originate from the controller.
    #[inline]
    #[must_use]
    pub const fn status(&self) -> Option<Status> {
        match *self {
            Self::Hci { status } => Some(status),
            Self::Io(_) => None,
        }
    }

    /// Returns whether the controller disallowed the command because the
    /// requested state is already in effect (e.g. advertising is already
    /// enabled).
    #[inline]
    #[must_use]
    pub const fn is_disallowed(&self) -> bool {
        matches!(self.status(), Some(Status::CommandDisallowed))
    }
}

/// Common HCI result type.
pub type Result<T> = std::result::Result<T, Error>;

/// HCI status codes ([Vol 1] Part F, Section 1.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::FromPrimitive, thiserror::Error)]
#[non_exhaustive]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    UnknownCommand = 0x01,
    UnknownConnectionIdentifier = 0x02,
    HardwareFailure = 0x03,
    MemoryCapacityExceeded = 0x07,
    ConnectionTimeout = 0x08,
    ConnectionLimitExceeded = 0x09,
    ConnectionAlreadyExists = 0x0B,
    CommandDisallowed = 0x0C,
    ConnectionRejectedDueToLimitedResources = 0x0D,
    UnsupportedFeatureOrParameterValue = 0x11,
    InvalidCommandParameters = 0x12,
    RemoteUserTerminatedConnection = 0x13,
    ConnectionTerminatedByLocalHost = 0x16,
    #[num_enum(default)] // [Vol 4] Part E, Section 1.2
    UnspecifiedError = 0x1F,
    ControllerBusy = 0x3A,
    AdvertisingTimeout = 0x3C,
    ConnectionFailedToBeEstablished = 0x3E,
    LimitReached = 0x43,
    OperationCancelledByHost = 0x44,
}

impl Status {
    /// Returns whether status is `Success`.
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl Default for Status {
    #[inline]
    fn default() -> Self {
        Self::Success
    }
}

crate::impl_display_via_debug! { Status }

/// Controller operations required by the peripheral. Implementations send the
/// corresponding HCI commands and wait for their completion.
pub trait Controller: Send + Sync + 'static {
    /// Returns the controller's public device address
    /// (`HCI_Read_BD_ADDR`, [Vol 4] Part E, Section 7.4.6).
    fn read_device_address(&self) -> BoxFuture<'_, Result<Addr>>;

    /// Enables connectable LE advertising
    /// (`HCI_LE_Set_Advertising_Enable`, [Vol 4] Part E, Section 7.8.9). Fails
    /// with [`Status::CommandDisallowed`] if advertising is already enabled.
    fn enable_le_advertising(&self) -> BoxFuture<'_, Result<()>>;
}

/// Enables advertising, treating "already enabled" as success.
pub(crate) async fn ensure_advertising(ctlr: &dyn Controller) -> Result<()> {
    match ctlr.enable_le_advertising().await {
        Err(e) if e.is_disallowed() => Ok(()),
        r => r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status() {
        assert_eq!(Status::from(0x0C), Status::CommandDisallowed);
        assert_eq!(Status::from(0xEE), Status::UnspecifiedError);
        assert!(Status::from(0x00).is_ok());
        assert!(Error::from(Status::CommandDisallowed).is_disallowed());
        assert!(!Error::from(Status::HardwareFailure).is_disallowed());
        assert_eq!(
            Error::from(Status::HardwareFailure).to_string(),
            "HCI error: HardwareFailure"
        );
    }
}
