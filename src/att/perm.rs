use super::*;

bitflags::bitflags! {
    /// Attribute permissions ([Vol 3] Part F, Section 3.2.5). Encryption,
    /// authentication, and authorization requirements are not supported.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
    #[repr(transparent)]
    pub struct Perms: u8 {
        /// Read access.
        const READ = 1 << 0;
        /// Write access.
        const WRITE = 1 << 1;
        /// Read/write access.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Perms {
    /// Returns an error if the permissions do not allow a read.
    #[inline]
    pub const fn test_read(self) -> std::result::Result<(), ErrorCode> {
        if self.contains(Self::READ) {
            Ok(())
        } else {
            Err(ErrorCode::ReadNotPermitted)
        }
    }

    /// Returns an error if the permissions do not allow a write.
    #[inline]
    pub const fn test_write(self) -> std::result::Result<(), ErrorCode> {
        if self.contains(Self::WRITE) {
            Ok(())
        } else {
            Err(ErrorCode::WriteNotPermitted)
        }
    }
}
