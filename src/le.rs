//! LE device addressing.

use std::fmt::{Debug, Display, Formatter};

/// Typed device address ([Vol 6] Part B, Section 1.3).
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Addr {
    Public(RawAddr),
    Random(RawAddr),
}

impl Addr {
    /// Returns the kind used when binding a listener to this address.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> AddrKind {
        match self {
            Self::Public(_) => AddrKind::Public,
            Self::Random(_) => AddrKind::Random,
        }
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (raw, kind) = match *self {
            Self::Public(raw) => (raw, "public"),
            Self::Random(raw) => (raw, "random"),
        };
        write!(f, "{raw} ({kind})")
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AddrKind {
    Public,
    Random,
}

/// 48-bit address in over-the-air (little-endian) byte order.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct RawAddr([u8; 6]);

impl From<[u8; 6]> for RawAddr {
    #[inline]
    fn from(v: [u8; 6]) -> Self {
        Self(v)
    }
}

impl Debug for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Most significant byte first ([Vol 3] Part C, Section 3.2.1.3)
        let mut sep = "";
        for b in self.0.iter().rev() {
            write!(f, "{sep}{b:02X}")?;
            sep = ":";
        }
        Ok(())
    }
}

crate::impl_display_via_debug! { RawAddr }
