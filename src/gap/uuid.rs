use std::fmt::{Debug, Formatter};
use std::num::{NonZeroU128, NonZeroU16};

/// Bit position of the 16-bit alias within the Bluetooth Base UUID.
const ALIAS_SHIFT: u32 = 96;

/// Bluetooth Base UUID `00000000-0000-1000-8000-00805F9B34FB`.
const BASE_UUID: u128 = 0x0000_1000_8000_0080_5F9B_34FB;

/// Service, characteristic, or descriptor type identifier.
///
/// Values derived from the Bluetooth Base UUID are encoded on the wire in
/// their 2-byte form. All other values use the full 16 bytes.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid(NonZeroU128);

impl Uuid {
    /// Creates a UUID from a `u128`. Returns [`None`] for the nil UUID.
    #[inline]
    #[must_use]
    pub const fn new(v: u128) -> Option<Self> {
        match NonZeroU128::new(v) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Returns the 16-bit alias if the UUID is derived from the Base UUID.
    #[must_use]
    pub const fn as_u16(self) -> Option<u16> {
        let v = self.0.get();
        #[allow(clippy::cast_possible_truncation)]
        let alias = (v >> ALIAS_SHIFT) as u16;
        if alias != 0 && v ^ ((alias as u128) << ALIAS_SHIFT) == BASE_UUID {
            Some(alias)
        } else {
            None
        }
    }

    /// Returns the little-endian wire encoding.
    #[must_use]
    pub fn to_vec(self) -> Vec<u8> {
        match self.as_u16() {
            Some(v) => v.to_le_bytes().to_vec(),
            None => self.0.get().to_le_bytes().to_vec(),
        }
    }
}

impl TryFrom<&[u8]> for Uuid {
    type Error = ();

    /// Decodes a 2- or 16-byte little-endian UUID.
    fn try_from(b: &[u8]) -> Result<Self, Self::Error> {
        let u = match b.len() {
            2 => Uuid16::new(u16::from_le_bytes([b[0], b[1]])).map(Uuid16::as_uuid),
            16 => <[u8; 16]>::try_from(b)
                .ok()
                .and_then(|b| Self::new(u128::from_le_bytes(b))),
            _ => None,
        };
        u.ok_or(())
    }
}

impl From<Uuid16> for Uuid {
    #[inline]
    fn from(u: Uuid16) -> Self {
        u.as_uuid()
    }
}

impl PartialEq<Uuid16> for Uuid {
    #[inline]
    fn eq(&self, other: &Uuid16) -> bool {
        *self == other.as_uuid()
    }
}

impl Debug for Uuid {
    #[allow(clippy::cast_possible_truncation)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(v) = self.as_u16() {
            return write!(f, "{v:#06X}");
        }
        let v = self.0.get();
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v as u64 & 0xFFFF_FFFF_FFFF,
        )
    }
}

crate::impl_display_via_debug! { Uuid, Uuid16 }

/// Bluetooth SIG assigned 16-bit UUID alias.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid16(NonZeroU16);

impl Uuid16 {
    /// Creates an alias from a `u16`. Returns [`None`] for zero.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Option<Self> {
        match NonZeroU16::new(v) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Expands the alias into a full UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        let v = (self.0.get() as u128) << ALIAS_SHIFT | BASE_UUID;
        match NonZeroU128::new(v) {
            Some(v) => Uuid(v),
            None => unreachable!(),
        }
    }
}

impl Debug for Uuid16 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.0.get())
    }
}

/// Creates an alias from a non-zero constant.
#[must_use]
pub(crate) const fn uuid16(v: u16) -> Uuid16 {
    match Uuid16::new(v) {
        Some(u) => u,
        None => panic!("zero UUID"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid16_conversion() {
        let u = uuid16(0x2902).as_uuid();
        assert_eq!(u.as_u16(), Some(0x2902));
        assert_eq!(u.to_vec(), [0x02, 0x29]);
        assert_eq!(Uuid::try_from([0x02, 0x29].as_ref()), Ok(u));
        assert_eq!(format!("{u}"), "0x2902");
        assert_eq!(u, uuid16(0x2902));
        assert_eq!(Uuid::new(BASE_UUID).and_then(Uuid::as_u16), None);
    }

    #[test]
    fn uuid128_conversion() {
        let v = 0xA1B2C3D4_0001_0002_0003_000000000004_u128;
        let u = Uuid::new(v).unwrap();
        assert_eq!(u.as_u16(), None);
        assert_eq!(u.to_vec(), v.to_le_bytes());
        assert_eq!(Uuid::try_from(v.to_le_bytes().as_ref()), Ok(u));
        assert_eq!(format!("{u}"), "A1B2C3D4-0001-0002-0003-000000000004");
        assert!(Uuid::try_from([0u8; 2].as_ref()).is_err());
        assert!(Uuid::try_from([1u8; 3].as_ref()).is_err());
    }
}
