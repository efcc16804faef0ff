use bitflags::bitflags;

use crate::gap::{uuid16, Uuid16};

/// GATT attribute type declarations ([Vol 3] Part G, Section 3).
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct Declaration;

impl Declaration {
    pub const PRIMARY_SERVICE: Uuid16 = uuid16(0x2800);
    pub const SECONDARY_SERVICE: Uuid16 = uuid16(0x2801);
    pub const INCLUDE: Uuid16 = uuid16(0x2802);
    pub const CHARACTERISTIC: Uuid16 = uuid16(0x2803);
}

/// GATT characteristic descriptor types ([Vol 3] Part G, Section 3.3.3).
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct Descriptor;

impl Descriptor {
    pub const CHARACTERISTIC_EXTENDED_PROPERTIES: Uuid16 = uuid16(0x2900);
    pub const CHARACTERISTIC_USER_DESCRIPTION: Uuid16 = uuid16(0x2901);
    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid16 = uuid16(0x2902);
}

bitflags! {
    /// Characteristic properties ([Vol 3] Part G, Section 3.3.1.1).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
    #[repr(transparent)]
    pub struct Prop: u8 {
        /// Permits broadcasts of the Characteristic Value using Server
        /// Characteristic Configuration Descriptor.
        const BROADCAST = 0x01;
        /// Permits reads of the Characteristic Value.
        const READ = 0x02;
        /// Permit writes of the Characteristic Value without response.
        const WRITE_CMD = 0x04;
        /// Permits writes of the Characteristic Value with response.
        const WRITE = 0x08;
        /// Permits notifications of a Characteristic Value without
        /// acknowledgment. If set, the Client Characteristic Configuration
        /// Descriptor shall exist.
        const NOTIFY = 0x10;
        /// Permits indications of a Characteristic Value with acknowledgment.
        /// If set, the Client Characteristic Configuration Descriptor shall
        /// exist.
        const INDICATE = 0x20;
        /// Permits signed writes to the Characteristic Value.
        const SIGNED_WRITE_CMD = 0x40;
        /// Additional characteristic properties are defined in the
        /// Characteristic Extended Properties Descriptor.
        const EXT_PROPS = 0x80;
    }
}

bitflags! {
    /// Client Characteristic Configuration descriptor value
    /// ([Vol 3] Part G, Section 3.3.3.3).
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Cccd: u16 {
        /// The Characteristic Value shall be notified.
        const NOTIFY = 1 << 0;
        /// The Characteristic Value shall be indicated.
        const INDICATE = 1 << 1;
    }
}

impl Cccd {
    /// Decodes a descriptor value. Returns [`None`] if the value is not
    /// exactly two bytes long.
    #[inline]
    #[must_use]
    pub fn from_value(v: &[u8]) -> Option<Self> {
        match *v {
            [a, b] => Some(Self::from_bits_truncate(u16::from_le_bytes([a, b]))),
            _ => None,
        }
    }
}
