use bytes::Bytes;

use crate::att::Perms;
use crate::gap::Uuid;

use super::*;

/// Service definition passed to [`Db::add_service`].
#[derive(Clone, Debug)]
#[must_use]
pub struct Service {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    /// Creates an empty primary service.
    #[inline]
    pub fn primary(uuid: impl Into<Uuid>) -> Self {
        Self {
            uuid: uuid.into(),
            primary: true,
            characteristics: Vec::new(),
        }
    }

    /// Creates an empty secondary service.
    #[inline]
    pub fn secondary(uuid: impl Into<Uuid>) -> Self {
        Self {
            primary: false,
            ..Self::primary(uuid)
        }
    }

    /// Appends a characteristic definition.
    #[inline]
    pub fn with(mut self, c: Characteristic) -> Self {
        self.characteristics.push(c);
        self
    }

    /// Returns the number of attribute handles required by the service.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        1 + (self.characteristics.iter())
            .map(Characteristic::handle_count)
            .sum::<usize>()
    }
}

/// Characteristic definition.
#[derive(Clone, Debug)]
#[must_use]
pub struct Characteristic {
    pub uuid: Uuid,
    pub props: Prop,
    pub perms: Perms,
    pub value: Bytes,
    pub descriptors: Vec<CharDescriptor>,
}

impl Characteristic {
    /// Creates a characteristic with an initial value.
    #[inline]
    pub fn new(uuid: impl Into<Uuid>, props: Prop, perms: Perms, value: impl Into<Bytes>) -> Self {
        Self {
            uuid: uuid.into(),
            props,
            perms,
            value: value.into(),
            descriptors: Vec::new(),
        }
    }

    /// Appends a descriptor definition.
    #[inline]
    pub fn with(mut self, d: CharDescriptor) -> Self {
        self.descriptors.push(d);
        self
    }

    /// Returns whether a Client Characteristic Configuration descriptor must
    /// be generated for this characteristic.
    #[inline]
    pub(super) fn needs_cccd(&self) -> bool {
        self.props.intersects(Prop::NOTIFY | Prop::INDICATE)
            && !(self.descriptors.iter())
                .any(|d| d.uuid == Descriptor::CLIENT_CHARACTERISTIC_CONFIGURATION)
    }

    /// Returns the number of attribute handles required by the
    /// characteristic, including its declaration.
    #[inline]
    #[must_use]
    pub fn handle_count(&self) -> usize {
        2 + self.descriptors.len() + usize::from(self.needs_cccd())
    }
}

/// Characteristic descriptor definition.
#[derive(Clone, Debug)]
#[must_use]
pub struct CharDescriptor {
    pub uuid: Uuid,
    pub perms: Perms,
    pub value: Bytes,
}

impl CharDescriptor {
    /// Creates a descriptor with an initial value.
    #[inline]
    pub fn new(uuid: impl Into<Uuid>, perms: Perms, value: impl Into<Bytes>) -> Self {
        Self {
            uuid: uuid.into(),
            perms,
            value: value.into(),
        }
    }

    /// Creates a Client Characteristic Configuration descriptor with
    /// notifications and indications disabled.
    #[inline]
    pub fn cccd() -> Self {
        Self::new(
            Descriptor::CLIENT_CHARACTERISTIC_CONFIGURATION,
            Perms::READ_WRITE,
            Bytes::from_static(&[0, 0]),
        )
    }

    /// Creates a read-only Characteristic User Description descriptor.
    #[inline]
    pub fn user_description(s: impl Into<String>) -> Self {
        Self::new(
            Descriptor::CHARACTERISTIC_USER_DESCRIPTION,
            Perms::READ,
            Bytes::from(s.into()),
        )
    }
}
