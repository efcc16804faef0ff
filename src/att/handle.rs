use std::fmt::{Debug, Formatter};
use std::num::NonZeroU16;

/// Non-zero attribute handle ([Vol 3] Part F, Section 3.2.2).
#[derive(
    Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Handle(NonZeroU16);

impl Handle {
    /// Handle assigned to the first attribute of an empty database.
    pub const MIN: Self = Self(NonZeroU16::MIN);

    /// Returns [`None`] for the reserved handle `0x0000`.
    #[inline]
    #[must_use]
    pub const fn new(h: u16) -> Option<Self> {
        match NonZeroU16::new(h) {
            Some(h) => Some(Self(h)),
            None => None,
        }
    }

    /// Returns the following handle, if any.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        self.add(1)
    }

    /// Returns the handle `n` positions ahead, if it exists.
    #[inline]
    #[must_use]
    pub const fn add(self, n: u16) -> Option<Self> {
        match self.0.get().checked_add(n) {
            Some(h) => Some(Self(match NonZeroU16::new(h) {
                Some(h) => h,
                None => unreachable!(),
            })),
            None => None,
        }
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#06X})", crate::name_of!(Handle), self.0.get())
    }
}

crate::impl_display_via_debug! { Handle }

impl From<Handle> for u16 {
    #[inline]
    fn from(h: Handle) -> Self {
        h.0.get()
    }
}

/// Inclusive `start..=end` range of handles, as carried by discovery
/// requests and group responses.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub struct HandleRange {
    start: Handle,
    end: Handle,
}

impl HandleRange {
    /// Range covering the entire handle space.
    pub const ALL: Self = Self {
        start: Handle::MIN,
        end: Handle(NonZeroU16::MAX),
    };

    /// Creates a range. Panics if `end` precedes `start`.
    #[inline]
    pub const fn new(start: Handle, end: Handle) -> Self {
        assert!(start.0.get() <= end.0.get());
        Self { start, end }
    }

    #[inline(always)]
    #[must_use]
    pub const fn start(self) -> Handle {
        self.start
    }

    #[inline(always)]
    #[must_use]
    pub const fn end(self) -> Handle {
        self.end
    }

    /// Returns whether `h` falls inside the range.
    #[inline]
    #[must_use]
    pub fn contains(self, h: Handle) -> bool {
        self.start <= h && h <= self.end
    }
}
