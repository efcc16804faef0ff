//! Concurrent Bluetooth LE GATT peripheral server.
//!
//! [`Peripheral`] accepts ATT connections from remote centrals, exposes a
//! shared attribute database to all of them, and keeps every connection's
//! view of that database consistent by propagating characteristic value
//! changes as notifications.
//!
//! The controller and the L2CAP transport are consumed through the
//! [`hci::Controller`] and [`l2cap::Transport`] traits. Each accepted socket is
//! served by a [`peer::Connection`] engine, [`gatt::Server`] by default.

pub use {peripheral::*, registry::*};

pub mod att;
pub mod gap;
pub mod gatt;
pub mod hci;
pub mod l2cap;
pub mod le;
pub mod peer;
mod peripheral;
mod registry;

#[cfg(test)]
mod mock;

type SyncMutex<T> = parking_lot::Mutex<T>;

/// Error type returned by the public [`Peripheral`] API.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Hci(#[from] hci::Error),
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
    #[error("attribute handle space exhausted")]
    HandleSpaceExhausted,
}

/// Common result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns a string representation of the specified type.
macro_rules! name_of {
    ($t:ty) => {{
        type _T = $t; // Allows $t to be recognized as a type for refactoring
        stringify!($t)
    }};
}
pub(crate) use name_of;

/// Implements `Display` for types that already implement `Debug`.
#[macro_export]
#[doc(hidden)]
macro_rules! impl_display_via_debug {
    ($($t:ty),+ $(,)?) => {$(
        impl ::std::fmt::Display for $t {
            #[inline(always)]
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::fmt::Debug::fmt(self, f)
            }
        }
    )+};
}
