//! Generic Attribute Profile ([Vol 3] Part G).

pub use {consts::*, db::*, schema::*, server::*};

mod consts;
mod db;
mod schema;
mod server;
