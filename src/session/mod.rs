//! Session module - Session identity and supplier membership

mod header;
mod roster;

pub use header::*;
pub use roster::*;
