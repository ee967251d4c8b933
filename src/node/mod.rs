//! Node module - Block execution driver and supplier-side relay bookkeeping

mod chain;
mod relayer;

pub use chain::*;
pub use relayer::*;
