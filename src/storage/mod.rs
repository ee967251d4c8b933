//! Storage module - Key-value stores, balances and typed ledger state

mod bank;
mod kv;
mod state;
pub mod db;

pub use bank::*;
pub use db::SledStore;
pub use kv::*;
pub use state::*;
