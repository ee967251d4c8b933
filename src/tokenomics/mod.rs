//! Tokenomics module - Token logic modules and claim settlement

mod result;
mod settle;
mod tlm;

pub use result::*;
pub use settle::*;
pub use tlm::*;
