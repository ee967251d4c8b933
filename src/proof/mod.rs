//! Proof module - Claims, proofs and their submission lifecycle

mod claim;
mod keeper;
mod requirement;
mod verify;

pub use claim::*;
pub use keeper::*;
pub use requirement::*;
pub use verify::*;
