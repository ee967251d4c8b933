//! Service module - Per-service relay mining difficulty

mod difficulty;

pub use difficulty::*;
