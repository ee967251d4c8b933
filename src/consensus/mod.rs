//! Consensus module - Parameters, commit windows, difficulty and block context

mod block;
mod difficulty;
mod events;
mod params;
mod validation;
mod window;

pub use block::*;
pub use difficulty::*;
pub use events::*;
pub use params::*;
pub use validation::*;
pub use window::*;
