//! Cryptography module - SHA-256 / BLAKE3 hashing, seeded draws, Merkle sum trees

mod hash;
mod merkle;
mod rand;

pub use hash::*;
pub use merkle::*;
pub use self::rand::*;
