//! Seeded pseudo-randomness
//!
//! Every draw is SHA-256 over the concatenated seed parts, reduced from the
//! first eight digest bytes read big-endian. Never use a language-default
//! hasher here: all nodes must agree bit for bit.

use super::sha256;

/// Deterministic u64 drawn from the seed parts
pub fn seeded_u64(parts: &[&[u8]]) -> u64 {
    sha256(parts).leading_u64()
}

/// Deterministic draw in `[0, modulus)`. A zero modulus yields 0.
pub fn seeded_offset(parts: &[&[u8]], modulus: u64) -> u64 {
    if modulus == 0 {
        return 0;
    }
    seeded_u64(parts) % modulus
}

/// Whether a seeded draw falls below `probability`.
///
/// The draw is compared as a fixed-point fraction of 2^64 so the only float
/// operation is a single scaling of the parameter.
pub fn seeded_below_probability(parts: &[&[u8]], probability: f64) -> bool {
    if !(probability > 0.0) {
        return false;
    }
    if probability >= 1.0 {
        return true;
    }
    seeded_u64(parts) < probability_threshold(probability)
}

fn probability_threshold(probability: f64) -> u64 {
    // 2^64 as f64 is exact; the cast saturates for the upper edge.
    (probability * 18_446_744_073_709_551_616.0) as u64
}
