//! Relay mining difficulty arithmetic
//!
//! A relay counts towards a claim only if its hash, read as a big-endian
//! 256-bit integer, is at or below the service's target hash. The base
//! target is the largest hash (every relay counts); busier services get a
//! proportionally smaller target so only a sample of their relays is
//! committed, and settlement scales the sample back up.

use std::cmp::Ordering;

use primitive_types::{U256, U512};

use crate::constants::{EMA_SMOOTHING_DENOMINATOR, EMA_SMOOTHING_NUMERATOR};
use crate::crypto::{compare_be, Hash};

/// Easiest target: every relay is volume applicable
pub const BASE_RELAY_DIFFICULTY_HASH: Hash = Hash::max();

/// Whether a relay with `relay_hash` counts towards the claimed volume
pub fn is_relay_volume_applicable(relay_hash: &Hash, target_hash: &Hash) -> bool {
    compare_be(relay_hash, target_hash) != Ordering::Greater
}

/// Target hash for a service whose smoothed relay volume is `relays_ema`.
///
/// Volume at or below target keeps the base target; above target the base is
/// scaled by `target_num_relays / relays_ema`. The base is always the
/// starting point so the target depends only on the current EMA.
pub fn compute_new_difficulty_target_hash(
    base_target_hash: &Hash,
    target_num_relays: u64,
    relays_ema: u64,
) -> Hash {
    if relays_ema <= target_num_relays {
        return *base_target_hash;
    }
    scale_target_hash(base_target_hash, target_num_relays, relays_ema)
}

/// `target * numerator / denominator`, capped at the base target
fn scale_target_hash(target: &Hash, numerator: u64, denominator: u64) -> Hash {
    let target = U512::from(to_u256(target));
    let scaled = target * U512::from(numerator) / U512::from(denominator.max(1));
    match U256::try_from(scaled) {
        Ok(value) => from_u256(value),
        Err(_) => BASE_RELAY_DIFFICULTY_HASH,
    }
}

/// Exponential moving average with alpha = 1/10, in integer arithmetic:
/// `(alpha * observed + (1 - alpha) * prev_ema)`, rounded down.
pub fn compute_ema(prev_ema: u64, observed: u64) -> u64 {
    let num = EMA_SMOOTHING_NUMERATOR as u128;
    let den = EMA_SMOOTHING_DENOMINATOR as u128;
    let weighted = num * observed as u128 + (den - num) * prev_ema as u128;
    (weighted / den) as u64
}

/// `max_hash / target_hash` as a float, for logs and events only
pub fn difficulty_multiplier(target_hash: &Hash) -> f64 {
    let target = to_u256(target_hash);
    if target.is_zero() {
        return f64::INFINITY;
    }
    u256_to_f64(to_u256(&BASE_RELAY_DIFFICULTY_HASH)) / u256_to_f64(target)
}

/// Probability that a relay is volume applicable under `target_hash`
pub fn relay_difficulty_probability(target_hash: &Hash) -> f64 {
    u256_to_f64(to_u256(target_hash)) / u256_to_f64(to_u256(&BASE_RELAY_DIFFICULTY_HASH))
}

/// Scale a value measured on applicable relays back to the full volume:
/// `value * max_hash / target_hash`, saturating at `u64::MAX`.
pub fn scale_by_difficulty(value: u64, target_hash: &Hash) -> u64 {
    let target = to_u256(target_hash);
    if target.is_zero() {
        return u64::MAX;
    }
    let max = U512::from(to_u256(&BASE_RELAY_DIFFICULTY_HASH));
    let scaled = U512::from(value) * max / U512::from(target);
    if scaled > U512::from(u64::MAX) {
        u64::MAX
    } else {
        scaled.low_u64()
    }
}

fn to_u256(hash: &Hash) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}

fn from_u256(value: U256) -> Hash {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    Hash(bytes)
}

fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_with_prefix(prefix: &[u8]) -> Hash {
        let mut bytes = [0xffu8; 32];
        bytes[..prefix.len()].copy_from_slice(prefix);
        Hash(bytes)
    }

    #[test]
    fn test_base_target_accepts_everything() {
        assert!(is_relay_volume_applicable(&Hash::max(), &BASE_RELAY_DIFFICULTY_HASH));
        assert!(is_relay_volume_applicable(&Hash::zero(), &BASE_RELAY_DIFFICULTY_HASH));
    }

    #[test]
    fn test_applicability_is_big_endian() {
        let target = hash_with_prefix(&[0x0f]);
        assert!(is_relay_volume_applicable(&hash_with_prefix(&[0x0e]), &target));
        assert!(is_relay_volume_applicable(&target, &target));
        assert!(!is_relay_volume_applicable(&hash_with_prefix(&[0x10, 0x00]), &target));
    }

    #[test]
    fn test_volume_at_or_below_target_keeps_base() {
        let base = BASE_RELAY_DIFFICULTY_HASH;
        assert_eq!(compute_new_difficulty_target_hash(&base, 100, 50), base);
        assert_eq!(compute_new_difficulty_target_hash(&base, 100, 100), base);
    }

    #[test]
    fn test_double_volume_halves_target() {
        let target = compute_new_difficulty_target_hash(&BASE_RELAY_DIFFICULTY_HASH, 100, 200);
        let mut expected = [0xffu8; 32];
        expected[0] = 0x7f;
        assert_eq!(target, Hash(expected));
        assert!((difficulty_multiplier(&target) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_target_monotonic_in_ema() {
        let base = BASE_RELAY_DIFFICULTY_HASH;
        let mut prev = base;
        for ema in [10_000u64, 20_000, 35_000, 80_000, 1_000_000, u64::MAX] {
            let next = compute_new_difficulty_target_hash(&base, 10_000, ema);
            assert!(next <= prev, "target must not grow as volume grows");
            prev = next;
        }
    }

    #[test]
    fn test_ema() {
        assert_eq!(compute_ema(100, 100), 100);
        assert_eq!(compute_ema(0, 1000), 100);
        assert_eq!(compute_ema(1000, 0), 900);
        assert_eq!(compute_ema(u64::MAX, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_scale_at_half_difficulty() {
        let target = compute_new_difficulty_target_hash(&BASE_RELAY_DIFFICULTY_HASH, 1, 2);
        assert!((relay_difficulty_probability(&target) - 0.5).abs() < 1e-9);
        let scaled = scale_by_difficulty(500, &target);
        assert!((1_000..=1_001).contains(&scaled));
        assert_eq!(scale_by_difficulty(777, &BASE_RELAY_DIFFICULTY_HASH), 777);
        assert_eq!(scale_by_difficulty(1, &Hash::zero()), u64::MAX);
    }

    #[test]
    fn test_probability_of_base_is_one() {
        assert!((relay_difficulty_probability(&BASE_RELAY_DIFFICULTY_HASH) - 1.0).abs() < 1e-12);
        assert_eq!(difficulty_multiplier(&Hash::zero()), f64::INFINITY);
    }
}
