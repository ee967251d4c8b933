//! Session and commit window arithmetic
//!
//! Pure functions of the shared parameters and a query height. Height 0 is
//! never part of a session and maps to 0 ("not applicable") everywhere.
//!
//! For the session containing height `h`:
//!
//! ```text
//! session:       [start, end]                         end = start + n - 1
//! claim window:  [end + claim_open, claim_open + claim_close)
//! proof window:  [max(claim_close, end + proof_open), proof_open + proof_close)
//! ```

use super::SharedParams;
use crate::constants::FIRST_SESSION_START_HEIGHT;
use crate::crypto::{seeded_offset, Hash};

/// First height of the session containing `height`
pub fn session_start_height(params: &SharedParams, height: u64) -> u64 {
    if height < FIRST_SESSION_START_HEIGHT || params.num_blocks_per_session == 0 {
        return 0;
    }
    let relative = height - FIRST_SESSION_START_HEIGHT;
    height - relative % params.num_blocks_per_session
}

/// Last height of the session containing `height`
pub fn session_end_height(params: &SharedParams, height: u64) -> u64 {
    match session_start_height(params, height) {
        0 => 0,
        start => start + params.num_blocks_per_session - 1,
    }
}

/// 1-based number of the session containing `height`
pub fn session_number(params: &SharedParams, height: u64) -> u64 {
    match session_start_height(params, height) {
        0 => 0,
        start => (start - FIRST_SESSION_START_HEIGHT) / params.num_blocks_per_session + 1,
    }
}

pub fn next_session_start_height(params: &SharedParams, height: u64) -> u64 {
    match session_end_height(params, height) {
        0 => 0,
        end => end + 1,
    }
}

pub fn is_session_start_height(params: &SharedParams, height: u64) -> bool {
    height != 0 && session_start_height(params, height) == height
}

pub fn is_session_end_height(params: &SharedParams, height: u64) -> bool {
    height != 0 && session_end_height(params, height) == height
}

pub fn claim_window_open_height(params: &SharedParams, height: u64) -> u64 {
    match session_end_height(params, height) {
        0 => 0,
        end => end + params.claim_window_open_offset_blocks,
    }
}

pub fn claim_window_close_height(params: &SharedParams, height: u64) -> u64 {
    match claim_window_open_height(params, height) {
        0 => 0,
        open => open + params.claim_window_close_offset_blocks,
    }
}

/// Never earlier than the claim window close
pub fn proof_window_open_height(params: &SharedParams, height: u64) -> u64 {
    let end = session_end_height(params, height);
    if end == 0 {
        return 0;
    }
    claim_window_close_height(params, height).max(end + params.proof_window_open_offset_blocks)
}

pub fn proof_window_close_height(params: &SharedParams, height: u64) -> u64 {
    match proof_window_open_height(params, height) {
        0 => 0,
        open => open + params.proof_window_close_offset_blocks,
    }
}

/// Blocks between a session's end and its proof window close
pub fn session_end_to_proof_window_close_blocks(params: &SharedParams, height: u64) -> u64 {
    let end = session_end_height(params, height);
    proof_window_close_height(params, height).saturating_sub(end)
}

/// End height of the sessions whose claims resolve at `settlement_height`,
/// or 0 when no session resolves there.
pub fn settlement_session_end_height(params: &SharedParams, settlement_height: u64) -> u64 {
    // Every session has the same end-to-close distance; measure it on the first.
    let blocks = session_end_to_proof_window_close_blocks(params, FIRST_SESSION_START_HEIGHT);
    match settlement_height.checked_sub(blocks) {
        Some(end) if is_session_end_height(params, end) => end,
        _ => 0,
    }
}

/// `window_open + (sha256(block_hash ‖ supplier) mod window_size)`
///
/// Spreads suppliers over the window so they do not all commit in the same
/// block. The seed hash is fixed before the window opens, so no supplier can
/// choose its own offset.
///
/// The stagger is enforced: a claim or proof submitted before this height is
/// rejected with `ClaimWindowNotOpen` or `ProofWindowNotOpen`. With 4-block
/// sessions and zero open offsets, session 1's claim window is `[4, 8)` and
/// each supplier's first valid claim height lies somewhere inside it rather
/// than at 4.
pub fn earliest_commit_height(
    window_open_height: u64,
    window_size_blocks: u64,
    window_open_block_hash: &Hash,
    supplier_operator_address: &str,
) -> u64 {
    if window_open_height == 0 {
        return 0;
    }
    window_open_height
        + seeded_offset(
            &[window_open_block_hash.as_bytes(), supplier_operator_address.as_bytes()],
            window_size_blocks,
        )
}

/// Earliest height at which `supplier` may create a claim for the session
/// containing `height`
pub fn earliest_supplier_claim_commit_height(
    params: &SharedParams,
    height: u64,
    claim_window_open_block_hash: &Hash,
    supplier_operator_address: &str,
) -> u64 {
    earliest_commit_height(
        claim_window_open_height(params, height),
        params.claim_window_close_offset_blocks,
        claim_window_open_block_hash,
        supplier_operator_address,
    )
}

/// Earliest height at which `supplier` may submit a proof for the session
/// containing `height`
pub fn earliest_supplier_proof_commit_height(
    params: &SharedParams,
    height: u64,
    proof_window_open_block_hash: &Hash,
    supplier_operator_address: &str,
) -> u64 {
    earliest_commit_height(
        proof_window_open_height(params, height),
        params.proof_window_close_offset_blocks,
        proof_window_open_block_hash,
        supplier_operator_address,
    )
}

/// Height whose block hash seeds a window opening at `window_open_height`
pub fn window_seed_height(window_open_height: u64) -> u64 {
    window_open_height.saturating_sub(1)
}
