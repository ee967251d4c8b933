//! Proof verification at resolution time
//!
//! The challenged leaf is fixed by a path derived from the block hash just
//! before the proof window opened, which no supplier knew when it committed
//! its root.

use thiserror::Error;

use super::{Claim, Proof};
use crate::consensus::is_relay_volume_applicable;
use crate::crypto::{sha256, Hash, MerkleError};

/// Reasons a stored proof fails to back its claim
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofValidationError {
    #[error("proof is for session {proof_session} by {proof_supplier}, claim is for {claim_session} by {claim_supplier}")]
    ClaimMismatch {
        claim_session: String,
        claim_supplier: String,
        proof_session: String,
        proof_supplier: String,
    },
    #[error("proof path {got} does not match challenge {expected}")]
    PathMismatch { expected: Hash, got: Hash },
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error("proven relay hash {relay_hash} is above target {target_hash}")]
    RelayNotApplicable { relay_hash: Hash, target_hash: Hash },
}

/// `sha256(proof_window_seed_hash ‖ session_id)`
pub fn proof_path(proof_window_seed_hash: &Hash, session_id: &str) -> Hash {
    sha256(&[proof_window_seed_hash.as_bytes(), session_id.as_bytes()])
}

/// Check `proof` against `claim`: same session and supplier, the expected
/// challenge path, a valid closest proof under the claim root, and a proven
/// relay that meets the service's target.
pub fn validate_proof(
    claim: &Claim,
    proof: &Proof,
    expected_path: &Hash,
    target_hash: &Hash,
) -> Result<(), ProofValidationError> {
    if claim.session_header.session_id != proof.session_header.session_id
        || claim.supplier_operator_address != proof.supplier_operator_address
    {
        return Err(ProofValidationError::ClaimMismatch {
            claim_session: claim.session_header.session_id.clone(),
            claim_supplier: claim.supplier_operator_address.clone(),
            proof_session: proof.session_header.session_id.clone(),
            proof_supplier: proof.supplier_operator_address.clone(),
        });
    }

    let closest = proof.decode()?;
    if closest.path != *expected_path {
        return Err(ProofValidationError::PathMismatch { expected: *expected_path, got: closest.path });
    }

    closest.verify(&claim.root()?)?;

    let relay_hash = closest.leaf_key();
    if !is_relay_volume_applicable(&relay_hash, target_hash) {
        return Err(ProofValidationError::RelayNotApplicable { relay_hash, target_hash: *target_hash });
    }
    Ok(())
}
