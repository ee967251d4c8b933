//! Proof requirement
//!
//! Large claims always need a proof. Smaller ones are audited at random with
//! a draw seeded by the claim itself, so every node reaches the same verdict
//! and a supplier cannot resubmit until it dodges the audit without changing
//! its root.

use super::Claim;
use crate::consensus::{ProofParams, ProofRequirementReason};
use crate::crypto::seeded_below_probability;

pub fn proof_requirement(claim: &Claim, claimed_amount: u64, params: &ProofParams) -> ProofRequirementReason {
    if claimed_amount >= params.proof_requirement_threshold {
        return ProofRequirementReason::Threshold;
    }
    if seeded_below_probability(&[&claim.canonical_bytes()], params.proof_request_probability) {
        return ProofRequirementReason::Probabilistic;
    }
    ProofRequirementReason::NotRequired
}
