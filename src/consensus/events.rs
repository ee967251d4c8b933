//! Typed events for external indexers
//!
//! State transitions return their events instead of writing to a hidden
//! sink; the block context forwards them once the transition has succeeded.

use serde::{Deserialize, Serialize};

/// Why a proof had to be submitted for a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofRequirementReason {
    NotRequired,
    /// Selected by the seeded draw
    Probabilistic,
    /// Claimed amount reached the threshold
    Threshold,
}

impl ProofRequirementReason {
    pub fn is_required(&self) -> bool {
        !matches!(self, ProofRequirementReason::NotRequired)
    }
}

/// Why a claim expired instead of settling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpirationReason {
    ProofMissing,
    ProofInvalid,
    /// Settlement kept failing until the retry budget ran out
    SettlementFailed,
}

/// Identity and size of a claim, repeated in every claim event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSummary {
    pub session_id: String,
    pub service_id: String,
    pub application_address: String,
    pub supplier_operator_address: String,
    pub session_end_height: u64,
    pub num_relays: u64,
    pub num_claimed_compute_units: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ClaimCreated {
        claim: ClaimSummary,
        proof_window_close_height: u64,
    },
    ProofSubmitted {
        claim: ClaimSummary,
    },
    ClaimSettled {
        claim: ClaimSummary,
        num_estimated_compute_units: u64,
        claimed_amount: u64,
        proof_requirement: ProofRequirementReason,
    },
    ClaimExpired {
        claim: ClaimSummary,
        reason: ExpirationReason,
        num_estimated_compute_units: u64,
        claimed_amount: u64,
    },
    ClaimSettlementFailed {
        claim: ClaimSummary,
        attempt: u32,
        error: String,
    },
    /// Application stake could not cover the claim; settlement burned
    /// `effective_burn` instead of `expected_burn`
    ApplicationOverserviced {
        application_address: String,
        supplier_operator_address: String,
        expected_burn: u64,
        effective_burn: u64,
    },
    SupplierSlashed {
        supplier_operator_address: String,
        num_expired_claims: u64,
        slashed_amount: u64,
    },
    RelayMiningDifficultyUpdated {
        service_id: String,
        prev_target_hash_hex_encoded: String,
        new_target_hash_hex_encoded: String,
        prev_num_relays_ema: u64,
        new_num_relays_ema: u64,
    },
}

impl DomainEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::ClaimCreated { .. } => "claim_created",
            DomainEvent::ProofSubmitted { .. } => "proof_submitted",
            DomainEvent::ClaimSettled { .. } => "claim_settled",
            DomainEvent::ClaimExpired { .. } => "claim_expired",
            DomainEvent::ClaimSettlementFailed { .. } => "claim_settlement_failed",
            DomainEvent::ApplicationOverserviced { .. } => "application_overserviced",
            DomainEvent::SupplierSlashed { .. } => "supplier_slashed",
            DomainEvent::RelayMiningDifficultyUpdated { .. } => "relay_mining_difficulty_updated",
        }
    }

    /// JSON encoding consumed by indexers
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
