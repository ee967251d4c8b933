//! Protocol parameters
//!
//! Read-mostly values shared by the window calculator, the difficulty adapter
//! and settlement. All monetary amounts are in base token units; all splits
//! are in basis points so settlement never touches floats.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    BPS_DENOMINATOR, DEFAULT_CLAIM_WINDOW_CLOSE_OFFSET_BLOCKS, DEFAULT_CLAIM_WINDOW_OPEN_OFFSET_BLOCKS,
    DEFAULT_COMPUTE_UNITS_TO_TOKENS_MULTIPLIER, DEFAULT_NUM_BLOCKS_PER_SESSION,
    DEFAULT_PROOF_MISSING_PENALTY, DEFAULT_PROOF_REQUEST_PROBABILITY,
    DEFAULT_PROOF_REQUIREMENT_THRESHOLD, DEFAULT_PROOF_WINDOW_CLOSE_OFFSET_BLOCKS,
    DEFAULT_PROOF_WINDOW_OPEN_OFFSET_BLOCKS, DEFAULT_TARGET_NUM_RELAYS,
};

/// Parameter validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("num_blocks_per_session must be at least 1")]
    ZeroBlocksPerSession,
    #[error("claim_window_close_offset_blocks must be at least 1")]
    EmptyClaimWindow,
    #[error("proof_window_close_offset_blocks must be at least 1")]
    EmptyProofWindow,
    #[error("compute_units_to_tokens_multiplier must be positive")]
    ZeroComputeUnitsMultiplier,
    #[error("proof_request_probability {0} is outside [0, 1]")]
    InvalidProbability(f64),
    #[error("target_num_relays must be positive")]
    ZeroTargetNumRelays,
    #[error("{table} allocation sums to {sum} bps, expected {BPS_DENOMINATOR}")]
    AllocationSum { table: &'static str, sum: u128 },
}

/// Session and window parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedParams {
    pub num_blocks_per_session: u64,
    pub claim_window_open_offset_blocks: u64,
    pub claim_window_close_offset_blocks: u64,
    pub proof_window_open_offset_blocks: u64,
    pub proof_window_close_offset_blocks: u64,
    pub compute_units_to_tokens_multiplier: u64,
}

impl Default for SharedParams {
    fn default() -> Self {
        Self {
            num_blocks_per_session: DEFAULT_NUM_BLOCKS_PER_SESSION,
            claim_window_open_offset_blocks: DEFAULT_CLAIM_WINDOW_OPEN_OFFSET_BLOCKS,
            claim_window_close_offset_blocks: DEFAULT_CLAIM_WINDOW_CLOSE_OFFSET_BLOCKS,
            proof_window_open_offset_blocks: DEFAULT_PROOF_WINDOW_OPEN_OFFSET_BLOCKS,
            proof_window_close_offset_blocks: DEFAULT_PROOF_WINDOW_CLOSE_OFFSET_BLOCKS,
            compute_units_to_tokens_multiplier: DEFAULT_COMPUTE_UNITS_TO_TOKENS_MULTIPLIER,
        }
    }
}

impl SharedParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.num_blocks_per_session == 0 {
            return Err(ParamsError::ZeroBlocksPerSession);
        }
        if self.claim_window_close_offset_blocks == 0 {
            return Err(ParamsError::EmptyClaimWindow);
        }
        if self.proof_window_close_offset_blocks == 0 {
            return Err(ParamsError::EmptyProofWindow);
        }
        if self.compute_units_to_tokens_multiplier == 0 {
            return Err(ParamsError::ZeroComputeUnitsMultiplier);
        }
        Ok(())
    }
}

/// Proof requirement parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofParams {
    /// Probability that a claim below the threshold still needs a proof
    pub proof_request_probability: f64,
    /// Claims settling at or above this amount always need a proof
    pub proof_requirement_threshold: u64,
    /// Slashed from the supplier module per expired claim
    pub proof_missing_penalty: u64,
}

impl Default for ProofParams {
    fn default() -> Self {
        Self {
            proof_request_probability: DEFAULT_PROOF_REQUEST_PROBABILITY,
            proof_requirement_threshold: DEFAULT_PROOF_REQUIREMENT_THRESHOLD,
            proof_missing_penalty: DEFAULT_PROOF_MISSING_PENALTY,
        }
    }
}

impl ProofParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        let p = self.proof_request_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ParamsError::InvalidProbability(p));
        }
        Ok(())
    }
}

/// Relay mining parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceParams {
    /// Relays per session per service the network aims to account for
    pub target_num_relays: u64,
}

impl Default for ServiceParams {
    fn default() -> Self {
        Self { target_num_relays: DEFAULT_TARGET_NUM_RELAYS }
    }
}

/// Split of the settlement amount between recipients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDistribution {
    pub supplier_bps: u64,
    pub proposer_bps: u64,
    pub dao_bps: u64,
}

impl Default for SettlementDistribution {
    fn default() -> Self {
        Self { supplier_bps: 9_000, proposer_bps: 500, dao_bps: 500 }
    }
}

/// Split of newly minted inflation between recipients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintAllocation {
    pub supplier_bps: u64,
    pub proposer_bps: u64,
    pub application_bps: u64,
    pub dao_bps: u64,
}

impl Default for MintAllocation {
    fn default() -> Self {
        Self { supplier_bps: 7_000, proposer_bps: 1_000, application_bps: 0, dao_bps: 2_000 }
    }
}

/// Token logic parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenomicsParams {
    /// Extra mint per claim, as a fraction of the settlement amount
    pub global_inflation_per_claim_bps: u64,
    pub settlement_distribution: SettlementDistribution,
    pub mint_allocation: MintAllocation,
}

impl Default for TokenomicsParams {
    fn default() -> Self {
        Self {
            global_inflation_per_claim_bps: 10,
            settlement_distribution: SettlementDistribution::default(),
            mint_allocation: MintAllocation::default(),
        }
    }
}

impl TokenomicsParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        let d = &self.settlement_distribution;
        check_bps_sum("settlement_distribution", &[d.supplier_bps, d.proposer_bps, d.dao_bps])?;
        let m = &self.mint_allocation;
        check_bps_sum("mint_allocation", &[m.supplier_bps, m.proposer_bps, m.application_bps, m.dao_bps])
    }
}

fn check_bps_sum(table: &'static str, parts: &[u64]) -> Result<(), ParamsError> {
    let sum: u128 = parts.iter().map(|&bps| u128::from(bps)).sum();
    if sum != u128::from(BPS_DENOMINATOR) {
        return Err(ParamsError::AllocationSum { table, sum });
    }
    Ok(())
}

/// Every parameter set consumed by the core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub shared: SharedParams,
    pub proof: ProofParams,
    pub service: ServiceParams,
    pub tokenomics: TokenomicsParams,
}

impl Params {
    pub fn validate(&self) -> Result<(), ParamsError> {
        self.shared.validate()?;
        self.proof.validate()?;
        if self.service.target_num_relays == 0 {
            return Err(ParamsError::ZeroTargetNumRelays);
        }
        self.tokenomics.validate()
    }
}

/// `amount * bps / 10_000`, rounded down
pub fn apply_bps(amount: u64, bps: u64) -> u64 {
    ((amount as u128 * bps as u128) / BPS_DENOMINATOR as u128) as u64
}
