//! Relay settlement core
//!
//! Session commit windows, relay-mining difficulty adaptation and claim
//! settlement for a proof-of-relay protocol. Suppliers commit to the relays
//! they served in a session, the chain audits a pseudo-random sample of those
//! commitments, and settled claims move tokens between module accounts.
//!
//! Execution is single-threaded and deterministic: every function here is a
//! pure function of its inputs and the key-value store it is handed.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod node;
pub mod proof;
pub mod service;
pub mod session;
pub mod storage;
pub mod tokenomics;

/// Protocol constants and parameter defaults
pub mod constants {
    /// Denominator for basis-point splits
    pub const BPS_DENOMINATOR: u64 = 10_000;

    /// Sessions are 1-indexed: the first session starts at this height
    pub const FIRST_SESSION_START_HEIGHT: u64 = 1;

    pub const DEFAULT_NUM_BLOCKS_PER_SESSION: u64 = 4;
    pub const DEFAULT_CLAIM_WINDOW_OPEN_OFFSET_BLOCKS: u64 = 1;
    pub const DEFAULT_CLAIM_WINDOW_CLOSE_OFFSET_BLOCKS: u64 = 4;
    pub const DEFAULT_PROOF_WINDOW_OPEN_OFFSET_BLOCKS: u64 = 0;
    pub const DEFAULT_PROOF_WINDOW_CLOSE_OFFSET_BLOCKS: u64 = 4;
    pub const DEFAULT_COMPUTE_UNITS_TO_TOKENS_MULTIPLIER: u64 = 42;

    pub const DEFAULT_PROOF_REQUEST_PROBABILITY: f64 = 0.25;
    /// 20 whole tokens at 6 decimal places
    pub const DEFAULT_PROOF_REQUIREMENT_THRESHOLD: u64 = 20_000_000;
    /// 1 whole token at 6 decimal places
    pub const DEFAULT_PROOF_MISSING_PENALTY: u64 = 1_000_000;

    pub const DEFAULT_TARGET_NUM_RELAYS: u64 = 10_000;

    /// EMA smoothing factor alpha = 1/10, kept as a fraction so every node
    /// computes the same integer result
    pub const EMA_SMOOTHING_NUMERATOR: u64 = 1;
    pub const EMA_SMOOTHING_DENOMINATOR: u64 = 10;

    /// Failed settlements are retried this many times before the claim expires
    pub const MAX_SETTLEMENT_ATTEMPTS: u32 = 3;

    /// Module accounts touched by settlement
    pub const APPLICATION_MODULE: &str = "application";
    pub const SUPPLIER_MODULE: &str = "supplier";
    pub const TOKENOMICS_MODULE: &str = "tokenomics";
    pub const DAO_MODULE: &str = "dao";
}
