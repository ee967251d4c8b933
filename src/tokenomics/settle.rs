//! End-of-block settlement
//!
//! Claims whose proof window has closed are resolved in store key order.
//! Each claim is isolated: its balance changes run on a cache over the block
//! store and are dropped if anything fails, in which case the claim stays
//! pending and is retried on the next block.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use thiserror::Error;

use super::{PendingSettlementResult, TokenLogicModule};
use crate::consensus::{
    proof_window_open_height, scale_by_difficulty, session_end_to_proof_window_close_blocks,
    settlement_session_end_height, window_seed_height, BlockContext, DomainEvent, ExpirationReason, Params, ProofRequirementReason, SharedParams,
};
use crate::constants::{FIRST_SESSION_START_HEIGHT, MAX_SETTLEMENT_ATTEMPTS};
use crate::crypto::{Hash, MerkleError};
use crate::proof::{proof_path, proof_requirement, validate_proof, Claim};
use crate::service::{get_relay_mining_difficulty_at_height, update_relay_mining_difficulty};
use crate::storage::{
    Bank, BankError, BlockHashStore, CacheStore, ClaimStore, DifficultyStore, KvStore, PendingClaim, ProofStore,
    StoreError,
};

/// Per-claim settlement errors
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid claim root: {0}")]
    InvalidRoot(#[from] MerkleError),
    #[error("claim commits to no work")]
    EmptyClaim,
    #[error("settlement amount overflows: {compute_units} compute units x {multiplier}")]
    AmountOverflow { compute_units: u64, multiplier: u64 },
    #[error("block hash at height {0} is unknown")]
    MissingBlockHash(u64),
    #[error(transparent)]
    Bank(#[from] BankError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ordered set of token logic modules run for every settled claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPipeline {
    modules: Vec<TokenLogicModule>,
}

impl Default for SettlementPipeline {
    fn default() -> Self {
        Self { modules: TokenLogicModule::ALL.to_vec() }
    }
}

impl SettlementPipeline {
    pub fn with_modules(modules: Vec<TokenLogicModule>) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &[TokenLogicModule] {
        &self.modules
    }

    /// Operations for settling `claim` for `amount`
    pub fn process(
        &self,
        claim: &Claim,
        amount: u64,
        params: &Params,
        ctx: &BlockContext,
    ) -> PendingSettlementResult {
        let mut result = PendingSettlementResult::new(claim.clone(), amount);
        for module in &self.modules {
            let effects = module.process(amount, claim, &params.tokenomics, ctx);
            debug!(
                "Token logic module {} produced {} mints, {} burns, {} transfers",
                module.name(),
                effects.mints.len(),
                effects.burns.len(),
                effects.mod_to_mod_transfers.len() + effects.mod_to_acct_transfers.len()
            );
            result.append(effects);
        }
        result
    }
}

/// Claimed and estimated work of a claim and the tokens it is worth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimAmount {
    pub num_relays: u64,
    pub num_estimated_relays: u64,
    pub num_claimed_compute_units: u64,
    pub num_estimated_compute_units: u64,
    pub settlement_amount: u64,
}

/// `scale_by_difficulty(root.sum) * compute_units_to_tokens_multiplier`
pub fn claim_settlement_amount(
    claim: &Claim,
    shared: &SharedParams,
    target_hash: &Hash,
) -> Result<ClaimAmount, SettlementError> {
    let root = claim.root()?;
    if root.count == 0 || root.sum == 0 {
        return Err(SettlementError::EmptyClaim);
    }
    let num_estimated_compute_units = scale_by_difficulty(root.sum, target_hash);
    let settlement_amount = num_estimated_compute_units
        .checked_mul(shared.compute_units_to_tokens_multiplier)
        .ok_or(SettlementError::AmountOverflow {
            compute_units: num_estimated_compute_units,
            multiplier: shared.compute_units_to_tokens_multiplier,
        })?;
    Ok(ClaimAmount {
        num_relays: root.count,
        num_estimated_relays: scale_by_difficulty(root.count, target_hash),
        num_claimed_compute_units: root.sum,
        num_estimated_compute_units,
        settlement_amount,
    })
}

/// A claim resolved without payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredClaim {
    pub claim: Claim,
    pub reason: ExpirationReason,
    pub num_estimated_compute_units: u64,
    pub claimed_amount: u64,
}

/// Outcome of one settlement pass
#[derive(Debug, Default)]
pub struct SettlementOutcome {
    pub settled: Vec<PendingSettlementResult>,
    pub expired: Vec<ExpiredClaim>,
    /// Claims left pending after a failed attempt
    pub failed: usize,
    /// Estimated relays settled per service, fed to the difficulty update
    pub relays_per_service: BTreeMap<String, u64>,
    pub events: Vec<DomainEvent>,
}

impl SettlementOutcome {
    pub fn settled_amount(&self) -> u64 {
        self.settled.iter().map(|result| result.settlement_amount).sum()
    }
}

enum Resolution {
    Settled(PendingSettlementResult, ClaimAmount, ProofRequirementReason, Option<DomainEvent>),
    Expired(ExpiredClaim),
}

/// Resolve every claim whose proof window closed at or before `ctx.height`.
///
/// Only store failures abort the pass; per-claim failures are logged,
/// reported as events and retried.
pub fn run_session_settlement<S: KvStore + ?Sized>(
    store: &mut S,
    params: &Params,
    pipeline: &SettlementPipeline,
    ctx: &BlockContext,
) -> Result<SettlementOutcome, StoreError> {
    let mut outcome = SettlementOutcome::default();
    let mut expired_per_supplier: BTreeMap<String, u64> = BTreeMap::new();

    let session_end = settlement_session_end_height(&params.shared, ctx.height);
    if session_end > 0 {
        debug!("Block {} closes the proof window of sessions ending at {}", ctx.height, session_end);
    }

    for pending in ClaimStore::due_at(store, ctx.height)? {
        match resolve_claim(store, params, pipeline, ctx, &pending) {
            Ok(Resolution::Settled(result, amount, requirement, overserviced)) => {
                remove_claim(store, &pending)?;
                let summary = result.claim.summary();
                info!(
                    "Settled claim for session {} by {}: {} relays ({} estimated), {} tokens, proof {:?}",
                    summary.session_id,
                    summary.supplier_operator_address,
                    amount.num_relays,
                    amount.num_estimated_relays,
                    result.settlement_amount,
                    requirement
                );
                *outcome.relays_per_service.entry(summary.service_id.clone()).or_default() +=
                    amount.num_estimated_relays;
                outcome.events.extend(overserviced);
                outcome.events.push(DomainEvent::ClaimSettled {
                    claim: summary,
                    num_estimated_compute_units: amount.num_estimated_compute_units,
                    claimed_amount: result.settlement_amount,
                    proof_requirement: requirement,
                });
                outcome.settled.push(result);
            }
            Ok(Resolution::Expired(expired)) => {
                remove_claim(store, &pending)?;
                *expired_per_supplier.entry(pending.supplier().to_string()).or_default() += 1;
                expire(&mut outcome, expired);
            }
            Err(SettlementError::Store(err)) | Err(SettlementError::Bank(BankError::Store(err))) => {
                return Err(err)
            }
            Err(err) => {
                let attempt = pending.settlement_attempts + 1;
                let summary = pending.claim.summary();
                warn!(
                    "Failed to settle claim for session {} by {} (attempt {}/{}): {}",
                    summary.session_id, summary.supplier_operator_address, attempt, MAX_SETTLEMENT_ATTEMPTS, err
                );
                outcome.events.push(DomainEvent::ClaimSettlementFailed {
                    claim: summary,
                    attempt,
                    error: err.to_string(),
                });

                if attempt >= MAX_SETTLEMENT_ATTEMPTS {
                    remove_claim(store, &pending)?;
                    expire(
                        &mut outcome,
                        ExpiredClaim {
                            claim: pending.claim.clone(),
                            reason: ExpirationReason::SettlementFailed,
                            num_estimated_compute_units: 0,
                            claimed_amount: 0,
                        },
                    );
                } else {
                    ClaimStore::insert(store, &PendingClaim { settlement_attempts: attempt, ..pending.clone() })?;
                    outcome.failed += 1;
                }
            }
        }
    }

    for (supplier, num_expired_claims) in expired_per_supplier {
        let penalty = params.proof.proof_missing_penalty.saturating_mul(num_expired_claims);
        let slashed_amount = store.slash_supplier(&supplier, penalty).map_err(|err| match err {
            BankError::Store(err) => err,
            other => StoreError::Corrupt(other.to_string()),
        })?;
        if slashed_amount > 0 {
            warn!(
                "Slashed supplier {} by {} for {} expired claims",
                supplier, slashed_amount, num_expired_claims
            );
        }
        outcome.events.push(DomainEvent::SupplierSlashed {
            supplier_operator_address: supplier,
            num_expired_claims,
            slashed_amount,
        });
    }

    Ok(outcome)
}

fn expire(outcome: &mut SettlementOutcome, expired: ExpiredClaim) {
    let summary = expired.claim.summary();
    info!(
        "Expired claim for session {} by {}: {:?}",
        summary.session_id, summary.supplier_operator_address, expired.reason
    );
    outcome.events.push(DomainEvent::ClaimExpired {
        claim: summary,
        reason: expired.reason,
        num_estimated_compute_units: expired.num_estimated_compute_units,
        claimed_amount: expired.claimed_amount,
    });
    outcome.expired.push(expired);
}

fn remove_claim<S: KvStore + ?Sized>(store: &mut S, pending: &PendingClaim) -> Result<(), StoreError> {
    ProofStore::remove(store, pending.session_id(), pending.supplier())?;
    ClaimStore::remove(store, pending)
}

fn resolve_claim<S: KvStore + ?Sized>(
    store: &mut S,
    params: &Params,
    pipeline: &SettlementPipeline,
    ctx: &BlockContext,
    pending: &PendingClaim,
) -> Result<Resolution, SettlementError> {
    let claim = &pending.claim;
    let header = &claim.session_header;
    let difficulty = get_relay_mining_difficulty_at_height(
        store,
        &params.service,
        &header.service_id,
        header.session_start_block_height,
    )?;
    let amount = claim_settlement_amount(claim, &params.shared, &difficulty.target_hash)?;
    let requirement = proof_requirement(claim, amount.settlement_amount, &params.proof);

    if requirement.is_required() {
        let expired = |reason| ExpiredClaim {
            claim: claim.clone(),
            reason,
            num_estimated_compute_units: amount.num_estimated_compute_units,
            claimed_amount: amount.settlement_amount,
        };

        let proof = match ProofStore::get(store, pending.session_id(), pending.supplier())? {
            Some(proof) => proof,
            None => return Ok(Resolution::Expired(expired(ExpirationReason::ProofMissing))),
        };

        let seed_height =
            window_seed_height(proof_window_open_height(&params.shared, claim.session_header.session_start_block_height));
        let seed_hash = BlockHashStore::get(store, seed_height)?.ok_or(SettlementError::MissingBlockHash(seed_height))?;
        let path = proof_path(&seed_hash, pending.session_id());
        if let Err(err) = validate_proof(claim, &proof, &path, &difficulty.target_hash) {
            info!("Invalid proof for session {} by {}: {}", pending.session_id(), pending.supplier(), err);
            return Ok(Resolution::Expired(expired(ExpirationReason::ProofInvalid)));
        }
    }

    let stake = store.application_stake(&header.application_address)?;
    let (settlement_amount, overserviced) = if amount.settlement_amount > stake {
        warn!(
            "Application {} overserviced in session {}: burning stake {} instead of {}",
            header.application_address,
            pending.session_id(),
            stake,
            amount.settlement_amount
        );
        let event = DomainEvent::ApplicationOverserviced {
            application_address: header.application_address.clone(),
            supplier_operator_address: pending.supplier().to_string(),
            expected_burn: amount.settlement_amount,
            effective_burn: stake,
        };
        (stake, Some(event))
    } else {
        (amount.settlement_amount, None)
    };

    let result = pipeline.process(claim, settlement_amount, params, ctx);
    let mut cache = CacheStore::new(store);
    result.apply(&mut cache)?;
    cache.debit_application_stake(&header.application_address, settlement_amount)?;
    cache.write()?;
    Ok(Resolution::Settled(result, amount, requirement, overserviced))
}

/// Blocks of hash history kept for commit windows, proof challenges and retries
pub fn block_hash_retention_blocks(shared: &SharedParams) -> u64 {
    shared.num_blocks_per_session
        + session_end_to_proof_window_close_blocks(shared, FIRST_SESSION_START_HEIGHT)
        + MAX_SETTLEMENT_ATTEMPTS as u64
        + 1
}

/// What happened in one `end_block`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub height: u64,
    pub num_settled: usize,
    pub num_expired: usize,
    pub num_failed: usize,
    pub settled_amount: u64,
    pub num_events: usize,
}

/// End-of-block pass: record the block hash, settle due claims, update
/// difficulty from the settled volume and prune stale hash and difficulty
/// history.
///
/// All writes go to `store`; callers pass a block-level cache and write it
/// once the block is final.
pub fn end_block<S: KvStore + ?Sized>(
    store: &mut S,
    params: &Params,
    pipeline: &SettlementPipeline,
    ctx: &mut BlockContext,
) -> Result<BlockSummary, StoreError> {
    BlockHashStore::record(store, ctx.height, &ctx.block_hash)?;

    let mut outcome = run_session_settlement(store, params, pipeline, ctx)?;
    if !outcome.relays_per_service.is_empty() {
        let events = update_relay_mining_difficulty(store, params, ctx, &outcome.relays_per_service)?;
        outcome.events.extend(events);
    }

    let retention = block_hash_retention_blocks(&params.shared);
    if ctx.height > retention {
        let below = ctx.height - retention;
        let pruned = BlockHashStore::prune_below(store, below)?;
        if pruned > 0 {
            debug!("Pruned {} block hashes below height {}", pruned, below);
        }
        for difficulty in DifficultyStore::all(store)? {
            let pruned = DifficultyStore::prune_history_below(store, &difficulty.service_id, below)?;
            if pruned > 0 {
                debug!("Pruned {} difficulty records of {} below height {}", pruned, difficulty.service_id, below);
            }
        }
    }

    let summary = BlockSummary {
        height: ctx.height,
        num_settled: outcome.settled.len(),
        num_expired: outcome.expired.len(),
        num_failed: outcome.failed,
        settled_amount: outcome.settled_amount(),
        num_events: outcome.events.len(),
    };
    if summary.num_settled + summary.num_expired + summary.num_failed > 0 {
        info!(
            "Block {}: settled {} claims for {} tokens, expired {}, failed {}",
            summary.height, summary.num_settled, summary.settled_amount, summary.num_expired, summary.num_failed
        );
    }
    ctx.emit_all(outcome.events);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::BASE_RELAY_DIFFICULTY_HASH;
    use crate::constants::{APPLICATION_MODULE, DAO_MODULE};
    use crate::crypto::ClosestProof;
    use crate::node::{Message, Node, Relayer};
    use crate::proof::Proof;
    use crate::session::{SessionHeader, StaticRoster};
    use crate::storage::MemStore;

    const STAKE: u64 = 10_000_000;
    const APP_FUNDS: u64 = 1_000_000_000;

    fn params(probability: f64, threshold: u64) -> Params {
        let mut params = Params::default();
        params.shared = SharedParams {
            num_blocks_per_session: 4,
            claim_window_open_offset_blocks: 0,
            claim_window_close_offset_blocks: 4,
            proof_window_open_offset_blocks: 0,
            proof_window_close_offset_blocks: 4,
            compute_units_to_tokens_multiplier: 42,
        };
        params.proof.proof_request_probability = probability;
        params.proof.proof_requirement_threshold = threshold;
        params
    }

    /// Node at height 1 with one staked supplier that served `relays`
    /// relays of 100 compute units in session 1 for an application staked
    /// with `app_funds`
    fn setup(params: Params, relays: usize, app_funds: u64) -> (Node<MemStore>, Relayer) {
        let mut node = Node::new(MemStore::new(), params, StaticRoster::new(), 0).unwrap();
        node.register_supplier("svc", "supplier", STAKE).unwrap();
        node.stake_application("app", app_funds).unwrap();
        node.apply_block(vec![]).unwrap();

        let header = SessionHeader::new(&node.params().shared, "app", "svc", 1, &node.block_hash(1).unwrap().unwrap());
        let mut relayer = Relayer::new("supplier");
        for i in 0..relays {
            relayer.record_relay(&header, format!("relay-{i}").into_bytes(), 100, &BASE_RELAY_DIFFICULTY_HASH);
        }
        (node, relayer)
    }

    fn run_until(
        node: &mut Node<MemStore>,
        relayer: &mut Relayer,
        height: u64,
        filter: impl Fn(Message) -> Option<Message>,
    ) -> Vec<DomainEvent> {
        run_all_until(node, std::slice::from_mut(relayer), height, filter)
    }

    fn run_all_until(
        node: &mut Node<MemStore>,
        relayers: &mut [Relayer],
        height: u64,
        filter: impl Fn(Message) -> Option<Message>,
    ) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while node.height() < height {
            let shared = node.params().shared.clone();
            let mut messages = Vec::new();
            for relayer in relayers.iter_mut() {
                messages.extend(
                    relayer
                        .messages_at(&shared, node.height() + 1, |h| node.block_hash(h).ok().flatten())
                        .unwrap(),
                );
            }
            let outcome = node.apply_block(messages.into_iter().filter_map(&filter).collect()).unwrap();
            assert!(outcome.rejected.is_empty(), "rejected: {:?}", outcome.rejected);
            events.extend(outcome.events);
        }
        events
    }

    fn expirations(events: &[DomainEvent]) -> Vec<ExpirationReason> {
        events
            .iter()
            .filter_map(|e| match e {
                DomainEvent::ClaimExpired { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    fn settled(events: &[DomainEvent]) -> Vec<(u64, ProofRequirementReason)> {
        events
            .iter()
            .filter_map(|e| match e {
                DomainEvent::ClaimSettled { claimed_amount, proof_requirement, .. } => {
                    Some((*claimed_amount, *proof_requirement))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_claim_settles_without_proof() {
        let (mut node, mut relayer) = setup(params(0.0, u64::MAX), 10, APP_FUNDS);
        let supply_before = node.store().total_supply().unwrap();
        let events = run_until(&mut node, &mut relayer, 11, Some);
        assert!(settled(&events).is_empty(), "claims resolve at proof window close");

        let events = run_until(&mut node, &mut relayer, 12, Some);
        assert_eq!(settled(&events), vec![(42_000, ProofRequirementReason::NotRequired)]);

        let store = node.store();
        assert_eq!(store.account_balance("supplier").unwrap(), 37_800 + 29);
        assert_eq!(store.account_balance("proposer").unwrap(), 2_100 + 4);
        assert_eq!(store.module_balance(DAO_MODULE).unwrap(), 2_100 + 9);
        assert_eq!(store.module_balance(APPLICATION_MODULE).unwrap(), APP_FUNDS - 42_000);
        assert_eq!(store.application_stake("app").unwrap(), APP_FUNDS - 42_000);
        assert_eq!(store.total_supply().unwrap(), supply_before + 42);
        assert!(!events.iter().any(|e| matches!(e, DomainEvent::ApplicationOverserviced { .. })));
        assert!(ClaimStore::all(store).unwrap().is_empty());
        assert!(ProofStore::all(store).unwrap().is_empty());

        assert!(events.iter().any(|e| matches!(
            e,
            DomainEvent::RelayMiningDifficultyUpdated { new_num_relays_ema: 10, .. }
        )));
    }

    #[test]
    fn test_required_proof_settles() {
        let (mut node, mut relayer) = setup(params(1.0, u64::MAX), 25, APP_FUNDS);
        let events = run_until(&mut node, &mut relayer, 12, Some);
        assert_eq!(settled(&events), vec![(25 * 100 * 42, ProofRequirementReason::Probabilistic)]);

        let (mut node, mut relayer) = setup(params(0.0, 1), 3, APP_FUNDS);
        let events = run_until(&mut node, &mut relayer, 12, Some);
        assert_eq!(settled(&events), vec![(3 * 100 * 42, ProofRequirementReason::Threshold)]);
    }

    #[test]
    fn test_missing_proof_expires_and_slashes() {
        let (mut node, mut relayer) = setup(params(1.0, u64::MAX), 10, APP_FUNDS);
        let drop_proofs = |m: Message| match m {
            Message::SubmitProof(_) => None,
            other => Some(other),
        };
        let events = run_until(&mut node, &mut relayer, 12, drop_proofs);
        assert_eq!(expirations(&events), vec![ExpirationReason::ProofMissing]);
        assert!(events.iter().any(|e| matches!(
            e,
            DomainEvent::SupplierSlashed { num_expired_claims: 1, slashed_amount: 1_000_000, .. }
        )));
        let store = node.store();
        assert_eq!(store.supplier_stake("supplier").unwrap(), STAKE - 1_000_000);
        assert_eq!(store.account_balance("supplier").unwrap(), 0);
        assert_eq!(store.module_balance(APPLICATION_MODULE).unwrap(), APP_FUNDS);
        assert!(ClaimStore::all(store).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_proof_expires() {
        let (mut node, mut relayer) = setup(params(1.0, u64::MAX), 10, APP_FUNDS);
        let tamper = |m: Message| match m {
            Message::SubmitProof(proof) => {
                let mut closest = ClosestProof::from_bytes(&proof.closest_merkle_proof).unwrap();
                closest.leaf_weight += 1;
                Some(Message::SubmitProof(Proof::new(
                    proof.supplier_operator_address,
                    proof.session_header,
                    closest.to_bytes().unwrap(),
                )))
            }
            other => Some(other),
        };
        let events = run_until(&mut node, &mut relayer, 12, tamper);
        assert_eq!(expirations(&events), vec![ExpirationReason::ProofInvalid]);
        assert!(ProofStore::all(node.store()).unwrap().is_empty());
    }

    /// Application module drained below the recorded stake, so burning the
    /// settlement amount fails until it is refilled
    fn drain_application_module(node: &mut Node<MemStore>) {
        node.store_mut().burn_from_module(APPLICATION_MODULE, APP_FUNDS).unwrap();
    }

    #[test]
    fn test_failed_settlement_retries_then_succeeds() {
        let (mut node, mut relayer) = setup(params(0.0, u64::MAX), 10, APP_FUNDS);
        drain_application_module(&mut node);
        let events = run_until(&mut node, &mut relayer, 12, Some);
        assert!(events.iter().any(|e| matches!(e, DomainEvent::ClaimSettlementFailed { attempt: 1, .. })));
        assert_eq!(node.store().account_balance("supplier").unwrap(), 0);
        assert_eq!(node.store().application_stake("app").unwrap(), APP_FUNDS);
        let pending = ClaimStore::all(node.store()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].settlement_attempts, 1);

        node.store_mut().mint_to_module(APPLICATION_MODULE, APP_FUNDS).unwrap();
        let events = run_until(&mut node, &mut relayer, 13, Some);
        assert_eq!(settled(&events), vec![(42_000, ProofRequirementReason::NotRequired)]);
        assert!(ClaimStore::all(node.store()).unwrap().is_empty());
    }

    #[test]
    fn test_failed_settlement_expires_after_max_attempts() {
        let (mut node, mut relayer) = setup(params(0.0, u64::MAX), 10, APP_FUNDS);
        drain_application_module(&mut node);
        let events = run_until(&mut node, &mut relayer, 11 + MAX_SETTLEMENT_ATTEMPTS as u64, Some);
        let failures = events
            .iter()
            .filter(|e| matches!(e, DomainEvent::ClaimSettlementFailed { .. }))
            .count();
        assert_eq!(failures, MAX_SETTLEMENT_ATTEMPTS as usize);
        assert_eq!(expirations(&events), vec![ExpirationReason::SettlementFailed]);
        assert_eq!(node.store().supplier_stake("supplier").unwrap(), STAKE);
        assert!(ClaimStore::all(node.store()).unwrap().is_empty());
    }

    /// Two suppliers in one session; the second claims more compute units
    /// than the multiplier can turn into tokens
    fn setup_mixed_batch() -> (Node<MemStore>, Vec<Relayer>) {
        let (mut node, honest) = setup(params(0.0, u64::MAX), 10, APP_FUNDS);
        node.register_supplier("svc", "greedy", STAKE).unwrap();
        let header = SessionHeader::new(&node.params().shared, "app", "svc", 1, &node.block_hash(1).unwrap().unwrap());
        let mut greedy = Relayer::new("greedy");
        greedy.record_relay(&header, b"huge".to_vec(), u64::MAX / 4, &BASE_RELAY_DIFFICULTY_HASH);
        (node, vec![honest, greedy])
    }

    fn failed_suppliers(events: &[DomainEvent]) -> Vec<(String, u32)> {
        events
            .iter()
            .filter_map(|e| match e {
                DomainEvent::ClaimSettlementFailed { claim, attempt, .. } => {
                    Some((claim.supplier_operator_address.clone(), *attempt))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_failing_claim_does_not_block_batch() {
        let (mut node, mut relayers) = setup_mixed_batch();
        let events = run_all_until(&mut node, &mut relayers, 12, Some);

        assert_eq!(settled(&events), vec![(42_000, ProofRequirementReason::NotRequired)]);
        assert_eq!(failed_suppliers(&events), vec![("greedy".to_string(), 1)]);
        assert!(expirations(&events).is_empty());

        let store = node.store();
        assert_eq!(store.account_balance("supplier").unwrap(), 37_800 + 29);
        assert_eq!(store.account_balance("greedy").unwrap(), 0);
        assert_eq!(store.application_stake("app").unwrap(), APP_FUNDS - 42_000);
        let pending = ClaimStore::all(store).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].supplier(), "greedy");
        assert_eq!(pending[0].settlement_attempts, 1);
        assert_eq!(pending[0].proof_window_close_height, 12);
    }

    #[test]
    fn test_failing_claim_in_batch_expires_after_max_attempts() {
        let (mut node, mut relayers) = setup_mixed_batch();
        let events = run_all_until(&mut node, &mut relayers, 11 + MAX_SETTLEMENT_ATTEMPTS as u64, Some);

        assert_eq!(settled(&events).len(), 1);
        assert_eq!(
            failed_suppliers(&events),
            (1..=MAX_SETTLEMENT_ATTEMPTS).map(|attempt| ("greedy".to_string(), attempt)).collect::<Vec<_>>()
        );
        assert_eq!(expirations(&events), vec![ExpirationReason::SettlementFailed]);
        assert!(!events.iter().any(|e| matches!(e, DomainEvent::SupplierSlashed { .. })));

        let store = node.store();
        assert_eq!(store.supplier_stake("greedy").unwrap(), STAKE);
        assert_eq!(store.account_balance("greedy").unwrap(), 0);
        assert!(ClaimStore::all(store).unwrap().is_empty());
    }

    #[test]
    fn test_overserviced_application_burns_remaining_stake() {
        let stake = 30_000;
        let (mut node, mut relayer) = setup(params(0.0, u64::MAX), 10, stake);
        let events = run_until(&mut node, &mut relayer, 12, Some);

        assert!(events.contains(&DomainEvent::ApplicationOverserviced {
            application_address: "app".into(),
            supplier_operator_address: "supplier".into(),
            expected_burn: 42_000,
            effective_burn: stake,
        }));
        assert_eq!(settled(&events), vec![(stake, ProofRequirementReason::NotRequired)]);

        let store = node.store();
        assert_eq!(store.application_stake("app").unwrap(), 0);
        assert_eq!(store.module_balance(APPLICATION_MODULE).unwrap(), 0);
        assert!(store.account_balance("supplier").unwrap() >= 27_000);
        assert!(ClaimStore::all(store).unwrap().is_empty());
    }

    #[test]
    fn test_settlement_uses_difficulty_of_session_start() {
        let mut params = params(0.0, u64::MAX);
        params.shared.compute_units_to_tokens_multiplier = 1;
        params.service.target_num_relays = 100;
        let (mut node, mut relayer) = setup(params, 0, APP_FUNDS);

        // Each session mines 1000 relays of one compute unit at the
        // difficulty in force when it started.
        let mut events = Vec::new();
        for start in [1u64, 5, 9, 13] {
            events.extend(run_until(&mut node, &mut relayer, start, Some));
            let header =
                SessionHeader::new(&node.params().shared, "app", "svc", start, &node.block_hash(start).unwrap().unwrap());
            let target = get_relay_mining_difficulty_at_height(node.store(), &node.params().service, "svc", start)
                .unwrap()
                .target_hash;
            assert_eq!(target, BASE_RELAY_DIFFICULTY_HASH);
            for i in 0..1_000 {
                relayer.record_relay(&header, format!("{start}/relay-{i}").into_bytes(), 1, &target);
            }
        }
        events.extend(run_until(&mut node, &mut relayer, 24, Some));

        assert_eq!(settled(&events), vec![(1_000, ProofRequirementReason::NotRequired); 4]);
        let store = node.store();
        let service = &node.params().service;
        let current = crate::service::get_relay_mining_difficulty_or_default(store, service, "svc").unwrap();
        assert_ne!(current.target_hash, BASE_RELAY_DIFFICULTY_HASH);
        let at_17 = get_relay_mining_difficulty_at_height(store, service, "svc", 17).unwrap();
        assert_ne!(at_17.target_hash, BASE_RELAY_DIFFICULTY_HASH);
    }

    #[test]
    fn test_amount_scales_with_difficulty() {
        let claim = {
            let leaves = (0..4).map(|i| crate::crypto::SumLeaf::from_relay(vec![i], 10)).collect();
            let root = crate::crypto::MerkleSumTree::build(leaves).unwrap().root();
            let header = SessionHeader::new(&SharedParams::default(), "app", "svc", 1, &Hash::zero());
            Claim::new("s", header, root.to_bytes().to_vec())
        };
        let shared = SharedParams { compute_units_to_tokens_multiplier: 3, ..SharedParams::default() };
        let base = claim_settlement_amount(&claim, &shared, &BASE_RELAY_DIFFICULTY_HASH).unwrap();
        assert_eq!(base.settlement_amount, 120);
        assert_eq!(base.num_estimated_relays, 4);

        let quarter = crate::consensus::compute_new_difficulty_target_hash(&BASE_RELAY_DIFFICULTY_HASH, 1, 4);
        let scaled = claim_settlement_amount(&claim, &shared, &quarter).unwrap();
        assert!((480..=483).contains(&scaled.settlement_amount));

        let shared = SharedParams { compute_units_to_tokens_multiplier: u64::MAX, ..shared };
        assert!(matches!(
            claim_settlement_amount(&claim, &shared, &BASE_RELAY_DIFFICULTY_HASH),
            Err(SettlementError::AmountOverflow { .. })
        ));
    }

    #[test]
    fn test_module_order_does_not_change_balances() {
        let mut balances = Vec::new();
        for modules in [TokenLogicModule::ALL.to_vec(), TokenLogicModule::ALL.iter().rev().copied().collect()] {
            let (node, mut relayer) = setup(params(0.0, u64::MAX), 10, APP_FUNDS);
            let mut node = node.with_pipeline(SettlementPipeline::with_modules(modules));
            run_until(&mut node, &mut relayer, 12, Some);
            balances.push((
                crate::storage::module_balances(node.store()).unwrap(),
                crate::storage::account_balances(node.store()).unwrap(),
            ));
        }
        assert_eq!(balances[0], balances[1]);
    }
}
