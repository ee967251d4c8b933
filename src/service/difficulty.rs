//! Relay mining difficulty records and their per-session update
//!
//! After each settlement pass the number of relays settled for every service
//! feeds an EMA; the EMA sets the service's target hash for later sessions.
//! Each update applies from the next session start, and is kept in a history
//! so a session is always settled at the difficulty its relays were mined at.

use std::collections::BTreeMap;

use log::info;
use serde::{Deserialize, Serialize};

use crate::consensus::{
    compute_ema, compute_new_difficulty_target_hash, difficulty_multiplier, next_session_start_height, BlockContext,
    DomainEvent, Params, ServiceParams, BASE_RELAY_DIFFICULTY_HASH,
};
use crate::crypto::Hash;
use crate::storage::{DifficultyStore, KvStore, StoreError};

/// Difficulty state of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMiningDifficulty {
    pub service_id: String,
    /// Height of the last update
    pub block_height: u64,
    pub num_relays_ema: u64,
    pub target_hash: Hash,
}

impl RelayMiningDifficulty {
    /// Record for a service never observed before: base target, `ema` as given
    pub fn new_default(service_id: impl Into<String>, block_height: u64, num_relays_ema: u64) -> Self {
        Self {
            service_id: service_id.into(),
            block_height,
            num_relays_ema,
            target_hash: BASE_RELAY_DIFFICULTY_HASH,
        }
    }
}

/// Stored difficulty of `service_id` and whether it was found.
///
/// Unknown services get the base target with an EMA equal to the target
/// relay count.
pub fn get_relay_mining_difficulty<S: KvStore + ?Sized>(
    store: &S,
    params: &ServiceParams,
    service_id: &str,
) -> Result<(RelayMiningDifficulty, bool), StoreError> {
    match DifficultyStore::get(store, service_id)? {
        Some(difficulty) => Ok((difficulty, true)),
        None => Ok((RelayMiningDifficulty::new_default(service_id, 0, params.target_num_relays), false)),
    }
}

pub fn get_relay_mining_difficulty_or_default<S: KvStore + ?Sized>(
    store: &S,
    params: &ServiceParams,
    service_id: &str,
) -> Result<RelayMiningDifficulty, StoreError> {
    Ok(get_relay_mining_difficulty(store, params, service_id)?.0)
}

/// Difficulty in force at `height` for `service_id`.
///
/// Relays of a session are mined at the difficulty in force at its start
/// height. Heights before the service's first update resolve to the base
/// target.
pub fn get_relay_mining_difficulty_at_height<S: KvStore + ?Sized>(
    store: &S,
    params: &ServiceParams,
    service_id: &str,
    height: u64,
) -> Result<RelayMiningDifficulty, StoreError> {
    match DifficultyStore::get_at_height(store, service_id, height)? {
        Some(difficulty) => Ok(difficulty),
        None => Ok(RelayMiningDifficulty::new_default(service_id, 0, params.target_num_relays)),
    }
}

/// Fold one session's relay counts into each service's difficulty.
///
/// Services are visited in id order. A service seen for the first time is
/// seeded with its observed count and the base target. The new record
/// applies from the session after the one containing `ctx.height`.
pub fn update_relay_mining_difficulty<S: KvStore + ?Sized>(
    store: &mut S,
    params: &Params,
    ctx: &BlockContext,
    relays_per_service: &BTreeMap<String, u64>,
) -> Result<Vec<DomainEvent>, StoreError> {
    let effective_height = next_session_start_height(&params.shared, ctx.height);
    let params = &params.service;
    let mut events = Vec::with_capacity(relays_per_service.len());

    for (service_id, &num_relays) in relays_per_service {
        let (prev, found) = get_relay_mining_difficulty(store, params, service_id)?;

        let next = if found {
            let num_relays_ema = compute_ema(prev.num_relays_ema, num_relays);
            RelayMiningDifficulty {
                service_id: service_id.clone(),
                block_height: ctx.height,
                num_relays_ema,
                target_hash: compute_new_difficulty_target_hash(
                    &BASE_RELAY_DIFFICULTY_HASH,
                    params.target_num_relays,
                    num_relays_ema,
                ),
            }
        } else {
            RelayMiningDifficulty::new_default(service_id.clone(), ctx.height, num_relays)
        };
        DifficultyStore::set(store, &next)?;
        DifficultyStore::set_at_height(store, effective_height, &next)?;

        if !found {
            info!(
                "Initialized relay mining difficulty for service {} at height {}: ema {}, target {}",
                service_id, ctx.height, next.num_relays_ema, next.target_hash
            );
        } else if prev.target_hash != next.target_hash {
            info!(
                "Updated relay mining difficulty for service {} at height {}: target {} -> {} ({:.2}x)",
                service_id,
                ctx.height,
                prev.target_hash,
                next.target_hash,
                difficulty_multiplier(&next.target_hash)
            );
        } else {
            info!(
                "No change in relay mining difficulty for service {} at height {}: target {}",
                service_id, ctx.height, next.target_hash
            );
        }

        events.push(DomainEvent::RelayMiningDifficultyUpdated {
            service_id: service_id.clone(),
            prev_target_hash_hex_encoded: prev.target_hash.to_hex(),
            new_target_hash_hex_encoded: next.target_hash.to_hex(),
            prev_num_relays_ema: prev.num_relays_ema,
            new_num_relays_ema: next.num_relays_ema,
        });
    }

    Ok(events)
}
