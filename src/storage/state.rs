//! Typed ledger state
//!
//! Explicit handles over an injected `KvStore`: pending claims, submitted
//! proofs, per-service relay mining difficulty and the block hash history
//! that seeds commit windows and proof challenges.

use serde::{Deserialize, Serialize};

use super::{get_record, put_record, scan_records, KvStore, StoreError};
use crate::crypto::Hash;
use crate::proof::{Claim, Proof};
use crate::service::RelayMiningDifficulty;

const CLAIM_PREFIX: &[u8] = b"claims/";
const CLAIM_INDEX_PREFIX: &[u8] = b"claim_idx/";
const PROOF_PREFIX: &[u8] = b"proofs/";
const DIFFICULTY_PREFIX: &[u8] = b"difficulty/";
const DIFFICULTY_HISTORY_PREFIX: &[u8] = b"difficulty_history/";
const BLOCK_HASH_PREFIX: &[u8] = b"block_hash/";

/// `session_id ‖ 0x00 ‖ supplier`; session ids are hex so the separator is unambiguous
fn session_supplier_key(session_id: &str, supplier: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(session_id.len() + supplier.len() + 1);
    key.extend_from_slice(session_id.as_bytes());
    key.push(0);
    key.extend_from_slice(supplier.as_bytes());
    key
}

/// A claim waiting for its proof window to close
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClaim {
    pub claim: Claim,
    /// Height at which the claim is resolved
    pub proof_window_close_height: u64,
    /// Failed settlement attempts so far
    pub settlement_attempts: u32,
}

impl PendingClaim {
    pub fn new(claim: Claim, proof_window_close_height: u64) -> Self {
        Self { claim, proof_window_close_height, settlement_attempts: 0 }
    }

    pub fn session_id(&self) -> &str {
        &self.claim.session_header.session_id
    }

    pub fn supplier(&self) -> &str {
        &self.claim.supplier_operator_address
    }
}

/// Pending claims, ordered by resolution height then session and supplier
pub struct ClaimStore;

impl ClaimStore {
    fn key(close_height: u64, session_id: &str, supplier: &str) -> Vec<u8> {
        [CLAIM_PREFIX, &close_height.to_be_bytes()[..], &session_supplier_key(session_id, supplier)[..]].concat()
    }

    fn index_key(session_id: &str, supplier: &str) -> Vec<u8> {
        [CLAIM_INDEX_PREFIX, &session_supplier_key(session_id, supplier)[..]].concat()
    }

    /// Insert or overwrite a pending claim
    pub fn insert<S: KvStore + ?Sized>(store: &mut S, pending: &PendingClaim) -> Result<(), StoreError> {
        let key = Self::key(pending.proof_window_close_height, pending.session_id(), pending.supplier());
        put_record(store, &key, pending)?;
        put_record(store, &Self::index_key(pending.session_id(), pending.supplier()), &pending.proof_window_close_height)
    }

    pub fn get<S: KvStore + ?Sized>(
        store: &S,
        session_id: &str,
        supplier: &str,
    ) -> Result<Option<PendingClaim>, StoreError> {
        let close_height: u64 = match get_record(store, &Self::index_key(session_id, supplier))? {
            Some(height) => height,
            None => return Ok(None),
        };
        get_record(store, &Self::key(close_height, session_id, supplier))
    }

    pub fn remove<S: KvStore + ?Sized>(store: &mut S, pending: &PendingClaim) -> Result<(), StoreError> {
        store.delete(&Self::key(pending.proof_window_close_height, pending.session_id(), pending.supplier()))?;
        store.delete(&Self::index_key(pending.session_id(), pending.supplier()))
    }

    /// Claims whose proof window closed at or before `height`, in key order
    pub fn due_at<S: KvStore + ?Sized>(store: &S, height: u64) -> Result<Vec<PendingClaim>, StoreError> {
        Ok(scan_records::<PendingClaim, _>(store, CLAIM_PREFIX)?
            .into_iter()
            .map(|(_, pending)| pending)
            .take_while(|pending| pending.proof_window_close_height <= height)
            .collect())
    }

    pub fn all<S: KvStore + ?Sized>(store: &S) -> Result<Vec<PendingClaim>, StoreError> {
        Ok(scan_records(store, CLAIM_PREFIX)?.into_iter().map(|(_, pending)| pending).collect())
    }
}

/// Submitted proofs, one per session and supplier
pub struct ProofStore;

impl ProofStore {
    fn key(session_id: &str, supplier: &str) -> Vec<u8> {
        [PROOF_PREFIX, &session_supplier_key(session_id, supplier)[..]].concat()
    }

    /// Insert a proof, replacing an earlier one for the same claim
    pub fn insert<S: KvStore + ?Sized>(store: &mut S, proof: &Proof) -> Result<(), StoreError> {
        let key = Self::key(&proof.session_header.session_id, &proof.supplier_operator_address);
        put_record(store, &key, proof)
    }

    pub fn get<S: KvStore + ?Sized>(store: &S, session_id: &str, supplier: &str) -> Result<Option<Proof>, StoreError> {
        get_record(store, &Self::key(session_id, supplier))
    }

    pub fn remove<S: KvStore + ?Sized>(store: &mut S, session_id: &str, supplier: &str) -> Result<(), StoreError> {
        store.delete(&Self::key(session_id, supplier))
    }

    pub fn all<S: KvStore + ?Sized>(store: &S) -> Result<Vec<Proof>, StoreError> {
        Ok(scan_records(store, PROOF_PREFIX)?.into_iter().map(|(_, proof)| proof).collect())
    }
}

/// Relay mining difficulty per service: the latest record, plus a history
/// keyed by the height from which each record applies
pub struct DifficultyStore;

impl DifficultyStore {
    fn key(service_id: &str) -> Vec<u8> {
        [DIFFICULTY_PREFIX, service_id.as_bytes()].concat()
    }

    /// `service_id ‖ 0x00`, the prefix of one service's history
    fn history_prefix(service_id: &str) -> Vec<u8> {
        [DIFFICULTY_HISTORY_PREFIX, service_id.as_bytes(), &[0u8][..]].concat()
    }

    fn history_height(prefix: &[u8], key: &[u8]) -> Result<u64, StoreError> {
        let raw: [u8; 8] = key[prefix.len()..]
            .try_into()
            .map_err(|_| StoreError::Corrupt(format!("difficulty history key {}", hex::encode(key))))?;
        Ok(u64::from_be_bytes(raw))
    }

    pub fn get<S: KvStore + ?Sized>(store: &S, service_id: &str) -> Result<Option<RelayMiningDifficulty>, StoreError> {
        get_record(store, &Self::key(service_id))
    }

    pub fn set<S: KvStore + ?Sized>(store: &mut S, difficulty: &RelayMiningDifficulty) -> Result<(), StoreError> {
        put_record(store, &Self::key(&difficulty.service_id), difficulty)
    }

    /// Every record, in service id order
    pub fn all<S: KvStore + ?Sized>(store: &S) -> Result<Vec<RelayMiningDifficulty>, StoreError> {
        Ok(scan_records(store, DIFFICULTY_PREFIX)?.into_iter().map(|(_, record)| record).collect())
    }

    /// Record `difficulty` as the one in force from `effective_height` on
    pub fn set_at_height<S: KvStore + ?Sized>(
        store: &mut S,
        effective_height: u64,
        difficulty: &RelayMiningDifficulty,
    ) -> Result<(), StoreError> {
        let key = [&Self::history_prefix(&difficulty.service_id)[..], &effective_height.to_be_bytes()[..]].concat();
        put_record(store, &key, difficulty)
    }

    /// The record in force at `height`: the latest one whose effective
    /// height is at or below it
    pub fn get_at_height<S: KvStore + ?Sized>(
        store: &S,
        service_id: &str,
        height: u64,
    ) -> Result<Option<RelayMiningDifficulty>, StoreError> {
        let prefix = Self::history_prefix(service_id);
        let mut found = None;
        for (key, record) in scan_records(store, &prefix)? {
            if Self::history_height(&prefix, &key)? > height {
                break;
            }
            found = Some(record);
        }
        Ok(found)
    }

    /// Drop history that no height at or above `height` can resolve to.
    /// The latest record effective at or below `height` is kept.
    pub fn prune_history_below<S: KvStore + ?Sized>(
        store: &mut S,
        service_id: &str,
        height: u64,
    ) -> Result<usize, StoreError> {
        let prefix = Self::history_prefix(service_id);
        let mut covered = Vec::new();
        for (key, _) in store.scan_prefix(&prefix)? {
            if Self::history_height(&prefix, &key)? > height {
                break;
            }
            covered.push(key);
        }
        covered.pop();
        for key in &covered {
            store.delete(key)?;
        }
        Ok(covered.len())
    }
}

/// Hashes of executed blocks
pub struct BlockHashStore;

impl BlockHashStore {
    fn key(height: u64) -> Vec<u8> {
        [BLOCK_HASH_PREFIX, &height.to_be_bytes()[..]].concat()
    }

    pub fn record<S: KvStore + ?Sized>(store: &mut S, height: u64, hash: &Hash) -> Result<(), StoreError> {
        store.set(&Self::key(height), hash.as_bytes())
    }

    /// Hash of the block at `height`. Height 0 is the pre-genesis block and
    /// reads as the zero hash unless one was recorded.
    pub fn get<S: KvStore + ?Sized>(store: &S, height: u64) -> Result<Option<Hash>, StoreError> {
        match store.get(&Self::key(height))? {
            Some(bytes) => Hash::from_slice(&bytes)
                .map(Some)
                .ok_or_else(|| StoreError::Corrupt(format!("block hash at height {height}"))),
            None if height == 0 => Ok(Some(Hash::zero())),
            None => Ok(None),
        }
    }

    /// Drop hashes below `height`
    pub fn prune_below<S: KvStore + ?Sized>(store: &mut S, height: u64) -> Result<usize, StoreError> {
        let stale: Vec<Vec<u8>> = store
            .scan_prefix(BLOCK_HASH_PREFIX)?
            .into_iter()
            .map(|(key, _)| key)
            .take_while(|key| key[BLOCK_HASH_PREFIX.len()..] < height.to_be_bytes()[..])
            .collect();
        for key in &stale {
            store.delete(key)?;
        }
        Ok(stale.len())
    }
}
