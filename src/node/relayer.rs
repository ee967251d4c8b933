//! Supplier-side relay bookkeeping
//!
//! A `Relayer` keeps the volume-applicable relays a supplier served per
//! session, builds the session's sum tree, and produces the claim and proof
//! messages once the supplier's commit heights arrive.

use std::collections::BTreeMap;

use super::Message;
use crate::consensus::{
    claim_window_close_height, claim_window_open_height, earliest_supplier_claim_commit_height,
    earliest_supplier_proof_commit_height, is_relay_volume_applicable, proof_window_close_height,
    proof_window_open_height, window_seed_height, SharedParams,
};
use crate::crypto::{relay_hash, Hash, MerkleError, MerkleSumTree, SumLeaf};
use crate::proof::{proof_path, Claim, Proof};
use crate::session::SessionHeader;

#[derive(Debug, Clone)]
struct SessionRelays {
    header: SessionHeader,
    leaves: BTreeMap<Hash, SumLeaf>,
    claimed: bool,
    proven: bool,
}

/// Relays served by one supplier, grouped by session
#[derive(Debug, Clone)]
pub struct Relayer {
    supplier: String,
    sessions: BTreeMap<String, SessionRelays>,
}

impl Relayer {
    pub fn new(supplier: impl Into<String>) -> Self {
        Self { supplier: supplier.into(), sessions: BTreeMap::new() }
    }

    pub fn supplier(&self) -> &str {
        &self.supplier
    }

    /// Record a served relay. Returns whether it is volume applicable under
    /// `target_hash`; relays that are not, or were already recorded, are
    /// not committed.
    pub fn record_relay(
        &mut self,
        header: &SessionHeader,
        relay_bytes: Vec<u8>,
        compute_units: u64,
        target_hash: &Hash,
    ) -> bool {
        let key = relay_hash(&relay_bytes);
        if !is_relay_volume_applicable(&key, target_hash) {
            return false;
        }
        let session = self.sessions.entry(header.session_id.clone()).or_insert_with(|| SessionRelays {
            header: header.clone(),
            leaves: BTreeMap::new(),
            claimed: false,
            proven: false,
        });
        if session.claimed {
            return false;
        }
        session.leaves.entry(key).or_insert_with(|| SumLeaf { key, value: relay_bytes, weight: compute_units });
        true
    }

    /// Number of sessions still tracked
    pub fn pending_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Claims and proofs to include in the block at `height`.
    ///
    /// `block_hash` looks up hashes of executed blocks. Sessions whose proof
    /// window has closed are dropped.
    pub fn messages_at(
        &mut self,
        params: &SharedParams,
        height: u64,
        block_hash: impl Fn(u64) -> Option<Hash>,
    ) -> Result<Vec<Message>, MerkleError> {
        let mut messages = Vec::new();
        let supplier = self.supplier.clone();

        for session in self.sessions.values_mut() {
            let start = session.header.session_start_block_height;
            if session.leaves.is_empty() {
                continue;
            }

            let claim_open = claim_window_open_height(params, start);
            if !session.claimed && height >= claim_open && height < claim_window_close_height(params, start) {
                if let Some(seed) = block_hash(window_seed_height(claim_open)) {
                    if height >= earliest_supplier_claim_commit_height(params, start, &seed, &supplier) {
                        let tree = build_tree(session)?;
                        let root = tree.root().to_bytes().to_vec();
                        messages.push(Message::CreateClaim(Claim::new(&supplier, session.header.clone(), root)));
                        session.claimed = true;
                    }
                }
                continue;
            }

            let proof_open = proof_window_open_height(params, start);
            if session.claimed
                && !session.proven
                && height >= proof_open
                && height < proof_window_close_height(params, start)
            {
                if let Some(seed) = block_hash(window_seed_height(proof_open)) {
                    if height >= earliest_supplier_proof_commit_height(params, start, &seed, &supplier) {
                        let tree = build_tree(session)?;
                        let path = proof_path(&seed, &session.header.session_id);
                        let proof = tree.prove_closest(&path)?.to_bytes()?;
                        messages.push(Message::SubmitProof(Proof::new(&supplier, session.header.clone(), proof)));
                        session.proven = true;
                    }
                }
            }
        }

        self.sessions
            .retain(|_, session| height < proof_window_close_height(params, session.header.session_start_block_height));
        Ok(messages)
    }
}

fn build_tree(session: &SessionRelays) -> Result<MerkleSumTree, MerkleError> {
    MerkleSumTree::build(session.leaves.values().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::BASE_RELAY_DIFFICULTY_HASH;

    fn params() -> SharedParams {
        SharedParams {
            num_blocks_per_session: 4,
            claim_window_open_offset_blocks: 0,
            claim_window_close_offset_blocks: 4,
            proof_window_open_offset_blocks: 0,
            proof_window_close_offset_blocks: 4,
            ..SharedParams::default()
        }
    }

    #[test]
    fn test_relay_filtering() {
        let header = SessionHeader::new(&params(), "app", "svc", 1, &Hash::zero());
        let mut relayer = Relayer::new("sup");
        assert!(relayer.record_relay(&header, b"r1".to_vec(), 1, &BASE_RELAY_DIFFICULTY_HASH));
        assert!(!relayer.record_relay(&header, b"r2".to_vec(), 1, &Hash::zero()));
        assert_eq!(relayer.pending_sessions(), 1);
    }

    #[test]
    fn test_claim_then_proof_once_each() {
        let header = SessionHeader::new(&params(), "app", "svc", 1, &Hash::zero());
        let mut relayer = Relayer::new("sup");
        for i in 0..10 {
            relayer.record_relay(&header, format!("relay-{i}").into_bytes(), 2, &BASE_RELAY_DIFFICULTY_HASH);
        }
        let hashes = |h: u64| Some(Hash([h as u8; 32]));

        let mut claims = 0;
        let mut proofs = 0;
        for height in 1..=13 {
            for message in relayer.messages_at(&params(), height, hashes).unwrap() {
                match message {
                    Message::CreateClaim(claim) => {
                        assert!((4..8).contains(&height));
                        assert_eq!(claim.num_relays().unwrap(), 10);
                        claims += 1;
                    }
                    Message::SubmitProof(_) => {
                        assert!((8..12).contains(&height));
                        proofs += 1;
                    }
                }
            }
        }
        assert_eq!((claims, proofs), (1, 1));
        assert_eq!(relayer.pending_sessions(), 0);
    }
}
