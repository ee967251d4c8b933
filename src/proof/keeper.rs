//! Claim and proof submission
//!
//! Both entry points validate everything before writing. On success the
//! record is stored and the events to emit are returned to the caller.

use log::{debug, info};

use super::{Claim, Proof};
use crate::consensus::{
    claim_window_close_height, claim_window_open_height, earliest_commit_height, proof_window_close_height,
    proof_window_open_height, validate_claim_root, validate_claim_window, validate_proof_window,
    validate_session_heights, validate_session_id, window_seed_height, BlockContext, DomainEvent, Params,
    ValidationError,
};
use crate::crypto::Hash;
use crate::session::{SessionHeader, SessionMembership};
use crate::storage::{BlockHashStore, ClaimStore, KvStore, PendingClaim, ProofStore};

fn block_hash_at<S: KvStore + ?Sized>(store: &S, height: u64) -> Result<Hash, ValidationError> {
    BlockHashStore::get(store, height)?.ok_or(ValidationError::MissingBlockHash(height))
}

/// Header and membership checks shared by claims and proofs
fn validate_session<S, M>(
    store: &S,
    params: &Params,
    membership: &M,
    header: &SessionHeader,
    supplier: &str,
) -> Result<(), ValidationError>
where
    S: KvStore + ?Sized,
    M: SessionMembership + ?Sized,
{
    validate_session_heights(&params.shared, header)?;
    let start_block_hash = block_hash_at(store, header.session_start_block_height)?;
    validate_session_id(header, &start_block_hash)?;
    if !membership.is_session_supplier(header, supplier) {
        return Err(ValidationError::NotSessionSupplier {
            supplier: supplier.to_string(),
            session_id: header.session_id.clone(),
        });
    }
    Ok(())
}

/// Earliest commit height inside a window, or the window open height while
/// the seeding block does not exist yet
fn earliest_in_window<S: KvStore + ?Sized>(
    store: &S,
    height: u64,
    window_open: u64,
    window_size: u64,
    supplier: &str,
) -> Result<u64, ValidationError> {
    if height < window_open {
        return Ok(window_open);
    }
    let seed_hash = block_hash_at(store, window_seed_height(window_open))?;
    Ok(earliest_commit_height(window_open, window_size, &seed_hash, supplier))
}

/// Create a claim for a session.
///
/// Resubmitting the same root is a no-op; a different root for an existing
/// claim is rejected.
pub fn submit_claim<S, M>(
    store: &mut S,
    params: &Params,
    membership: &M,
    ctx: &BlockContext,
    claim: Claim,
) -> Result<Vec<DomainEvent>, ValidationError>
where
    S: KvStore + ?Sized,
    M: SessionMembership + ?Sized,
{
    let shared = &params.shared;
    let header = &claim.session_header;
    let supplier = claim.supplier_operator_address.as_str();

    validate_session_heights(shared, header)?;
    let start = header.session_start_block_height;
    let earliest = earliest_in_window(
        store,
        ctx.height,
        claim_window_open_height(shared, start),
        shared.claim_window_close_offset_blocks,
        supplier,
    )?;
    validate_claim_window(ctx.height, earliest, claim_window_close_height(shared, start))?;
    validate_session(store, params, membership, header, supplier)?;
    validate_claim_root(&claim.root_hash)?;

    if let Some(existing) = ClaimStore::get(store, &header.session_id, supplier)? {
        if existing.claim.root_hash == claim.root_hash {
            debug!("Claim for session {} by {} resubmitted unchanged", header.session_id, supplier);
            return Ok(Vec::new());
        }
        return Err(ValidationError::DuplicateClaim {
            session_id: header.session_id.clone(),
            supplier: supplier.to_string(),
        });
    }

    let close = proof_window_close_height(shared, start);
    let pending = PendingClaim::new(claim, close);
    ClaimStore::insert(store, &pending)?;

    let summary = pending.claim.summary();
    info!(
        "Created claim for session {} by {} at height {}: {} relays, {} compute units, resolves at {}",
        summary.session_id,
        summary.supplier_operator_address,
        ctx.height,
        summary.num_relays,
        summary.num_claimed_compute_units,
        close
    );
    Ok(vec![DomainEvent::ClaimCreated { claim: summary, proof_window_close_height: close }])
}

/// Store a proof for an existing claim, replacing any earlier proof.
///
/// Only the encoding is checked here. Whether the proof backs the claim is
/// decided when the claim resolves.
pub fn submit_proof<S, M>(
    store: &mut S,
    params: &Params,
    membership: &M,
    ctx: &BlockContext,
    proof: Proof,
) -> Result<Vec<DomainEvent>, ValidationError>
where
    S: KvStore + ?Sized,
    M: SessionMembership + ?Sized,
{
    let shared = &params.shared;
    let header = &proof.session_header;
    let supplier = proof.supplier_operator_address.as_str();

    validate_session_heights(shared, header)?;
    let start = header.session_start_block_height;
    let earliest = earliest_in_window(
        store,
        ctx.height,
        proof_window_open_height(shared, start),
        shared.proof_window_close_offset_blocks,
        supplier,
    )?;
    validate_proof_window(ctx.height, earliest, proof_window_close_height(shared, start))?;
    validate_session(store, params, membership, header, supplier)?;

    let pending = ClaimStore::get(store, &header.session_id, supplier)?.ok_or_else(|| {
        ValidationError::ClaimNotFound { session_id: header.session_id.clone(), supplier: supplier.to_string() }
    })?;
    proof.decode().map_err(ValidationError::MalformedProof)?;

    ProofStore::insert(store, &proof)?;
    info!(
        "Stored proof for session {} by {} at height {}",
        header.session_id, supplier, ctx.height
    );
    Ok(vec![DomainEvent::ProofSubmitted { claim: pending.claim.summary() }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{earliest_supplier_claim_commit_height, earliest_supplier_proof_commit_height, SharedParams};
    use crate::crypto::{MerkleSumTree, SumLeaf};
    use crate::proof::proof_path;
    use crate::session::StaticRoster;
    use crate::storage::MemStore;

    fn params() -> Params {
        let mut params = Params::default();
        params.shared = SharedParams {
            num_blocks_per_session: 4,
            claim_window_open_offset_blocks: 0,
            claim_window_close_offset_blocks: 4,
            proof_window_open_offset_blocks: 0,
            proof_window_close_offset_blocks: 4,
            ..SharedParams::default()
        };
        params
    }

    fn chain(store: &mut MemStore, up_to: u64) {
        for h in 1..=up_to {
            BlockHashStore::record(store, h, &Hash([h as u8; 32])).unwrap();
        }
    }

    fn tree() -> MerkleSumTree {
        let leaves = (0..5).map(|i| SumLeaf::from_relay(format!("relay-{i}").into_bytes(), 10)).collect();
        MerkleSumTree::build(leaves).unwrap()
    }

    fn header() -> SessionHeader {
        SessionHeader::new(&params().shared, "app", "svc", 1, &Hash([1; 32]))
    }

    fn roster() -> StaticRoster {
        StaticRoster::new().with_supplier("svc", "supplier")
    }

    fn claim_height(store: &MemStore) -> u64 {
        let seed = BlockHashStore::get(store, 3).unwrap().unwrap();
        earliest_supplier_claim_commit_height(&params().shared, 1, &seed, "supplier")
    }

    fn ctx(height: u64) -> BlockContext {
        BlockContext::new(height, Hash([height as u8; 32]), "proposer")
    }

    #[test]
    fn test_claim_accepted_inside_window() {
        let mut store = MemStore::new();
        chain(&mut store, 12);
        let h = claim_height(&store);
        let claim = Claim::new("supplier", header(), tree().root().to_bytes().to_vec());
        let events = submit_claim(&mut store, &params(), &roster(), &ctx(h), claim.clone()).unwrap();
        assert!(matches!(
            &events[..],
            [DomainEvent::ClaimCreated { proof_window_close_height: 12, .. }]
        ));
        let stored = ClaimStore::get(&store, &header().session_id, "supplier").unwrap().unwrap();
        assert_eq!(stored.claim, claim);

        // Same root again is a no-op, a different root is refused.
        assert!(submit_claim(&mut store, &params(), &roster(), &ctx(h), claim.clone()).unwrap().is_empty());
        let other = Claim::new(
            "supplier",
            header(),
            MerkleSumTree::build(vec![SumLeaf::from_relay(b"x".to_vec(), 1)]).unwrap().root().to_bytes().to_vec(),
        );
        assert!(matches!(
            submit_claim(&mut store, &params(), &roster(), &ctx(h), other),
            Err(ValidationError::DuplicateClaim { .. })
        ));
    }

    #[test]
    fn test_claim_window_bounds() {
        let mut store = MemStore::new();
        chain(&mut store, 12);
        let claim = Claim::new("supplier", header(), tree().root().to_bytes().to_vec());
        let h = claim_height(&store);
        if h > 4 {
            assert!(matches!(
                submit_claim(&mut store, &params(), &roster(), &ctx(h - 1), claim.clone()),
                Err(ValidationError::ClaimWindowNotOpen { .. })
            ));
        }
        assert!(matches!(
            submit_claim(&mut store, &params(), &roster(), &ctx(3), claim.clone()),
            Err(ValidationError::ClaimWindowNotOpen { height: 3, earliest: 4 })
        ));
        assert!(matches!(
            submit_claim(&mut store, &params(), &roster(), &ctx(8), claim),
            Err(ValidationError::ClaimWindowClosed { height: 8, close: 8 })
        ));
        assert!(ClaimStore::all(&store).unwrap().is_empty());
    }

    #[test]
    fn test_claim_rejects_outsiders_and_bad_roots() {
        let mut store = MemStore::new();
        chain(&mut store, 12);
        let h = claim_height(&store);
        let stranger = Claim::new("supplier", header(), tree().root().to_bytes().to_vec());
        assert!(matches!(
            submit_claim(&mut store, &params(), &StaticRoster::new(), &ctx(h), stranger),
            Err(ValidationError::NotSessionSupplier { .. })
        ));

        let empty = Claim::new("supplier", header(), vec![0; 48]);
        assert!(matches!(
            submit_claim(&mut store, &params(), &roster(), &ctx(h), empty),
            Err(ValidationError::ZeroRelays)
        ));

        let forged = SessionHeader { session_id: "ab".repeat(32), ..header() };
        let forged = Claim::new("supplier", forged, tree().root().to_bytes().to_vec());
        assert!(matches!(
            submit_claim(&mut store, &params(), &roster(), &ctx(h), forged),
            Err(ValidationError::SessionIdMismatch { .. })
        ));
    }

    #[test]
    fn test_proof_requires_claim_and_window() {
        let mut store = MemStore::new();
        chain(&mut store, 12);
        let tree = tree();
        let seed = BlockHashStore::get(&store, 7).unwrap().unwrap();
        let path = proof_path(&seed, &header().session_id);
        let bytes = tree.prove_closest(&path).unwrap().to_bytes().unwrap();
        let proof = Proof::new("supplier", header(), bytes);
        let h = earliest_supplier_proof_commit_height(&params().shared, 1, &seed, "supplier");

        assert!(matches!(
            submit_proof(&mut store, &params(), &roster(), &ctx(h), proof.clone()),
            Err(ValidationError::ClaimNotFound { .. })
        ));

        let claim = Claim::new("supplier", header(), tree.root().to_bytes().to_vec());
        let claim_h = claim_height(&store);
        submit_claim(&mut store, &params(), &roster(), &ctx(claim_h), claim).unwrap();

        assert!(matches!(
            submit_proof(&mut store, &params(), &roster(), &ctx(12), proof.clone()),
            Err(ValidationError::ProofWindowClosed { height: 12, close: 12 })
        ));
        let garbage = Proof::new("supplier", header(), vec![9; 3]);
        assert!(matches!(
            submit_proof(&mut store, &params(), &roster(), &ctx(h), garbage),
            Err(ValidationError::MalformedProof(_))
        ));

        let events = submit_proof(&mut store, &params(), &roster(), &ctx(h), proof.clone()).unwrap();
        assert!(matches!(&events[..], [DomainEvent::ProofSubmitted { .. }]));
        assert_eq!(ProofStore::get(&store, &header().session_id, "supplier").unwrap(), Some(proof));
    }
}
