//! Claim and proof submission validation
//!
//! Pure functions for validating submissions. Each check returns the
//! boundary it enforces so callers can report why a message was refused.

use thiserror::Error;

use crate::consensus::{session_end_height, session_start_height, SharedParams};
use crate::crypto::{Hash, MerkleError, SumNode};
use crate::session::{session_id, SessionHeader};
use crate::storage::StoreError;

/// Submission errors. Returned before any state is written.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("session header field {0} is empty")]
    EmptyField(&'static str),
    #[error("session start height {got} does not match expected {expected}")]
    InvalidSessionStartHeight { expected: u64, got: u64 },
    #[error("session end height {got} does not match expected {expected}")]
    InvalidSessionEndHeight { expected: u64, got: u64 },
    #[error("session id {got} does not match expected {expected}")]
    SessionIdMismatch { expected: String, got: String },
    #[error("supplier {supplier} is not part of session {session_id}")]
    NotSessionSupplier { supplier: String, session_id: String },
    #[error("invalid claim root: {0}")]
    InvalidRoot(MerkleError),
    #[error("claim root commits to zero relays")]
    ZeroRelays,
    #[error("claim root commits to zero compute units")]
    ZeroComputeUnits,
    #[error("claim window not open for supplier: height {height}, earliest {earliest}")]
    ClaimWindowNotOpen { height: u64, earliest: u64 },
    #[error("claim window closed: height {height}, closed at {close}")]
    ClaimWindowClosed { height: u64, close: u64 },
    #[error("proof window not open for supplier: height {height}, earliest {earliest}")]
    ProofWindowNotOpen { height: u64, earliest: u64 },
    #[error("proof window closed: height {height}, closed at {close}")]
    ProofWindowClosed { height: u64, close: u64 },
    #[error("claim for session {session_id} by {supplier} already exists with a different root")]
    DuplicateClaim { session_id: String, supplier: String },
    #[error("no claim for session {session_id} by {supplier}")]
    ClaimNotFound { session_id: String, supplier: String },
    #[error("malformed proof: {0}")]
    MalformedProof(MerkleError),
    #[error("block hash at height {0} is unknown")]
    MissingBlockHash(u64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Check the header's fields and heights against the session it names.
///
/// The session id is checked separately once the start block hash is known.
pub fn validate_session_heights(
    params: &SharedParams,
    header: &SessionHeader,
) -> Result<(), ValidationError> {
    if header.application_address.is_empty() {
        return Err(ValidationError::EmptyField("application_address"));
    }
    if header.service_id.is_empty() {
        return Err(ValidationError::EmptyField("service_id"));
    }
    if header.session_id.is_empty() {
        return Err(ValidationError::EmptyField("session_id"));
    }

    let start = header.session_start_block_height;
    let expected_start = session_start_height(params, start);
    if start == 0 || expected_start != start {
        return Err(ValidationError::InvalidSessionStartHeight { expected: expected_start, got: start });
    }
    let expected_end = session_end_height(params, start);
    if header.session_end_block_height != expected_end {
        return Err(ValidationError::InvalidSessionEndHeight {
            expected: expected_end,
            got: header.session_end_block_height,
        });
    }
    Ok(())
}

/// Check the session id against a recomputation from the start block hash
pub fn validate_session_id(header: &SessionHeader, start_block_hash: &Hash) -> Result<(), ValidationError> {
    let expected = session_id(
        &header.application_address,
        &header.service_id,
        header.session_start_block_height,
        start_block_hash,
    );
    if expected != header.session_id {
        return Err(ValidationError::SessionIdMismatch { expected, got: header.session_id.clone() });
    }
    Ok(())
}

/// Parse a claim root and reject empty commitments
pub fn validate_claim_root(root_hash: &[u8]) -> Result<SumNode, ValidationError> {
    let root = SumNode::from_bytes(root_hash).map_err(ValidationError::InvalidRoot)?;
    if root.count == 0 {
        return Err(ValidationError::ZeroRelays);
    }
    if root.sum == 0 {
        return Err(ValidationError::ZeroComputeUnits);
    }
    Ok(root)
}

/// `height` must lie in `[earliest, close)`
pub fn validate_claim_window(height: u64, earliest: u64, close: u64) -> Result<(), ValidationError> {
    if height < earliest {
        return Err(ValidationError::ClaimWindowNotOpen { height, earliest });
    }
    if height >= close {
        return Err(ValidationError::ClaimWindowClosed { height, close });
    }
    Ok(())
}

/// `height` must lie in `[earliest, close)`
pub fn validate_proof_window(height: u64, earliest: u64, close: u64) -> Result<(), ValidationError> {
    if height < earliest {
        return Err(ValidationError::ProofWindowNotOpen { height, earliest });
    }
    if height >= close {
        return Err(ValidationError::ProofWindowClosed { height, close });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{MerkleSumTree, SumLeaf};

    fn params() -> SharedParams {
        SharedParams { num_blocks_per_session: 4, ..SharedParams::default() }
    }

    #[test]
    fn test_valid_header() {
        let header = SessionHeader::new(&params(), "app", "svc", 3, &Hash::max());
        assert!(validate_session_heights(&params(), &header).is_ok());
        assert!(validate_session_id(&header, &Hash::max()).is_ok());
        assert!(matches!(
            validate_session_id(&header, &Hash::zero()),
            Err(ValidationError::SessionIdMismatch { .. })
        ));
    }

    #[test]
    fn test_header_heights_must_match_session() {
        let header = SessionHeader::new(&params(), "app", "svc", 3, &Hash::zero());
        let shifted = SessionHeader { session_start_block_height: 2, ..header.clone() };
        assert!(matches!(
            validate_session_heights(&params(), &shifted),
            Err(ValidationError::InvalidSessionStartHeight { expected: 1, got: 2 })
        ));
        let long = SessionHeader { session_end_block_height: 9, ..header.clone() };
        assert!(matches!(
            validate_session_heights(&params(), &long),
            Err(ValidationError::InvalidSessionEndHeight { expected: 4, got: 9 })
        ));
        let unnamed = SessionHeader { service_id: String::new(), ..header };
        assert!(matches!(
            validate_session_heights(&params(), &unnamed),
            Err(ValidationError::EmptyField("service_id"))
        ));
    }

    #[test]
    fn test_claim_root_shape() {
        let root = MerkleSumTree::build(vec![SumLeaf::from_relay(b"r".to_vec(), 3)]).unwrap().root();
        assert_eq!(validate_claim_root(&root.to_bytes()).unwrap(), root);
        assert!(matches!(
            validate_claim_root(&root.to_bytes()[..32]),
            Err(ValidationError::InvalidRoot(MerkleError::InvalidRootLength(32)))
        ));
        assert!(matches!(
            validate_claim_root(&SumNode::empty().to_bytes()),
            Err(ValidationError::ZeroRelays)
        ));
        let weightless = SumNode { sum: 0, ..root };
        assert!(matches!(
            validate_claim_root(&weightless.to_bytes()),
            Err(ValidationError::ZeroComputeUnits)
        ));
    }

    #[test]
    fn test_window_bounds() {
        assert!(validate_claim_window(5, 5, 8).is_ok());
        assert!(validate_claim_window(7, 5, 8).is_ok());
        assert!(matches!(
            validate_claim_window(4, 5, 8),
            Err(ValidationError::ClaimWindowNotOpen { height: 4, earliest: 5 })
        ));
        assert!(matches!(
            validate_claim_window(8, 5, 8),
            Err(ValidationError::ClaimWindowClosed { height: 8, close: 8 })
        ));
        assert!(matches!(
            validate_proof_window(12, 8, 12),
            Err(ValidationError::ProofWindowClosed { height: 12, close: 12 })
        ));
    }
}
