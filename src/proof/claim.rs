//! Claim and proof records

use serde::{Deserialize, Serialize};

use crate::consensus::{scale_by_difficulty, ClaimSummary};
use crate::crypto::{ClosestProof, Hash, MerkleError, SumNode};
use crate::session::SessionHeader;

/// A supplier's commitment to the relays it served in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub supplier_operator_address: String,
    pub session_header: SessionHeader,
    /// Encoded root of the supplier's Merkle sum tree
    pub root_hash: Vec<u8>,
}

impl Claim {
    pub fn new(supplier_operator_address: impl Into<String>, session_header: SessionHeader, root_hash: Vec<u8>) -> Self {
        Self {
            supplier_operator_address: supplier_operator_address.into(),
            session_header,
            root_hash,
        }
    }

    pub fn root(&self) -> Result<SumNode, MerkleError> {
        SumNode::from_bytes(&self.root_hash)
    }

    /// Volume-applicable relays committed under the root
    pub fn num_relays(&self) -> Result<u64, MerkleError> {
        Ok(self.root()?.count)
    }

    /// Compute units of the volume-applicable relays
    pub fn num_claimed_compute_units(&self) -> Result<u64, MerkleError> {
        Ok(self.root()?.sum)
    }

    /// Claimed compute units scaled back to the full relay volume
    pub fn num_estimated_compute_units(&self, target_hash: &Hash) -> Result<u64, MerkleError> {
        Ok(scale_by_difficulty(self.num_claimed_compute_units()?, target_hash))
    }

    /// Bytes that identify this claim in seeded draws
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let header = &self.session_header;
        let mut bytes = Vec::with_capacity(
            self.supplier_operator_address.len() + header.session_id.len() + self.root_hash.len() + 2,
        );
        bytes.extend_from_slice(self.supplier_operator_address.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(header.session_id.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&self.root_hash);
        bytes
    }

    /// Event payload for this claim. A malformed root reports zero volume.
    pub fn summary(&self) -> ClaimSummary {
        let root = self.root().unwrap_or(SumNode::empty());
        let header = &self.session_header;
        ClaimSummary {
            session_id: header.session_id.clone(),
            service_id: header.service_id.clone(),
            application_address: header.application_address.clone(),
            supplier_operator_address: self.supplier_operator_address.clone(),
            session_end_height: header.session_end_block_height,
            num_relays: root.count,
            num_claimed_compute_units: root.sum,
        }
    }
}

/// A closest-leaf proof for a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub supplier_operator_address: String,
    pub session_header: SessionHeader,
    /// bincode-encoded `ClosestProof`
    pub closest_merkle_proof: Vec<u8>,
}

impl Proof {
    pub fn new(
        supplier_operator_address: impl Into<String>,
        session_header: SessionHeader,
        closest_merkle_proof: Vec<u8>,
    ) -> Self {
        Self {
            supplier_operator_address: supplier_operator_address.into(),
            session_header,
            closest_merkle_proof,
        }
    }

    pub fn decode(&self) -> Result<ClosestProof, MerkleError> {
        ClosestProof::from_bytes(&self.closest_merkle_proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{compute_new_difficulty_target_hash, SharedParams, BASE_RELAY_DIFFICULTY_HASH};
    use crate::crypto::{MerkleSumTree, SumLeaf};

    fn make_claim(n: usize) -> Claim {
        let leaves = (0..n)
            .map(|i| SumLeaf::from_relay(format!("relay-{i}").into_bytes(), 5))
            .collect();
        let root = MerkleSumTree::build(leaves).unwrap().root();
        let header = SessionHeader::new(&SharedParams::default(), "app", "svc", 1, &Hash::zero());
        Claim::new("supplier", header, root.to_bytes().to_vec())
    }

    #[test]
    fn test_claim_volume_from_root() {
        let claim = make_claim(8);
        assert_eq!(claim.num_relays().unwrap(), 8);
        assert_eq!(claim.num_claimed_compute_units().unwrap(), 40);
        assert_eq!(claim.num_estimated_compute_units(&BASE_RELAY_DIFFICULTY_HASH).unwrap(), 40);

        let half = compute_new_difficulty_target_hash(&BASE_RELAY_DIFFICULTY_HASH, 1, 2);
        let estimated = claim.num_estimated_compute_units(&half).unwrap();
        assert!((80..=81).contains(&estimated));
    }

    #[test]
    fn test_malformed_root() {
        let mut claim = make_claim(2);
        claim.root_hash.truncate(40);
        assert_eq!(claim.num_relays(), Err(MerkleError::InvalidRootLength(40)));
        assert_eq!(claim.summary().num_relays, 0);
    }

    #[test]
    fn test_canonical_bytes_distinguish_claims() {
        let a = make_claim(2);
        let mut b = a.clone();
        b.supplier_operator_address = "other".into();
        assert_ne!(a.canonical_bytes(), b.canonical_bytes());
        assert_eq!(a.canonical_bytes(), a.clone().canonical_bytes());
    }
}
