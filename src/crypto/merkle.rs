//! Merkle sum tree
//!
//! Suppliers commit to the relays of a session with the root of this tree.
//! Every node carries the total weight (compute units) and the number of
//! leaves (relays) beneath it, so the root alone tells the chain how much work
//! is being claimed.
//!
//! Leaves are ordered by relay hash. At a level with an odd number of nodes
//! the last node is promoted unchanged, which keeps sums exact. Proof
//! directions are derived from the leaf index and the leaf count, so a prover
//! cannot choose which leaf it answers for.

use super::{hash_bytes, relay_hash, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encoded root size: digest (32) + sum (8, BE) + count (8, BE)
pub const ROOT_SIZE: usize = 48;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Merkle tree errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("invalid root length {0}, expected {ROOT_SIZE}")]
    InvalidRootLength(usize),
    #[error("tree has no leaves")]
    EmptyTree,
    #[error("sum overflow while building tree")]
    SumOverflow,
    #[error("duplicate leaf key {0}")]
    DuplicateLeaf(Hash),
    #[error("leaf key does not match the hash of its value")]
    LeafKeyMismatch,
    #[error("proof has {got} siblings, expected {expected}")]
    SiblingCount { expected: usize, got: usize },
    #[error("recomputed root does not match the committed root")]
    RootMismatch,
    #[error("malformed proof encoding: {0}")]
    Decode(String),
}

/// A node of the sum tree; the root of a tree is also a `SumNode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumNode {
    pub digest: Hash,
    /// Total weight below this node
    pub sum: u64,
    /// Number of leaves below this node
    pub count: u64,
}

impl SumNode {
    /// Node of an empty tree
    pub const fn empty() -> Self {
        SumNode { digest: Hash::zero(), sum: 0, count: 0 }
    }

    fn leaf(key: &Hash, value: &[u8], weight: u64) -> Self {
        let value_digest = hash_bytes(value);
        let mut data = Vec::with_capacity(1 + 32 + 32 + 8);
        data.push(LEAF_PREFIX);
        data.extend_from_slice(&key.0);
        data.extend_from_slice(&value_digest.0);
        data.extend_from_slice(&weight.to_be_bytes());
        SumNode { digest: hash_bytes(&data), sum: weight, count: 1 }
    }

    fn parent(left: &SumNode, right: &SumNode) -> Option<Self> {
        let mut data = Vec::with_capacity(1 + 2 * ROOT_SIZE);
        data.push(NODE_PREFIX);
        data.extend_from_slice(&left.to_bytes());
        data.extend_from_slice(&right.to_bytes());
        Some(SumNode {
            digest: hash_bytes(&data),
            sum: left.sum.checked_add(right.sum)?,
            count: left.count.checked_add(right.count)?,
        })
    }

    /// Canonical 48-byte encoding
    pub fn to_bytes(&self) -> [u8; ROOT_SIZE] {
        let mut out = [0u8; ROOT_SIZE];
        out[..32].copy_from_slice(&self.digest.0);
        out[32..40].copy_from_slice(&self.sum.to_be_bytes());
        out[40..48].copy_from_slice(&self.count.to_be_bytes());
        out
    }

    /// Parse a 48-byte encoded root
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MerkleError> {
        if bytes.len() != ROOT_SIZE {
            return Err(MerkleError::InvalidRootLength(bytes.len()));
        }
        let mut sum = [0u8; 8];
        sum.copy_from_slice(&bytes[32..40]);
        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[40..48]);
        Ok(SumNode {
            digest: Hash::from_slice(&bytes[..32]).ok_or(MerkleError::InvalidRootLength(bytes.len()))?,
            sum: u64::from_be_bytes(sum),
            count: u64::from_be_bytes(count),
        })
    }
}

/// A relay committed to the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SumLeaf {
    /// Hash of the serialized relay
    pub key: Hash,
    /// Serialized relay
    pub value: Vec<u8>,
    /// Compute units of the relay
    pub weight: u64,
}

impl SumLeaf {
    pub fn from_relay(relay_bytes: Vec<u8>, weight: u64) -> Self {
        SumLeaf { key: relay_hash(&relay_bytes), value: relay_bytes, weight }
    }
}

/// Fully materialised sum tree
#[derive(Debug, Clone)]
pub struct MerkleSumTree {
    leaves: Vec<SumLeaf>,
    levels: Vec<Vec<SumNode>>,
}

impl MerkleSumTree {
    /// Build a tree; leaves are sorted by key and keys must be unique.
    pub fn build(mut leaves: Vec<SumLeaf>) -> Result<Self, MerkleError> {
        leaves.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(dup) = leaves.windows(2).find(|w| w[0].key == w[1].key) {
            return Err(MerkleError::DuplicateLeaf(dup[0].key));
        }

        let mut current: Vec<SumNode> = leaves
            .iter()
            .map(|l| SumNode::leaf(&l.key, &l.value, l.weight))
            .collect();
        let mut levels = Vec::new();

        while current.len() > 1 {
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for chunk in current.chunks(2) {
                match chunk {
                    [left, right] => {
                        next.push(SumNode::parent(left, right).ok_or(MerkleError::SumOverflow)?)
                    }
                    [single] => next.push(*single),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                }
            }
            levels.push(current);
            current = next;
        }
        levels.push(current);

        Ok(Self { leaves, levels })
    }

    pub fn root(&self) -> SumNode {
        self.levels
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or_else(SumNode::empty)
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Leaf index challenged by `path` in a tree of `count` leaves
    pub fn challenged_index(path: &Hash, count: u64) -> Option<u64> {
        if count == 0 {
            None
        } else {
            Some(path.leading_u64() % count)
        }
    }

    /// Prove the leaf selected by `path`
    pub fn prove_closest(&self, path: &Hash) -> Result<ClosestProof, MerkleError> {
        let index = Self::challenged_index(path, self.leaves.len() as u64)
            .ok_or(MerkleError::EmptyTree)? as usize;

        let mut siblings = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let n = level.len();
            if !(idx == n - 1 && n % 2 == 1) {
                siblings.push(level[idx ^ 1]);
            }
            idx /= 2;
        }

        let leaf = &self.leaves[index];
        Ok(ClosestProof {
            path: *path,
            leaf_value: leaf.value.clone(),
            leaf_weight: leaf.weight,
            siblings,
        })
    }
}

/// Proof that the leaf selected by `path` is committed under a root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosestProof {
    pub path: Hash,
    pub leaf_value: Vec<u8>,
    pub leaf_weight: u64,
    /// Sibling nodes from the leaf up, skipping promoted levels
    pub siblings: Vec<SumNode>,
}

impl ClosestProof {
    pub fn to_bytes(&self) -> Result<Vec<u8>, MerkleError> {
        bincode::serialize(self).map_err(|e| MerkleError::Decode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MerkleError> {
        bincode::deserialize(bytes).map_err(|e| MerkleError::Decode(e.to_string()))
    }

    /// Relay hash of the proven leaf
    pub fn leaf_key(&self) -> Hash {
        relay_hash(&self.leaf_value)
    }

    /// Verify this proof against a committed root
    pub fn verify(&self, root: &SumNode) -> Result<(), MerkleError> {
        let mut idx = MerkleSumTree::challenged_index(&self.path, root.count)
            .ok_or(MerkleError::EmptyTree)?;
        let mut n = root.count;
        let mut node = SumNode::leaf(&self.leaf_key(), &self.leaf_value, self.leaf_weight);
        let mut siblings = self.siblings.iter();
        let mut used = 0usize;

        while n > 1 {
            let promoted = idx == n - 1 && n % 2 == 1;
            if !promoted {
                let sibling = siblings.next().ok_or(MerkleError::SiblingCount {
                    expected: used + 1,
                    got: self.siblings.len(),
                })?;
                used += 1;
                node = if idx % 2 == 1 {
                    SumNode::parent(sibling, &node)
                } else {
                    SumNode::parent(&node, sibling)
                }
                .ok_or(MerkleError::SumOverflow)?;
            }
            idx /= 2;
            n = n.div_ceil(2);
        }

        if used != self.siblings.len() {
            return Err(MerkleError::SiblingCount { expected: used, got: self.siblings.len() });
        }
        if node != *root {
            return Err(MerkleError::RootMismatch);
        }
        Ok(())
    }
}
