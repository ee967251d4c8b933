//! Block execution context
//!
//! Every state transition runs against a `BlockContext`: the height being
//! executed, its hash, the proposer that collects fee shares, and the sink
//! that collects events for the block.

use crate::consensus::DomainEvent;
use crate::crypto::{hash_bytes, Hash};

/// Per-block execution context
#[derive(Debug, Clone)]
pub struct BlockContext {
    /// Height of the block being executed
    pub height: u64,
    /// Hash of the block being executed
    pub block_hash: Hash,
    /// Account address of the block proposer
    pub proposer: String,
    events: Vec<DomainEvent>,
}

impl BlockContext {
    pub fn new(height: u64, block_hash: Hash, proposer: impl Into<String>) -> Self {
        Self {
            height,
            block_hash,
            proposer: proposer.into(),
            events: Vec::new(),
        }
    }

    /// Append a single event to the block's sink
    pub fn emit(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub fn emit_all(&mut self, events: impl IntoIterator<Item = DomainEvent>) {
        self.events.extend(events);
    }

    /// Events emitted so far, in emission order
    pub fn events(&self) -> &[DomainEvent] {
        &self.events
    }

    /// Drain the sink, leaving it empty
    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Hash of the block at `height` on a chain whose previous block hash is
/// `prev_hash`.
///
/// Used by the simulator and tests where no real chain supplies block hashes.
pub fn derive_block_hash(prev_hash: &Hash, height: u64) -> Hash {
    let mut bytes = Vec::with_capacity(40);
    bytes.extend_from_slice(&prev_hash.0);
    bytes.extend_from_slice(&height.to_le_bytes());
    hash_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sink_drains() {
        let mut ctx = BlockContext::new(7, Hash::zero(), "proposer");
        ctx.emit(DomainEvent::SupplierSlashed {
            supplier_operator_address: "s".into(),
            num_expired_claims: 1,
            slashed_amount: 10,
        });
        assert_eq!(ctx.events().len(), 1);
        let events = ctx.take_events();
        assert_eq!(events.len(), 1);
        assert!(ctx.events().is_empty());
    }

    #[test]
    fn test_derived_hashes_chain() {
        let h1 = derive_block_hash(&Hash::zero(), 1);
        let h2 = derive_block_hash(&h1, 2);
        assert_ne!(h1, h2);
        assert_eq!(h1, derive_block_hash(&Hash::zero(), 1));
    }
}
