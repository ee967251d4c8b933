//! Block execution
//!
//! `Node` owns the ledger store and applies one block at a time: the block's
//! messages are validated and executed on a cache over the store, then the
//! end-of-block settlement pass runs, and the cache is committed as a single
//! batch.

use log::{debug, warn};
use thiserror::Error;

use crate::consensus::{derive_block_hash, BlockContext, DomainEvent, Params, ParamsError, ValidationError};
use crate::constants::TOKENOMICS_MODULE;
use crate::crypto::Hash;
use crate::proof::{submit_claim, submit_proof, Claim, Proof};
use crate::session::StaticRoster;
use crate::storage::{Bank, BankError, BlockHashStore, CacheStore, KvStore, StoreError};
use crate::tokenomics::{end_block, BlockSummary, SettlementPipeline};

/// Node errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid parameters: {0}")]
    Params(#[from] ParamsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bank(#[from] BankError),
}

/// A message included in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    CreateClaim(Claim),
    SubmitProof(Proof),
}

/// Result of applying one block
#[derive(Debug)]
pub struct BlockOutcome {
    pub summary: BlockSummary,
    pub events: Vec<DomainEvent>,
    /// Index of each refused message and why
    pub rejected: Vec<(usize, ValidationError)>,
}

pub struct Node<S: KvStore> {
    store: S,
    params: Params,
    roster: StaticRoster,
    pipeline: SettlementPipeline,
    proposer: String,
    height: u64,
    tip_hash: Hash,
}

impl<S: KvStore> Node<S> {
    /// Node starting after `height`, whose block hash is read from the store
    /// (or the zero hash for a fresh chain)
    pub fn new(store: S, params: Params, roster: StaticRoster, height: u64) -> Result<Self, NodeError> {
        params.validate()?;
        let tip_hash = BlockHashStore::get(&store, height)?.unwrap_or_else(Hash::zero);
        Ok(Self {
            store,
            params,
            roster,
            pipeline: SettlementPipeline::default(),
            proposer: "proposer".to_string(),
            height,
            tip_hash,
        })
    }

    pub fn with_pipeline(mut self, pipeline: SettlementPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_proposer(mut self, proposer: impl Into<String>) -> Self {
        self.proposer = proposer.into();
        self
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn tip_hash(&self) -> Hash {
        self.tip_hash
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn roster(&self) -> &StaticRoster {
        &self.roster
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Hash of an executed block
    pub fn block_hash(&self, height: u64) -> Result<Option<Hash>, StoreError> {
        BlockHashStore::get(&self.store, height)
    }

    /// Stake `amount` for a new supplier of `service_id`, minting the funds
    pub fn register_supplier(&mut self, service_id: &str, supplier: &str, amount: u64) -> Result<(), NodeError> {
        let mut cache = CacheStore::new(&mut self.store);
        cache.mint_to_module(TOKENOMICS_MODULE, amount)?;
        cache.send_module_to_account(TOKENOMICS_MODULE, supplier, amount)?;
        cache.stake_supplier(supplier, amount)?;
        cache.write()?;
        self.roster.add_supplier(service_id, supplier);
        Ok(())
    }

    /// Stake `amount` for an application, minting the funds
    pub fn stake_application(&mut self, application: &str, amount: u64) -> Result<(), NodeError> {
        let mut cache = CacheStore::new(&mut self.store);
        cache.mint_to_module(TOKENOMICS_MODULE, amount)?;
        cache.send_module_to_account(TOKENOMICS_MODULE, application, amount)?;
        cache.stake_application(application, amount)?;
        cache.write()?;
        Ok(())
    }

    /// Execute the next block with `messages`
    pub fn apply_block(&mut self, messages: Vec<Message>) -> Result<BlockOutcome, NodeError> {
        let height = self.height + 1;
        let mut ctx = BlockContext::new(height, derive_block_hash(&self.tip_hash, height), self.proposer.clone());
        let mut rejected = Vec::new();

        let mut cache = CacheStore::new(&mut self.store);
        for (index, message) in messages.into_iter().enumerate() {
            let result = match message {
                Message::CreateClaim(claim) => submit_claim(&mut cache, &self.params, &self.roster, &ctx, claim),
                Message::SubmitProof(proof) => submit_proof(&mut cache, &self.params, &self.roster, &ctx, proof),
            };
            match result {
                Ok(events) => ctx.emit_all(events),
                Err(ValidationError::Store(err)) => return Err(err.into()),
                Err(err) => {
                    warn!("Rejected message {} in block {}: {}", index, height, err);
                    rejected.push((index, err));
                }
            }
        }

        let summary = end_block(&mut cache, &self.params, &self.pipeline, &mut ctx)?;
        cache.write()?;

        debug!("Committed block {} ({})", height, ctx.block_hash);
        self.height = height;
        self.tip_hash = ctx.block_hash;
        Ok(BlockOutcome { summary, events: ctx.take_events(), rejected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::APPLICATION_MODULE;
    use crate::storage::MemStore;

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = Params::default();
        params.shared.num_blocks_per_session = 0;
        assert!(matches!(
            Node::new(MemStore::new(), params, StaticRoster::new(), 0),
            Err(NodeError::Params(ParamsError::ZeroBlocksPerSession))
        ));
    }

    #[test]
    fn test_blocks_chain_hashes() {
        let mut node = Node::new(MemStore::new(), Params::default(), StaticRoster::new(), 0).unwrap();
        node.apply_block(vec![]).unwrap();
        node.apply_block(vec![]).unwrap();
        assert_eq!(node.height(), 2);
        let h1 = node.block_hash(1).unwrap().unwrap();
        assert_eq!(h1, derive_block_hash(&Hash::zero(), 1));
        assert_eq!(node.block_hash(2).unwrap(), Some(derive_block_hash(&h1, 2)));
        assert_eq!(node.tip_hash(), derive_block_hash(&h1, 2));
    }

    #[test]
    fn test_register_and_stake() {
        let mut node = Node::new(MemStore::new(), Params::default(), StaticRoster::new(), 0).unwrap();
        node.register_supplier("svc", "sup", 500).unwrap();
        node.stake_application("app", 1_000).unwrap();
        assert_eq!(node.store().supplier_stake("sup").unwrap(), 500);
        assert_eq!(node.store().account_balance("sup").unwrap(), 0);
        assert_eq!(node.store().application_stake("app").unwrap(), 1_000);
        assert_eq!(node.store().account_balance("app").unwrap(), 0);
        assert_eq!(node.store().module_balance(APPLICATION_MODULE).unwrap(), 1_000);
        assert_eq!(node.store().total_supply().unwrap(), 1_500);
        assert_eq!(node.roster().suppliers("svc").collect::<Vec<_>>(), vec!["sup"]);
    }

    #[test]
    fn test_with_proposer() {
        let mut node = Node::new(MemStore::new(), Params::default(), StaticRoster::new(), 0)
            .unwrap()
            .with_proposer("validator-1");
        node.apply_block(vec![]).unwrap();
        assert_eq!(node.proposer, "validator-1");
    }

    #[test]
    fn test_invalid_messages_are_rejected_not_fatal() {
        let mut node = Node::new(MemStore::new(), Params::default(), StaticRoster::new(), 0).unwrap();
        node.apply_block(vec![]).unwrap();
        let header = crate::session::SessionHeader::new(
            &node.params().shared,
            "app",
            "svc",
            1,
            &node.block_hash(1).unwrap().unwrap(),
        );
        let outcome = node
            .apply_block(vec![Message::CreateClaim(Claim::new("nobody", header, vec![0; 48]))])
            .unwrap();
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(node.height(), 2);
    }
}
