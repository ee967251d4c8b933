//! Settlement operations
//!
//! Token logic modules never touch balances directly. They describe mints,
//! burns and transfers; the orchestrator applies them per claim in a fixed
//! phase order.

use serde::{Deserialize, Serialize};

use super::TokenLogicModule;
use crate::proof::Claim;
use crate::storage::{Bank, BankError};

/// Why an operation was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SettlementOpReason {
    ApplicationStakeBurn,
    SupplierRewardMint,
    SupplierRewardDistribution,
    ProposerDaoFeeMint,
    ProposerFeeDistribution,
    DaoFeeTransfer,
    GlobalInflationMint,
    InflationSupplierReward,
    InflationProposerReward,
    InflationApplicationReward,
    InflationDaoReward,
}

/// Mint into, or burn from, a module account
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MintBurnOp {
    pub origin: TokenLogicModule,
    pub reason: SettlementOpReason,
    pub module: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModToModTransfer {
    pub origin: TokenLogicModule,
    pub reason: SettlementOpReason,
    pub sender_module: String,
    pub recipient_module: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModToAcctTransfer {
    pub origin: TokenLogicModule,
    pub reason: SettlementOpReason,
    pub sender_module: String,
    pub recipient_address: String,
    pub amount: u64,
}

/// Operations produced by one token logic module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effects {
    pub mints: Vec<MintBurnOp>,
    pub burns: Vec<MintBurnOp>,
    pub mod_to_mod_transfers: Vec<ModToModTransfer>,
    pub mod_to_acct_transfers: Vec<ModToAcctTransfer>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.mints.is_empty()
            && self.burns.is_empty()
            && self.mod_to_mod_transfers.is_empty()
            && self.mod_to_acct_transfers.is_empty()
    }

    pub fn mint(&mut self, origin: TokenLogicModule, reason: SettlementOpReason, module: &str, amount: u64) {
        if amount > 0 {
            self.mints.push(MintBurnOp { origin, reason, module: module.to_string(), amount });
        }
    }

    pub fn burn(&mut self, origin: TokenLogicModule, reason: SettlementOpReason, module: &str, amount: u64) {
        if amount > 0 {
            self.burns.push(MintBurnOp { origin, reason, module: module.to_string(), amount });
        }
    }

    pub fn mod_to_mod(
        &mut self,
        origin: TokenLogicModule,
        reason: SettlementOpReason,
        sender_module: &str,
        recipient_module: &str,
        amount: u64,
    ) {
        if amount > 0 {
            self.mod_to_mod_transfers.push(ModToModTransfer {
                origin,
                reason,
                sender_module: sender_module.to_string(),
                recipient_module: recipient_module.to_string(),
                amount,
            });
        }
    }

    pub fn mod_to_acct(
        &mut self,
        origin: TokenLogicModule,
        reason: SettlementOpReason,
        sender_module: &str,
        recipient_address: &str,
        amount: u64,
    ) {
        if amount > 0 {
            self.mod_to_acct_transfers.push(ModToAcctTransfer {
                origin,
                reason,
                sender_module: sender_module.to_string(),
                recipient_address: recipient_address.to_string(),
                amount,
            });
        }
    }
}

/// Everything a claim's settlement will do, before it is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSettlementResult {
    pub claim: Claim,
    pub settlement_amount: u64,
    pub mints: Vec<MintBurnOp>,
    pub burns: Vec<MintBurnOp>,
    pub mod_to_mod_transfers: Vec<ModToModTransfer>,
    pub mod_to_acct_transfers: Vec<ModToAcctTransfer>,
}

impl PendingSettlementResult {
    pub fn new(claim: Claim, settlement_amount: u64) -> Self {
        Self {
            claim,
            settlement_amount,
            mints: Vec::new(),
            burns: Vec::new(),
            mod_to_mod_transfers: Vec::new(),
            mod_to_acct_transfers: Vec::new(),
        }
    }

    pub fn append(&mut self, effects: Effects) {
        self.mints.extend(effects.mints);
        self.burns.extend(effects.burns);
        self.mod_to_mod_transfers.extend(effects.mod_to_mod_transfers);
        self.mod_to_acct_transfers.extend(effects.mod_to_acct_transfers);
    }

    /// Apply every operation: mints, module transfers, account transfers,
    /// then burns. Stops at the first error; callers run this on a cache so
    /// a partial application can be dropped.
    pub fn apply<B: Bank + ?Sized>(&self, bank: &mut B) -> Result<(), BankError> {
        for op in &self.mints {
            bank.mint_to_module(&op.module, op.amount)?;
        }
        for op in &self.mod_to_mod_transfers {
            bank.send_module_to_module(&op.sender_module, &op.recipient_module, op.amount)?;
        }
        for op in &self.mod_to_acct_transfers {
            bank.send_module_to_account(&op.sender_module, &op.recipient_address, op.amount)?;
        }
        for op in &self.burns {
            bank.burn_from_module(&op.module, op.amount)?;
        }
        Ok(())
    }

    /// Total minted by this settlement
    pub fn minted(&self) -> u64 {
        self.mints.iter().map(|op| op.amount).sum()
    }

    /// Total burned by this settlement
    pub fn burned(&self) -> u64 {
        self.burns.iter().map(|op| op.amount).sum()
    }
}
