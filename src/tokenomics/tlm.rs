//! Token logic modules
//!
//! Each module turns a claim's settlement amount into operations. Every
//! module reads only the original amount, never another module's output, so
//! the order they run in does not change the outcome.

use serde::{Deserialize, Serialize};

use super::{Effects, SettlementOpReason};
use crate::consensus::{apply_bps, BlockContext, TokenomicsParams};
use crate::constants::{APPLICATION_MODULE, DAO_MODULE, SUPPLIER_MODULE, TOKENOMICS_MODULE};
use crate::proof::Claim;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TokenLogicModule {
    /// Burn the settlement amount from the application module
    ApplicationStakeDebit,
    /// Mint the supplier share and pay it to the supplier operator
    SupplierRewardDistribution,
    /// Mint the remainder, pay the proposer, send the rest to the DAO
    ProposerDaoFeeSplit,
    /// Mint global inflation and distribute it by allocation
    GlobalInflationMint,
}

impl TokenLogicModule {
    /// Default execution order
    pub const ALL: [TokenLogicModule; 4] = [
        TokenLogicModule::ApplicationStakeDebit,
        TokenLogicModule::SupplierRewardDistribution,
        TokenLogicModule::ProposerDaoFeeSplit,
        TokenLogicModule::GlobalInflationMint,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TokenLogicModule::ApplicationStakeDebit => "application_stake_debit",
            TokenLogicModule::SupplierRewardDistribution => "supplier_reward_distribution",
            TokenLogicModule::ProposerDaoFeeSplit => "proposer_dao_fee_split",
            TokenLogicModule::GlobalInflationMint => "global_inflation_mint",
        }
    }

    pub fn process(&self, amount: u64, claim: &Claim, params: &TokenomicsParams, ctx: &BlockContext) -> Effects {
        let mut effects = Effects::default();
        let origin = *self;
        let supplier = claim.supplier_operator_address.as_str();
        let distribution = &params.settlement_distribution;

        match self {
            TokenLogicModule::ApplicationStakeDebit => {
                effects.burn(origin, SettlementOpReason::ApplicationStakeBurn, APPLICATION_MODULE, amount);
            }
            TokenLogicModule::SupplierRewardDistribution => {
                let supplier_share = apply_bps(amount, distribution.supplier_bps);
                effects.mint(origin, SettlementOpReason::SupplierRewardMint, SUPPLIER_MODULE, supplier_share);
                effects.mod_to_acct(
                    origin,
                    SettlementOpReason::SupplierRewardDistribution,
                    SUPPLIER_MODULE,
                    supplier,
                    supplier_share,
                );
            }
            TokenLogicModule::ProposerDaoFeeSplit => {
                let remainder = amount - apply_bps(amount, distribution.supplier_bps);
                let proposer_share = apply_bps(amount, distribution.proposer_bps).min(remainder);
                effects.mint(origin, SettlementOpReason::ProposerDaoFeeMint, TOKENOMICS_MODULE, remainder);
                effects.mod_to_acct(
                    origin,
                    SettlementOpReason::ProposerFeeDistribution,
                    TOKENOMICS_MODULE,
                    &ctx.proposer,
                    proposer_share,
                );
                effects.mod_to_mod(
                    origin,
                    SettlementOpReason::DaoFeeTransfer,
                    TOKENOMICS_MODULE,
                    DAO_MODULE,
                    remainder - proposer_share,
                );
            }
            TokenLogicModule::GlobalInflationMint => {
                let inflation = apply_bps(amount, params.global_inflation_per_claim_bps);
                if inflation == 0 {
                    return effects;
                }
                let allocation = &params.mint_allocation;
                let supplier_share = apply_bps(inflation, allocation.supplier_bps);
                let proposer_share = apply_bps(inflation, allocation.proposer_bps);
                let application_share = apply_bps(inflation, allocation.application_bps);
                let dao_share = inflation
                    .saturating_sub(supplier_share)
                    .saturating_sub(proposer_share)
                    .saturating_sub(application_share);

                effects.mint(origin, SettlementOpReason::GlobalInflationMint, TOKENOMICS_MODULE, inflation);
                effects.mod_to_acct(
                    origin,
                    SettlementOpReason::InflationSupplierReward,
                    TOKENOMICS_MODULE,
                    supplier,
                    supplier_share,
                );
                effects.mod_to_acct(
                    origin,
                    SettlementOpReason::InflationProposerReward,
                    TOKENOMICS_MODULE,
                    &ctx.proposer,
                    proposer_share,
                );
                effects.mod_to_acct(
                    origin,
                    SettlementOpReason::InflationApplicationReward,
                    TOKENOMICS_MODULE,
                    &claim.session_header.application_address,
                    application_share,
                );
                effects.mod_to_mod(
                    origin,
                    SettlementOpReason::InflationDaoReward,
                    TOKENOMICS_MODULE,
                    DAO_MODULE,
                    dao_share,
                );
            }
        }
        effects
    }
}
