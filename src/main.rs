//! Relay settlement simulation node
//!
//! Drives the settlement core with synthetic suppliers: each session they
//! serve random relay volumes, commit claims and proofs at their staggered
//! heights, and the node settles them at proof window close.

use std::collections::BTreeMap;

use dotenvy::dotenv;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use relay_settle::config::{NodeSettings, ProtocolConfig};
use relay_settle::consensus::{difficulty_multiplier, is_session_start_height, relay_difficulty_probability};
use relay_settle::node::{Message, Node, Relayer};
use relay_settle::service::{get_relay_mining_difficulty_at_height, get_relay_mining_difficulty_or_default};
use relay_settle::session::{SessionHeader, StaticRoster};
use relay_settle::storage::{account_balances, module_balances, Bank, KvStore, MemStore, SledStore, StoreError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv();
    env_logger::init();

    let settings = NodeSettings::from_env()?;
    let config = match &settings.params_path {
        Some(path) => ProtocolConfig::load(path)?,
        None => ProtocolConfig::default(),
    };

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║              RELAY SETTLEMENT SIMULATOR                  ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();
    let shared = &config.params.shared;
    println!("Parameters:");
    println!("  Blocks/session:    {}", shared.num_blocks_per_session);
    println!(
        "  Claim window:      +{} .. +{}",
        shared.claim_window_open_offset_blocks, shared.claim_window_close_offset_blocks
    );
    println!(
        "  Proof window:      +{} .. +{}",
        shared.proof_window_open_offset_blocks, shared.proof_window_close_offset_blocks
    );
    println!("  CU -> tokens:      x{}", shared.compute_units_to_tokens_multiplier);
    println!("  Proof probability: {}", config.params.proof.proof_request_probability);
    println!("  Target relays:     {}", config.params.service.target_num_relays);
    println!("  Blocks to run:     {}", settings.sim_blocks);
    println!();

    match &settings.db_path {
        Some(path) => {
            let store = SledStore::open(path)?;
            let height = store.load_height()?.unwrap_or(0);
            println!("Database: {} (height {})", path.display(), height);
            let mut node =
                Node::new(store, config.params.clone(), roster(&config), height)?.with_proposer(&config.simulation.proposer);
            simulate(&mut node, &config, &settings, |node| node.store().save_height(node.height()))?;
            report(&node, &config)?;
        }
        None => {
            println!("Database: in-memory");
            let mut node = Node::new(MemStore::new(), config.params.clone(), roster(&config), 0)?
                .with_proposer(&config.simulation.proposer);
            simulate(&mut node, &config, &settings, |_| Ok(()))?;
            report(&node, &config)?;
        }
    }
    Ok(())
}

fn simulate<S: KvStore>(
    node: &mut Node<S>,
    config: &ProtocolConfig,
    settings: &NodeSettings,
    mut on_commit: impl FnMut(&Node<S>) -> Result<(), StoreError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let sim = &config.simulation;
    let shared = config.params.shared.clone();
    let mut rng = StdRng::seed_from_u64(settings.sim_seed);

    // A fresh chain stakes the suppliers and the applications.
    let mut relayers: BTreeMap<String, Vec<Relayer>> = BTreeMap::new();
    for service in &sim.services {
        let suppliers: Vec<String> = node.roster().suppliers(service).map(str::to_string).collect();
        for supplier in suppliers {
            if node.height() == 0 {
                node.register_supplier(service, &supplier, sim.supplier_stake)?;
            }
            relayers.entry(service.clone()).or_default().push(Relayer::new(supplier));
        }
    }
    if node.height() == 0 {
        for app in &sim.applications {
            node.stake_application(app, sim.application_stake)?;
        }
    }
    info!(
        "Simulating {} suppliers across {} services from height {}",
        relayers.values().map(Vec::len).sum::<usize>(),
        relayers.len(),
        node.height()
    );

    let end = node.height() + settings.sim_blocks;
    while node.height() < end {
        let executed = node.height();
        if is_session_start_height(&shared, executed) {
            let start_hash = node.tip_hash();
            for (service, service_relayers) in relayers.iter_mut() {
                let target =
                    get_relay_mining_difficulty_at_height(node.store(), &config.params.service, service, executed)?
                        .target_hash;
                for relayer in service_relayers.iter_mut() {
                    for app in &sim.applications {
                        let header = SessionHeader::new(&shared, app.as_str(), service.as_str(), executed, &start_hash);
                        let relays = rng.gen_range(sim.relays_per_session.0..=sim.relays_per_session.1);
                        for i in 0..relays {
                            let relay = format!("{}/{}/{}/{}", header.session_id, relayer.supplier(), i, rng.gen::<u64>());
                            relayer.record_relay(&header, relay.into_bytes(), sim.compute_units_per_relay, &target);
                        }
                    }
                }
            }
        }

        let height = executed + 1;
        let mut messages = Vec::new();
        for relayer in relayers.values_mut().flatten() {
            let lookup = |h: u64| node.block_hash(h).ok().flatten();
            for message in relayer.messages_at(&shared, height, lookup)? {
                let dropped = matches!(message, Message::SubmitProof(_)) && rng.gen_bool(sim.proof_drop_rate);
                if !dropped {
                    messages.push(message);
                }
            }
        }

        let outcome = node.apply_block(messages)?;
        on_commit(node)?;
        let summary = &outcome.summary;
        if summary.num_settled + summary.num_expired + summary.num_failed > 0 || !outcome.rejected.is_empty() {
            println!(
                "Block #{:>5} | settled {:>3} ({:>12} tokens) | expired {:>2} | failed {:>2} | rejected {:>2} | events {:>3}",
                summary.height,
                summary.num_settled,
                summary.settled_amount,
                summary.num_expired,
                summary.num_failed,
                outcome.rejected.len(),
                summary.num_events
            );
        }
    }
    Ok(())
}

/// Suppliers named `<service>-supplier-<k>`, a fixed set per service
fn roster(config: &ProtocolConfig) -> StaticRoster {
    let mut roster = StaticRoster::new();
    for service in &config.simulation.services {
        for k in 0..config.simulation.suppliers_per_service {
            roster.add_supplier(service.as_str(), format!("{service}-supplier-{k}"));
        }
    }
    roster
}

fn report<S: KvStore>(node: &Node<S>, config: &ProtocolConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    println!("Final state at height {}:", node.height());
    println!("  Total supply: {}", node.store().total_supply()?);
    println!("  Modules:");
    for (module, balance) in module_balances(node.store())? {
        println!("    {module:<14} {balance:>16}");
    }
    println!("  Accounts:");
    for (address, balance) in account_balances(node.store())? {
        println!("    {address:<24} {balance:>16}");
    }
    println!("  Relay mining difficulty:");
    for service in &config.simulation.services {
        let difficulty = get_relay_mining_difficulty_or_default(node.store(), &config.params.service, service)?;
        println!(
            "    {:<10} ema {:>8} | x{:<8.2} | p {:<8.4} | target {}...",
            service,
            difficulty.num_relays_ema,
            difficulty_multiplier(&difficulty.target_hash),
            relay_difficulty_probability(&difficulty.target_hash),
            &difficulty.target_hash.to_hex()[..16]
        );
    }
    Ok(())
}
