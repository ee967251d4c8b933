//! Configuration
//!
//! Protocol parameters and simulation settings come from a JSON file; any
//! section left out falls back to its defaults. Node-level settings come
//! from the environment.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::{Params, ParamsError};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid parameters: {0}")]
    Params(#[from] ParamsError),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("invalid simulation setting: {0}")]
    Simulation(&'static str),
}

/// Workload for the simulation binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub services: Vec<String>,
    pub applications: Vec<String>,
    pub suppliers_per_service: u32,
    /// Relays each supplier serves per application and session, `[min, max]`
    pub relays_per_session: (u64, u64),
    pub compute_units_per_relay: u64,
    pub supplier_stake: u64,
    /// Stake of each application, burned as its sessions settle
    pub application_stake: u64,
    /// Address credited with the proposer share of every block
    pub proposer: String,
    /// Fraction of proofs suppliers fail to submit
    pub proof_drop_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            services: vec!["anvil".to_string(), "ollama".to_string()],
            applications: vec!["app-1".to_string(), "app-2".to_string()],
            suppliers_per_service: 3,
            relays_per_session: (20, 400),
            compute_units_per_relay: 1,
            supplier_stake: 100_000_000,
            application_stake: 5_000_000_000,
            proposer: "proposer".to_string(),
            proof_drop_rate: 0.05,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() || self.applications.is_empty() {
            return Err(ConfigError::Simulation("services and applications must not be empty"));
        }
        if self.relays_per_session.0 > self.relays_per_session.1 {
            return Err(ConfigError::Simulation("relays_per_session min exceeds max"));
        }
        if self.compute_units_per_relay == 0 {
            return Err(ConfigError::Simulation("compute_units_per_relay must be positive"));
        }
        if !(0.0..=1.0).contains(&self.proof_drop_rate) {
            return Err(ConfigError::Simulation("proof_drop_rate must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Everything loaded from the config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub params: Params,
    pub simulation: SimulationConfig,
}

impl ProtocolConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.params.validate()?;
        self.simulation.validate()
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub const ENV_DB_PATH: &str = "RELAY_DB_PATH";
pub const ENV_PARAMS_PATH: &str = "RELAY_PARAMS_PATH";
pub const ENV_SIM_BLOCKS: &str = "RELAY_SIM_BLOCKS";
pub const ENV_SIM_SEED: &str = "RELAY_SIM_SEED";

const DEFAULT_SIM_BLOCKS: u64 = 64;
const DEFAULT_SIM_SEED: u64 = 7;

/// Node settings read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    /// Sled database directory; in-memory when unset
    pub db_path: Option<PathBuf>,
    /// JSON config file; defaults when unset
    pub params_path: Option<PathBuf>,
    pub sim_blocks: u64,
    pub sim_seed: u64,
}

impl NodeSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Settings from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let parse_u64 = |var: &'static str, default: u64| match lookup(var) {
            Some(value) => value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnv { var, value }),
            None => Ok(default),
        };
        Ok(Self {
            db_path: lookup(ENV_DB_PATH).filter(|v| !v.is_empty()).map(PathBuf::from),
            params_path: lookup(ENV_PARAMS_PATH).filter(|v| !v.is_empty()).map(PathBuf::from),
            sim_blocks: parse_u64(ENV_SIM_BLOCKS, DEFAULT_SIM_BLOCKS)?,
            sim_seed: parse_u64(ENV_SIM_SEED, DEFAULT_SIM_SEED)?,
        })
    }
}
