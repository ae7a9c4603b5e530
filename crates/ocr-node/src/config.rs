use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use ocr_core::{Committee, ConfigDigest, KeyPair, OracleId, SecretKey};
use ocr_protocol::{ConfigContext, ProtocolConfig};
use serde::{Deserialize, Serialize};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Free-form name of the report destination, mixed into the digest
    pub label: String,

    /// Maximum number of faulty oracles tolerated
    pub f: usize,

    /// Secret keys (hex) of every committee member, in oracle order
    pub oracle_keys: Vec<String>,

    /// Protocol timing
    pub timing: TimingConfig,

    /// Local simulation settings
    pub simulation: SimulationConfig,
}

/// Protocol timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    pub delta_progress_ms: u64,
    pub delta_resend_ms: u64,
    pub delta_round_ms: u64,
    pub delta_grace_ms: u64,
    pub observation_timeout_ms: u64,
    pub report_timeout_ms: u64,
    pub data_source_timeout_ms: u64,
    pub r_max: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// How long to run, in milliseconds
    pub duration_ms: u64,

    /// Probability that any single delivery is lost
    pub drop_rate: f64,

    /// Oracles that never start
    pub crashed: Vec<u8>,

    /// Starting point of every oracle's random walk
    pub base_value: i64,

    /// Largest change of a reading between two fetches
    pub max_step: i64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig::from(&ProtocolConfig::default())
    }
}

impl From<&ProtocolConfig> for TimingConfig {
    fn from(config: &ProtocolConfig) -> Self {
        TimingConfig {
            delta_progress_ms: config.delta_progress.as_millis() as u64,
            delta_resend_ms: config.delta_resend.as_millis() as u64,
            delta_round_ms: config.delta_round.as_millis() as u64,
            delta_grace_ms: config.delta_grace.as_millis() as u64,
            observation_timeout_ms: config.observation_timeout.as_millis() as u64,
            report_timeout_ms: config.report_timeout.as_millis() as u64,
            data_source_timeout_ms: config.data_source_timeout.as_millis() as u64,
            r_max: config.r_max,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            duration_ms: 30_000,
            drop_rate: 0.0,
            crashed: Vec::new(),
            base_value: 1_000,
            max_step: 5,
        }
    }
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn protocol_config(&self) -> ProtocolConfig {
        let t = &self.timing;
        ProtocolConfig {
            delta_progress: Duration::from_millis(t.delta_progress_ms),
            delta_resend: Duration::from_millis(t.delta_resend_ms),
            delta_round: Duration::from_millis(t.delta_round_ms),
            delta_grace: Duration::from_millis(t.delta_grace_ms),
            observation_timeout: Duration::from_millis(t.observation_timeout_ms),
            report_timeout: Duration::from_millis(t.report_timeout_ms),
            data_source_timeout: Duration::from_millis(t.data_source_timeout_ms),
            r_max: t.r_max,
        }
    }

    pub fn keypairs(&self) -> Result<Vec<KeyPair>> {
        self.oracle_keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                SecretKey::from_hex(key)
                    .map(KeyPair::from_secret)
                    .map_err(|e| anyhow!("oracle key {}: {}", i, e))
            })
            .collect()
    }

    pub fn committee(&self) -> Result<Committee> {
        let keys = self.keypairs()?.into_iter().map(|p| p.public).collect();
        Ok(Committee::new(keys))
    }

    /// Protocol context as seen by `oracle_id`
    pub fn context_for(&self, oracle_id: OracleId) -> Result<ConfigContext> {
        Ok(ConfigContext::new(
            self.committee()?,
            self.f,
            oracle_id,
            &self.label,
        )?)
    }

    pub fn digest(&self) -> Result<ConfigDigest> {
        Ok(self.context_for(OracleId(0))?.config_digest)
    }

    /// Check everything a simulation needs before any task is spawned
    pub fn validate(&self) -> Result<()> {
        self.protocol_config().sanity_check()?;
        self.context_for(OracleId(0))?;

        if !(0.0..1.0).contains(&self.simulation.drop_rate) {
            return Err(anyhow!(
                "drop_rate must be in [0, 1), got {}",
                self.simulation.drop_rate
            ));
        }
        if self.simulation.max_step < 0 {
            return Err(anyhow!("max_step must not be negative"));
        }
        if let Some(id) = self
            .simulation
            .crashed
            .iter()
            .find(|id| **id as usize >= self.oracle_keys.len())
        {
            return Err(anyhow!("crashed oracle {} is not in the committee", id));
        }
        Ok(())
    }
}

/// Generate a sample configuration with fresh keys
pub fn generate_sample_config(oracles: usize, f: usize) -> NodeConfig {
    NodeConfig {
        label: "ocr-local".to_string(),
        f,
        oracle_keys: (0..oracles)
            .map(|_| KeyPair::generate().secret.to_hex())
            .collect(),
        timing: TimingConfig::default(),
        simulation: SimulationConfig::default(),
    }
}
