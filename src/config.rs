//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ClusterConfig: Role (hub/satellite), identity, peers.
//!     - GameConfig: The answer key and the victory reset delay.
//!     - PollingConfig: Sensor, agent and button loop intervals.
//!     - IdleConfig: Attract-mode timing.
//!     - SensorConfig / LedConfig / BuzzerConfig: Devices.
//!
//! ==============================================================================

use crate::domain::NodeId;
use crate::error::Error;
use crate::idle::IdleTiming;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAX_SATELLITES: usize = 4;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub idle: IdleConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub leds: LedConfig,
    #[serde(default)]
    pub buzzer: BuzzerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Hub,
    Satellite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// base url of the hub (satellites only)
    #[serde(default)]
    pub hub_url: String,
    /// participating satellites (hub only)
    #[serde(default)]
    pub satellites: Vec<SatelliteEntry>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SatelliteEntry {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GameConfig {
    #[serde(default)]
    pub correct_id: String,
    #[serde(default)]
    pub known_ids: Vec<String>,
    #[serde(default = "default_victory_reset_ms")]
    pub victory_reset_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_sensor_interval_ms")]
    pub sensor_interval_ms: u64,
    #[serde(default = "default_agent_interval_ms")]
    pub agent_interval_ms: u64,
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    #[serde(default = "default_button_interval_ms")]
    pub button_interval_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdleConfig {
    #[serde(default = "default_swing_ms")]
    pub swing_ms: u64,
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
    #[serde(default = "default_runner_ms")]
    pub runner_ms: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
    #[serde(default = "default_breath_rate")]
    pub breath_rate: f64,
    /// overrides the slot derived from the node id
    #[serde(default)]
    pub slot: Option<u8>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    /// "mfrc522" or "mock"
    #[serde(default = "default_sensor_driver")]
    pub driver: String,
    #[serde(default = "default_python")]
    pub python: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedConfig {
    #[serde(default = "default_red_pin")]
    pub red_pin: u8,
    #[serde(default = "default_green_pin")]
    pub green_pin: u8,
    #[serde(default = "default_blue_pin")]
    pub blue_pin: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuzzerConfig {
    #[serde(default = "default_buzzer_pin")]
    pub gpio_pin: u8,
    #[serde(default = "default_true")]
    pub active_high: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_node_id() -> String { NodeId::LOCAL.to_string() }
fn default_bind() -> String { "0.0.0.0:8080".to_string() }
fn default_victory_reset_ms() -> u64 { 3000 }
fn default_sensor_interval_ms() -> u64 { 100 }
fn default_agent_interval_ms() -> u64 { 100 }
fn default_grace_ms() -> u64 { 500 }
fn default_button_interval_ms() -> u64 { 50 }
fn default_error_backoff_ms() -> u64 { 1000 }
fn default_rpc_timeout_ms() -> u64 { 2000 }
fn default_swing_ms() -> u64 { 30_000 }
fn default_pause_ms() -> u64 { 5_000 }
fn default_runner_ms() -> u64 { 60_000 }
fn default_tick_ms() -> u64 { 1_000 }
fn default_frame_ms() -> u64 { 50 }
fn default_breath_rate() -> f64 { 4.0 }
fn default_sensor_driver() -> String { "mfrc522".to_string() }
fn default_python() -> String { "python3".to_string() }
fn default_red_pin() -> u8 { 19 }
fn default_green_pin() -> u8 { 13 }
fn default_blue_pin() -> u8 { 26 }
fn default_buzzer_pin() -> u8 { 17 }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            role: Role::Hub,
            node_id: default_node_id(),
            bind: default_bind(),
            hub_url: String::new(),
            satellites: Vec::new(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            correct_id: String::new(),
            known_ids: Vec::new(),
            victory_reset_ms: default_victory_reset_ms(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            sensor_interval_ms: default_sensor_interval_ms(),
            agent_interval_ms: default_agent_interval_ms(),
            grace_ms: default_grace_ms(),
            button_interval_ms: default_button_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { timeout_ms: default_rpc_timeout_ms() }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            swing_ms: default_swing_ms(),
            pause_ms: default_pause_ms(),
            runner_ms: default_runner_ms(),
            tick_ms: default_tick_ms(),
            frame_ms: default_frame_ms(),
            breath_rate: default_breath_rate(),
            slot: None,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { driver: default_sensor_driver(), python: default_python() }
    }
}

impl Default for LedConfig {
    fn default() -> Self {
        Self { red_pin: default_red_pin(), green_pin: default_green_pin(), blue_pin: default_blue_pin() }
    }
}

impl Default for BuzzerConfig {
    fn default() -> Self {
        Self { gpio_pin: default_buzzer_pin(), active_high: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before logging is initialised, so it reports on stderr.
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        eprintln!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        eprintln!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        eprintln!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<(), Error> {
        let c = &self.cluster;
        match c.role {
            Role::Satellite => {
                if c.hub_url.is_empty() {
                    return Err(Error::Config("satellite needs cluster.hub_url".into()));
                }
                if c.node_id == NodeId::LOCAL {
                    return Err(Error::Config("satellite node_id must not be \"local\"".into()));
                }
            }
            Role::Hub => {
                if c.satellites.len() > MAX_SATELLITES {
                    return Err(Error::Config(format!(
                        "at most {} satellites are supported, got {}",
                        MAX_SATELLITES,
                        c.satellites.len()
                    )));
                }
                let mut seen = HashSet::new();
                for sat in &c.satellites {
                    if sat.id == NodeId::LOCAL {
                        return Err(Error::Config("satellite id \"local\" is reserved".into()));
                    }
                    if !seen.insert(sat.id.as_str()) {
                        return Err(Error::Config(format!("duplicate satellite id: {}", sat.id)));
                    }
                }
            }
        }
        let p = &self.polling;
        let i = &self.idle;
        if [p.sensor_interval_ms, p.agent_interval_ms, p.button_interval_ms, self.rpc.timeout_ms, i.tick_ms, i.frame_ms]
            .contains(&0)
        {
            return Err(Error::Config("intervals and timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        match self.cluster.role {
            Role::Hub => NodeId::local(),
            Role::Satellite => NodeId::new(&self.cluster.node_id),
        }
    }

    pub fn idle_slot(&self) -> u8 {
        self.idle.slot.unwrap_or_else(|| self.node_id().idle_slot())
    }

    pub fn idle_timing(&self) -> IdleTiming {
        IdleTiming {
            swing: Duration::from_millis(self.idle.swing_ms),
            pause: Duration::from_millis(self.idle.pause_ms),
            runner: Duration::from_millis(self.idle.runner_ms),
            tick: Duration::from_millis(self.idle.tick_ms),
            breath_rate: self.idle.breath_rate,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.timeout_ms)
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!(
            role = ?self.cluster.role,
            node = %self.node_id(),
            bind = %self.cluster.bind,
            satellites = self.cluster.satellites.len(),
            known_ids = self.game.known_ids.len(),
            sensor = %self.sensor.driver,
            "host configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUB: &str = r#"
[cluster]
role = "hub"
bind = "0.0.0.0:8080"

[[cluster.satellites]]
id = "sat1"
url = "http://sat1.local:8080"

[[cluster.satellites]]
id = "sat2"
url = "http://sat2.local:8080"

[game]
correct_id = "584194412400"
known_ids = ["584194412400", "119591732478"]

[idle]
swing_ms = 1000
"#;

    #[test]
    fn parses_hub_config_with_defaults() {
        let config = HostConfig::from_toml(HUB).unwrap();
        assert_eq!(config.cluster.role, Role::Hub);
        assert_eq!(config.cluster.satellites.len(), 2);
        assert_eq!(config.game.victory_reset_ms, 3000);
        assert_eq!(config.polling.grace_ms, 500);
        assert_eq!(config.idle.swing_ms, 1000);
        assert_eq!(config.idle.pause_ms, 5000);
        assert_eq!(config.node_id(), NodeId::local());
        assert_eq!(config.idle_slot(), 0);
    }

    #[test]
    fn satellite_requires_hub_url() {
        let err = HostConfig::from_toml("[cluster]\nrole = \"satellite\"\nnode_id = \"sat2\"\n").unwrap_err();
        assert!(err.to_string().contains("hub_url"));

        let ok = HostConfig::from_toml(
            "[cluster]\nrole = \"satellite\"\nnode_id = \"sat2\"\nhub_url = \"http://hub:8080\"\n",
        )
        .unwrap();
        assert_eq!(ok.idle_slot(), 2);
    }

    #[test]
    fn rejects_duplicate_and_reserved_satellite_ids() {
        let dup = r#"
[[cluster.satellites]]
id = "sat1"
url = "http://a"
[[cluster.satellites]]
id = "sat1"
url = "http://b"
"#;
        assert!(HostConfig::from_toml(dup).is_err());

        let reserved = "[[cluster.satellites]]\nid = \"local\"\nurl = \"http://a\"\n";
        assert!(HostConfig::from_toml(reserved).is_err());
    }

    #[test]
    fn rejects_zero_intervals() {
        assert!(HostConfig::from_toml("[rpc]\ntimeout_ms = 0\n").is_err());
    }
}
