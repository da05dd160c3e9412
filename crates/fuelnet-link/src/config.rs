//! # Node Configuration
//!
//! Configuration management for every node role.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FUELNET_ROLE=station                                               │
//! │     FUELNET_PUMP_ID=3                                                  │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fuelnet/fuelnet.toml (Linux)                             │
//! │     ~/Library/Application Support/net.fuelnet.fuelnet/... (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     role = station, ports 6000/6001, standard prices                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [node]
//! role = "station"            # enterprise | station | pump
//!
//! [station]
//! id = "station-001"
//! bind_addr = "0.0.0.0"
//! tcp_port = 6000
//! udp_port = 6001
//! known_pumps = [1, 2, 3, 4]
//!
//! [station.prices]
//! grade93 = 1290
//! grade95 = 1350
//!
//! [pump]
//! id = 1
//! station_host = "127.0.0.1"
//! grade = "grade93"
//!
//! [uplink]
//! enabled = true
//! enterprise_addr = "127.0.0.1:7000"
//!
//! [timing]
//! heartbeat_interval_secs = 30
//! read_timeout_secs = 90
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use fuelnet_core::validation::{validate_grades, validate_price_set, validate_pump_id, validate_station_id};
use fuelnet_core::{default_grades, FuelGrade, PriceSet, PumpId, StationId};

use crate::error::{LinkError, LinkResult};

// =============================================================================
// Node Role
// =============================================================================

/// Which tier this process plays.
///
/// ```text
///   ENTERPRISE ──(price_update)──► STATION ──(price_update)──► PUMP
///                                     ▲                          │
///                                     └──(status, transactions)──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Top tier: owns the network price table, accepts stations.
    Enterprise,

    /// Middle tier: hub for pumps, client of the enterprise.
    #[default]
    Station,

    /// Leaf: a dispenser controller.
    Pump,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Enterprise => write!(f, "enterprise"),
            NodeRole::Station => write!(f, "station"),
            NodeRole::Pump => write!(f, "pump"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enterprise" | "empresa" => Ok(NodeRole::Enterprise),
            "station" | "hub" => Ok(NodeRole::Station),
            "pump" | "dispenser" => Ok(NodeRole::Pump),
            other => Err(LinkError::InvalidConfig(format!(
                "Unknown role: '{}'. Valid options: enterprise, station, pump",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSettings {
    #[serde(default)]
    pub role: NodeRole,
}

// =============================================================================
// Station Settings
// =============================================================================

/// Pump-facing hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSettings {
    /// Identifier presented to the enterprise.
    #[serde(default = "default_station_id")]
    pub id: StationId,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Reliable-channel port pumps connect to.
    #[serde(default = "default_station_tcp_port")]
    pub tcp_port: u16,

    /// Fast-channel port pumps send telemetry to.
    #[serde(default = "default_station_udp_port")]
    pub udp_port: u16,

    /// Pump identifiers the in-memory record store admits.
    #[serde(default = "default_known_pumps")]
    pub known_pumps: Vec<PumpId>,

    /// Price table used until the enterprise pushes one.
    #[serde(default = "PriceSet::standard")]
    pub prices: PriceSet,
}

fn default_station_id() -> StationId {
    StationId::from("station-001")
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_station_tcp_port() -> u16 {
    6000
}

fn default_station_udp_port() -> u16 {
    6001
}

fn default_known_pumps() -> Vec<PumpId> {
    (1..=4).map(PumpId::new).collect()
}

impl Default for StationSettings {
    fn default() -> Self {
        StationSettings {
            id: default_station_id(),
            bind_addr: default_bind_addr(),
            tcp_port: default_station_tcp_port(),
            udp_port: default_station_udp_port(),
            known_pumps: default_known_pumps(),
            prices: PriceSet::standard(),
        }
    }
}

impl StationSettings {
    pub fn tcp_bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.tcp_port)
    }

    pub fn udp_bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.udp_port)
    }
}

// =============================================================================
// Pump Settings
// =============================================================================

/// Dispenser controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpSettings {
    #[serde(default = "default_pump_id")]
    pub id: PumpId,

    #[serde(default = "default_station_host")]
    pub station_host: String,

    #[serde(default = "default_station_tcp_port")]
    pub station_tcp_port: u16,

    #[serde(default = "default_station_udp_port")]
    pub station_udp_port: u16,

    /// Grade selected at boot.
    #[serde(default = "default_grade")]
    pub grade: FuelGrade,

    #[serde(default = "default_grades")]
    pub supported_grades: Vec<FuelGrade>,

    /// Volume units added per dispense tick.
    #[serde(default = "default_units_per_tick")]
    pub units_per_tick: u64,
}

fn default_pump_id() -> PumpId {
    PumpId::new(1)
}

fn default_station_host() -> String {
    "127.0.0.1".to_string()
}

fn default_grade() -> FuelGrade {
    FuelGrade::from("grade93")
}

fn default_units_per_tick() -> u64 {
    1
}

impl Default for PumpSettings {
    fn default() -> Self {
        PumpSettings {
            id: default_pump_id(),
            station_host: default_station_host(),
            station_tcp_port: default_station_tcp_port(),
            station_udp_port: default_station_udp_port(),
            grade: default_grade(),
            supported_grades: default_grades(),
            units_per_tick: default_units_per_tick(),
        }
    }
}

impl PumpSettings {
    pub fn station_tcp_address(&self) -> String {
        format!("{}:{}", self.station_host, self.station_tcp_port)
    }

    pub fn station_udp_address(&self) -> String {
        format!("{}:{}", self.station_host, self.station_udp_port)
    }
}

// =============================================================================
// Enterprise / Uplink Settings
// =============================================================================

/// Station-facing hub settings for the enterprise node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterpriseSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_enterprise_port")]
    pub port: u16,

    /// Stations admitted. Empty admits any well-formed identifier.
    #[serde(default)]
    pub known_stations: Vec<StationId>,

    #[serde(default = "PriceSet::standard")]
    pub prices: PriceSet,
}

fn default_enterprise_port() -> u16 {
    7000
}

impl Default for EnterpriseSettings {
    fn default() -> Self {
        EnterpriseSettings {
            bind_addr: default_bind_addr(),
            port: default_enterprise_port(),
            known_stations: Vec::new(),
            prices: PriceSet::standard(),
        }
    }
}

impl EnterpriseSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// The station's client session toward the enterprise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_enterprise_addr")]
    pub enterprise_addr: String,
}

fn default_true() -> bool {
    true
}

fn default_enterprise_addr() -> String {
    "127.0.0.1:7000".to_string()
}

impl Default for UplinkSettings {
    fn default() -> Self {
        UplinkSettings {
            enabled: true,
            enterprise_addr: default_enterprise_addr(),
        }
    }
}

// =============================================================================
// Timing Settings
// =============================================================================

/// Protocol timers as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Hub-side liveness window; 3× the heartbeat interval.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_registration_timeout")]
    pub registration_timeout_secs: u64,

    /// Fixed client retry delay. No backoff growth, no jitter.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Longest a hub waits for one record to reach a peer before it treats
    /// the peer as gone.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_dispense_tick")]
    pub dispense_tick_ms: u64,

    /// One reliable snapshot every N dispense ticks.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every_ticks: u64,
}

fn default_heartbeat_interval() -> u64 {
    30
}
fn default_read_timeout() -> u64 {
    90
}
fn default_registration_timeout() -> u64 {
    10
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_write_timeout() -> u64 {
    10
}
fn default_dispense_tick() -> u64 {
    1000
}
fn default_snapshot_every() -> u64 {
    5
}

impl Default for TimingSettings {
    fn default() -> Self {
        TimingSettings {
            heartbeat_interval_secs: default_heartbeat_interval(),
            read_timeout_secs: default_read_timeout(),
            registration_timeout_secs: default_registration_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            connect_timeout_secs: default_connect_timeout(),
            write_timeout_secs: default_write_timeout(),
            dispense_tick_ms: default_dispense_tick(),
            snapshot_every_ticks: default_snapshot_every(),
        }
    }
}

/// Protocol timers in runtime form.
///
/// Components take this rather than [`TimingSettings`] so tests can use
/// sub-second values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub heartbeat_interval: Duration,
    pub read_timeout: Duration,
    pub registration_timeout: Duration,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub dispense_tick: Duration,
    pub snapshot_every_ticks: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Timings::from(&TimingSettings::default())
    }
}

impl From<&TimingSettings> for Timings {
    fn from(t: &TimingSettings) -> Self {
        Timings {
            heartbeat_interval: Duration::from_secs(t.heartbeat_interval_secs),
            read_timeout: Duration::from_secs(t.read_timeout_secs),
            registration_timeout: Duration::from_secs(t.registration_timeout_secs),
            reconnect_delay: Duration::from_secs(t.reconnect_delay_secs),
            connect_timeout: Duration::from_secs(t.connect_timeout_secs),
            write_timeout: Duration::from_secs(t.write_timeout_secs),
            dispense_tick: Duration::from_millis(t.dispense_tick_ms),
            snapshot_every_ticks: t.snapshot_every_ticks,
        }
    }
}

// =============================================================================
// Main Node Configuration
// =============================================================================

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSettings,

    #[serde(default)]
    pub station: StationSettings,

    #[serde(default)]
    pub pump: PumpSettings,

    #[serde(default)]
    pub enterprise: EnterpriseSettings,

    #[serde(default)]
    pub uplink: UplinkSettings,

    #[serde(default)]
    pub timing: TimingSettings,
}

impl NodeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (fuelnet.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> LinkResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading node config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| LinkError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load node config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> LinkResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| LinkError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LinkError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| LinkError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Node config saved");
        Ok(())
    }

    /// Validates the configuration for the configured role.
    pub fn validate(&self) -> LinkResult<()> {
        let invalid = |e: fuelnet_core::ValidationError| LinkError::InvalidConfig(e.to_string());

        let t = &self.timing;
        if t.heartbeat_interval_secs == 0
            || t.read_timeout_secs == 0
            || t.registration_timeout_secs == 0
            || t.reconnect_delay_secs == 0
            || t.connect_timeout_secs == 0
            || t.write_timeout_secs == 0
            || t.dispense_tick_ms == 0
            || t.snapshot_every_ticks == 0
        {
            return Err(LinkError::InvalidConfig(
                "timing values must be greater than 0".into(),
            ));
        }

        match self.node.role {
            NodeRole::Station => {
                validate_station_id(self.station.id.as_str()).map_err(invalid)?;
                validate_price_set(&self.station.prices).map_err(invalid)?;
                if self.uplink.enabled && self.uplink.enterprise_addr.trim().is_empty() {
                    return Err(LinkError::InvalidConfig(
                        "uplink.enterprise_addr is required when the uplink is enabled".into(),
                    ));
                }
            }
            NodeRole::Pump => {
                validate_pump_id(self.pump.id).map_err(invalid)?;
                validate_grades(&self.pump.supported_grades).map_err(invalid)?;
                if !self.pump.supported_grades.contains(&self.pump.grade) {
                    return Err(LinkError::InvalidConfig(format!(
                        "pump.grade '{}' is not in supported_grades",
                        self.pump.grade
                    )));
                }
                if self.pump.units_per_tick == 0 {
                    return Err(LinkError::InvalidConfig(
                        "pump.units_per_tick must be greater than 0".into(),
                    ));
                }
            }
            NodeRole::Enterprise => {
                validate_price_set(&self.enterprise.prices).map_err(invalid)?;
                for id in &self.enterprise.known_stations {
                    validate_station_id(id.as_str()).map_err(invalid)?;
                }
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(role) = std::env::var("FUELNET_ROLE") {
            match role.parse() {
                Ok(parsed) => {
                    debug!(role = %role, "Overriding role from environment");
                    self.node.role = parsed;
                }
                Err(e) => warn!(%e, "Ignoring FUELNET_ROLE"),
            }
        }

        if let Ok(id) = std::env::var("FUELNET_PUMP_ID") {
            if let Ok(parsed) = id.parse::<PumpId>() {
                debug!(pump_id = %parsed, "Overriding pump ID from environment");
                self.pump.id = parsed;
            }
        }

        if let Ok(host) = std::env::var("FUELNET_STATION_HOST") {
            self.pump.station_host = host;
        }

        if let Ok(port) = std::env::var("FUELNET_STATION_TCP_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding station TCP port from environment");
                self.station.tcp_port = p;
                self.pump.station_tcp_port = p;
            }
        }

        if let Ok(port) = std::env::var("FUELNET_STATION_UDP_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                self.station.udp_port = p;
                self.pump.station_udp_port = p;
            }
        }

        if let Ok(addr) = std::env::var("FUELNET_ENTERPRISE_ADDR") {
            debug!(addr = %addr, "Overriding enterprise address from environment");
            self.uplink.enterprise_addr = addr;
        }

        if let Ok(id) = std::env::var("FUELNET_STATION_ID") {
            self.station.id = StationId::new(id);
        }

        if let Ok(grade) = std::env::var("FUELNET_FUEL_GRADE") {
            self.pump.grade = FuelGrade::new(grade);
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("net", "fuelnet", "fuelnet")
            .map(|dirs| dirs.config_dir().join("fuelnet.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn role(&self) -> NodeRole {
        self.node.role
    }

    pub fn timings(&self) -> Timings {
        Timings::from(&self.timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("station".parse::<NodeRole>().unwrap(), NodeRole::Station);
        assert_eq!("PUMP".parse::<NodeRole>().unwrap(), NodeRole::Pump);
        assert_eq!("enterprise".parse::<NodeRole>().unwrap(), NodeRole::Enterprise);
        assert!("router".parse::<NodeRole>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.role(), NodeRole::Station);
        assert_eq!(config.station.tcp_port, 6000);
        assert_eq!(config.station.udp_port, 6001);
        assert_eq!(config.station.prices, PriceSet::standard());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_timings() {
        let t = Timings::default();
        assert_eq!(t.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(t.read_timeout, Duration::from_secs(90));
        assert_eq!(t.registration_timeout, Duration::from_secs(10));
        assert_eq!(t.reconnect_delay, Duration::from_secs(5));
        assert_eq!(t.write_timeout, Duration::from_secs(10));
        assert_eq!(t.dispense_tick, Duration::from_secs(1));
        assert_eq!(t.snapshot_every_ticks, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = NodeConfig::default();
        config.node.role = NodeRole::Pump;
        assert!(config.validate().is_ok());

        config.pump.grade = FuelGrade::from("avgas");
        assert!(config.validate().is_err());

        config.pump.grade = FuelGrade::from("diesel");
        config.pump.id = PumpId::new(0);
        assert!(config.validate().is_err());

        config.pump.id = PumpId::new(2);
        config.timing.read_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: NodeConfig = toml::from_str(
            r#"
            [node]
            role = "pump"

            [pump]
            id = 7
            grade = "grade95"
            "#,
        )
        .unwrap();
        assert_eq!(config.role(), NodeRole::Pump);
        assert_eq!(config.pump.id, PumpId::new(7));
        assert_eq!(config.pump.station_tcp_port, 6000);
        assert_eq!(config.timing.heartbeat_interval_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuelnet.toml");

        let mut config = NodeConfig::default();
        config.station.prices = PriceSet::from_pairs([("grade93", 1300)]);
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[station]"));
        assert!(contents.contains("[timing]"));

        let loaded: NodeConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.station.prices, config.station.prices);
    }
}
