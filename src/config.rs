//! Configuration management with validation and defaults
//!
//! One `CasinoConfig` covers table rules, payout multipliers, persistence and
//! logging. It can be loaded from TOML, overridden through `CASINO_*`
//! environment variables, and is always validated before use.

use crate::errors::{CasinoResult, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Multipliers are stored in basis points: 10_000 == 1.0x
pub const BPS_SCALE: u64 = 10_000;

/// Complete table configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CasinoConfig {
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub payouts: PayoutConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Round timing, shoe composition and new-account defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableConfig {
    /// Seconds between opening a round and its automatic settlement
    pub round_delay_secs: u64,
    /// Standard 52-card decks combined into one shoe
    pub deck_count: usize,
    /// Reshuffle when fewer than this many cards remain before a draw
    pub reshuffle_reserve: usize,
    /// Balance granted to an account on first interaction
    pub starting_points: u64,
    /// Fixed seed for reproducible shuffles; `None` seeds from the OS
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            round_delay_secs: 60,
            deck_count: 8,
            reshuffle_reserve: 6,
            starting_points: 200_000,
            shuffle_seed: None,
        }
    }
}

/// Payout multipliers (stake included), in basis points
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutConfig {
    pub player_bps: u64,
    /// 1.95x reflects the 5% commission on banker wins
    pub banker_bps: u64,
    pub tie_bps: u64,
    #[serde(default)]
    pub streak_bonus: StreakBonusConfig,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            player_bps: 20_000,
            banker_bps: 19_500,
            tie_bps: 80_000,
            streak_bonus: StreakBonusConfig::default(),
        }
    }
}

/// Additive multiplier bonus for consecutive PLAYER/BANKER wins
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreakBonusConfig {
    pub enabled: bool,
    /// Streak length at which the bonus starts
    pub start: u32,
    pub step_bps: u64,
    pub max_bps: u64,
}

impl Default for StreakBonusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start: 2,
            step_bps: 200,
            max_bps: 2_000,
        }
    }
}

impl StreakBonusConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageBackend {
    /// Volatile map; state is lost on restart
    Memory,
    RocksDb,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    pub compression_type: CompressionType,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    Snappy,
    Lz4,
    Zstd,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/casino_data".to_string(),
            write_buffer_size_mb: 16,
            compression_type: CompressionType::Lz4,
            clear_on_start: false, // Production default: preserve data
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: LogLevel,
    pub enable_metrics: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            enable_metrics: true,
        }
    }
}

impl CasinoConfig {
    /// Persistent RocksDB table with reference timing
    pub fn production() -> Self {
        Self {
            storage: StorageConfig {
                data_directory: "./DB/casino_data".to_string(),
                write_buffer_size_mb: 64,
                clear_on_start: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// In-memory table with a fixed shuffle seed and a short round window
    pub fn testing() -> Self {
        Self {
            table: TableConfig {
                round_delay_secs: 1,
                shuffle_seed: Some(42),
                ..Default::default()
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                clear_on_start: true,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Debug,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> CasinoResult<()> {
        if self.table.round_delay_secs == 0 {
            return Err(invalid("table.round_delay_secs", "0", "Round delay must be > 0"));
        }

        if self.table.deck_count == 0 {
            return Err(invalid("table.deck_count", "0", "Shoe needs at least one deck"));
        }

        let shoe_size = self.table.deck_count * 52;
        if self.table.reshuffle_reserve == 0 || self.table.reshuffle_reserve >= shoe_size {
            return Err(invalid(
                "table.reshuffle_reserve",
                &self.table.reshuffle_reserve.to_string(),
                &format!("Reserve must be between 1 and {}", shoe_size - 1),
            ));
        }

        for (field, bps) in [
            ("payouts.player_bps", self.payouts.player_bps),
            ("payouts.banker_bps", self.payouts.banker_bps),
            ("payouts.tie_bps", self.payouts.tie_bps),
        ] {
            if bps < BPS_SCALE {
                return Err(invalid(
                    field,
                    &bps.to_string(),
                    "A winning bet must at least return its stake",
                ));
            }
        }

        let bonus = &self.payouts.streak_bonus;
        if bonus.enabled && bonus.start < 1 {
            return Err(invalid(
                "payouts.streak_bonus.start",
                "0",
                "Streak bonus starts at a streak of at least 1",
            ));
        }

        if self.storage.backend == StorageBackend::RocksDb && self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::ValidationFailed(
                "storage.data_directory is required for the RocksDb backend".to_string(),
            )
            .into());
        }

        Ok(())
    }

    pub fn round_delay(&self) -> Duration {
        Duration::from_secs(self.table.round_delay_secs)
    }

    pub fn shoe_size(&self) -> usize {
        self.table.deck_count * 52
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::errors::CasinoError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> CasinoResult<CasinoConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => CasinoConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> CasinoResult<CasinoConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut CasinoConfig) -> CasinoResult<()> {
        if let Ok(delay) = env::var("CASINO_ROUND_DELAY_SECS") {
            config.table.round_delay_secs = parse_env("CASINO_ROUND_DELAY_SECS", delay)?;
        }
        if let Ok(points) = env::var("CASINO_STARTING_POINTS") {
            config.table.starting_points = parse_env("CASINO_STARTING_POINTS", points)?;
        }
        if let Ok(seed) = env::var("CASINO_SHUFFLE_SEED") {
            config.table.shuffle_seed = Some(parse_env("CASINO_SHUFFLE_SEED", seed)?);
        }
        if let Ok(data_dir) = env::var("CASINO_DATA_DIR") {
            config.storage.data_directory = data_dir;
        }
        if let Ok(backend) = env::var("CASINO_STORAGE_BACKEND") {
            config.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "rocksdb" => StorageBackend::RocksDb,
                _ => {
                    return Err(ConfigurationError::InvalidValue {
                        field: "CASINO_STORAGE_BACKEND".to_string(),
                        value: backend,
                        reason: "Expected 'memory' or 'rocksdb'".to_string(),
                    }
                    .into())
                }
            };
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &CasinoConfig, path: &str) -> CasinoResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

/// Builder for programmatic configuration
pub struct ConfigBuilder {
    config: CasinoConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CasinoConfig::default(),
        }
    }

    /// Start from an existing configuration, e.g. a preset
    pub fn from_config(config: CasinoConfig) -> Self {
        Self { config }
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn round_delay_secs(mut self, secs: u64) -> Self {
        self.config.table.round_delay_secs = secs;
        self
    }

    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.config.table.shuffle_seed = Some(seed);
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> CasinoResult<CasinoConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: String) -> CasinoResult<T> {
    value.parse().map_err(|_| {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            value,
            reason: "Invalid number".to_string(),
        }
        .into()
    })
}
