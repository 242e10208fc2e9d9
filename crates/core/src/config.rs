//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::{SourceId, SourceKind, Symbol};

/// Price source configuration (credentials are resolved by the caller)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: SourceId,
    pub kind: SourceKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl SourceConfig {
    pub fn new(name: SourceId, kind: SourceKind) -> Self {
        Self {
            name,
            kind,
            api_key: None,
            secret_key: None,
            base_url: None,
            rate_limit_per_minute: None,
            enabled: true,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit_per_minute
            .unwrap_or_else(|| self.kind.default_rate_limit())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn has_credentials(&self) -> bool {
        !self.kind.requires_api_key() || self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Polling loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub symbols: Vec<Symbol>,
    pub interval_ms: u64,
    pub max_consecutive_failures: u32,
    /// Cool-down before a disabled source is probed again; `None` disables permanently
    pub reenable_after_ms: Option<u64>,
    /// Upper bound on one source's fetch call, rate-limit waits included
    pub fetch_timeout_ms: Option<u64>,
    pub error_pause_ms: u64,
    pub min_sleep_ms: u64,
    pub throttle_pause_ms: u64,
    pub adaptive_interval: bool,
    pub channel_capacity: usize,
    pub probe_on_start: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        let symbols = ["AAPL", "TSLA", "GOOGL", "MSFT", "AMZN"]
            .into_iter()
            .filter_map(|s| Symbol::new(s).ok())
            .collect();

        Self {
            symbols,
            interval_ms: 1_000,
            max_consecutive_failures: 5,
            reenable_after_ms: None,
            fetch_timeout_ms: None,
            error_pause_ms: 1_000,
            min_sleep_ms: 100,
            throttle_pause_ms: 1_000,
            adaptive_interval: false,
            channel_capacity: 64,
            probe_on_start: false,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn reenable_after(&self) -> Option<Duration> {
        self.reenable_after_ms.map(Duration::from_millis)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    pub fn error_pause(&self) -> Duration {
        Duration::from_millis(self.error_pause_ms)
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }

    pub fn throttle_pause(&self) -> Duration {
        Duration::from_millis(self.throttle_pause_ms)
    }

    /// Symbols with duplicates removed, first occurrence wins
    pub fn unique_symbols(&self) -> Vec<Symbol> {
        let mut seen = HashSet::new();
        self.symbols
            .iter()
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }
}

/// Detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum relative spread (fraction of mid price) to report
    pub threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.005,  // 0.5%
        }
    }
}

impl DetectionConfig {
    pub fn threshold_is_valid(&self) -> bool {
        self.threshold.is_finite() && self.threshold > 0.0 && self.threshold <= 1.0
    }
}

/// Simulated price generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub initial_price_min: f64,
    pub initial_price_max: f64,
    /// Absolute cap on a single step
    pub max_price_change: f64,
    pub min_price: f64,
    /// Standard deviation of the relative step
    pub volatility: f64,
    /// How far secondary slots may sit from the reference price
    pub variance_factor: f64,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_price_min: 50.0,
            initial_price_max: 500.0,
            max_price_change: 2.0,
            min_price: 1.0,
            volatility: 0.01,
            variance_factor: 0.02,
            seed: None,
        }
    }
}

/// Throttle advisor high-water marks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub history_len: usize,
    pub cpu_high_pct: f64,
    pub memory_high_mb: f64,
    pub error_rate_high: f64,
    pub processing_high_ms: f64,
    pub min_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            history_len: 10,
            cpu_high_pct: 90.0,
            memory_high_mb: 2_000.0,
            error_rate_high: 0.2,
            processing_high_ms: 200.0,
            min_interval_ms: 100,
        }
    }
}

/// Opportunity retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub opportunity_log: PathBuf,
    pub max_in_file: usize,
    pub max_in_memory: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            opportunity_log: PathBuf::from("logs/opportunities.json"),
            max_in_file: 10_000,
            max_in_memory: 1_000,
        }
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub sources: Vec<SourceConfig>,
    pub polling: PollingConfig,
    pub detection: DetectionConfig,
    pub simulation: SimulationConfig,
    pub throttle: ThrottleConfig,
    pub persistence: PersistenceConfig,
}

/// Outcome of configuration validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl BotConfig {
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn validate(&self) -> ConfigValidation {
        let mut result = ConfigValidation::default();

        if !self.detection.threshold_is_valid() {
            result.errors.push(format!(
                "Threshold {} out of range (0, 1]",
                self.detection.threshold
            ));
        }

        let sim = &self.simulation;
        if sim.initial_price_min <= 0.0 || sim.initial_price_min >= sim.initial_price_max {
            result.errors.push(format!(
                "Invalid price range: MIN({}) must be positive and below MAX({})",
                sim.initial_price_min, sim.initial_price_max
            ));
        }
        if sim.min_price <= 0.0 {
            result.errors.push(format!("min_price must be positive, got {}", sim.min_price));
        }

        if self.polling.symbols.is_empty() {
            result.errors.push("Symbol list cannot be empty".to_string());
        } else if self.polling.unique_symbols().len() != self.polling.symbols.len() {
            result.warnings.push("Duplicate symbols found in symbol list".to_string());
        }

        if self.polling.max_consecutive_failures == 0 {
            result.errors.push("max_consecutive_failures must be at least 1".to_string());
        }

        if self.polling.channel_capacity == 0 {
            result.errors.push("channel_capacity must be at least 1".to_string());
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                result.errors.push(format!("Duplicate source name: {}", source.name));
            }
            if source.name.is_simulated() {
                result.errors.push(format!(
                    "Source name {} is reserved for simulated fallback data",
                    source.name
                ));
            }
            if source.enabled && !source.has_credentials() {
                result.warnings.push(format!(
                    "Source {} ({}) has no API key and will be skipped",
                    source.name, source.kind
                ));
            }
        }

        if self.enabled_sources().count() < 2 {
            result.warnings.push(
                "Fewer than 2 enabled sources; simulated data will fill the comparison".to_string(),
            );
        }

        if self.persistence.max_in_memory > self.persistence.max_in_file {
            result.warnings.push(
                "max_in_memory > max_in_file may cause data loss".to_string(),
            );
        }

        result
    }

    /// One-line summary for startup logging
    pub fn summary(&self) -> String {
        let sources: Vec<&str> = self.enabled_sources().map(|s| s.name.as_str()).collect();
        format!(
            "symbols={} threshold={:.2}% interval={}ms sources=[{}] max_failures={}",
            self.polling.symbols.len(),
            self.detection.threshold * 100.0,
            self.polling.interval_ms,
            sources.join(", "),
            self.polling.max_consecutive_failures,
        )
    }
}
