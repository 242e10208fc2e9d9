//! Settings loading
//!
//! Precedence, lowest first: built-in defaults, `config/default.toml` (or the
//! file named by `ARB_CONFIG`), then `ARB__SECTION__KEY` environment variables.
//! Vendor credentials come from the usual per-vendor variables.

use anyhow::Context;
use config::{Config, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use arb_core::{BotConfig, SourceConfig, SourceId, SourceKind};

/// Names an explicit settings file
pub const CONFIG_PATH_VAR: &str = "ARB_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "config/default";
const ENV_PREFIX: &str = "ARB";

/// Environment variables carrying one vendor's credentials
struct VendorEnv {
    kind: SourceKind,
    api_key: &'static str,
    secret_key: Option<&'static str>,
    base_url: &'static str,
}

const VENDOR_ENV: [VendorEnv; 3] = [
    VendorEnv {
        kind: SourceKind::Alpaca,
        api_key: "ALPACA_API_KEY",
        secret_key: Some("ALPACA_SECRET_KEY"),
        base_url: "ALPACA_BASE_URL",
    },
    VendorEnv {
        kind: SourceKind::Polygon,
        api_key: "POLYGON_API_KEY",
        secret_key: None,
        base_url: "POLYGON_BASE_URL",
    },
    VendorEnv {
        kind: SourceKind::Finnhub,
        api_key: "FINNHUB_API_KEY",
        secret_key: None,
        base_url: "FINNHUB_BASE_URL",
    },
];

/// Load settings from the process environment
pub fn load_settings() -> anyhow::Result<BotConfig> {
    let file = env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
    let mut settings = read_settings(file.as_deref(), None)?;
    resolve_sources(&mut settings, |name| {
        env::var(name).ok().filter(|value| !value.trim().is_empty())
    })?;
    Ok(settings)
}

/// Layer the settings file and environment overrides over the defaults.
///
/// `overrides` replaces the process environment when given.
pub fn read_settings(
    file: Option<&Path>,
    overrides: Option<HashMap<String, String>>,
) -> anyhow::Result<BotConfig> {
    let builder = match file {
        Some(path) => {
            info!("Loading settings from {}", path.display());
            Config::builder().add_source(File::from(path).required(true))
        }
        None => Config::builder().add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
    };

    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("polling.symbols")
                .source(overrides),
        )
        .build()
        .context("Failed to read settings")?;

    settings
        .try_deserialize::<BotConfig>()
        .context("Invalid settings")
}

/// Fill in vendor credentials.
///
/// With no sources configured, every vendor whose API key is present is
/// added, followed by Yahoo Finance, which needs no key. Explicitly
/// configured sources only have their missing fields filled.
pub fn resolve_sources<F>(settings: &mut BotConfig, lookup: F) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if settings.sources.is_empty() {
        for vendor in &VENDOR_ENV {
            let Some(api_key) = lookup(vendor.api_key) else {
                debug!("{} not set, skipping {}", vendor.api_key, vendor.kind);
                continue;
            };

            let mut source = SourceConfig::new(SourceId::new(vendor.kind.name())?, vendor.kind);
            source.api_key = Some(api_key);
            source.secret_key = vendor.secret_key.and_then(&lookup);
            source.base_url = lookup(vendor.base_url);
            settings.sources.push(source);
        }

        let yahoo = SourceKind::YahooFinance;
        settings
            .sources
            .push(SourceConfig::new(SourceId::new(yahoo.name())?, yahoo));

        info!(
            "Discovered {} source(s) from the environment",
            settings.sources.len()
        );
        return Ok(());
    }

    for source in &mut settings.sources {
        let Some(vendor) = VENDOR_ENV.iter().find(|v| v.kind == source.kind) else {
            continue;
        };

        if source.api_key.is_none() {
            source.api_key = lookup(vendor.api_key);
        }
        if source.secret_key.is_none() {
            source.secret_key = vendor.secret_key.and_then(&lookup);
        }
        if source.base_url.is_none() {
            source.base_url = lookup(vendor.base_url);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = env_map(pairs);
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        // An explicit path must exist
        assert!(read_settings(Some(&missing), Some(HashMap::new())).is_err());

        let settings = read_settings(None, Some(HashMap::new())).unwrap();
        assert_eq!(settings.polling.interval_ms, 1000);
        assert_eq!(settings.detection.threshold, 0.005);
        assert!(settings.sources.is_empty());
    }

    #[test]
    fn test_file_and_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        fs::write(
            &path,
            r#"
[polling]
interval_ms = 2500
symbols = ["AAPL", "NVDA"]

[detection]
threshold = 0.01

[[sources]]
name = "yahoo"
kind = "yahoo_finance"

[[sources]]
name = "alpaca"
kind = "alpaca"
rate_limit_per_minute = 100
"#,
        )
        .unwrap();

        let overrides = env_map(&[
            ("ARB__DETECTION__THRESHOLD", "0.02"),
            ("ARB__PERSISTENCE__ENABLED", "false"),
        ]);
        let settings = read_settings(Some(&path), Some(overrides)).unwrap();

        assert_eq!(settings.polling.interval_ms, 2500);
        assert_eq!(settings.polling.symbols.len(), 2);
        assert_eq!(settings.detection.threshold, 0.02);
        assert!(!settings.persistence.enabled);
        assert_eq!(settings.sources.len(), 2);
        assert_eq!(settings.sources[1].kind, SourceKind::Alpaca);
        assert_eq!(settings.sources[1].rate_limit(), 100);
        // Untouched sections keep their defaults
        assert_eq!(settings.polling.max_consecutive_failures, 5);
    }

    #[test]
    fn test_env_symbol_list() {
        let overrides = env_map(&[("ARB__POLLING__SYMBOLS", "AAPL,MSFT,AMZN")]);
        let settings = read_settings(None, Some(overrides)).unwrap();

        let symbols: Vec<&str> = settings.polling.symbols.iter().map(|s| s.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT", "AMZN"]);
    }

    #[test]
    fn test_discovers_sources_from_credentials() {
        let mut settings = BotConfig::default();
        resolve_sources(
            &mut settings,
            lookup_from(&[
                ("ALPACA_API_KEY", "key"),
                ("ALPACA_SECRET_KEY", "secret"),
                ("FINNHUB_API_KEY", "token"),
                ("FINNHUB_BASE_URL", "http://localhost:9000"),
            ]),
        )
        .unwrap();

        let kinds: Vec<SourceKind> = settings.sources.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![SourceKind::Alpaca, SourceKind::Finnhub, SourceKind::YahooFinance]
        );
        assert_eq!(settings.sources[0].secret_key.as_deref(), Some("secret"));
        assert_eq!(settings.sources[1].base_url(), "http://localhost:9000");
        assert!(settings.sources.iter().all(|s| s.has_credentials()));
    }

    #[test]
    fn test_no_credentials_leaves_yahoo_only() {
        let mut settings = BotConfig::default();
        resolve_sources(&mut settings, lookup_from(&[])).unwrap();

        assert_eq!(settings.sources.len(), 1);
        assert_eq!(settings.sources[0].kind, SourceKind::YahooFinance);
        assert_eq!(settings.enabled_sources().count(), 1);
    }

    #[test]
    fn test_fills_configured_sources_without_overwriting() {
        let mut settings = BotConfig::default();
        let mut polygon = SourceConfig::new(SourceId::new("polygon").unwrap(), SourceKind::Polygon);
        polygon.api_key = Some("from-file".to_string());
        let alpaca = SourceConfig::new(SourceId::new("alpaca-paper").unwrap(), SourceKind::Alpaca);
        settings.sources = vec![polygon, alpaca];

        resolve_sources(
            &mut settings,
            lookup_from(&[
                ("POLYGON_API_KEY", "from-env"),
                ("ALPACA_API_KEY", "alpaca-key"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.sources.len(), 2);
        assert_eq!(settings.sources[0].api_key.as_deref(), Some("from-file"));
        assert_eq!(settings.sources[1].api_key.as_deref(), Some("alpaca-key"));
        assert!(settings.sources[1].secret_key.is_none());
    }
}
