//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (provider API keys) are referenced by env-var name in the config
//! and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use crate::types::MarketKind;

/// Upper bound on the bookmaker allow-list.
pub const MAX_ALLOWED_SOURCES: usize = 12;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub gates: GatesConfig,
    #[serde(default)]
    pub staking: StakingConfig,
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub estimates: EstimatesConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub ingest_interval_secs: u64,
    pub settle_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

/// Per-provider daily call limits.
#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    pub default_daily_limit: u32,
    #[serde(default)]
    pub limits: HashMap<String, u32>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_daily_limit: 10,
            limits: HashMap::new(),
        }
    }
}

impl BudgetConfig {
    pub fn limit_for(&self, provider: &str) -> u32 {
        self.limits
            .get(provider)
            .copied()
            .unwrap_or(self.default_daily_limit)
    }
}

/// Bookmaker allow-list. Empty means every source is accepted.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub allow_list: Vec<String>,
}

impl SourcesConfig {
    pub fn is_allowed(&self, source: &str) -> bool {
        self.allow_list.is_empty()
            || self
                .allow_list
                .iter()
                .any(|s| s.eq_ignore_ascii_case(source))
    }
}

/// Ingestion retry and dedup settings.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
    /// Identical quotes observed within this window are stored once.
    pub dedup_window_secs: i64,
    /// Quotes stamped further than this into the future are rejected.
    pub max_clock_skew_secs: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            request_timeout_secs: 15,
            dedup_window_secs: 300,
            max_clock_skew_secs: 120,
        }
    }
}

impl IngestConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Quality gate thresholds.
#[derive(Debug, Deserialize, Clone)]
pub struct GatesConfig {
    pub min_ev: f64,
    pub min_edge: f64,
    pub max_quote_age_hours: f64,
    pub max_stats_age_hours: f64,
    pub min_sample_size: u32,
    pub min_sources: usize,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            min_ev: 0.02,
            min_edge: 0.03,
            max_quote_age_hours: 6.0,
            max_stats_age_hours: 48.0,
            min_sample_size: 10,
            min_sources: 3,
        }
    }
}

/// Stake sizing.
#[derive(Debug, Deserialize, Clone)]
pub struct StakingConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub kelly_multiplier: f64,
    pub bankroll_units: f64,
    pub max_stake_units: f64,
    pub min_stake_units: f64,
    /// Record a pick for every BET decision.
    pub record_picks: bool,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            kelly_multiplier: 0.25,
            bankroll_units: 100.0,
            max_stake_units: 3.0,
            min_stake_units: 0.1,
            record_picks: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    /// IANA timezone for the budget day boundary and daily reporting.
    pub timezone: String,
}

impl SettlementConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid settlement timezone {}: {e}", self.timezone))
    }
}

/// One odds feed.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key_env: Option<String>,
    pub sports: Vec<String>,
    #[serde(default = "default_markets")]
    pub markets: Vec<MarketKind>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_markets() -> Vec<MarketKind> {
    MarketKind::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EstimatesConfig {
    /// JSON file of `ModelEstimate`s, re-read every cycle.
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.settlement.tz()?;

        if self.sources.allow_list.len() > MAX_ALLOWED_SOURCES {
            bail!(
                "Source allow-list has {} entries, maximum is {MAX_ALLOWED_SOURCES}",
                self.sources.allow_list.len()
            );
        }
        let k = self.staking.kelly_multiplier;
        if !(k > 0.0 && k <= 1.0) {
            bail!("kelly_multiplier must be in (0, 1], got {k}");
        }
        let gates = &self.gates;
        if !is_positive(gates.max_quote_age_hours) || !is_positive(gates.max_stats_age_hours) {
            bail!("Staleness limits must be positive");
        }
        if !gates.min_ev.is_finite() || !gates.min_edge.is_finite() {
            bail!("min_ev and min_edge must be finite numbers");
        }
        let staking = &self.staking;
        if !is_positive(staking.bankroll_units) || !is_positive(staking.max_stake_units) {
            bail!("bankroll_units and max_stake_units must be positive");
        }
        if !(staking.min_stake_units.is_finite() && staking.min_stake_units >= 0.0) {
            bail!("min_stake_units must be zero or positive");
        }
        if self.ingest.max_attempts == 0 {
            bail!("ingest.max_attempts must be at least 1");
        }
        if self.staking.min_stake_units > self.staking.max_stake_units {
            bail!("min_stake_units exceeds max_stake_units");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

/// Finite and strictly positive; NaN fails.
fn is_positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [agent]
        name = "SHARPLINE-TEST"
        ingest_interval_secs = 900
        settle_interval_secs = 1800

        [database]
        url = "sqlite::memory:"

        [settlement]
        timezone = "America/New_York"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.agent.name, "SHARPLINE-TEST");
        assert_eq!(cfg.budget.default_daily_limit, 10);
        assert_eq!(cfg.budget.limit_for("anything"), 10);
        assert_eq!(cfg.staking.kelly_multiplier, 0.25);
        assert_eq!(cfg.gates.min_sources, 3);
        assert!(cfg.providers.is_empty());
        assert!(!cfg.dashboard.enabled);
        assert_eq!(cfg.settlement.tz().unwrap(), chrono_tz::America::New_York);
    }

    #[test]
    fn test_per_provider_limits() {
        let toml = format!(
            "{MINIMAL}\n[budget]\ndefault_daily_limit = 5\n[budget.limits]\nodds_feed = 20\n"
        );
        let cfg = AppConfig::from_toml(&toml).unwrap();
        assert_eq!(cfg.budget.limit_for("odds_feed"), 20);
        assert_eq!(cfg.budget.limit_for("other"), 5);
    }

    #[test]
    fn test_allow_list_cap_enforced() {
        let books: Vec<String> = (0..=MAX_ALLOWED_SOURCES).map(|i| format!("\"b{i}\"")).collect();
        let toml = format!("{MINIMAL}\n[sources]\nallow_list = [{}]\n", books.join(", "));
        assert!(AppConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn test_allow_list_matching() {
        let sources = SourcesConfig {
            allow_list: vec!["pinnacle".into(), "draftkings".into()],
        };
        assert!(sources.is_allowed("Pinnacle"));
        assert!(!sources.is_allowed("fanduel"));
        assert!(SourcesConfig::default().is_allowed("anything"));
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let toml = MINIMAL.replace("America/New_York", "Mars/Olympus");
        assert!(AppConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn test_invalid_kelly_rejected() {
        let toml = format!("{MINIMAL}\n[staking]\nkelly_multiplier = 1.5\nbankroll_units = 100.0\nmax_stake_units = 3.0\nmin_stake_units = 0.1\nrecord_picks = true\n");
        assert!(AppConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn test_nan_thresholds_rejected() {
        let gates = |quote_age: &str, min_ev: &str| {
            format!("{MINIMAL}\n[gates]\nmin_ev = {min_ev}\nmin_edge = 0.03\nmax_quote_age_hours = {quote_age}\nmax_stats_age_hours = 48.0\nmin_sample_size = 10\nmin_sources = 3\n")
        };
        assert!(AppConfig::from_toml(&gates("6.0", "0.02")).is_ok());
        assert!(AppConfig::from_toml(&gates("nan", "0.02")).is_err());
        assert!(AppConfig::from_toml(&gates("inf", "0.02")).is_err());
        assert!(AppConfig::from_toml(&gates("6.0", "nan")).is_err());

        let staking = |kelly: &str, bankroll: &str| {
            format!("{MINIMAL}\n[staking]\nkelly_multiplier = {kelly}\nbankroll_units = {bankroll}\nmax_stake_units = 3.0\nmin_stake_units = 0.1\nrecord_picks = true\n")
        };
        assert!(AppConfig::from_toml(&staking("0.25", "100.0")).is_ok());
        assert!(AppConfig::from_toml(&staking("nan", "100.0")).is_err());
        assert!(AppConfig::from_toml(&staking("0.25", "nan")).is_err());
    }

    #[test]
    fn test_provider_section() {
        let toml = format!(
            "{MINIMAL}\n[[providers]]\nname = \"odds_feed\"\nbase_url = \"https://feed.example.com\"\napi_key_env = \"ODDS_API_KEY\"\nsports = [\"basketball_nba\"]\nmarkets = [\"spread\", \"total\"]\n"
        );
        let cfg = AppConfig::from_toml(&toml).unwrap();
        assert_eq!(cfg.providers.len(), 1);
        assert!(cfg.providers[0].enabled);
        assert_eq!(cfg.providers[0].markets, vec![MarketKind::Spread, MarketKind::Total]);
    }

    #[test]
    fn test_load_config_file() {
        // Requires config.toml in the working directory; skipped otherwise.
        if let Ok(cfg) = AppConfig::load("config.toml") {
            assert!(cfg.staking.kelly_multiplier > 0.0);
            assert!(cfg.staking.kelly_multiplier <= 1.0);
            assert!(cfg.settlement.tz().is_ok());
        }
    }
}
