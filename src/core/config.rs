//! Configuration - Type-safe, validated config
//!
//! Loaded from `config.toml` (if present), then overridden from the
//! environment (a `.env` file is honoured). Passed explicitly into the
//! orchestrator and every worker; there is no global settings object.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,

    /// Trading settings
    pub trading: TradingConfig,

    /// Indicator strategy parameters
    pub strategy: StrategyConfig,

    /// Risk management
    pub risk: RiskConfig,

    /// Stage scheduling, timeouts and retries
    pub orchestrator: OrchestratorConfig,

    /// API credentials
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Run mode: paper or live
    pub mode: RunMode,

    /// Log level
    pub log_level: String,

    /// Directory for archived cycle records
    pub data_dir: Option<PathBuf>,

    /// Seed for the simulated feed and analysts
    pub sample_seed: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Paper,
            log_level: "info".to_string(),
            data_dir: None,
            sample_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Default subject symbol
    pub symbol: String,

    /// Exchange segment
    pub exchange: String,

    /// Base order quantity (shares)
    pub quantity: u64,

    /// Notional capital used for position sizing
    pub capital: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: "RELIANCE".to_string(),
            exchange: "NSE".to_string(),
            quantity: 1,
            capital: 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Max position as fraction of capital (0.02 = 2%)
    pub max_position_size: f64,

    /// Stop-loss distance as fraction of entry (0.05 = 5%)
    pub stop_loss_pct: f64,

    /// Risk scores above this are rejected outright (0-100)
    pub max_risk_score: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: 0.02,
            stop_loss_pct: 0.05,
            max_risk_score: 75.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Per-attempt worker timeout
    pub worker_timeout_ms: u64,

    /// Fixed slack added to every stage deadline
    pub stage_overhead_ms: u64,

    /// Attempts per worker, including the first
    pub max_attempts: u32,

    /// First retry delay
    pub backoff_base_ms: u64,

    /// Retry delay ceiling
    pub backoff_max_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_timeout_ms: 30_000,
            stage_overhead_ms: 2_000,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 2_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn stage_overhead(&self) -> Duration {
        Duration::from_millis(self.stage_overhead_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub broker_api_key: Option<String>,
    pub broker_api_secret: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
}

impl Config {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Check the usual locations, fall back to defaults, then apply the
    /// process environment on top.
    pub fn load_default() -> Result<Self> {
        dotenv::dotenv().ok();

        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml")),
        ];

        let mut config = candidates
            .iter()
            .find(|path| path.exists())
            .map(|path| {
                tracing::info!("📋 Loading config from {}", path.display());
                Self::load(path)
            })
            .transpose()?
            .unwrap_or_else(|| {
                tracing::debug!("No config.toml found, using defaults");
                Self::default()
            });

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, raw)))
        }

        if let Some(v) = lookup("TARGET_SYMBOL") {
            self.trading.symbol = v;
        }
        if let Some(v) = lookup("EXCHANGE") {
            self.trading.exchange = v;
        }
        if let Some(v) = lookup("QUANTITY") {
            self.trading.quantity = parse("QUANTITY", v)?;
        }
        if let Some(v) = lookup("RSI_PERIOD") {
            self.strategy.rsi_period = parse("RSI_PERIOD", v)?;
        }
        if let Some(v) = lookup("RSI_OVERBOUGHT") {
            self.strategy.rsi_overbought = parse("RSI_OVERBOUGHT", v)?;
        }
        if let Some(v) = lookup("RSI_OVERSOLD") {
            self.strategy.rsi_oversold = parse("RSI_OVERSOLD", v)?;
        }
        if let Some(v) = lookup("MAX_POSITION_SIZE") {
            self.risk.max_position_size = parse("MAX_POSITION_SIZE", v)?;
        }
        if let Some(v) = lookup("STOP_LOSS_PERCENT") {
            self.risk.stop_loss_pct = parse("STOP_LOSS_PERCENT", v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.app.log_level = v.to_lowercase();
        }
        if let Some(v) = lookup("SIMULATION_MODE") {
            self.app.mode = if v.trim().eq_ignore_ascii_case("false") {
                RunMode::Live
            } else {
                RunMode::Paper
            };
        }
        if let Some(v) = lookup("DATA_DIR") {
            self.app.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SAMPLE_SEED") {
            self.app.sample_seed = parse("SAMPLE_SEED", v)?;
        }
        if let Some(v) = lookup("WORKER_TIMEOUT_MS") {
            self.orchestrator.worker_timeout_ms = parse("WORKER_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("BROKER_API_KEY") {
            self.credentials.broker_api_key = Some(v);
        }
        if let Some(v) = lookup("BROKER_API_SECRET") {
            self.credentials.broker_api_secret = Some(v);
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.credentials.llm_api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            self.credentials.llm_model = Some(v);
        }
        Ok(())
    }

    /// Reject configurations the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.app.mode == RunMode::Live {
            let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
            if !present(&self.credentials.broker_api_key) {
                return Err(Error::Config("BROKER_API_KEY is required in live mode".into()));
            }
            if !present(&self.credentials.broker_api_secret) {
                return Err(Error::Config("BROKER_API_SECRET is required in live mode".into()));
            }
        }
        if self.trading.symbol.trim().is_empty() {
            return Err(Error::Config("trading.symbol must not be empty".into()));
        }
        if !(self.trading.capital.is_finite() && self.trading.capital > 0.0) {
            return Err(Error::Config("trading.capital must be a positive amount".into()));
        }
        if !(self.risk.max_position_size > 0.0 && self.risk.max_position_size <= 1.0) {
            return Err(Error::Config("risk.max_position_size must be in (0, 1]".into()));
        }
        if !(self.risk.stop_loss_pct > 0.0 && self.risk.stop_loss_pct < 1.0) {
            return Err(Error::Config("risk.stop_loss_pct must be in (0, 1)".into()));
        }
        if !(0.0..=100.0).contains(&self.risk.max_risk_score) {
            return Err(Error::Config("risk.max_risk_score must be in [0, 100]".into()));
        }
        if self.strategy.rsi_period < 2 {
            return Err(Error::Config("strategy.rsi_period must be at least 2".into()));
        }
        let oscillator = 0.0..=100.0;
        if !(oscillator.contains(&self.strategy.rsi_oversold)
            && oscillator.contains(&self.strategy.rsi_overbought)
            && self.strategy.rsi_oversold < self.strategy.rsi_overbought)
        {
            return Err(Error::Config(
                "strategy.rsi_oversold must be below strategy.rsi_overbought, both in [0, 100]".into(),
            ));
        }
        if self.orchestrator.max_attempts == 0 {
            return Err(Error::Config("orchestrator.max_attempts must be at least 1".into()));
        }
        if self.orchestrator.worker_timeout_ms == 0 {
            return Err(Error::Config("orchestrator.worker_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn is_simulation(&self) -> bool {
        self.app.mode == RunMode::Paper
    }
}
