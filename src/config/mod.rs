use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::Indicator;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

/// TwelveData API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Taken from `TD__API__API_KEY` or `TWELVEDATA_API_KEY`; never a CLI flag.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_interval")]
    pub interval: String,

    /// Number of bars requested per series call.
    #[serde(default = "default_outputsize")]
    pub outputsize: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Pacing between requests; the free tier allows 8 calls per minute.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub ensure_schema: bool,
}

/// Pipeline configuration. The ticker set and indicator list are static
/// configuration, not runtime flags.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_tickers")]
    pub tickers: Vec<String>,

    #[serde(default = "default_indicators")]
    pub indicators: Vec<Indicator>,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://api.twelvedata.com".to_string()
}
fn default_interval() -> String {
    "1h".to_string()
}
fn default_outputsize() -> u32 {
    24
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    7_500
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_user_agent() -> String {
    "twelvedata-etl/0.1 (hourly bars + technical indicators)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/market.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_tickers() -> Vec<String> {
    ["SPY", "XOM", "USDX", "VIXY", "GLD", "QQQ", "ARKK", "IBIT"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_indicators() -> Vec<Indicator> {
    Indicator::ALL.to_vec()
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("TD").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;

        if app_cfg.api.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var("TWELVEDATA_API_KEY") {
                app_cfg.api.api_key = key;
            }
        }

        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: default_base_url(),
                api_key: String::new(),
                interval: default_interval(),
                outputsize: default_outputsize(),
                timeout_secs: default_timeout_secs(),
                request_delay_ms: default_request_delay_ms(),
                jitter_ms: default_jitter_ms(),
                user_agent: default_user_agent(),
            },
            storage: StorageConfig {
                db_path: default_db_path(),
                ensure_schema: true,
            },
            pipeline: PipelineConfig {
                tickers: default_tickers(),
                indicators: default_indicators(),
            },
        }
    }
}
