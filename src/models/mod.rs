use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Indicators ────────────────────────────────────────────────────────────────

/// Technical indicators the provider computes server-side, each served by its
/// own endpoint and keyed by its own name in the response rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Adx,
    PercentB,
    Rsi,
    Ema,
}

impl Indicator {
    pub const ALL: [Indicator; 4] = [
        Indicator::Adx,
        Indicator::PercentB,
        Indicator::Rsi,
        Indicator::Ema,
    ];

    /// Endpoint path segment, which is also the value key in response rows.
    pub fn key(self) -> &'static str {
        match self {
            Indicator::Adx => "adx",
            Indicator::PercentB => "percent_b",
            Indicator::Rsi => "rsi",
            Indicator::Ema => "ema",
        }
    }

    /// Look-back window sent as `time_period`; the provider's own endpoint
    /// defaults.
    pub fn time_period(self) -> u32 {
        match self {
            Indicator::Adx | Indicator::Rsi => 14,
            Indicator::PercentB => 20,
            Indicator::Ema => 9,
        }
    }
}

impl std::fmt::Display for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

// ── Series points ─────────────────────────────────────────────────────────────

/// One row of the `time_series` endpoint, parsed and typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ts: NaiveDateTime,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
}

/// One row of an indicator endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub ts: NaiveDateTime,
    pub value: f64,
}

// ── Hourly bar ────────────────────────────────────────────────────────────────

/// One stored row: everything known about a ticker at one hourly timestamp.
/// Natural key is `(symbol, ts)`; every value column stays NULL until the
/// series that populates it has been fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub ts: NaiveDateTime,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
    pub adx: Option<f64>,
    pub percent_b: Option<f64>,
    pub rsi: Option<f64>,
    pub ema: Option<f64>,
    pub fetched_at: NaiveDateTime,
}

impl Bar {
    /// A bar with the key set and every value column NULL.
    pub fn empty(symbol: &str, ts: NaiveDateTime, fetched_at: NaiveDateTime) -> Self {
        Self {
            symbol: symbol.to_string(),
            ts,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            adx: None,
            percent_b: None,
            rsi: None,
            ema: None,
            fetched_at,
        }
    }

    /// Write an indicator value into its column.
    pub fn set_indicator(&mut self, indicator: Indicator, value: f64) {
        match indicator {
            Indicator::Adx => self.adx = Some(value),
            Indicator::PercentB => self.percent_b = Some(value),
            Indicator::Rsi => self.rsi = Some(value),
            Indicator::Ema => self.ema = Some(value),
        }
    }
}
