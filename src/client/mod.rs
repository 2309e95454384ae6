pub mod http;
pub mod response;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::EtlError;
use crate::models::{Indicator, IndicatorPoint, PricePoint};
use crate::transform;

use self::http::HttpClient;
use self::response::{Envelope, IndicatorRow, PriceRow, parse_envelope};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable series source abstraction.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch_price_series(&self, symbol: &str) -> Result<Vec<PricePoint>, EtlError>;
    async fn fetch_indicator(
        &self,
        symbol: &str,
        indicator: Indicator,
    ) -> Result<Vec<IndicatorPoint>, EtlError>;
}

// ── TwelveData client ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TwelveDataClient {
    http: HttpClient,
    base_url: Url,
    api_key: String,
    interval: String,
    outputsize: u32,
}

impl TwelveDataClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EtlError::Authentication(
                "no API key configured (set TWELVEDATA_API_KEY)".into(),
            )
            .into());
        }

        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base_url {:?}", config.base_url))?;

        Ok(Self {
            http: HttpClient::new(config).context("Failed to build HTTP client")?,
            base_url,
            api_key: config.api_key.clone(),
            interval: config.interval.clone(),
            outputsize: config.outputsize,
        })
    }

    /// URL for one series endpoint. The key rides as a query parameter, so
    /// callers log the `context` string, never the URL.
    fn series_url(&self, endpoint: &str, symbol: &str, time_period: Option<u32>) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(endpoint);
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("symbol", symbol)
                .append_pair("interval", &self.interval)
                .append_pair("outputsize", &self.outputsize.to_string())
                .append_pair("apikey", &self.api_key);
            if let Some(period) = time_period {
                pairs.append_pair("time_period", &period.to_string());
            }
        }
        url
    }
}

#[async_trait]
impl SeriesSource for TwelveDataClient {
    async fn fetch_price_series(&self, symbol: &str) -> Result<Vec<PricePoint>, EtlError> {
        let context = format!("{symbol}/time_series");
        let url = self.series_url("time_series", symbol, None);

        let body = self.http.get_text(&url, &context).await?;
        let envelope: Envelope<PriceRow> = parse_envelope(&body, &context)?;

        if let Some(meta) = &envelope.meta {
            debug!(
                "{}: meta symbol={:?} interval={:?}",
                context, meta.symbol, meta.interval
            );
        }

        let rows = envelope.into_rows(&context)?;
        transform::price_points(&context, &rows)
    }

    async fn fetch_indicator(
        &self,
        symbol: &str,
        indicator: Indicator,
    ) -> Result<Vec<IndicatorPoint>, EtlError> {
        let context = format!("{symbol}/{indicator}");
        let url = self.series_url(indicator.key(), symbol, Some(indicator.time_period()));

        let body = self.http.get_text(&url, &context).await?;
        let envelope: Envelope<IndicatorRow> = parse_envelope(&body, &context)?;
        let rows = envelope.into_rows(&context)?;
        transform::indicator_points(&context, indicator, &rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ApiConfig {
        ApiConfig {
            api_key: "demo-key".into(),
            ..crate::config::AppConfig::default().api
        }
    }

    #[test]
    fn series_url_carries_all_query_params() {
        let client = TwelveDataClient::new(&test_config()).unwrap();
        let url = client.series_url("rsi", "SPY", Some(14));

        assert_eq!(url.path(), "/rsi");
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(query.contains(&("symbol".into(), "SPY".into())));
        assert!(query.contains(&("interval".into(), "1h".into())));
        assert!(query.contains(&("outputsize".into(), "24".into())));
        assert!(query.contains(&("apikey".into(), "demo-key".into())));
        assert!(query.contains(&("time_period".into(), "14".into())));
    }

    #[test]
    fn price_series_url_has_no_time_period() {
        let client = TwelveDataClient::new(&test_config()).unwrap();
        let url = client.series_url("time_series", "GLD", None);
        assert!(url.query_pairs().all(|(k, _)| k != "time_period"));
    }

    #[test]
    fn missing_api_key_is_an_authentication_error() {
        let config = ApiConfig {
            api_key: "  ".into(),
            ..test_config()
        };
        let err = TwelveDataClient::new(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::Authentication(_))
        ));
    }
}
