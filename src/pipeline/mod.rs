//! Pipeline driver: ties the API client → transform → storage together.
//!
//! One `run()` is one complete pass over the configured tickers, strictly
//! sequential: for each ticker the price series is fetched first, then each
//! indicator in turn, everything is outer-joined on timestamp and upserted.
//! Idempotent: re-running the same window changes nothing but `fetched_at`
//! (ON CONFLICT DO UPDATE with NULL-preserving column merges).
//!
//! Failure policy (nothing is retried):
//!   * `Authentication` / `RateLimit` abort the whole run; every later
//!     request would fail the same way.
//!   * Any other error aborts the remaining series for the current ticker;
//!     the series already fetched are still merged and loaded, and the run
//!     continues with the next ticker.

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::client::{SeriesSource, TwelveDataClient};
use crate::config::AppConfig;
use crate::error::EtlError;
use crate::models::{Indicator, IndicatorPoint};
use crate::storage::Repository;
use crate::transform::merge_series;

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<RunStats> {
        let repo = Repository::open(&self.config.storage.db_path)?;
        if self.config.storage.ensure_schema {
            repo.ensure_schema()?;
        }

        let client = TwelveDataClient::new(&self.config.api)?;
        self.run_with(&client, &repo).await
    }

    pub(crate) async fn run_with<S: SeriesSource>(
        &self,
        source: &S,
        repo: &Repository,
    ) -> Result<RunStats> {
        let tickers = &self.config.pipeline.tickers;
        let series_per_ticker = self.config.pipeline.indicators.len() + 1;
        info!(
            "=== Fetching {} series for {} tickers ===",
            series_per_ticker,
            tickers.len()
        );

        let run_id = repo.begin_run().unwrap_or(0);
        let mut stats = RunStats::default();
        let mut fatal: Option<EtlError> = None;

        for symbol in tickers {
            match self.process_ticker(source, repo, symbol).await {
                Ok(upserted) => {
                    stats.bars_upserted += upserted;
                    info!("{}: {} bars upserted", symbol, upserted);
                }
                Err(e) if e.is_fatal() => {
                    error!("{}: {}; aborting run", symbol, e);
                    stats.errors += 1;
                    fatal = Some(e);
                    break;
                }
                Err(e) => {
                    warn!("{}: {}", symbol, e);
                    stats.errors += 1;
                }
            }
            stats.tickers_processed += 1;
        }

        let error_msg = (stats.errors > 0).then(|| format!("{} errors", stats.errors));
        repo.finish_run(
            run_id,
            stats.tickers_processed,
            stats.bars_upserted,
            error_msg.as_deref(),
        )
        .ok();

        let (min_ts, max_ts) = repo.ts_range().unwrap_or((None, None));
        info!(
            "=== Done: {} tickers | {} bars | {} errors | store range: {:?} → {:?} ===",
            stats.tickers_processed, stats.bars_upserted, stats.errors, min_ts, max_ts,
        );

        match fatal {
            Some(e) => Err(e.into()),
            None => Ok(stats),
        }
    }

    /// Fetch every series for one ticker, merge, load. On a series failure
    /// the remaining series are skipped, but whatever was already fetched is
    /// still merged and upserted; the NULL-preserving upsert lets a later
    /// run complete the sparse rows.
    async fn process_ticker<S: SeriesSource>(
        &self,
        source: &S,
        repo: &Repository,
        symbol: &str,
    ) -> Result<usize, EtlError> {
        let price = source.fetch_price_series(symbol).await?;

        let mut indicators: Vec<(Indicator, Vec<IndicatorPoint>)> = Vec::new();
        let mut failed: Option<EtlError> = None;

        for indicator in &self.config.pipeline.indicators {
            match source.fetch_indicator(symbol, *indicator).await {
                Ok(points) => indicators.push((*indicator, points)),
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }

        let bars = merge_series(symbol, &price, &indicators, Utc::now().naive_utc());
        let upserted = repo.upsert_bars(&bars)?;

        match failed {
            Some(e) => Err(e),
            None => Ok(upserted),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunStats {
    pub tickers_processed: usize,
    pub bars_upserted: usize,
    pub errors: usize,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
