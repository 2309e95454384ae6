use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use tracing::info;

use crate::error::EtlError;
use crate::models::Bar;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS bars (
    symbol      VARCHAR   NOT NULL,
    ts          TIMESTAMP NOT NULL,
    open        DOUBLE,
    high        DOUBLE,
    low         DOUBLE,
    close       DOUBLE,
    volume      BIGINT,
    adx         DOUBLE,
    percent_b   DOUBLE,
    rsi         DOUBLE,
    ema         DOUBLE,
    fetched_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (symbol, ts)
);

CREATE TABLE IF NOT EXISTS etl_runs (
    id                  INTEGER PRIMARY KEY,
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    tickers_processed   INTEGER DEFAULT 0,
    bars_upserted       INTEGER DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_bars_ts     ON bars (ts);
CREATE INDEX IF NOT EXISTS idx_bars_symbol ON bars (symbol);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// First-run DDL bootstrap; a no-op when the tables already exist.
    pub fn ensure_schema(&self) -> Result<()> {
        info!("Ensuring schema…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn
            .execute_batch(INDEXES)
            .context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    // ── Bars ──────────────────────────────────────────────────────────────────

    /// Upsert bars: idempotent, safe to re-run over the same window. Every
    /// value column merges with COALESCE, so an incoming NULL never clobbers
    /// a value a previous run stored; a sparse row fills in as the remaining
    /// series land.
    pub fn upsert_bars(&self, bars: &[Bar]) -> Result<usize, EtlError> {
        if bars.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO bars
                (symbol, ts, open, high, low, close, volume,
                 adx, percent_b, rsi, ema, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (symbol, ts) DO UPDATE SET
                open       = COALESCE(excluded.open,      bars.open),
                high       = COALESCE(excluded.high,      bars.high),
                low        = COALESCE(excluded.low,       bars.low),
                close      = COALESCE(excluded.close,     bars.close),
                volume     = COALESCE(excluded.volume,    bars.volume),
                adx        = COALESCE(excluded.adx,       bars.adx),
                percent_b  = COALESCE(excluded.percent_b, bars.percent_b),
                rsi        = COALESCE(excluded.rsi,       bars.rsi),
                ema        = COALESCE(excluded.ema,       bars.ema),
                fetched_at = excluded.fetched_at
        "#;

        for bar in bars {
            tx.execute(
                sql,
                params![
                    bar.symbol,
                    bar.ts,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.adx,
                    bar.percent_b,
                    bar.rsi,
                    bar.ema,
                    bar.fetched_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(bars.len())
    }

    pub fn bar_at(&self, symbol: &str, ts: NaiveDateTime) -> Result<Option<Bar>, EtlError> {
        let mut stmt = self.conn.prepare(
            "SELECT symbol, ts, open, high, low, close, volume,
                    adx, percent_b, rsi, ema, fetched_at
             FROM bars WHERE symbol = ? AND ts = ?",
        )?;
        let mut rows = stmt.query_map(params![symbol, ts], |r| {
            Ok(Bar {
                symbol: r.get(0)?,
                ts: r.get(1)?,
                open: r.get(2)?,
                high: r.get(3)?,
                low: r.get(4)?,
                close: r.get(5)?,
                volume: r.get(6)?,
                adx: r.get(7)?,
                percent_b: r.get(8)?,
                rsi: r.get(9)?,
                ema: r.get(10)?,
                fetched_at: r.get(11)?,
            })
        })?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list_symbols(&self) -> Result<Vec<String>, EtlError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT symbol FROM bars ORDER BY symbol")?;
        let syms: Vec<String> = stmt
            .query_map([], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(syms)
    }

    pub fn bar_count(&self) -> Result<i64, EtlError> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM bars")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn ticker_count(&self) -> Result<i64, EtlError> {
        let mut s = self.conn.prepare("SELECT COUNT(DISTINCT symbol) FROM bars")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn ts_range(&self) -> Result<(Option<NaiveDateTime>, Option<NaiveDateTime>), EtlError> {
        let mut s = self.conn.prepare("SELECT MIN(ts), MAX(ts) FROM bars")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Run log ───────────────────────────────────────────────────────────────

    pub fn begin_run(&self) -> Result<i64, EtlError> {
        // DuckDB has no last_insert_rowid; allocate the id up front.
        let id: i64 = self
            .conn
            .query_row(
                "SELECT CAST(COALESCE(MAX(id), 0) + 1 AS BIGINT) FROM etl_runs",
                [],
                |r| r.get(0),
            )?;
        self.conn.execute(
            "INSERT INTO etl_runs (id, started_at, status) VALUES (?, ?, 'running')",
            params![id, Utc::now().naive_utc()],
        )?;
        Ok(id)
    }

    pub fn finish_run(
        &self,
        run_id: i64,
        tickers: usize,
        bars: usize,
        error: Option<&str>,
    ) -> Result<(), EtlError> {
        self.conn.execute(
            r#"UPDATE etl_runs SET
               finished_at = ?, status = ?,
               tickers_processed = ?, bars_upserted = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                tickers as i64,
                bars as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.ensure_schema().unwrap();
        repo
    }

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(hour, 30, 0)
            .unwrap()
    }

    fn close_only(symbol: &str, hour: u32, close: f64) -> Bar {
        let mut bar = Bar::empty(symbol, ts(hour), ts(20));
        bar.close = Some(close);
        bar
    }

    #[test]
    fn ensure_schema_is_rerunnable() {
        let repo = repo();
        repo.ensure_schema().unwrap();
        assert_eq!(repo.bar_count().unwrap(), 0);
    }

    #[test]
    fn upsert_is_idempotent() {
        let repo = repo();
        let bars = vec![close_only("SPY", 14, 1.5), close_only("SPY", 15, 2.0)];
        repo.upsert_bars(&bars).unwrap();
        repo.upsert_bars(&bars).unwrap();
        assert_eq!(repo.bar_count().unwrap(), 2);
    }

    #[test]
    fn null_never_overwrites_a_stored_value() {
        let repo = repo();
        repo.upsert_bars(&[close_only("SPY", 15, 528.74)]).unwrap();

        // Same key, different series: only rsi set.
        let mut rsi_bar = Bar::empty("SPY", ts(15), ts(21));
        rsi_bar.rsi = Some(55.41);
        repo.upsert_bars(&[rsi_bar]).unwrap();

        let stored = repo.bar_at("SPY", ts(15)).unwrap().unwrap();
        assert_eq!(stored.close, Some(528.74));
        assert_eq!(stored.rsi, Some(55.41));
        assert_eq!(stored.adx, None);
    }

    #[test]
    fn incoming_value_overwrites_a_stored_value() {
        let repo = repo();
        repo.upsert_bars(&[close_only("SPY", 15, 528.74)]).unwrap();
        repo.upsert_bars(&[close_only("SPY", 15, 529.10)]).unwrap();

        let stored = repo.bar_at("SPY", ts(15)).unwrap().unwrap();
        assert_eq!(stored.close, Some(529.10));
        assert_eq!(repo.bar_count().unwrap(), 1);
    }

    #[test]
    fn symbols_and_range_reads() {
        let repo = repo();
        repo.upsert_bars(&[
            close_only("QQQ", 15, 1.0),
            close_only("SPY", 14, 2.0),
            close_only("SPY", 16, 3.0),
        ])
        .unwrap();

        assert_eq!(repo.list_symbols().unwrap(), vec!["QQQ", "SPY"]);
        assert_eq!(repo.ticker_count().unwrap(), 2);
        assert_eq!(repo.ts_range().unwrap(), (Some(ts(14)), Some(ts(16))));
    }

    #[test]
    fn bar_at_misses_return_none() {
        let repo = repo();
        assert!(repo.bar_at("SPY", ts(15)).unwrap().is_none());
    }

    #[test]
    fn run_log_records_outcome() {
        let repo = repo();
        let id = repo.begin_run().unwrap();
        repo.finish_run(id, 8, 192, None).unwrap();

        let status: String = repo
            .conn
            .query_row("SELECT status FROM etl_runs WHERE id = ?", params![id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(status, "success");

        let id2 = repo.begin_run().unwrap();
        assert_eq!(id2, id + 1);
    }
}
