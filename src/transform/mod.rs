//! Response rows → typed points → merged bars.
//!
//! Field parsing is tolerant (an unparseable optional value becomes NULL),
//! but a row that cannot be keyed by timestamp poisons its whole series:
//! loading rows we cannot key would break the `(symbol, ts)` invariant.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, NaiveTime};
use tracing::warn;

use crate::client::response::{IndicatorRow, PriceRow};
use crate::error::EtlError;
use crate::models::{Bar, Indicator, IndicatorPoint, PricePoint};

// ── Field parsers ─────────────────────────────────────────────────────────────

/// Numeric fields arrive as JSON strings: "528.74" → 528.74.
pub fn parse_f64(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" {
        return None;
    }
    s.parse().ok()
}

/// Volume is integral but occasionally served with a decimal tail ("1203440.0").
pub fn parse_i64(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" {
        return None;
    }
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
}

/// Timestamps are exchange-local, `2025-06-02 15:30:00`. Daily endpoints drop
/// the time component, so a bare date maps to midnight.
pub fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ts);
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

fn json_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::String(s) => parse_f64(s),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

// ── Rows → points ─────────────────────────────────────────────────────────────

pub fn price_points(context: &str, rows: &[PriceRow]) -> Result<Vec<PricePoint>, EtlError> {
    rows.iter()
        .map(|row| {
            let raw_ts = row
                .datetime
                .as_deref()
                .ok_or_else(|| EtlError::malformed(context, "row missing \"datetime\""))?;
            let ts = parse_ts(raw_ts)
                .ok_or_else(|| EtlError::malformed(context, format!("bad datetime {raw_ts:?}")))?;

            let point = PricePoint {
                ts,
                open: row.open.as_deref().and_then(parse_f64),
                high: row.high.as_deref().and_then(parse_f64),
                low: row.low.as_deref().and_then(parse_f64),
                close: row.close.as_deref().and_then(parse_f64),
                volume: row.volume.as_deref().and_then(parse_i64),
            };

            if point.close.is_none() {
                warn!("{}: bar at {} has no close", context, ts);
            }

            Ok(point)
        })
        .collect()
}

/// An indicator row must carry its value under the indicator's own key; a row
/// without it (or with an unparseable value) makes the series malformed.
pub fn indicator_points(
    context: &str,
    indicator: Indicator,
    rows: &[IndicatorRow],
) -> Result<Vec<IndicatorPoint>, EtlError> {
    rows.iter()
        .map(|row| {
            let raw_ts = row
                .datetime
                .as_deref()
                .ok_or_else(|| EtlError::malformed(context, "row missing \"datetime\""))?;
            let ts = parse_ts(raw_ts)
                .ok_or_else(|| EtlError::malformed(context, format!("bad datetime {raw_ts:?}")))?;

            let value = row
                .fields
                .get(indicator.key())
                .and_then(json_f64)
                .ok_or_else(|| {
                    EtlError::malformed(context, format!("row missing {:?} value", indicator.key()))
                })?;

            Ok(IndicatorPoint { ts, value })
        })
        .collect()
}

// ── Merge ─────────────────────────────────────────────────────────────────────

/// Outer-join every fetched series on timestamp. A timestamp present in only
/// some series yields a bar with NULLs for the absent series.
pub fn merge_series(
    symbol: &str,
    price: &[PricePoint],
    indicators: &[(Indicator, Vec<IndicatorPoint>)],
    fetched_at: NaiveDateTime,
) -> Vec<Bar> {
    let mut by_ts: BTreeMap<NaiveDateTime, Bar> = BTreeMap::new();

    for p in price {
        let bar = by_ts
            .entry(p.ts)
            .or_insert_with(|| Bar::empty(symbol, p.ts, fetched_at));
        bar.open = p.open;
        bar.high = p.high;
        bar.low = p.low;
        bar.close = p.close;
        bar.volume = p.volume;
    }

    for (indicator, points) in indicators {
        for point in points {
            by_ts
                .entry(point.ts)
                .or_insert_with(|| Bar::empty(symbol, point.ts, fetched_at))
                .set_indicator(*indicator, point.value);
        }
    }

    by_ts.into_values().collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(hour, 30, 0)
            .unwrap()
    }

    fn price_row(datetime: &str, close: &str) -> PriceRow {
        PriceRow {
            datetime: Some(datetime.into()),
            open: Some("528.10".into()),
            high: Some("529.00".into()),
            low: Some("527.55".into()),
            close: Some(close.into()),
            volume: Some("1203440".into()),
        }
    }

    #[test]
    fn test_parse_f64() {
        assert_eq!(parse_f64("528.74"), Some(528.74));
        assert_eq!(parse_f64(" 0.63 "), Some(0.63));
        assert_eq!(parse_f64("N/A"), None);
        assert_eq!(parse_f64(""), None);
        assert_eq!(parse_f64("n/a%"), None);
    }

    #[test]
    fn test_parse_i64() {
        assert_eq!(parse_i64("1203440"), Some(1_203_440));
        assert_eq!(parse_i64("1203440.0"), Some(1_203_440));
        assert_eq!(parse_i64("N/A"), None);
    }

    #[test]
    fn test_parse_ts() {
        assert_eq!(parse_ts("2025-06-02 15:30:00"), Some(ts(15)));
        assert_eq!(
            parse_ts("2025-06-02"),
            Some(
                NaiveDate::from_ymd_opt(2025, 6, 2)
                    .unwrap()
                    .and_time(NaiveTime::MIN)
            )
        );
        assert_eq!(parse_ts("02/06/2025"), None);
    }

    #[test]
    fn price_points_parses_typed_fields() {
        let rows = vec![price_row("2025-06-02 15:30:00", "528.74")];
        let points = price_points("SPY/time_series", &rows).unwrap();
        assert_eq!(points[0].ts, ts(15));
        assert_eq!(points[0].close, Some(528.74));
        assert_eq!(points[0].volume, Some(1_203_440));
    }

    #[test]
    fn price_points_rejects_bad_datetime() {
        let rows = vec![price_row("not a time", "528.74")];
        assert!(matches!(
            price_points("SPY/time_series", &rows),
            Err(EtlError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn unparseable_value_fields_become_null() {
        let mut row = price_row("2025-06-02 15:30:00", "528.74");
        row.open = Some("N/A".into());
        row.volume = None;
        let points = price_points("SPY/time_series", &[row]).unwrap();
        assert_eq!(points[0].open, None);
        assert_eq!(points[0].volume, None);
        assert_eq!(points[0].close, Some(528.74));
    }

    #[test]
    fn indicator_points_reads_the_dynamic_key() {
        let row = IndicatorRow {
            datetime: Some("2025-06-02 15:30:00".into()),
            fields: [("rsi".to_string(), serde_json::json!("55.41"))]
                .into_iter()
                .collect(),
        };
        let points = indicator_points("SPY/rsi", Indicator::Rsi, &[row]).unwrap();
        assert_eq!(points[0].value, 55.41);
    }

    #[test]
    fn indicator_points_rejects_missing_value_key() {
        let row = IndicatorRow {
            datetime: Some("2025-06-02 15:30:00".into()),
            fields: [("adx".to_string(), serde_json::json!("21.0"))]
                .into_iter()
                .collect(),
        };
        // RSI requested, but the row only carries an ADX value.
        assert!(matches!(
            indicator_points("SPY/rsi", Indicator::Rsi, &[row]),
            Err(EtlError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn merge_outer_joins_on_timestamp() {
        let price = vec![
            PricePoint {
                ts: ts(14),
                open: Some(1.0),
                high: Some(2.0),
                low: Some(0.5),
                close: Some(1.5),
                volume: Some(100),
            },
            PricePoint {
                ts: ts(15),
                open: Some(1.5),
                high: Some(2.5),
                low: Some(1.0),
                close: Some(2.0),
                volume: Some(200),
            },
        ];
        let rsi = vec![
            IndicatorPoint { ts: ts(15), value: 55.0 },
            IndicatorPoint { ts: ts(16), value: 56.0 },
        ];

        let bars = merge_series("SPY", &price, &[(Indicator::Rsi, rsi)], ts(17));
        assert_eq!(bars.len(), 3);

        // 14:30 has price only
        assert_eq!(bars[0].close, Some(1.5));
        assert_eq!(bars[0].rsi, None);
        // 15:30 has both series
        assert_eq!(bars[1].close, Some(2.0));
        assert_eq!(bars[1].rsi, Some(55.0));
        // 16:30 has the indicator only
        assert_eq!(bars[2].close, None);
        assert_eq!(bars[2].rsi, Some(56.0));
        assert_eq!(bars[2].symbol, "SPY");
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert!(merge_series("SPY", &[], &[], ts(17)).is_empty());
    }
}
