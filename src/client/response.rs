use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

use crate::error::EtlError;

// ── Envelope ──────────────────────────────────────────────────────────────────

/// TwelveData wraps every series in the same envelope. Errors usually arrive
/// as HTTP 200 bodies carrying `code`/`message`/`status: "error"` instead of
/// a non-2xx status, so the envelope models both shapes.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub meta: Option<Meta>,
    pub values: Option<Vec<T>>,
    pub status: Option<String>,
    pub code: Option<u16>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Meta {
    pub symbol: Option<String>,
    pub interval: Option<String>,
}

/// `time_series` row; every numeric field is encoded as a JSON string.
#[derive(Debug, Deserialize)]
pub struct PriceRow {
    pub datetime: Option<String>,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: Option<String>,
    pub volume: Option<String>,
}

/// Indicator row: `datetime` plus a single value key named after the
/// indicator itself (`adx`, `percent_b`, …).
#[derive(Debug, Deserialize)]
pub struct IndicatorRow {
    pub datetime: Option<String>,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

// ── Decoding ──────────────────────────────────────────────────────────────────

pub fn parse_envelope<T: DeserializeOwned>(
    body: &str,
    context: &str,
) -> Result<Envelope<T>, EtlError> {
    serde_json::from_str(body)
        .map_err(|e| EtlError::malformed(context, format!("invalid JSON: {e}")))
}

impl<T> Envelope<T> {
    /// Unwrap the `values` array, translating a provider error envelope into
    /// the matching failure class first.
    pub fn into_rows(self, context: &str) -> Result<Vec<T>, EtlError> {
        let is_error =
            self.status.as_deref() == Some("error") || self.code.is_some_and(|c| c != 200);

        if is_error {
            let code = self.code.unwrap_or(0);
            let message = format!(
                "{}: {}",
                context,
                self.message.as_deref().unwrap_or("no message")
            );
            return Err(match code {
                401 | 403 => EtlError::Authentication(message),
                429 => EtlError::RateLimit(message),
                _ => EtlError::Provider { code, message },
            });
        }

        self.values
            .ok_or_else(|| EtlError::malformed(context, "missing \"values\" field"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(body: &str) -> Result<Vec<PriceRow>, EtlError> {
        parse_envelope::<PriceRow>(body, "SPY/time_series")?.into_rows("SPY/time_series")
    }

    #[test]
    fn ok_envelope_yields_rows() {
        let body = r#"{
            "meta": {"symbol": "SPY", "interval": "1h"},
            "values": [
                {"datetime": "2025-06-02 15:30:00", "open": "528.10", "high": "529.00",
                 "low": "527.55", "close": "528.74", "volume": "1203440"}
            ],
            "status": "ok"
        }"#;
        let values = rows(body).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].close.as_deref(), Some("528.74"));
    }

    #[test]
    fn error_envelope_401_maps_to_authentication() {
        let body = r#"{"code": 401, "message": "apikey is invalid", "status": "error"}"#;
        assert!(matches!(rows(body), Err(EtlError::Authentication(_))));
    }

    #[test]
    fn error_envelope_429_maps_to_rate_limit() {
        let body =
            r#"{"code": 429, "message": "API credits run out for the day", "status": "error"}"#;
        assert!(matches!(rows(body), Err(EtlError::RateLimit(_))));
    }

    #[test]
    fn other_error_codes_map_to_provider() {
        let body = r#"{"code": 400, "message": "symbol not found", "status": "error"}"#;
        match rows(body) {
            Err(EtlError::Provider { code, .. }) => assert_eq!(code, 400),
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn missing_values_is_malformed() {
        let body = r#"{"meta": {"symbol": "SPY", "interval": "1h"}, "status": "ok"}"#;
        assert!(matches!(
            rows(body),
            Err(EtlError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            rows("<html>bad gateway</html>"),
            Err(EtlError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn indicator_row_exposes_dynamic_value_key() {
        let body = r#"{
            "meta": {"symbol": "SPY", "interval": "1h"},
            "values": [{"datetime": "2025-06-02 15:30:00", "percent_b": "0.63"}],
            "status": "ok"
        }"#;
        let values = parse_envelope::<IndicatorRow>(body, "SPY/percent_b")
            .unwrap()
            .into_rows("SPY/percent_b")
            .unwrap();
        assert_eq!(
            values[0].fields.get("percent_b").and_then(|v| v.as_str()),
            Some("0.63")
        );
    }
}
