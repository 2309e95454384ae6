use rand::RngExt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::EtlError;

/// Thin reqwest wrapper: explicit timeout, inter-request pacing, HTTP status
/// mapping. No retries: a failed request is surfaced, never replayed.
#[derive(Debug)]
pub struct HttpClient {
    inner: reqwest::Client,
    request_delay_ms: u64,
    jitter_ms: u64,
}

impl HttpClient {
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self {
            inner,
            request_delay_ms: config.request_delay_ms,
            jitter_ms: config.jitter_ms,
        })
    }

    /// Fetch a URL as text. `context` identifies the call in logs and errors;
    /// the URL itself is never logged because it carries the API key.
    pub async fn get_text(&self, url: &Url, context: &str) -> Result<String, EtlError> {
        self.pace().await;
        debug!("GET {}", context);

        let resp = self.inner.get(url.as_str()).send().await?;
        let status = resp.status();

        match status.as_u16() {
            401 | 403 => {
                return Err(EtlError::Authentication(format!("{context}: HTTP {status}")));
            }
            429 => {
                return Err(EtlError::RateLimit(format!("{context}: HTTP {status}")));
            }
            code if !status.is_success() => {
                return Err(EtlError::Provider {
                    code,
                    message: format!("{context}: HTTP {status}"),
                });
            }
            _ => {}
        }

        Ok(resp.text().await?)
    }

    /// Sleep for the configured delay + random jitter before each request.
    /// The provider quota is requests-per-minute; pacing keeps a full run
    /// under it without any retry machinery.
    async fn pace(&self) {
        if self.request_delay_ms == 0 {
            return;
        }
        let jitter = if self.jitter_ms > 0 {
            rand::rng().random_range(0..=self.jitter_ms)
        } else {
            0
        };
        sleep(Duration::from_millis(self.request_delay_ms + jitter)).await;
    }
}
