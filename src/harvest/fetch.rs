use crate::harvest::config::HttpConfig;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Retrieval failures, split so callers can tell "worth retrying later"
/// from "this URL will never work".
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient fetch failure for {url}: {detail}")]
    Transient { url: String, detail: String },
    #[error("permanent fetch failure for {url}: {detail}")]
    Permanent { url: String, detail: String },
}

/// Validators observed without downloading a body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

impl RemoteValidators {
    pub fn from_response(resp: &Response) -> Self {
        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(ToOwned::to_owned)
        };
        Self {
            etag: header("etag"),
            last_modified: header("last-modified"),
            content_length: header("content-length").and_then(|v| v.parse().ok()),
        }
    }

    /// True when at least one change-detection header is present.
    pub fn usable(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Blocking HTTP client with bounded exponential-backoff retries and a
/// polite delay after every completed request.
pub struct HttpClient {
    client: Client,
    cfg: HttpConfig,
}

impl HttpClient {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            cfg: cfg.clone(),
        })
    }

    fn polite_delay(&self) {
        if self.cfg.polite_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.cfg.polite_delay_ms));
        }
    }

    fn send_with_retry(
        &self,
        url: &str,
        send: impl Fn() -> reqwest::Result<Response>,
    ) -> Result<Response, FetchError> {
        let mut backoff = Duration::from_millis(self.cfg.backoff_initial_ms);
        let attempts = self.cfg.max_attempts.max(1);

        for attempt in 1..=attempts {
            let outcome = match send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        self.polite_delay();
                        return Ok(resp);
                    }
                    if status.is_client_error() && !retryable_status(status) {
                        return Err(FetchError::Permanent {
                            url: url.to_string(),
                            detail: format!("http status {status}"),
                        });
                    }
                    format!("http status {status}")
                }
                // Transport-level failures (timeouts, refused connections,
                // resets) are all transient.
                Err(err) => err.to_string(),
            };

            if attempt == attempts {
                return Err(FetchError::Transient {
                    url: url.to_string(),
                    detail: format!("{outcome} (after {attempts} attempts)"),
                });
            }
            warn!("GET retry {attempt} for {url}: {outcome}");
            thread::sleep(backoff);
            backoff = backoff.saturating_mul(2);
        }
        unreachable!("retry loop returns on last attempt");
    }

    /// GET with retries; the returned response body has not been consumed,
    /// so the caller can stream it.
    pub fn get(&self, url: &str) -> Result<Response, FetchError> {
        self.send_with_retry(url, || self.client.get(url).send())
    }

    pub fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.get(url)?;
        resp.text().map_err(|err| FetchError::Transient {
            url: url.to_string(),
            detail: format!("failed to read body: {err}"),
        })
    }

    /// Best-effort HEAD probe for validators. Any failure is reported as
    /// `None`: a cache miss must never block progress, the caller just
    /// falls through to a full download.
    pub fn head_validators(&self, url: &str) -> Option<RemoteValidators> {
        match self.send_with_retry(url, || self.client.head(url).send()) {
            Ok(resp) => Some(RemoteValidators::from_response(&resp)),
            Err(err) => {
                debug!("validator probe failed for {url}: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::retryable_status;
    use reqwest::StatusCode;

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable_status(StatusCode::BAD_GATEWAY));
        assert!(retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn other_client_errors_are_not_retryable() {
        assert!(!retryable_status(StatusCode::NOT_FOUND));
        assert!(!retryable_status(StatusCode::FORBIDDEN));
    }
}
