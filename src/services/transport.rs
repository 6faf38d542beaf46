use crate::errors::ScanError;
use crate::utils::observer::ScanObserver;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BACKOFF_SECS: [u64; 5] = [1, 2, 4, 8, 15];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Single-request HTTP layer with bounded retries. Retries 5xx responses,
/// timeouts, and other transient transport errors under an exponential
/// backoff schedule; a connect-level failure (DNS, TCP, TLS) is treated as
/// structurally blocked and fails immediately, since retrying cannot fix an
/// unreachable host.
pub struct ResilientTransport {
    client: reqwest::Client,
    max_attempts: u32,
    backoff: Vec<Duration>,
    observer: Arc<dyn ScanObserver>,
}

impl ResilientTransport {
    pub fn new(observer: Arc<dyn ScanObserver>) -> Result<Self, ScanError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("lfs-scout"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ScanError::Unknown(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF_SECS.iter().map(|s| Duration::from_secs(*s)).collect(),
            observer,
        })
    }

    /// Override the retry schedule. Tests use this to avoid real backoff
    /// sleeps; production code keeps the defaults.
    pub fn with_retry_schedule(mut self, max_attempts: u32, backoff: Vec<Duration>) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(idx).copied().unwrap_or(Duration::ZERO)
    }

    /// GET `url` with `extra_headers` merged over the defaults. Returns any
    /// response that is not a 5xx, including 4xx: status classification
    /// above the transport level is the caller's concern.
    pub async fn get(
        &self,
        url: &str,
        extra_headers: HeaderMap,
    ) -> Result<reqwest::Response, ScanError> {
        let mut last_status: Option<u16> = None;
        let mut last_message = String::new();

        for attempt in 0..self.max_attempts {
            debug!("GET {} (attempt {}/{})", url, attempt + 1, self.max_attempts);
            match self.client.get(url).headers(extra_headers.clone()).send().await {
                Ok(response) if response.status().is_server_error() => {
                    last_status = Some(response.status().as_u16());
                    last_message = format!("server error HTTP {}", response.status());
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() => {
                    return Err(ScanError::Blocked(e.to_string()));
                }
                Err(e) => {
                    // Timeouts and other transport hiccups both retry.
                    last_status = None;
                    last_message = if e.is_timeout() {
                        format!("request timed out: {}", e)
                    } else {
                        format!("transport error: {}", e)
                    };
                }
            }

            if attempt + 1 < self.max_attempts {
                let delay = self.backoff_for(attempt);
                warn!(
                    "{}; retrying in {:?} (attempt {}/{})",
                    last_message,
                    delay,
                    attempt + 1,
                    self.max_attempts
                );
                self.observer.retry_attempted(
                    attempt + 1,
                    self.max_attempts,
                    &format!("{}; retrying in {:?}", last_message, delay),
                );
                tokio::time::sleep(delay).await;
            }
        }

        match last_status {
            Some(status) => Err(ScanError::Server { status, attempts: self.max_attempts }),
            None => Err(ScanError::Network { message: last_message, attempts: self.max_attempts }),
        }
    }
}
