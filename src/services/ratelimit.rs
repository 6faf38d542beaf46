use crate::errors::ScanError;
use crate::models::ratelimit::{
    AggregateRateLimit, CredentialQuota, RateLimitBody, RateLimitSnapshot,
};
use crate::services::credentials::CredentialPool;
use crate::services::transport::ResilientTransport;
use crate::utils::observer::ScanObserver;
use chrono::{TimeZone, Utc};
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Wraps the transport with credential handling: attaches the pool's
/// current bearer token, reports every observed quota snapshot, and on a
/// rate-limit rejection rotates through the pool before giving up.
pub struct RateLimitCoordinator {
    transport: ResilientTransport,
    pool: Mutex<CredentialPool>,
    observer: Arc<dyn ScanObserver>,
}

impl RateLimitCoordinator {
    pub fn new(
        transport: ResilientTransport,
        pool: CredentialPool,
        observer: Arc<dyn ScanObserver>,
    ) -> Self {
        Self { transport, pool: Mutex::new(pool), observer }
    }

    pub async fn has_credentials(&self) -> bool {
        !self.pool.lock().await.is_empty()
    }

    /// GET `url`, optionally overriding the Accept header (the raw content
    /// variant). Rotates credentials on 403-with-zero-remaining until every
    /// pool member has been tried for this logical request.
    pub async fn get(
        &self,
        url: &str,
        accept: Option<&'static str>,
    ) -> Result<reqwest::Response, ScanError> {
        loop {
            let mut headers = HeaderMap::new();
            if let Some(accept) = accept {
                headers.insert(ACCEPT, HeaderValue::from_static(accept));
            }
            if let Some(token) = self.pool.lock().await.current() {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ScanError::Unknown(format!("invalid credential: {}", e)))?;
                headers.insert(AUTHORIZATION, value);
            }

            let response = self.transport.get(url, headers).await?;

            let snapshot = RateLimitSnapshot::from_headers(response.headers());
            if let Some(snapshot) = &snapshot {
                self.observer.rate_limit_observed(snapshot);
            }

            let exhausted = response.status() == StatusCode::FORBIDDEN
                && snapshot.map(|s| s.is_exhausted()).unwrap_or(false);
            if exhausted {
                let reset = snapshot.and_then(|s| s.reset);
                let mut pool = self.pool.lock().await;
                pool.mark_current_tried();
                if pool.all_tried() {
                    pool.clear_tried();
                    return Err(ScanError::RateLimited { reset });
                }
                pool.rotate();
                info!("credential exhausted; rotating to the next one");
                continue;
            }

            self.pool.lock().await.clear_tried();
            return Ok(response);
        }
    }

    /// Query `/user` and `/rate_limit` for every credential in the pool and
    /// build the aggregate view. Credentials resolving to the same account
    /// share one quota and are not double-counted.
    pub async fn aggregate_view(&self, api_root: &str) -> AggregateRateLimit {
        #[derive(Deserialize)]
        struct User {
            login: String,
        }

        let tokens: Vec<String> = self.pool.lock().await.tokens().to_vec();
        let mut quotas = Vec::with_capacity(tokens.len());
        for token in tokens {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }

            let login = match self.transport.get(&format!("{}/user", api_root), headers.clone()).await
            {
                Ok(resp) if resp.status().is_success() => {
                    resp.json::<User>().await.ok().map(|u| u.login)
                }
                _ => None,
            };

            let snapshot = match self
                .transport
                .get(&format!("{}/rate_limit", api_root), headers)
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    match resp.json::<RateLimitBody>().await {
                        Ok(body) => RateLimitSnapshot {
                            remaining: body.resources.core.remaining,
                            limit: body.resources.core.limit,
                            reset: Utc.timestamp_opt(body.resources.core.reset, 0).single(),
                        },
                        Err(e) => {
                            debug!("unparseable /rate_limit body: {}", e);
                            continue;
                        }
                    }
                }
                _ => continue,
            };

            quotas.push(CredentialQuota { login, snapshot });
        }
        AggregateRateLimit::from_quotas(quotas)
    }
}
