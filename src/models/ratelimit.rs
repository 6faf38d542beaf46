use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::Deserialize;

/// Quota observed on one response for one credential. Ephemeral; only used
/// to decide rotation and to drive progress reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSnapshot {
    pub remaining: u64,
    pub limit: u64,
    pub reset: Option<DateTime<Utc>>,
}

impl RateLimitSnapshot {
    /// Parse the three x-ratelimit headers. Returns None when the response
    /// carries none of them (e.g. a proxy error page).
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let remaining = header_u64(headers, "x-ratelimit-remaining")?;
        let limit = header_u64(headers, "x-ratelimit-limit")?;
        let reset = header_u64(headers, "x-ratelimit-reset")
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());
        Some(Self { remaining, limit, reset })
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Shape of the `GET /rate_limit` response body.
#[derive(Debug, Deserialize)]
pub struct RateLimitBody {
    pub resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitResources {
    pub core: CoreLimit,
}

#[derive(Debug, Deserialize)]
pub struct CoreLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
}

/// Quota for one credential, tagged with the account it resolves to.
#[derive(Debug, Clone)]
pub struct CredentialQuota {
    pub login: Option<String>,
    pub snapshot: RateLimitSnapshot,
}

/// Read-only view across the whole pool. Totals deduplicate credentials
/// that resolve to the same account login, since those share one quota.
#[derive(Debug, Clone, Default)]
pub struct AggregateRateLimit {
    pub per_credential: Vec<CredentialQuota>,
    pub total_remaining: u64,
    pub total_limit: u64,
}

impl AggregateRateLimit {
    pub fn from_quotas(quotas: Vec<CredentialQuota>) -> Self {
        let mut seen_logins: Vec<&str> = Vec::new();
        let mut total_remaining = 0;
        let mut total_limit = 0;
        for quota in &quotas {
            if let Some(login) = quota.login.as_deref() {
                if seen_logins.contains(&login) {
                    continue;
                }
                seen_logins.push(login);
            }
            total_remaining += quota.snapshot.remaining;
            total_limit += quota.snapshot.limit;
        }
        Self { per_credential: quotas, total_remaining, total_limit }
    }
}
