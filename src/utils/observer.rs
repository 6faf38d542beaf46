use crate::models::ratelimit::RateLimitSnapshot;
use crate::models::repository::Repository;

/// Progress callbacks exposed to the caller. All methods default to no-ops
/// so an observer only implements what it cares about. Events are delivered
/// in the order they are produced: page by page, batch by batch.
pub trait ScanObserver: Send + Sync {
    /// A repository page was fetched; `repos` is the accumulated list so far.
    fn page_fetched(&self, _repos: &[Repository], _page: u32) {}

    /// A quota snapshot was observed on a response (success or failure).
    fn rate_limit_observed(&self, _snapshot: &RateLimitSnapshot) {}

    /// The transport is about to retry after a transient failure.
    fn retry_attempted(&self, _attempt: u32, _max: u32, _message: &str) {}

    /// A batch committed; counters reflect the state after the commit.
    fn batch_committed(&self, _scanned: usize, _last_repo: &str, _matched: usize) {}
}

/// Observer that ignores everything.
#[cfg(test)]
pub struct NoopObserver;

#[cfg(test)]
impl ScanObserver for NoopObserver {}
