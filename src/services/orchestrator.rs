use crate::errors::ScanError;
use crate::models::state::ScanState;
use crate::services::ratelimit::RateLimitCoordinator;
use crate::services::scanner::ConfigScanner;
use crate::utils::observer::ScanObserver;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Anonymous requests have a far lower quota ceiling; smaller batches reduce
// the chance of burning it before the caller can react.
const AUTHENTICATED_BATCH: usize = 5;
const ANONYMOUS_BATCH: usize = 2;
const AUTHENTICATED_THROTTLE: Duration = Duration::from_millis(100);
const ANONYMOUS_THROTTLE: Duration = Duration::from_millis(500);

/// Why a `run` call handed the state back.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanStopReason {
    /// Every repository was scanned; the state is final.
    Complete,
    /// The cancellation flag was observed at a batch boundary. Clean stop,
    /// no error message recorded.
    Paused,
    /// Every credential is exhausted; resume after `reset`.
    RateLimited { reset: Option<DateTime<Utc>> },
    /// A batch failed hard; the state holds everything committed so far.
    Failed { message: String },
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub state: ScanState,
    pub reason: ScanStopReason,
}

impl ScanOutcome {
    pub fn is_partial(&self) -> bool {
        !matches!(self.reason, ScanStopReason::Complete)
    }
}

/// Drives the config scanner over the full repository set in
/// bounded-concurrency batches, committing the scan state after every batch.
/// Batches commit atomically: a failing batch returns before any of its
/// results are folded in, so the checkpoint never holds partial batches.
pub struct ScanOrchestrator {
    coordinator: Arc<RateLimitCoordinator>,
    scanner: ConfigScanner,
    observer: Arc<dyn ScanObserver>,
    cancel: Arc<AtomicBool>,
    authenticated_throttle: Duration,
    anonymous_throttle: Duration,
}

impl ScanOrchestrator {
    pub fn new(
        coordinator: Arc<RateLimitCoordinator>,
        scanner: ConfigScanner,
        observer: Arc<dyn ScanObserver>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            coordinator,
            scanner,
            observer,
            cancel,
            authenticated_throttle: AUTHENTICATED_THROTTLE,
            anonymous_throttle: ANONYMOUS_THROTTLE,
        }
    }

    /// Override the inter-batch throttle. Tests use this to avoid real
    /// sleeps; the rate-limit mechanism is unaffected.
    pub fn with_throttle(mut self, authenticated: Duration, anonymous: Duration) -> Self {
        self.authenticated_throttle = authenticated;
        self.anonymous_throttle = anonymous;
        self
    }

    /// Run the scan to completion, pause, or failure. The state is owned by
    /// this call until it is handed back in the outcome.
    pub async fn run(&self, mut state: ScanState) -> ScanOutcome {
        if state.is_complete {
            return ScanOutcome { state, reason: ScanStopReason::Complete };
        }

        let authenticated = self.coordinator.has_credentials().await;
        let batch_size = if authenticated { AUTHENTICATED_BATCH } else { ANONYMOUS_BATCH };
        let throttle =
            if authenticated { self.authenticated_throttle } else { self.anonymous_throttle };
        info!(
            "scanning {} pending repositories in batches of {} ({})",
            state.pending_count(),
            batch_size,
            if authenticated { "authenticated" } else { "anonymous" }
        );

        loop {
            if state.pending_ids.is_empty() {
                state.is_complete = true;
                info!(
                    "scan of '{}' complete: {} scanned, {} matched",
                    state.organization,
                    state.scanned_count(),
                    state.matched.len()
                );
                return ScanOutcome { state, reason: ScanStopReason::Complete };
            }

            if self.cancel.load(Ordering::SeqCst) {
                info!("pause requested; stopping at a batch boundary");
                return ScanOutcome { state, reason: ScanStopReason::Paused };
            }

            let batch = state.next_batch(batch_size);
            let results = join_all(
                batch.into_iter().map(|repo| self.scanner.scan(&self.coordinator, repo)),
            )
            .await;

            // Inspect the whole batch before touching the state so a
            // failure cannot leave a half-applied batch in the checkpoint.
            let mut completed = Vec::with_capacity(results.len());
            let mut failure = None;
            for result in results {
                match result {
                    Ok(repo) => completed.push(repo),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            if let Some(err) = failure {
                return ScanOutcome { reason: Self::classify_failure(&mut state, err), state };
            }

            let last_name = completed.last().map(|r| r.full_name.clone()).unwrap_or_default();
            for repo in completed {
                state.commit(repo);
            }
            self.observer.batch_committed(state.scanned_count(), &last_name, state.matched.len());

            if !state.pending_ids.is_empty() {
                tokio::time::sleep(throttle).await;
            }
        }
    }

    fn classify_failure(state: &mut ScanState, err: ScanError) -> ScanStopReason {
        match err {
            ScanError::RateLimited { reset } => {
                let message = match reset {
                    Some(reset) => format!("rate limit exceeded; quota resets at {}", reset),
                    None => "rate limit exceeded on all credentials".to_string(),
                };
                warn!("{}", message);
                state.last_error = Some(message);
                ScanStopReason::RateLimited { reset }
            }
            err @ (ScanError::Server { .. } | ScanError::Network { .. } | ScanError::Blocked(_)) => {
                let message = format!("network error: {}", err);
                warn!("{}", message);
                state.last_error = Some(message.clone());
                ScanStopReason::Failed { message }
            }
            other => {
                let message = other.to_string();
                warn!("scan aborted: {}", message);
                state.last_error = Some(message.clone());
                ScanStopReason::Failed { message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::repository::{MatchState, Repository};
    use crate::services::credentials::CredentialPool;
    use crate::services::transport::ResilientTransport;
    use crate::utils::observer::NoopObserver;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    const LFSCONFIG: &str = "[lfs]\n\turl = https://lfs.example.com/acme/big\n";

    fn repos_json(count: u64) -> String {
        let repos: Vec<String> = (1..=count)
            .map(|id| {
                format!(
                    r#"{{"id": {id}, "full_name": "acme/repo-{id}", "html_url": "https://github.com/acme/repo-{id}", "default_branch": "main", "size": 12, "pushed_at": "2024-05-01T12:00:00Z", "description": null}}"#
                )
            })
            .collect();
        format!("[{}]", repos.join(","))
    }

    fn state_for(count: u64) -> ScanState {
        let repos: Vec<Repository> = serde_json::from_str(&repos_json(count)).unwrap();
        ScanState::new("acme", None, repos)
    }

    fn orchestrator(
        server: &mockito::Server,
        tokens: Vec<&str>,
        cancel: Arc<AtomicBool>,
        observer: Arc<dyn ScanObserver>,
    ) -> ScanOrchestrator {
        let transport = ResilientTransport::new(observer.clone())
            .unwrap()
            .with_retry_schedule(2, vec![Duration::from_millis(1)]);
        let pool = CredentialPool::new(tokens.into_iter().map(String::from).collect());
        let coordinator = Arc::new(RateLimitCoordinator::new(transport, pool, observer.clone()));
        let scanner = ConfigScanner::new(server.url(), "lfs.example.com").unwrap();
        ScanOrchestrator::new(coordinator, scanner, observer, cancel)
            .with_throttle(Duration::ZERO, Duration::ZERO)
    }

    /// Tree mocks: repos 1..=3 carry a matching `.lfsconfig`; the rest have
    /// none. The catch-all regex deliberately excludes ids 1-3 so the mocks
    /// never overlap.
    async fn mock_org_trees(server: &mut mockito::Server) -> Vec<mockito::Mock> {
        let mut mocks = Vec::new();
        for id in 1..=3 {
            mocks.push(
                server
                    .mock("GET", format!("/repos/acme/repo-{}/git/trees/main", id).as_str())
                    .match_query(mockito::Matcher::Any)
                    .with_status(200)
                    .with_body(r#"{"tree": [{"path": ".lfsconfig", "type": "blob"}]}"#)
                    .create_async()
                    .await,
            );
            mocks.push(
                server
                    .mock("GET", format!("/repos/acme/repo-{}/contents/.lfsconfig", id).as_str())
                    .match_query(mockito::Matcher::Any)
                    .with_status(200)
                    .with_body(LFSCONFIG)
                    .create_async()
                    .await,
            );
        }
        mocks.push(
            server
                .mock(
                    "GET",
                    mockito::Matcher::Regex(
                        r"^/repos/acme/repo-(?:[4-9]|\d{2,})/git/trees/main".to_string(),
                    ),
                )
                .with_status(200)
                .with_body(r#"{"tree": [{"path": "README.md", "type": "blob"}]}"#)
                .create_async()
                .await,
        );
        mocks
    }

    struct CountingObserver {
        batches: Mutex<Vec<(usize, usize)>>,
    }

    impl ScanObserver for CountingObserver {
        fn batch_committed(&self, scanned: usize, _last_repo: &str, matched: usize) {
            self.batches.lock().unwrap().push((scanned, matched));
        }
    }

    fn assert_invariants(state: &ScanState) {
        let all: BTreeSet<u64> = state.repositories.iter().map(|r| r.id).collect();
        let union: BTreeSet<u64> = state.scanned_ids.union(&state.pending_ids).copied().collect();
        assert_eq!(union, all);
        assert!(state.scanned_ids.is_disjoint(&state.pending_ids));
        assert!(state.matched.iter().all(|m| state.scanned_ids.contains(&m.id)));
    }

    #[tokio::test]
    async fn full_scan_of_150_repositories_finds_3_matches() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_org_trees(&mut server).await;

        let observer = Arc::new(CountingObserver { batches: Mutex::new(Vec::new()) });
        let orchestrator =
            orchestrator(&server, vec!["tok"], Arc::new(AtomicBool::new(false)), observer.clone());
        let outcome = orchestrator.run(state_for(150)).await;

        assert!(!outcome.is_partial());
        assert_eq!(outcome.reason, ScanStopReason::Complete);
        assert!(outcome.state.is_complete);
        assert_eq!(outcome.state.scanned_count(), 150);
        assert_eq!(outcome.state.matched.len(), 3);
        assert_invariants(&outcome.state);

        // Authenticated batch size is 5: 30 commits, monotonically counting up.
        let batches = observer.batches.lock().unwrap();
        assert_eq!(batches.len(), 30);
        assert_eq!(batches.last(), Some(&(150, 3)));
    }

    #[tokio::test]
    async fn rate_limited_batch_returns_a_resumable_partial_state() {
        let mut server = mockito::Server::new_async().await;
        let _tree = server
            .mock("GET", mockito::Matcher::Regex(r"^/repos/acme/.*/git/trees/".to_string()))
            .with_status(403)
            .with_header("x-ratelimit-remaining", "0")
            .with_header("x-ratelimit-limit", "60")
            .with_header("x-ratelimit-reset", "1700000000")
            .create_async()
            .await;

        let orchestrator = orchestrator(
            &server,
            vec!["only"],
            Arc::new(AtomicBool::new(false)),
            Arc::new(NoopObserver),
        );
        let outcome = orchestrator.run(state_for(10)).await;

        assert!(outcome.is_partial());
        match outcome.reason {
            ScanStopReason::RateLimited { reset } => {
                assert_eq!(reset.unwrap().timestamp(), 1_700_000_000);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
        assert!(!outcome.state.pending_ids.is_empty());
        assert!(outcome.state.last_error.is_some());
        assert!(!outcome.state.is_complete);
        assert_invariants(&outcome.state);
    }

    #[tokio::test]
    async fn preset_cancel_flag_pauses_before_the_first_batch() {
        let server = mockito::Server::new_async().await;
        let orchestrator = orchestrator(
            &server,
            vec!["tok"],
            Arc::new(AtomicBool::new(true)),
            Arc::new(NoopObserver),
        );
        let outcome = orchestrator.run(state_for(6)).await;

        assert_eq!(outcome.reason, ScanStopReason::Paused);
        assert_eq!(outcome.state.scanned_count(), 0);
        assert_eq!(outcome.state.pending_count(), 6);
        // A pause is a clean stop, not an error.
        assert!(outcome.state.last_error.is_none());
        assert_invariants(&outcome.state);
    }

    struct PauseAfterFirstBatch {
        cancel: Arc<AtomicBool>,
        fired: AtomicBool,
    }

    impl ScanObserver for PauseAfterFirstBatch {
        fn batch_committed(&self, _scanned: usize, _last_repo: &str, _matched: usize) {
            // Only the first commit triggers the pause; the resumed run
            // must be allowed to finish.
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.cancel.store(true, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn pause_and_resume_matches_an_uninterrupted_scan() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_org_trees(&mut server).await;

        // Reference run, uninterrupted.
        let reference = orchestrator(
            &server,
            vec!["tok"],
            Arc::new(AtomicBool::new(false)),
            Arc::new(NoopObserver),
        )
        .run(state_for(12))
        .await;
        assert_eq!(reference.reason, ScanStopReason::Complete);

        // Interrupted run: pause right after the first batch commits.
        let cancel = Arc::new(AtomicBool::new(false));
        let pausing = orchestrator(
            &server,
            vec!["tok"],
            cancel.clone(),
            Arc::new(PauseAfterFirstBatch { cancel: cancel.clone(), fired: AtomicBool::new(false) }),
        );
        let paused = pausing.run(state_for(12)).await;
        assert_eq!(paused.reason, ScanStopReason::Paused);
        assert_eq!(paused.state.scanned_count(), 5);
        assert_invariants(&paused.state);

        // Round-trip the checkpoint like a real resume would.
        let restored = ScanState::from_json(&paused.state.to_json().unwrap()).unwrap();
        cancel.store(false, Ordering::SeqCst);
        let resumed = pausing.run(restored).await;

        assert_eq!(resumed.reason, ScanStopReason::Complete);
        assert_eq!(resumed.state.scanned_ids, reference.state.scanned_ids);
        let matched_ids =
            |s: &ScanState| s.matched.iter().map(|r| r.id).collect::<BTreeSet<u64>>();
        assert_eq!(matched_ids(&resumed.state), matched_ids(&reference.state));
        assert_invariants(&resumed.state);
    }

    #[tokio::test]
    async fn completed_state_is_returned_untouched() {
        let server = mockito::Server::new_async().await;
        let mut state = state_for(1);
        let repo = state.repositories[0].clone();
        state.commit(Repository { match_state: MatchState::NoMatch, ..repo });
        state.is_complete = true;

        let orchestrator = orchestrator(
            &server,
            vec![],
            Arc::new(AtomicBool::new(false)),
            Arc::new(NoopObserver),
        );
        let outcome = orchestrator.run(state).await;
        assert_eq!(outcome.reason, ScanStopReason::Complete);
        assert_eq!(outcome.state.scanned_count(), 1);
    }

    #[tokio::test]
    async fn anonymous_scans_use_smaller_batches() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_org_trees(&mut server).await;

        let observer = Arc::new(CountingObserver { batches: Mutex::new(Vec::new()) });
        let orchestrator =
            orchestrator(&server, vec![], Arc::new(AtomicBool::new(false)), observer.clone());
        let outcome = orchestrator.run(state_for(6)).await;

        assert_eq!(outcome.reason, ScanStopReason::Complete);
        let batches = observer.batches.lock().unwrap();
        assert_eq!(*batches, vec![(2, 2), (4, 3), (6, 3)]);
    }
}
