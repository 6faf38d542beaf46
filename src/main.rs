use dotenv::dotenv;
use log::{error, info, warn};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod errors;
mod models;
mod services;
mod utils;

use models::ratelimit::RateLimitSnapshot;
use models::repository::Repository;
use models::state::ScanState;
use services::credentials::CredentialPool;
use services::lister::{api_root, RepoLister};
use services::orchestrator::{ScanOrchestrator, ScanStopReason};
use services::ratelimit::RateLimitCoordinator;
use services::scanner::ConfigScanner;
use services::transport::ResilientTransport;
use utils::observer::ScanObserver;
use utils::report::{checkpoint_file_name, matched_report_csv};

/// Progress surfaced straight to the log. The engine delivers events in
/// production order, so the log reads as a timeline of the scan.
struct LogObserver;

impl ScanObserver for LogObserver {
    fn page_fetched(&self, repos: &[Repository], page: u32) {
        info!("page {}: {} repositories discovered so far", page, repos.len());
    }

    fn rate_limit_observed(&self, snapshot: &RateLimitSnapshot) {
        if snapshot.remaining < 50 {
            warn!(
                "rate limit low: {}/{} remaining (resets {})",
                snapshot.remaining,
                snapshot.limit,
                snapshot.reset.map(|t| t.to_rfc3339()).unwrap_or_else(|| "unknown".to_string())
            );
        }
    }

    fn retry_attempted(&self, attempt: u32, max: u32, message: &str) {
        warn!("retry {}/{}: {}", attempt, max, message);
    }

    fn batch_committed(&self, scanned: usize, last_repo: &str, matched: usize) {
        info!("scanned {} (last: {}), {} matched", scanned, last_repo, matched);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let org = env::var("LFS_SCOUT_ORG").expect("LFS_SCOUT_ORG must be set");
    let marker = env::var("LFS_SCOUT_MARKER").expect("LFS_SCOUT_MARKER must be set");
    let host = env::var("LFS_SCOUT_HOST").ok();
    let tokens: Vec<String> = env::var("LFS_SCOUT_TOKENS")
        .map(|v| v.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    let resume_path = env::var("LFS_SCOUT_RESUME").ok();

    let observer: Arc<dyn ScanObserver> = Arc::new(LogObserver);
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; pausing after the current batch");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let root = api_root(host.as_deref());
    let pool = CredentialPool::new(tokens);
    info!("starting scan of '{}' with {} credential(s)", org, pool.len());

    let transport = ResilientTransport::new(observer.clone())?;
    let coordinator = Arc::new(RateLimitCoordinator::new(transport, pool, observer.clone()));

    let quota = coordinator.aggregate_view(&root).await;
    info!(
        "aggregate quota: {}/{} across {} credential(s)",
        quota.total_remaining,
        quota.total_limit,
        quota.per_credential.len()
    );

    // A resumed scan reuses the checkpoint's repository list; a fresh one
    // pages the full organization listing first.
    let resumed: Option<ScanState> = match resume_path {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            let state = ScanState::from_json(&text)?;
            info!(
                "resuming '{}': {} scanned, {} pending",
                state.organization,
                state.scanned_count(),
                state.pending_count()
            );
            Some(state)
        }
        None => None,
    };

    let lister = RepoLister::new(root.clone(), observer.clone());
    let state = match resumed {
        Some(state) => state,
        None => {
            let repos = lister.list(&coordinator, &org, None).await?;
            info!("organization '{}' has {} repositories", org, repos.len());
            ScanState::new(&org, host.as_deref(), repos)
        }
    };

    let scanner = ConfigScanner::new(root, &marker)?;
    let orchestrator = ScanOrchestrator::new(coordinator, scanner, observer, cancel);
    let outcome = orchestrator.run(state).await;

    match &outcome.reason {
        ScanStopReason::Complete => {
            info!("scan complete: {} matched repositories", outcome.state.matched.len());
        }
        ScanStopReason::Paused => {
            info!(
                "scan paused with {} repositories pending",
                outcome.state.pending_count()
            );
        }
        ScanStopReason::RateLimited { reset } => {
            warn!(
                "scan stopped on rate limit; resume after {}",
                reset
                    .as_ref()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "the quota reset".to_string())
            );
        }
        ScanStopReason::Failed { message } => {
            error!("scan stopped: {}", message);
        }
    }

    if outcome.is_partial() {
        let path = checkpoint_file_name(&outcome.state);
        std::fs::write(&path, outcome.state.to_json()?)?;
        info!("checkpoint written to {}", path);
    }

    if !outcome.state.matched.is_empty() {
        let report_path = format!("lfs-report-{}.csv", outcome.state.organization);
        std::fs::write(&report_path, matched_report_csv(&outcome.state))?;
        info!(
            "report with {} matched repositories written to {}",
            outcome.state.matched.len(),
            report_path
        );
    }

    Ok(())
}
