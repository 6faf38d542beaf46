use crate::errors::ScanError;
use crate::models::repository::Repository;
use crate::services::ratelimit::RateLimitCoordinator;
use crate::utils::observer::ScanObserver;
use log::{debug, info};
use reqwest::StatusCode;
use std::sync::Arc;

const PAGE_SIZE: usize = 100;

/// Default public API root, or the GitHub Enterprise Server convention when
/// an alternate host is configured.
pub fn api_root(host: Option<&str>) -> String {
    match host {
        Some(host) => format!("https://{}/api/v3", host),
        None => "https://api.github.com".to_string(),
    }
}

/// Builds the complete repository set for an organization by walking the
/// paginated listing, bypassing any search-result cap.
pub struct RepoLister {
    api_root: String,
    observer: Arc<dyn ScanObserver>,
}

impl RepoLister {
    pub fn new(api_root: String, observer: Arc<dyn ScanObserver>) -> Self {
        Self { api_root, observer }
    }

    /// Page through the organization's repositories, most recently pushed
    /// first, until a short page signals the end. When `existing` is given
    /// (a resumed scan), it is returned unchanged with no network access.
    pub async fn list(
        &self,
        coordinator: &RateLimitCoordinator,
        org: &str,
        existing: Option<Vec<Repository>>,
    ) -> Result<Vec<Repository>, ScanError> {
        if let Some(repos) = existing {
            debug!("reusing {} repositories from a previous checkpoint", repos.len());
            return Ok(repos);
        }

        let mut all: Vec<Repository> = Vec::new();
        let mut page: u32 = 1;
        loop {
            let url = format!(
                "{}/orgs/{}/repos?per_page={}&page={}&sort=pushed",
                self.api_root, org, PAGE_SIZE, page
            );
            let response = coordinator.get(&url, None).await?;

            if response.status() == StatusCode::NOT_FOUND {
                return Err(ScanError::OrgNotFound(org.to_string()));
            }
            if !response.status().is_success() {
                return Err(ScanError::UnexpectedStatus {
                    status: response.status().as_u16(),
                    url,
                });
            }

            let repos: Vec<Repository> = response
                .json()
                .await
                .map_err(|e| ScanError::Unknown(format!("unparseable repository page: {}", e)))?;
            let page_len = repos.len();
            all.extend(repos);
            self.observer.page_fetched(&all, page);
            info!("fetched page {} ({} repositories so far)", page, all.len());

            if page_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }
}
