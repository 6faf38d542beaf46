use crate::errors::ScanError;
use crate::models::repository::{MatchState, Repository, TreeResponse};
use crate::services::ratelimit::RateLimitCoordinator;
use log::{debug, warn};
use regex::Regex;

const CONFIG_FILENAME: &str = ".lfsconfig";
const RAW_ACCEPT: &str = "application/vnd.github.raw+json";

/// Inspects one repository for config files referencing the target LFS
/// backend. Tree and content fetches go through the rate-limit coordinator;
/// an unreadable tree classifies the repository NoMatch instead of failing
/// the scan, while hard transport errors (rate limit exhaustion, blocked
/// connections, retries spent) propagate so the orchestrator can checkpoint.
pub struct ConfigScanner {
    api_root: String,
    marker: Regex,
}

impl ConfigScanner {
    pub fn new(api_root: String, marker: &str) -> Result<Self, ScanError> {
        let marker = Regex::new(&format!("(?i){}", regex::escape(marker)))
            .map_err(|e| ScanError::Unknown(format!("invalid marker: {}", e)))?;
        Ok(Self { api_root, marker })
    }

    /// Case-insensitive marker scan over file content; matched lines keep
    /// insertion order and are deduplicated.
    pub fn matching_lines(&self, content: &str) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        for line in content.lines() {
            if self.marker.is_match(line) {
                let line = line.trim().to_string();
                if !lines.contains(&line) {
                    lines.push(line);
                }
            }
        }
        lines
    }

    /// Scan one repository and return it with the match fields filled in.
    pub async fn scan(
        &self,
        coordinator: &RateLimitCoordinator,
        mut repo: Repository,
    ) -> Result<Repository, ScanError> {
        let candidates = match self.fetch_candidate_paths(coordinator, &repo).await? {
            Some(paths) => paths,
            None => {
                repo.match_state = MatchState::NoMatch;
                return Ok(repo);
            }
        };

        for path in candidates {
            let content = match self.fetch_raw_content(coordinator, &repo, &path).await? {
                Some(content) => content,
                None => continue,
            };
            let lines = self.matching_lines(&content);
            if !lines.is_empty() && !repo.matched_paths.contains(&path) {
                repo.matched_paths.push(path);
            }
            for line in lines {
                if !repo.matched_lines.contains(&line) {
                    repo.matched_lines.push(line);
                }
            }
        }

        repo.match_state = if repo.matched_lines.is_empty() {
            MatchState::NoMatch
        } else {
            MatchState::Match
        };
        Ok(repo)
    }

    /// List the repository tree and keep blob paths ending with the config
    /// filename. A non-success tree response (empty repository, missing
    /// branch) yields None, which the caller records as NoMatch.
    async fn fetch_candidate_paths(
        &self,
        coordinator: &RateLimitCoordinator,
        repo: &Repository,
    ) -> Result<Option<Vec<String>>, ScanError> {
        let url = format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            self.api_root, repo.full_name, repo.default_branch
        );
        let response = coordinator.get(&url, None).await?;
        if !response.status().is_success() {
            debug!("tree fetch for {} returned HTTP {}", repo.full_name, response.status());
            return Ok(None);
        }
        let tree: TreeResponse = match response.json().await {
            Ok(tree) => tree,
            Err(e) => {
                warn!("unparseable tree for {}: {}", repo.full_name, e);
                return Ok(None);
            }
        };
        if tree.truncated {
            warn!("tree listing for {} was truncated", repo.full_name);
        }
        let paths: Vec<String> = tree
            .tree
            .into_iter()
            .filter(|e| e.is_blob() && e.path.ends_with(CONFIG_FILENAME))
            .map(|e| e.path)
            .collect();
        Ok(if paths.is_empty() { None } else { Some(paths) })
    }

    async fn fetch_raw_content(
        &self,
        coordinator: &RateLimitCoordinator,
        repo: &Repository,
        path: &str,
    ) -> Result<Option<String>, ScanError> {
        let url = format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.api_root, repo.full_name, path, repo.default_branch
        );
        let response = coordinator.get(&url, Some(RAW_ACCEPT)).await?;
        if !response.status().is_success() {
            debug!(
                "content fetch for {}:{} returned HTTP {}",
                repo.full_name,
                path,
                response.status()
            );
            return Ok(None);
        }
        match response.text().await {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                debug!("could not read content for {}:{}: {}", repo.full_name, path, e);
                Ok(None)
            }
        }
    }
}
