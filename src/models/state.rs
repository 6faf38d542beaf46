use crate::errors::ScanError;
use crate::models::repository::{MatchState, Repository};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Checkpoint of one organization scan. Every stop before completion hands
/// one of these back to the caller, and a later run picks up from it without
/// re-scanning anything in `scanned_ids`.
///
/// Invariants, maintained by `commit`:
/// - `scanned_ids` and `pending_ids` are disjoint and together cover every
///   repository id;
/// - `matched` only contains repositories whose id is in `scanned_ids`;
/// - once `is_complete` is set, `pending_ids` is empty and the state is no
///   longer mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanState {
    pub organization: String,
    pub host: Option<String>,
    pub created_at: DateTime<Utc>,
    pub repositories: Vec<Repository>,
    pub scanned_ids: BTreeSet<u64>,
    pub pending_ids: BTreeSet<u64>,
    pub matched: Vec<Repository>,
    pub is_complete: bool,
    pub last_error: Option<String>,
}

impl ScanState {
    pub fn new(organization: &str, host: Option<&str>, repositories: Vec<Repository>) -> Self {
        let pending_ids = repositories.iter().map(|r| r.id).collect();
        Self {
            organization: organization.to_string(),
            host: host.map(str::to_string),
            created_at: Utc::now(),
            repositories,
            scanned_ids: BTreeSet::new(),
            pending_ids,
            matched: Vec::new(),
            is_complete: false,
            last_error: None,
        }
    }

    /// Next up-to-`size` pending repositories, in repository list order
    /// (the order pagination returned them).
    pub fn next_batch(&self, size: usize) -> Vec<Repository> {
        self.repositories
            .iter()
            .filter(|r| self.pending_ids.contains(&r.id))
            .take(size)
            .cloned()
            .collect()
    }

    /// Fold one scanned repository into the state: move its id from pending
    /// to scanned, replace its record, and append it to `matched` if the
    /// scanner classified it a match.
    pub fn commit(&mut self, repo: Repository) {
        debug_assert_ne!(repo.match_state, MatchState::Unknown);
        if !self.pending_ids.remove(&repo.id) {
            return; // already committed; never double-count
        }
        self.scanned_ids.insert(repo.id);
        if let Some(existing) = self.repositories.iter_mut().find(|r| r.id == repo.id) {
            *existing = repo.clone();
        }
        if repo.is_match() {
            self.matched.push(repo);
        }
    }

    pub fn scanned_count(&self) -> usize {
        self.scanned_ids.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_ids.len()
    }

    /// Serialize for external persistence.
    pub fn to_json(&self) -> Result<String, ScanError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ScanError::Unknown(format!("failed to serialize checkpoint: {}", e)))
    }

    /// Deserialize with structural validation: a malformed or truncated
    /// document reports `InvalidCheckpoint`, never panics.
    pub fn from_json(text: &str) -> Result<Self, ScanError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ScanError::InvalidCheckpoint(format!("not valid JSON: {}", e)))?;
        if !value
            .get("organization")
            .map(|v| v.is_string())
            .unwrap_or(false)
        {
            return Err(ScanError::InvalidCheckpoint(
                "missing or non-textual 'organization'".to_string(),
            ));
        }
        for field in ["repositories", "scanned_ids", "pending_ids", "matched"] {
            if !value.get(field).map(|v| v.is_array()).unwrap_or(false) {
                return Err(ScanError::InvalidCheckpoint(format!(
                    "missing or non-sequence '{}'",
                    field
                )));
            }
        }
        serde_json::from_value(value)
            .map_err(|e| ScanError::InvalidCheckpoint(format!("malformed checkpoint: {}", e)))
    }
}
