use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Whether a repository's `.lfsconfig` references the target backend.
/// `Unknown` means the repository has not been scanned yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MatchState {
    #[default]
    Unknown,
    Match,
    NoMatch,
}

/// One organization member repository. Deserializes directly from the
/// GitHub repository JSON; the scan result fields default to empty and are
/// filled in exactly once by the config scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repository {
    pub id: u64,
    pub full_name: String,
    pub html_url: String,
    pub default_branch: String,
    pub size: u64,
    pub pushed_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    #[serde(default)]
    pub match_state: MatchState,
    #[serde(default)]
    pub matched_lines: Vec<String>,
    #[serde(default)]
    pub matched_paths: Vec<String>,
}

impl Repository {
    pub fn is_match(&self) -> bool {
        self.match_state == MatchState::Match
    }
}

#[derive(Debug, Deserialize)]
pub struct TreeResponse {
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: String,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.entry_type == "blob"
    }
}
