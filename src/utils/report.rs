use crate::models::state::ScanState;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9._-]+").unwrap();
}

/// File name convention for persisted checkpoints:
/// `lfs-scan-{org}-{YYYY-MM-DD}.json`, with the organization name reduced
/// to filesystem-safe characters.
pub fn checkpoint_file_name(state: &ScanState) -> String {
    let org = UNSAFE_FILENAME_CHARS.replace_all(&state.organization, "-");
    format!("lfs-scan-{}-{}.json", org, Utc::now().format("%Y-%m-%d"))
}

/// CSV report: one row per matched repository, plus a header row.
/// `config_paths` and `matched_lines` are semicolon-joined.
pub fn matched_report_csv(state: &ScanState) -> String {
    let mut out = String::from(
        "repository,url,description,size_kb,pushed_at,config_paths,matched_lines\n",
    );
    for repo in &state.matched {
        let row = [
            repo.full_name.clone(),
            repo.html_url.clone(),
            repo.description.clone().unwrap_or_default(),
            repo.size.to_string(),
            repo.pushed_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            repo.matched_paths.join(";"),
            repo.matched_lines.join(";"),
        ];
        let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Quote a field when it contains a delimiter, quote, or newline; embedded
/// quotes are escaped by doubling.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
