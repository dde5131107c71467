use chrono::{DateTime, SecondsFormat, Utc};

use super::GitHubError;

fn is_valid_github_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && s != ".."
        && s != "."
}

/// Parse a repository identifier into `(owner, repo)`.
///
/// Accepts `"owner/repo"`, full GitHub URLs, and `.git` suffixed URLs.
/// Owner and repo are restricted to `[a-zA-Z0-9._-]`, which makes them safe
/// for direct interpolation into API paths.
pub fn parse_repo(repository: &str) -> Result<(&str, &str), GitHubError> {
    let stripped = repository
        .strip_prefix("https://github.com/")
        .or_else(|| repository.strip_prefix("http://github.com/"))
        .unwrap_or(repository)
        .trim_end_matches('/');
    let repo_str = stripped.strip_suffix(".git").unwrap_or(stripped);

    let parts: Vec<&str> = repo_str.splitn(3, '/').collect();
    if parts.len() < 2 || !is_valid_github_name(parts[0]) || !is_valid_github_name(parts[1]) {
        return Err(GitHubError::InvalidRepo(repository.to_string()));
    }
    Ok((parts[0], parts[1]))
}

/// Validate an organization login.
pub fn validate_org(org: &str) -> Result<(), GitHubError> {
    if is_valid_github_name(org) {
        Ok(())
    } else {
        Err(GitHubError::InvalidOrg(org.to_string()))
    }
}

/// Timestamp format accepted by the `since`/`until` query parameters.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Issue number from a comment's `issue_url`
/// (`https://api.github.com/repos/o/r/issues/42` → 42).
pub fn issue_number_from_url(issue_url: &str) -> Option<u64> {
    issue_url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

/// Key linking a comment or review to its issue or pull request.
pub fn parent_key(repository: &str, number: u64) -> String {
    format!("{repository}#{number}")
}

pub(super) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}
