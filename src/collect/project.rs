use serde::Serialize;
use tracing::{debug, info};

use super::CollectError;
use super::options::CollectionOptions;
use crate::github::quota::QuotaTracker;
use crate::github::{self, GitHubClient, MAX_PER_PAGE};

/// What a run analyzes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Repositories referenced by the items of an organization's Projects-v2 board.
    Project { org: String, number: u64 },
    /// Every repository of an organization.
    Organization { org: String },
    /// An explicit `owner/name` list.
    Repositories { repos: Vec<String> },
}

/// A target with its repositories enumerated, in the order they will be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTarget {
    pub organization: Option<String>,
    pub project_number: Option<u64>,
    pub project_title: Option<String>,
    pub repositories: Vec<String>,
}

impl ResolvedTarget {
    /// Filesystem-safe label naming this target in output file names.
    pub fn label(&self) -> String {
        let base = match (&self.organization, self.project_number) {
            (Some(org), Some(n)) => format!("{org}-project-{n}"),
            (Some(org), None) => org.clone(),
            (None, _) => match self.repositories.as_slice() {
                [only] => only.replace('/', "-"),
                _ => "repos".to_string(),
            },
        };
        base.chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
            .collect()
    }
}

/// Enumerate the repositories of `target`.
pub async fn resolve(
    client: &GitHubClient,
    target: &Target,
    options: &CollectionOptions,
    quota: &QuotaTracker,
) -> Result<ResolvedTarget, CollectError> {
    let resolved = match target {
        Target::Project { org, number } => resolve_project(client, org, *number, quota).await?,
        Target::Organization { org } => resolve_organization(client, org, options, quota).await?,
        Target::Repositories { repos } => resolve_list(repos)?,
    };
    if resolved.repositories.is_empty() {
        return Err(CollectError::NoRepositories(resolved.label()));
    }
    info!(
        repositories = resolved.repositories.len(),
        project = ?resolved.project_title,
        "target resolved"
    );
    Ok(resolved)
}

fn resolve_list(repos: &[String]) -> Result<ResolvedTarget, CollectError> {
    let mut names: Vec<String> = Vec::with_capacity(repos.len());
    for repo in repos {
        let (owner, name) = github::parse_repo(repo).map_err(CollectError::InvalidTarget)?;
        let full = format!("{owner}/{name}");
        // GitHub names are case-insensitive; the first spelling wins.
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&full)) {
            names.push(full);
        }
    }
    let mut owners = names.iter().filter_map(|n| n.split_once('/').map(|(o, _)| o));
    let first = owners.next().map(str::to_string);
    let organization = first.filter(|f| owners.all(|o| o.eq_ignore_ascii_case(f)));
    Ok(ResolvedTarget {
        organization,
        project_number: None,
        project_title: None,
        repositories: names,
    })
}

async fn resolve_project(
    client: &GitHubClient,
    org: &str,
    number: u64,
    quota: &QuotaTracker,
) -> Result<ResolvedTarget, CollectError> {
    github::validate_org(org).map_err(CollectError::InvalidTarget)?;
    let mut repositories: Vec<String> = Vec::new();
    let mut title = None;
    let mut cursor: Option<String> = None;
    loop {
        let project = client
            .project_items(org, number, cursor.as_deref(), quota)
            .await
            .map_err(CollectError::Enumerate)?
            .ok_or_else(|| CollectError::ProjectNotFound {
                org: org.to_string(),
                number,
            })?;
        title.get_or_insert(project.title);
        // First appearance decides the processing order.
        for name in project
            .items
            .nodes
            .into_iter()
            .filter_map(|item| item.content?.repository)
            .map(|r| r.name_with_owner)
        {
            if !repositories.contains(&name) {
                repositories.push(name);
            }
        }
        let page = project.items.page_info;
        debug!(repositories = repositories.len(), has_next = page.has_next_page, "project items page");
        match page.end_cursor {
            Some(next) if page.has_next_page => cursor = Some(next),
            _ => break,
        }
    }
    Ok(ResolvedTarget {
        organization: Some(org.to_string()),
        project_number: Some(number),
        project_title: title,
        repositories,
    })
}

async fn resolve_organization(
    client: &GitHubClient,
    org: &str,
    options: &CollectionOptions,
    quota: &QuotaTracker,
) -> Result<ResolvedTarget, CollectError> {
    github::validate_org(org).map_err(CollectError::InvalidTarget)?;
    let mut repositories = Vec::new();
    let mut page = 1;
    loop {
        let entries = client
            .list_org_repos(org, page, MAX_PER_PAGE, quota)
            .await
            .map_err(CollectError::Enumerate)?;
        let full = entries.len() == MAX_PER_PAGE;
        repositories.extend(
            entries
                .into_iter()
                .filter(|e| !(options.exclude_forks && e.fork))
                .filter(|e| !(options.exclude_archived && e.archived))
                .map(|e| e.full_name),
        );
        if !full {
            break;
        }
        page += 1;
    }
    Ok(ResolvedTarget {
        organization: Some(org.to_string()),
        project_number: None,
        project_title: None,
        repositories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn items_page(repos: &[&str], next: Option<&str>) -> serde_json::Value {
        let nodes: Vec<_> = repos
            .iter()
            .map(|r| serde_json::json!({"content": {"repository": {"nameWithOwner": r}}}))
            .collect();
        serde_json::json!({
            "data": {"organization": {"projectV2": {
                "title": "Roadmap",
                "items": {
                    "nodes": nodes,
                    "pageInfo": {"hasNextPage": next.is_some(), "endCursor": next}
                }
            }}}
        })
    }

    #[tokio::test]
    async fn project_repositories_follow_cursor_and_dedupe_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(serde_json::json!({"variables": {"cursor": null}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(items_page(
                &["acme/b", "acme/a", "acme/b"],
                Some("c1"),
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(serde_json::json!({"variables": {"cursor": "c1"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(items_page(&["acme/c", "acme/a"], None)))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_url(Client::new(), &server.uri());
        let quota = QuotaTracker::new();
        let target = Target::Project {
            org: "acme".into(),
            number: 3,
        };
        let resolved = resolve(&client, &target, &CollectionOptions::default(), &quota)
            .await
            .unwrap();

        assert_eq!(resolved.repositories, vec!["acme/b", "acme/a", "acme/c"]);
        assert_eq!(resolved.project_title.as_deref(), Some("Roadmap"));
        assert_eq!(resolved.label(), "acme-project-3");
    }

    #[tokio::test]
    async fn missing_project_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"organization": {"projectV2": null}}
            })))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_url(Client::new(), &server.uri());
        let quota = QuotaTracker::new();
        let target = Target::Project {
            org: "acme".into(),
            number: 99,
        };
        let err = resolve(&client, &target, &CollectionOptions::default(), &quota)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::ProjectNotFound { number: 99, .. }));
    }

    #[tokio::test]
    async fn organization_listing_applies_fork_and_archive_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"full_name": "acme/live"},
                {"full_name": "acme/forked", "fork": true},
                {"full_name": "acme/old", "archived": true}
            ])))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_url(Client::new(), &server.uri());
        let quota = QuotaTracker::new();
        let options = CollectionOptions {
            exclude_forks: true,
            exclude_archived: true,
            ..CollectionOptions::default()
        };
        let resolved = resolve(&client, &Target::Organization { org: "acme".into() }, &options, &quota)
            .await
            .unwrap();
        assert_eq!(resolved.repositories, vec!["acme/live"]);
    }

    #[test]
    fn explicit_list_dedupes_and_infers_single_owner() {
        let resolved = resolve_list(&[
            "acme/a".to_string(),
            "https://github.com/acme/b".to_string(),
            "acme/a".to_string(),
        ])
        .unwrap();
        assert_eq!(resolved.repositories, vec!["acme/a", "acme/b"]);
        assert_eq!(resolved.organization.as_deref(), Some("acme"));

        let mixed = resolve_list(&["acme/a".to_string(), "other/b".to_string()]).unwrap();
        assert_eq!(mixed.organization, None);
        assert_eq!(mixed.label(), "repos");
    }

    #[test]
    fn explicit_list_dedupes_case_insensitively() {
        let resolved = resolve_list(&["acme/widgets".to_string(), "ACME/Widgets".to_string()]).unwrap();
        assert_eq!(resolved.repositories, vec!["acme/widgets"]);
    }

    #[test]
    fn explicit_list_rejects_malformed_names() {
        let err = resolve_list(&["not-a-repo".to_string()]).unwrap_err();
        assert!(matches!(err, CollectError::InvalidTarget(_)));
    }
}
