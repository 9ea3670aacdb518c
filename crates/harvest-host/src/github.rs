use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use harvest_core::config::{PlatformConfig, PlatformSettings};
use harvest_core::error::HarvestError;
use harvest_core::models::{ActivitySample, ActivityWindow, Branch, PlatformKind, Project, Repository};

use crate::http::{encode_component, next_link, ApiClient, Auth};
use crate::{probe_branch, PlatformAdapter};

const PER_PAGE: &str = "100";

/// GitHub (and GitHub Enterprise) adapter. Pagination follows the `Link`
/// header's `rel="next"` target.
pub struct GitHubAdapter {
    api: ApiClient,
    config: PlatformConfig,
    organization: String,
}

impl GitHubAdapter {
    pub fn new(config: &PlatformConfig) -> Result<Self, HarvestError> {
        let organization = match &config.settings {
            PlatformSettings::GitHub { organization } => organization.clone(),
            _ => return Err(HarvestError::config("GitHub adapter needs GitHub settings")),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Ok(val) = HeaderValue::from_str(&config.api_version) {
            headers.insert("X-GitHub-Api-Version", val);
        }
        let api = ApiClient::new(
            PlatformKind::GitHub,
            Auth::Bearer(config.access_token.clone()),
            headers,
        )?;

        Ok(Self {
            api,
            config: config.clone(),
            organization,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, HarvestError> {
        let mut url = self.config.endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn repo_path(&self, repo: &Repository) -> String {
        format!("repos/{}/{}", self.organization, repo.slug)
    }

    async fn paginated_get<T: for<'de> Deserialize<'de>>(
        &self,
        first: Url,
    ) -> Result<Vec<T>, HarvestError> {
        let mut all = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let (items, headers): (Vec<T>, _) = self.api.get_page(&url).await?;
            all.extend(items);
            next = next_link(&headers);
        }
        Ok(all)
    }

    async fn commit_lines(&self, repo: &Repository, sha: &str) -> Result<(u64, u64), HarvestError> {
        let url = self.url(&format!("{}/commits/{sha}", self.repo_path(repo)), &[])?;
        let detail: GhCommitDetail = self.api.get_json(&url).await?;
        Ok(detail
            .stats
            .map(|s| (s.additions, s.deletions))
            .unwrap_or_default())
    }
}

#[derive(Deserialize)]
struct GhRepo {
    name: String,
    default_branch: Option<String>,
    /// Kilobytes.
    #[serde(default)]
    size: u64,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    disabled: bool,
}

#[derive(Deserialize)]
struct GhBranch {
    name: String,
}

#[derive(Deserialize)]
struct GhCommit {
    sha: String,
}

#[derive(Deserialize)]
struct GhCommitDetail {
    stats: Option<GhStats>,
}

#[derive(Deserialize)]
struct GhStats {
    additions: u64,
    deletions: u64,
}

#[async_trait]
impl PlatformAdapter for GitHubAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::GitHub
    }

    async fn list_projects(&self) -> Result<Vec<Project>, HarvestError> {
        Ok(vec![Project::implicit(&self.organization)])
    }

    #[instrument(skip(self, project), fields(project = %project.key))]
    async fn list_repositories(&self, project: &Project) -> Result<Vec<Repository>, HarvestError> {
        let url = self.url(
            &format!("orgs/{}/repos", self.organization),
            &[("type", "all"), ("per_page", PER_PAGE)],
        )?;
        let repos: Vec<GhRepo> = self.paginated_get(url).await?;
        debug!(count = repos.len(), "listed repositories");
        Ok(repos
            .into_iter()
            .map(|r| {
                let mut repo = Repository::new(project.key.clone(), r.name)
                    .with_size(r.size.saturating_mul(1024))
                    .archived(r.archived || r.disabled);
                repo.default_branch = r.default_branch;
                repo
            })
            .collect())
    }

    async fn list_branches(&self, repo: &Repository) -> Result<Vec<Branch>, HarvestError> {
        let url = self.url(
            &format!("{}/branches", self.repo_path(repo)),
            &[("per_page", PER_PAGE)],
        )?;
        let branches: Vec<GhBranch> = self.paginated_get(url).await?;
        Ok(branches
            .into_iter()
            .map(|b| {
                let is_default = repo.default_branch.as_deref() == Some(b.name.as_str());
                let branch = Branch::new(b.name);
                if is_default {
                    branch.default_branch()
                } else {
                    branch
                }
            })
            .collect())
    }

    async fn is_empty(&self, repo: &Repository, branch: Option<&str>) -> Result<bool, HarvestError> {
        let query: Vec<(&str, &str)> = probe_branch(repo, branch)
            .map(|b| vec![("ref", b)])
            .unwrap_or_default();
        let url = self.url(&format!("{}/contents/", self.repo_path(repo)), &query)?;
        let listing: Option<Vec<serde_json::Value>> = self.api.get_json_optional(&url).await?;
        Ok(listing.map_or(true, |entries| entries.is_empty()))
    }

    #[instrument(skip(self, repo, window), fields(repo = %repo.full_name()))]
    async fn sample_activity(
        &self,
        repo: &Repository,
        branch: &str,
        window: &ActivityWindow,
    ) -> Result<ActivitySample, HarvestError> {
        let since = window.since_rfc3339();
        let until = window.until_rfc3339();
        let url = self.url(
            &format!("{}/commits", self.repo_path(repo)),
            &[
                ("sha", branch),
                ("since", since.as_str()),
                ("until", until.as_str()),
                ("per_page", PER_PAGE),
            ],
        )?;
        let commits: Vec<GhCommit> = match self.paginated_get(url).await {
            Ok(commits) => commits,
            // 409 is GitHub's answer for a repository with no commits at all.
            Err(HarvestError::ApiError { status: 409, .. }) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut sample = ActivitySample::commits(commits.len() as u64);
        if self.config.stats {
            for commit in &commits {
                let (additions, deletions) = self.commit_lines(repo, &commit.sha).await?;
                sample.additions += additions;
                sample.deletions += deletions;
            }
        }
        Ok(sample)
    }

    fn clone_url(&self, repo: &Repository) -> String {
        format!(
            "{}://{}:x-oauth-basic@{}/{}/{}.git",
            self.config.protocol,
            encode_component(&self.config.access_token),
            self.config.clone_host,
            self.organization,
            repo.slug
        )
    }
}
