use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use harvest_core::config::{PlatformConfig, PlatformSettings};
use harvest_core::error::HarvestError;
use harvest_core::models::{ActivitySample, ActivityWindow, Branch, PlatformKind, Project, Repository};

use crate::http::{encode_component, ApiClient, Auth};
use crate::{probe_branch, PlatformAdapter};

const PAGE_LEN: &str = "100";

/// Bitbucket Cloud adapter. Every list response embeds the URL of the next
/// page in its body.
pub struct BitbucketAdapter {
    api: ApiClient,
    config: PlatformConfig,
    workspace: String,
}

#[derive(Deserialize)]
struct Page<T> {
    values: Vec<T>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct BbProject {
    key: String,
    name: String,
    uuid: Option<String>,
}

#[derive(Deserialize)]
struct BbRepo {
    slug: String,
    name: String,
    #[serde(default)]
    size: u64,
    mainbranch: Option<BbRef>,
}

#[derive(Deserialize)]
struct BbRef {
    name: String,
}

#[derive(Deserialize)]
struct BbCommit {
    hash: String,
    date: DateTime<Utc>,
}

#[derive(Deserialize)]
struct BbDiffStat {
    #[serde(default)]
    lines_added: u64,
    #[serde(default)]
    lines_removed: u64,
}

impl BitbucketAdapter {
    pub fn new(config: &PlatformConfig) -> Result<Self, HarvestError> {
        let workspace = match &config.settings {
            PlatformSettings::Bitbucket { workspace } => workspace.clone(),
            _ => {
                return Err(HarvestError::config(
                    "Bitbucket adapter needs Bitbucket settings",
                ))
            }
        };
        let api = ApiClient::new(
            PlatformKind::Bitbucket,
            Auth::Bearer(config.access_token.clone()),
            HeaderMap::new(),
        )?;
        Ok(Self {
            api,
            config: config.clone(),
            workspace,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, HarvestError> {
        let mut url = self
            .config
            .endpoint(&format!("{}/{path}", self.config.api_version))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn repo_path(&self, repo: &Repository) -> String {
        format!("repositories/{}/{}", self.workspace, repo.slug)
    }

    fn parse_next(next: Option<String>) -> Result<Option<Url>, HarvestError> {
        next.map(|n| {
            Url::parse(&n).map_err(|e| HarvestError::Serialization(format!("bad next link '{n}': {e}")))
        })
        .transpose()
    }

    async fn paginated_get<T: for<'de> Deserialize<'de>>(
        &self,
        first: Url,
    ) -> Result<Vec<T>, HarvestError> {
        let mut all = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let page: Page<T> = self.api.get_json(&url).await?;
            all.extend(page.values);
            next = Self::parse_next(page.next)?;
        }
        Ok(all)
    }

    async fn diff_lines(&self, repo: &Repository, hash: &str) -> Result<(u64, u64), HarvestError> {
        let url = self.url(
            &format!("{}/diffstat/{hash}", self.repo_path(repo)),
            &[("pagelen", PAGE_LEN)],
        )?;
        let stats: Vec<BbDiffStat> = self.paginated_get(url).await?;
        Ok(stats
            .iter()
            .fold((0, 0), |(a, d), s| (a + s.lines_added, d + s.lines_removed)))
    }
}

#[async_trait]
impl PlatformAdapter for BitbucketAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Bitbucket
    }

    #[instrument(skip(self), fields(workspace = %self.workspace))]
    async fn list_projects(&self) -> Result<Vec<Project>, HarvestError> {
        let url = self.url(
            &format!("workspaces/{}/projects", self.workspace),
            &[("pagelen", PAGE_LEN)],
        )?;
        let projects: Vec<BbProject> = self.paginated_get(url).await?;
        debug!(count = projects.len(), "listed projects");
        Ok(projects
            .into_iter()
            .map(|p| {
                let mut project = Project::new(p.key, p.name);
                project.id = p.uuid;
                project
            })
            .collect())
    }

    #[instrument(skip(self, project), fields(project = %project.key))]
    async fn list_repositories(&self, project: &Project) -> Result<Vec<Repository>, HarvestError> {
        let filter = format!("project.key=\"{}\"", project.key);
        let url = self.url(
            &format!("repositories/{}", self.workspace),
            &[("q", filter.as_str()), ("pagelen", PAGE_LEN)],
        )?;
        let repos: Vec<BbRepo> = self.paginated_get(url).await?;
        Ok(repos
            .into_iter()
            .map(|r| {
                let mut repo = Repository::new(project.key.clone(), r.slug).with_size(r.size);
                repo.name = r.name;
                repo.default_branch = r.mainbranch.map(|b| b.name);
                repo
            })
            .collect())
    }

    async fn list_branches(&self, repo: &Repository) -> Result<Vec<Branch>, HarvestError> {
        let url = self.url(
            &format!("{}/refs/branches", self.repo_path(repo)),
            &[("pagelen", PAGE_LEN)],
        )?;
        let refs: Vec<BbRef> = self.paginated_get(url).await?;
        Ok(refs
            .into_iter()
            .map(|r| {
                let is_default = repo.default_branch.as_deref() == Some(r.name.as_str());
                let branch = Branch::new(r.name);
                if is_default {
                    branch.default_branch()
                } else {
                    branch
                }
            })
            .collect())
    }

    async fn is_empty(&self, repo: &Repository, branch: Option<&str>) -> Result<bool, HarvestError> {
        // A repository without a main branch has never been pushed to.
        let Some(branch) = probe_branch(repo, branch) else {
            return Ok(true);
        };
        let url = self.url(
            &format!("{}/src/{}/", self.repo_path(repo), encode_component(branch)),
            &[("pagelen", "1")],
        )?;
        let listing: Option<Page<serde_json::Value>> = self.api.get_json_optional(&url).await?;
        Ok(listing.map_or(true, |page| page.values.is_empty()))
    }

    #[instrument(skip(self, repo, window), fields(repo = %repo.full_name()))]
    async fn sample_activity(
        &self,
        repo: &Repository,
        branch: &str,
        window: &ActivityWindow,
    ) -> Result<ActivitySample, HarvestError> {
        let mut next = Some(self.url(
            &format!("{}/commits/{}", self.repo_path(repo), encode_component(branch)),
            &[("pagelen", PAGE_LEN)],
        )?);
        let mut in_window = Vec::new();

        // Newest first: stop at the first commit older than the window.
        'pages: while let Some(url) = next {
            let page: Page<BbCommit> = match self.api.get_json_optional(&url).await? {
                Some(page) => page,
                None => break,
            };
            for commit in page.values {
                if commit.date < window.since {
                    break 'pages;
                }
                if window.contains(commit.date) {
                    in_window.push(commit.hash);
                }
            }
            next = Self::parse_next(page.next)?;
        }

        let mut sample = ActivitySample::commits(in_window.len() as u64);
        if self.config.stats {
            for hash in &in_window {
                let (added, removed) = self.diff_lines(repo, hash).await?;
                sample.additions += added;
                sample.deletions += removed;
            }
        }
        Ok(sample)
    }

    fn clone_url(&self, repo: &Repository) -> String {
        format!(
            "{}://x-token-auth:{}@{}/{}/{}.git",
            self.config.protocol,
            encode_component(&self.config.access_token),
            self.config.clone_host,
            self.workspace,
            repo.slug
        )
    }
}
