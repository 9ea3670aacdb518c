use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use harvest_core::config::{PlatformConfig, PlatformSettings};
use harvest_core::error::HarvestError;
use harvest_core::models::{ActivitySample, ActivityWindow, Branch, PlatformKind, Project, Repository};

use crate::http::{encode_component, with_query_param, ApiClient, Auth};
use crate::{probe_branch, PlatformAdapter};

const LIMIT: &str = "100";

/// Bitbucket Data Center / Server adapter. Pages are addressed by `start`
/// and end when the response says `isLastPage`.
pub struct BitbucketDcAdapter {
    api: ApiClient,
    config: PlatformConfig,
    clone_user: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    values: Vec<T>,
    #[serde(default = "last_page")]
    is_last_page: bool,
    next_page_start: Option<u64>,
}

fn last_page() -> bool {
    true
}

#[derive(Deserialize)]
struct DcProject {
    key: String,
    name: String,
    id: Option<u64>,
}

#[derive(Deserialize)]
struct DcRepo {
    slug: String,
    name: String,
    #[serde(default)]
    archived: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DcBranch {
    display_id: String,
    #[serde(default)]
    is_default: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DcCommit {
    /// Milliseconds since the epoch.
    author_timestamp: i64,
}

#[derive(Deserialize)]
struct DcBrowse {
    children: Option<DcChildren>,
}

#[derive(Deserialize)]
struct DcChildren {
    #[serde(default)]
    size: u64,
}

impl BitbucketDcAdapter {
    pub fn new(config: &PlatformConfig) -> Result<Self, HarvestError> {
        let clone_user = match &config.settings {
            PlatformSettings::BitbucketDc { clone_user } => clone_user.clone(),
            _ => {
                return Err(HarvestError::config(
                    "Bitbucket Data Center adapter needs Bitbucket Data Center settings",
                ))
            }
        };
        let api = ApiClient::new(
            PlatformKind::BitbucketDc,
            Auth::Bearer(config.access_token.clone()),
            HeaderMap::new(),
        )?;
        Ok(Self {
            api,
            config: config.clone(),
            clone_user,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, HarvestError> {
        let mut url = self
            .config
            .endpoint(&format!("rest/api/{}/{path}", self.config.api_version))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn repo_path(repo: &Repository) -> String {
        format!("projects/{}/repos/{}", repo.project, repo.slug)
    }

    async fn paginated_get<T: for<'de> Deserialize<'de>>(
        &self,
        first: Url,
    ) -> Result<Vec<T>, HarvestError> {
        let mut all = Vec::new();
        let mut url = first;
        loop {
            let page: Page<T> = self.api.get_json(&url).await?;
            all.extend(page.values);
            match (page.is_last_page, page.next_page_start) {
                (false, Some(start)) => url = with_query_param(&url, "start", &start.to_string()),
                _ => break,
            }
        }
        Ok(all)
    }
}

#[async_trait]
impl PlatformAdapter for BitbucketDcAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::BitbucketDc
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> Result<Vec<Project>, HarvestError> {
        let projects: Vec<DcProject> = self
            .paginated_get(self.url("projects", &[("limit", LIMIT)])?)
            .await?;
        debug!(count = projects.len(), "listed projects");
        Ok(projects
            .into_iter()
            .map(|p| {
                let mut project = Project::new(p.key, p.name);
                project.id = p.id.map(|id| id.to_string());
                project
            })
            .collect())
    }

    #[instrument(skip(self, project), fields(project = %project.key))]
    async fn list_repositories(&self, project: &Project) -> Result<Vec<Repository>, HarvestError> {
        let url = self.url(&format!("projects/{}/repos", project.key), &[("limit", LIMIT)])?;
        let repos: Vec<DcRepo> = self.paginated_get(url).await?;
        Ok(repos
            .into_iter()
            .map(|r| {
                let mut repo = Repository::new(project.key.clone(), r.slug).archived(r.archived);
                repo.name = r.name;
                repo
            })
            .collect())
    }

    async fn list_branches(&self, repo: &Repository) -> Result<Vec<Branch>, HarvestError> {
        let url = self.url(
            &format!("{}/branches", Self::repo_path(repo)),
            &[("limit", LIMIT)],
        )?;
        let branches: Vec<DcBranch> = self.paginated_get(url).await?;
        Ok(branches
            .into_iter()
            .map(|b| {
                let branch = Branch::new(b.display_id);
                if b.is_default {
                    branch.default_branch()
                } else {
                    branch
                }
            })
            .collect())
    }

    async fn is_empty(&self, repo: &Repository, branch: Option<&str>) -> Result<bool, HarvestError> {
        let at = probe_branch(repo, branch).map(|b| format!("refs/heads/{b}"));
        let mut query = vec![("limit", "1")];
        if let Some(at) = at.as_deref() {
            query.push(("at", at));
        }
        let url = self.url(&format!("{}/browse", Self::repo_path(repo)), &query)?;
        let listing: Option<DcBrowse> = self.api.get_json_optional(&url).await?;
        Ok(listing
            .and_then(|l| l.children)
            .map_or(true, |children| children.size == 0))
    }

    #[instrument(skip(self, repo, window), fields(repo = %repo.full_name()))]
    async fn sample_activity(
        &self,
        repo: &Repository,
        branch: &str,
        window: &ActivityWindow,
    ) -> Result<ActivitySample, HarvestError> {
        let until = format!("refs/heads/{branch}");
        let mut url = self.url(
            &format!("{}/commits", Self::repo_path(repo)),
            &[("until", until.as_str()), ("limit", LIMIT)],
        )?;
        let mut commits = 0u64;

        // Newest first: stop at the first commit older than the window.
        'pages: loop {
            let page: Page<DcCommit> = match self.api.get_json_optional(&url).await? {
                Some(page) => page,
                None => break,
            };
            for commit in &page.values {
                let Some(at) = DateTime::from_timestamp_millis(commit.author_timestamp) else {
                    continue;
                };
                if at < window.since {
                    break 'pages;
                }
                if window.contains(at) {
                    commits += 1;
                }
            }
            match (page.is_last_page, page.next_page_start) {
                (false, Some(start)) => url = with_query_param(&url, "start", &start.to_string()),
                _ => break,
            }
        }

        Ok(ActivitySample::commits(commits))
    }

    fn clone_url(&self, repo: &Repository) -> String {
        format!(
            "{}://{}:{}@{}/scm/{}/{}.git",
            self.config.protocol,
            encode_component(&self.clone_user),
            encode_component(&self.config.access_token),
            self.config.clone_host,
            repo.project.to_lowercase(),
            repo.slug
        )
    }
}
