use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use harvest_core::config::{PlatformConfig, PlatformSettings};
use harvest_core::error::HarvestError;
use harvest_core::models::{ActivitySample, ActivityWindow, Branch, PlatformKind, Project, Repository};

use crate::http::{encode_component, header_str, with_query_param, ApiClient, Auth};
use crate::{probe_branch, PlatformAdapter};

const PER_PAGE: &str = "100";

/// GitLab adapter. A top-level group and all of its descendant groups form
/// the project list; pagination follows the `X-Next-Page` header.
pub struct GitLabAdapter {
    api: ApiClient,
    config: PlatformConfig,
    group: String,
}

#[derive(Deserialize)]
struct GlGroup {
    id: u64,
    name: String,
    full_path: String,
    parent_id: Option<u64>,
}

#[derive(Deserialize)]
struct GlProject {
    id: u64,
    path: String,
    name: String,
    default_branch: Option<String>,
    #[serde(default)]
    archived: bool,
    statistics: Option<GlStatistics>,
}

#[derive(Deserialize)]
struct GlStatistics {
    #[serde(default)]
    repository_size: u64,
}

#[derive(Deserialize)]
struct GlBranch {
    name: String,
    #[serde(default)]
    default: bool,
}

#[derive(Deserialize)]
struct GlCommit {
    stats: Option<GlCommitStats>,
}

#[derive(Deserialize)]
struct GlCommitStats {
    additions: u64,
    deletions: u64,
}

impl GitLabAdapter {
    pub fn new(config: &PlatformConfig) -> Result<Self, HarvestError> {
        let group = match &config.settings {
            PlatformSettings::GitLab { group } => group.clone(),
            _ => return Err(HarvestError::config("GitLab adapter needs GitLab settings")),
        };
        let api = ApiClient::new(
            PlatformKind::GitLab,
            Auth::Header {
                name: HeaderName::from_static("private-token"),
                value: config.access_token.clone(),
            },
            HeaderMap::new(),
        )?;
        Ok(Self {
            api,
            config: config.clone(),
            group,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, HarvestError> {
        let mut url = self.config.endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn project_path(repo: &Repository) -> String {
        format!("projects/{}", repo.api_id())
    }

    async fn paginated_get<T: for<'de> Deserialize<'de>>(
        &self,
        first: Url,
    ) -> Result<Vec<T>, HarvestError> {
        let mut all = Vec::new();
        let mut url = first;
        loop {
            let (items, headers): (Vec<T>, _) = self.api.get_page(&url).await?;
            all.extend(items);
            match header_str(&headers, "x-next-page") {
                Some(page) => url = with_query_param(&url, "page", &page),
                None => break,
            }
        }
        Ok(all)
    }
}

#[async_trait]
impl PlatformAdapter for GitLabAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::GitLab
    }

    #[instrument(skip(self), fields(group = %self.group))]
    async fn list_projects(&self) -> Result<Vec<Project>, HarvestError> {
        let encoded = self.group.replace('/', "%2F");
        let root: GlGroup = self
            .api
            .get_json(&self.url(&format!("groups/{encoded}"), &[])?)
            .await
            .map_err(|e| match e {
                HarvestError::ApiError { status: 404, .. } => HarvestError::ProjectNotFound {
                    key: self.group.clone(),
                },
                other => other,
            })?;

        let descendants: Vec<GlGroup> = self
            .paginated_get(self.url(
                &format!("groups/{}/descendant_groups", root.id),
                &[("per_page", PER_PAGE)],
            )?)
            .await?;

        let mut paths: HashMap<u64, String> = HashMap::new();
        paths.insert(root.id, root.full_path.clone());
        for group in &descendants {
            paths.insert(group.id, group.full_path.clone());
        }

        let projects: Vec<Project> = std::iter::once(root)
            .chain(descendants)
            .map(|g| {
                let mut project = Project::new(g.full_path, g.name);
                project.id = Some(g.id.to_string());
                project.parent = g.parent_id.and_then(|id| paths.get(&id).cloned());
                project
            })
            .collect();
        debug!(count = projects.len(), "listed groups");
        Ok(projects)
    }

    #[instrument(skip(self, project), fields(project = %project.key))]
    async fn list_repositories(&self, project: &Project) -> Result<Vec<Repository>, HarvestError> {
        let url = self.url(
            &format!("groups/{}/projects", project.api_id().replace('/', "%2F")),
            &[
                ("per_page", PER_PAGE),
                ("statistics", "true"),
                ("include_subgroups", "false"),
                ("with_shared", "false"),
            ],
        )?;
        let repos: Vec<GlProject> = self.paginated_get(url).await?;
        Ok(repos
            .into_iter()
            .map(|p| {
                let mut repo = Repository::new(project.key.clone(), p.path)
                    .with_size(p.statistics.map(|s| s.repository_size).unwrap_or(0))
                    .archived(p.archived);
                repo.name = p.name;
                repo.id = Some(p.id.to_string());
                repo.project_id = project.id.clone();
                repo.default_branch = p.default_branch;
                repo
            })
            .collect())
    }

    async fn list_branches(&self, repo: &Repository) -> Result<Vec<Branch>, HarvestError> {
        let url = self.url(
            &format!("{}/repository/branches", Self::project_path(repo)),
            &[("per_page", PER_PAGE)],
        )?;
        let branches: Vec<GlBranch> = self.paginated_get(url).await?;
        Ok(branches
            .into_iter()
            .map(|b| {
                let branch = Branch::new(b.name);
                if b.default {
                    branch.default_branch()
                } else {
                    branch
                }
            })
            .collect())
    }

    async fn is_empty(&self, repo: &Repository, branch: Option<&str>) -> Result<bool, HarvestError> {
        let mut query = vec![("per_page", "1")];
        if let Some(b) = probe_branch(repo, branch) {
            query.push(("ref", b));
        }
        let url = self.url(&format!("{}/repository/tree", Self::project_path(repo)), &query)?;
        let tree: Option<Vec<serde_json::Value>> = self.api.get_json_optional(&url).await?;
        Ok(tree.map_or(true, |entries| entries.is_empty()))
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
        let with_stats = if self.config.stats { "true" } else { "false" };
        let url = self.url(
            &format!("{}/repository/commits", Self::project_path(repo)),
            &[
                ("ref_name", branch),
                ("since", since.as_str()),
                ("until", until.as_str()),
                ("with_stats", with_stats),
                ("per_page", PER_PAGE),
            ],
        )?;
        let commits: Vec<GlCommit> = self.paginated_get(url).await?;

        let mut sample = ActivitySample::commits(commits.len() as u64);
        for stats in commits.iter().filter_map(|c| c.stats.as_ref()) {
            sample.additions += stats.additions;
            sample.deletions += stats.deletions;
        }
        Ok(sample)
    }

    fn clone_url(&self, repo: &Repository) -> String {
        format!(
            "{}://gitlab-ci-token:{}@{}/{}/{}.git",
            self.config.protocol,
            encode_component(&self.config.access_token),
            self.config.clone_host,
            repo.project,
            repo.slug
        )
    }
}
