use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use harvest_core::config::{PlatformConfig, PlatformSettings};
use harvest_core::error::HarvestError;
use harvest_core::models::{ActivitySample, ActivityWindow, Branch, PlatformKind, Project, Repository};

use crate::http::{encode_component, header_str, with_query_param, ApiClient, Auth};
use crate::{probe_branch, PlatformAdapter};

const TOP: u64 = 100;
const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";

/// Azure DevOps Services adapter. Projects and refs page with an opaque
/// continuation token; commits page with `$top`/`$skip`.
pub struct AzureDevOpsAdapter {
    api: ApiClient,
    config: PlatformConfig,
    organization: String,
}

#[derive(Deserialize)]
struct List<T> {
    value: Vec<T>,
}

#[derive(Deserialize)]
struct AzProject {
    id: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzRepo {
    id: String,
    name: String,
    default_branch: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    is_disabled: bool,
}

#[derive(Deserialize)]
struct AzRef {
    name: String,
}

fn short_ref(name: &str) -> &str {
    name.strip_prefix("refs/heads/").unwrap_or(name)
}

impl AzureDevOpsAdapter {
    pub fn new(config: &PlatformConfig) -> Result<Self, HarvestError> {
        let organization = match &config.settings {
            PlatformSettings::AzureDevOps { organization } => organization.clone(),
            _ => {
                return Err(HarvestError::config(
                    "Azure DevOps adapter needs Azure DevOps settings",
                ))
            }
        };
        let api = ApiClient::new(
            PlatformKind::AzureDevOps,
            Auth::Basic {
                user: String::new(),
                password: config.access_token.clone(),
            },
            HeaderMap::new(),
        )?;
        Ok(Self {
            api,
            config: config.clone(),
            organization,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, HarvestError> {
        let mut url = self
            .config
            .endpoint(&format!("{}/{path}", self.organization))?;
        url.query_pairs_mut()
            .extend_pairs(query)
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }

    fn repo_path(repo: &Repository) -> String {
        format!(
            "{}/_apis/git/repositories/{}",
            repo.project_api_id(),
            repo.api_id()
        )
    }

    async fn continuation_get<T: for<'de> Deserialize<'de>>(
        &self,
        first: Url,
    ) -> Result<Vec<T>, HarvestError> {
        let mut all = Vec::new();
        let mut url = first.clone();
        loop {
            let (page, headers): (List<T>, _) = self.api.get_page(&url).await?;
            all.extend(page.value);
            match header_str(&headers, CONTINUATION_HEADER) {
                Some(token) => url = with_query_param(&first, "continuationToken", &token),
                None => break,
            }
        }
        Ok(all)
    }
}

#[async_trait]
impl PlatformAdapter for AzureDevOpsAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::AzureDevOps
    }

    #[instrument(skip(self), fields(organization = %self.organization))]
    async fn list_projects(&self) -> Result<Vec<Project>, HarvestError> {
        let top = TOP.to_string();
        let projects: Vec<AzProject> = self
            .continuation_get(self.url("_apis/projects", &[("$top", top.as_str())])?)
            .await?;
        debug!(count = projects.len(), "listed projects");
        Ok(projects
            .into_iter()
            .map(|p| {
                let mut project = Project::new(p.name.clone(), p.name);
                project.id = Some(p.id);
                project
            })
            .collect())
    }

    #[instrument(skip(self, project), fields(project = %project.key))]
    async fn list_repositories(&self, project: &Project) -> Result<Vec<Repository>, HarvestError> {
        let url = self.url(&format!("{}/_apis/git/repositories", project.api_id()), &[])?;
        let repos: List<AzRepo> = self.api.get_json(&url).await?;
        Ok(repos
            .value
            .into_iter()
            .map(|r| {
                let mut repo = Repository::new(project.key.clone(), r.name)
                    .with_size(r.size)
                    .archived(r.is_disabled);
                repo.id = Some(r.id);
                repo.project_id = project.id.clone();
                repo.default_branch = r.default_branch.as_deref().map(|b| short_ref(b).to_string());
                repo
            })
            .collect())
    }

    async fn list_branches(&self, repo: &Repository) -> Result<Vec<Branch>, HarvestError> {
        let top = TOP.to_string();
        let url = self.url(
            &format!("{}/refs", Self::repo_path(repo)),
            &[("filter", "heads/"), ("$top", top.as_str())],
        )?;
        let refs: Vec<AzRef> = self.continuation_get(url).await?;
        Ok(refs
            .iter()
            .map(|r| {
                let name = short_ref(&r.name);
                let branch = Branch::new(name);
                if repo.default_branch.as_deref() == Some(name) {
                    branch.default_branch()
                } else {
                    branch
                }
            })
            .collect())
    }

    async fn is_empty(&self, repo: &Repository, branch: Option<&str>) -> Result<bool, HarvestError> {
        let mut query = vec![("searchCriteria.$top", "1")];
        if let Some(b) = probe_branch(repo, branch) {
            query.push(("searchCriteria.itemVersion.version", b));
        }
        let url = self.url(&format!("{}/commits", Self::repo_path(repo)), &query)?;
        let commits: Option<List<IgnoredAny>> = self.api.get_json_optional(&url).await?;
        Ok(commits.map_or(true, |c| c.value.is_empty()))
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
        let top = TOP.to_string();
        let first = self.url(
            &format!("{}/commits", Self::repo_path(repo)),
            &[
                ("searchCriteria.itemVersion.version", branch),
                ("searchCriteria.fromDate", since.as_str()),
                ("searchCriteria.toDate", until.as_str()),
                ("searchCriteria.$top", top.as_str()),
            ],
        )?;

        let mut commits = 0u64;
        let mut skip = 0u64;
        loop {
            let url = with_query_param(&first, "searchCriteria.$skip", &skip.to_string());
            let page: List<IgnoredAny> = match self.api.get_json_optional(&url).await? {
                Some(page) => page,
                None => break,
            };
            let count = page.value.len() as u64;
            commits += count;
            if count < TOP {
                break;
            }
            skip += TOP;
        }
        Ok(ActivitySample::commits(commits))
    }

    fn clone_url(&self, repo: &Repository) -> String {
        format!(
            "{}://{}@{}/{}/{}/_git/{}",
            self.config.protocol,
            encode_component(&self.config.access_token),
            self.config.clone_host,
            self.organization,
            repo.project.replace(' ', "%20"),
            repo.name.replace(' ', "%20")
        )
    }
}
