pub mod azure_devops;
pub mod bitbucket;
pub mod bitbucket_dc;
pub mod github;
pub mod gitlab;
pub mod http;
pub mod memory;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;

use harvest_core::config::PlatformConfig;
use harvest_core::error::HarvestError;
use harvest_core::models::{ActivitySample, ActivityWindow, Branch, PlatformKind, Project, Repository};

/// Uniform repository/branch enumeration over one hosting platform.
///
/// Implementations loop over the platform's pagination internally; callers
/// always receive the complete, flattened list.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// The kind of platform this adapter talks to.
    fn kind(&self) -> PlatformKind;

    /// List the projects of the configured organization. Platforms without a
    /// project level return one implicit project.
    async fn list_projects(&self) -> Result<Vec<Project>, HarvestError>;

    /// List all repositories of a project.
    async fn list_repositories(&self, project: &Project) -> Result<Vec<Repository>, HarvestError>;

    /// List all branches of a repository, without activity.
    async fn list_branches(&self, repo: &Repository) -> Result<Vec<Branch>, HarvestError>;

    /// Whether the repository has no content on `branch` (or its default
    /// branch when `None`). A 404 on the probe means empty.
    async fn is_empty(&self, repo: &Repository, branch: Option<&str>) -> Result<bool, HarvestError>;

    /// Activity on `branch` within `window`.
    async fn sample_activity(
        &self,
        repo: &Repository,
        branch: &str,
        window: &ActivityWindow,
    ) -> Result<ActivitySample, HarvestError>;

    /// Authenticated clone URL handed to the source fetcher.
    fn clone_url(&self, repo: &Repository) -> String;
}

/// Create the adapter for a validated platform configuration.
pub fn create_adapter(config: &PlatformConfig) -> Result<Arc<dyn PlatformAdapter>, HarvestError> {
    if !config.has_token() {
        return Err(HarvestError::AuthFailed {
            platform: config.name.clone(),
            message: "no access token".into(),
        });
    }
    let adapter: Arc<dyn PlatformAdapter> = match config.kind {
        PlatformKind::GitHub => Arc::new(github::GitHubAdapter::new(config)?),
        PlatformKind::GitLab => Arc::new(gitlab::GitLabAdapter::new(config)?),
        PlatformKind::Bitbucket => Arc::new(bitbucket::BitbucketAdapter::new(config)?),
        PlatformKind::BitbucketDc => Arc::new(bitbucket_dc::BitbucketDcAdapter::new(config)?),
        PlatformKind::AzureDevOps => Arc::new(azure_devops::AzureDevOpsAdapter::new(config)?),
    };
    Ok(adapter)
}

/// Branch to probe or sample when the caller has not chosen one.
pub(crate) fn probe_branch<'a>(repo: &'a Repository, branch: Option<&'a str>) -> Option<&'a str> {
    branch.or(repo.default_branch.as_deref())
}
