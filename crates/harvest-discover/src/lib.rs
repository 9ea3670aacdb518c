pub mod exclusion;
pub mod scorer;

use harvest_core::config::PlatformConfig;
use harvest_core::error::HarvestError;
use harvest_core::models::{ActivityWindow, Branch, Project, Repository};
use harvest_host::retry::{with_retry, RetryPolicy};
use harvest_host::PlatformAdapter;
use tracing::{debug, info, instrument};

pub use crate::exclusion::{is_excluded, ExclusionList};
pub use crate::scorer::{select_branch, ScoreOptions, Selection, SelectionReason};

/// Every repository of one organization, classified for dispatch.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub organization: String,
    pub projects: Vec<Project>,
    /// Repositories listed across all in-scope projects.
    pub discovered: usize,
    pub excluded: Vec<Repository>,
    pub archived: Vec<Repository>,
    /// Filtered out by the `Repos` restriction.
    pub out_of_scope: usize,
    /// Ordered by (project, slug).
    pub admitted: Vec<Repository>,
}

/// Enumerate the organization and classify every repository.
///
/// Every listing call goes through `retry`. Fails with `ProjectNotFound`
/// when a `Project` scope matches nothing, with `NothingToAnalyze` when no
/// repository is admitted, and with the rate-limit error once a listing
/// used up its rate-limit budget.
#[instrument(skip_all, fields(platform = %config.name, organization = %config.organization))]
pub async fn discover(
    adapter: &dyn PlatformAdapter,
    config: &PlatformConfig,
    exclusions: &ExclusionList,
    retry: &RetryPolicy,
) -> Result<Inventory, HarvestError> {
    let mut projects = with_retry(retry, "list projects", || adapter.list_projects()).await?;
    if let Some(scope) = &config.project {
        projects.retain(|p| in_project_scope(&p.key, scope));
        if projects.is_empty() {
            return Err(HarvestError::ProjectNotFound { key: scope.clone() });
        }
    }

    let mut inventory = Inventory {
        organization: config.organization.clone(),
        ..Inventory::default()
    };

    for project in &projects {
        let repos = with_retry(retry, &project.key, || adapter.list_repositories(project)).await?;
        debug!(project = %project.key, count = repos.len(), "listed repositories");
        inventory.discovered += repos.len();
        for repo in repos {
            if exclusions.is_excluded(&repo.project, &repo.slug) {
                inventory.excluded.push(repo);
            } else if repo.archived {
                inventory.archived.push(repo);
            } else if !config.repo_in_scope(&repo.slug) {
                inventory.out_of_scope += 1;
            } else {
                inventory.admitted.push(repo);
            }
        }
    }
    inventory.projects = projects;
    inventory
        .admitted
        .sort_by(|a, b| (&a.project, &a.slug).cmp(&(&b.project, &b.slug)));

    info!(
        discovered = inventory.discovered,
        excluded = inventory.excluded.len(),
        archived = inventory.archived.len(),
        admitted = inventory.admitted.len(),
        "discovery finished"
    );

    if inventory.admitted.is_empty() {
        return Err(HarvestError::NothingToAnalyze {
            organization: inventory.organization,
        });
    }
    Ok(inventory)
}

fn in_project_scope(key: &str, scope: &str) -> bool {
    key == scope
        || key
            .strip_prefix(scope)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// The branch picked for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchChoice {
    pub selection: Selection,
    pub branch_count: u64,
    /// Commits on the chosen branch within the window; zero when activity
    /// was not sampled.
    pub commits: u64,
}

/// List the branches of `repo`, sample activity where scoring needs it,
/// and pick one. `None` means the repository has no branches.
///
/// Each platform call is retried on its own, so a rate limit on one
/// sample does not repeat the listing or the samples already taken.
pub async fn choose_branch(
    adapter: &dyn PlatformAdapter,
    repo: &Repository,
    options: &ScoreOptions,
    window: &ActivityWindow,
    retry: &RetryPolicy,
) -> Result<Option<BranchChoice>, HarvestError> {
    let target = repo.full_name();
    let mut branches = with_retry(retry, &target, || adapter.list_branches(repo)).await?;
    let branch_count = branches.len() as u64;

    if let Some(selection) = scorer::preselect(repo, &branches, options) {
        return Ok(Some(BranchChoice {
            selection,
            branch_count,
            commits: 0,
        }));
    }

    for branch in &mut branches {
        let name = branch.name.as_str();
        let sample =
            with_retry(retry, &target, || adapter.sample_activity(repo, name, window)).await?;
        branch.activity.push(sample);
    }

    // Pinned and default-only were handled above.
    let options = ScoreOptions::default();
    Ok(select_branch(repo, &branches, &options).map(|selection| {
        let commits = commits_on(&branches, &selection.branch);
        BranchChoice {
            selection,
            branch_count,
            commits,
        }
    }))
}

fn commits_on(branches: &[Branch], name: &str) -> u64 {
    branches
        .iter()
        .find(|b| b.name == name)
        .map_or(0, |b| b.total_activity().commits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use harvest_core::config::RawPlatform;
    use harvest_core::models::{ActivitySample, PlatformKind};
    use harvest_host::memory::{Calls, MemoryAdapter};
    use std::time::Duration;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    fn config(project: &str, repos: &str) -> PlatformConfig {
        RawPlatform {
            dev_ops: "bitbucket".into(),
            workspace: Some("acme".into()),
            access_token: "t".into(),
            project: project.into(),
            repos: repos.into(),
            ..RawPlatform::default()
        }
        .validate("bb")
        .unwrap()
    }

    fn adapter() -> MemoryAdapter {
        MemoryAdapter::new(PlatformKind::Bitbucket)
            .with_repo(Repository::new("OPS", "tools"), vec![Branch::new("main")])
            .with_repo(Repository::new("CORE", "web"), vec![Branch::new("main")])
            .with_repo(Repository::new("CORE", "api"), vec![Branch::new("main")])
            .with_repo(
                Repository::new("CORE", "old").archived(true),
                vec![Branch::new("main")],
            )
    }

    #[tokio::test]
    async fn test_discover_classifies_and_orders() {
        let exclusions = ExclusionList::parse("OPS\n");
        let inventory = discover(&adapter(), &config("", ""), &exclusions, &quick()).await.unwrap();

        assert_eq!(inventory.discovered, 4);
        assert_eq!(inventory.excluded.len(), 1);
        assert_eq!(inventory.archived.len(), 1);
        let admitted: Vec<String> = inventory.admitted.iter().map(|r| r.full_name()).collect();
        assert_eq!(admitted, vec!["CORE/api", "CORE/web"]);
    }

    #[tokio::test]
    async fn test_project_and_repo_scope() {
        let adapter = adapter();
        let inventory = discover(&adapter, &config("CORE", "web"), &ExclusionList::new(), &quick())
            .await
            .unwrap();
        assert_eq!(inventory.projects.len(), 1);
        assert_eq!(inventory.out_of_scope, 1);
        assert_eq!(inventory.admitted.len(), 1);
        assert_eq!(Calls::get(&adapter.calls().list_repositories), 1);

        let err = discover(&adapter, &config("NOPE", ""), &ExclusionList::new(), &quick())
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::ProjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_nothing_admitted_is_fatal() {
        let exclusions = ExclusionList::parse("OPS\nCORE\n");
        let err = discover(&adapter(), &config("", ""), &exclusions, &quick()).await.unwrap_err();
        assert!(matches!(err, HarvestError::NothingToAnalyze { .. }));
    }

    #[tokio::test]
    async fn test_choose_branch_samples_activity() {
        let repo = Repository::new("CORE", "api").with_default_branch("main");
        let adapter = MemoryAdapter::new(PlatformKind::Bitbucket).with_repo(
            repo.clone(),
            vec![
                Branch::new("main").default_branch(),
                Branch::new("feature").with_activity(ActivitySample::commits(4)),
            ],
        );
        let window = ActivityWindow::trailing_months(1, Utc::now());

        let choice = choose_branch(&adapter, &repo, &ScoreOptions::default(), &window, &quick())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(choice.selection.branch, "feature");
        assert_eq!(choice.branch_count, 2);
        assert_eq!(choice.commits, 4);
        assert_eq!(Calls::get(&adapter.calls().sample_activity), 2);
    }

    #[tokio::test]
    async fn test_choose_branch_pinned_skips_sampling() {
        let repo = Repository::new("CORE", "api");
        let adapter = MemoryAdapter::new(PlatformKind::Bitbucket).with_repo(
            repo.clone(),
            vec![Branch::new("main"), Branch::new("release")],
        );
        let options = ScoreOptions {
            pinned: Some("release".into()),
            default_only: false,
        };
        let window = ActivityWindow::trailing_months(1, Utc::now());

        let choice = choose_branch(&adapter, &repo, &options, &window, &quick())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(choice.selection.reason, SelectionReason::Pinned);
        assert_eq!(Calls::get(&adapter.calls().sample_activity), 0);
    }

    #[tokio::test]
    async fn test_listing_survives_rate_limit_and_outage() {
        let adapter = adapter().rate_limited_projects(1).unavailable_repositories("CORE", 2);
        let inventory = discover(&adapter, &config("", ""), &ExclusionList::new(), &quick())
            .await
            .unwrap();

        assert_eq!(inventory.discovered, 4);
        assert_eq!(Calls::get(&adapter.calls().list_projects), 2);
        // Two projects, CORE answered twice with 503 first.
        assert_eq!(Calls::get(&adapter.calls().list_repositories), 4);
    }

    #[tokio::test]
    async fn test_listing_rate_limit_budget_exhausted() {
        let adapter = adapter().rate_limited_projects(5);
        let retry = RetryPolicy {
            rate_limit_budget: 1,
            ..quick()
        };
        let err = discover(&adapter, &config("", ""), &ExclusionList::new(), &retry)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(Calls::get(&adapter.calls().list_projects), 2);
        assert_eq!(Calls::get(&adapter.calls().list_repositories), 0);
    }

    #[tokio::test]
    async fn test_choose_branch_retries_only_the_failing_sample() {
        let repo = Repository::new("CORE", "api").with_default_branch("b1");
        let adapter = MemoryAdapter::new(PlatformKind::Bitbucket)
            .with_repo(
                repo.clone(),
                vec![
                    Branch::new("b1").default_branch(),
                    Branch::new("b2").with_activity(ActivitySample::commits(1)),
                    Branch::new("b3").with_activity(ActivitySample::commits(2)),
                    Branch::new("b4").with_activity(ActivitySample::commits(3)),
                ],
            )
            .rate_limited_sample("CORE/api", "b4", 1);
        let window = ActivityWindow::trailing_months(1, Utc::now());

        let choice = choose_branch(&adapter, &repo, &ScoreOptions::default(), &window, &quick())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(choice.selection.branch, "b4");
        assert_eq!(Calls::get(&adapter.calls().list_branches), 1);
        assert_eq!(Calls::get(&adapter.calls().sample_activity), 5);
    }

    #[test]
    fn test_project_scope_prefix() {
        assert!(in_project_scope("group/sub", "group"));
        assert!(!in_project_scope("groupies", "group"));
    }
}
