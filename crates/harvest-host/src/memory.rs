use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use harvest_core::error::HarvestError;
use harvest_core::models::{ActivitySample, ActivityWindow, Branch, PlatformKind, Project, Repository};

use crate::PlatformAdapter;

/// In-memory adapter for tests.
///
/// Repositories, branches and their activity are seeded up front. Every
/// call is counted, and individual calls can be scripted to answer with
/// rate limits, outages or hard failures.
pub struct MemoryAdapter {
    kind: PlatformKind,
    projects: Vec<Project>,
    repos: BTreeMap<String, Vec<Repository>>,
    branches: HashMap<String, Vec<Branch>>,
    empty: HashSet<String>,
    failures: HashMap<String, String>,
    rate_limits: Mutex<HashMap<String, u32>>,
    outages: Mutex<HashMap<String, u32>>,
    retry_after_secs: u64,
    latency: Duration,
    calls: Calls,
}

/// Call counters, one per adapter operation.
#[derive(Default)]
pub struct Calls {
    pub list_projects: AtomicUsize,
    pub list_repositories: AtomicUsize,
    pub list_branches: AtomicUsize,
    pub is_empty: AtomicUsize,
    pub sample_activity: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl MemoryAdapter {
    pub fn new(kind: PlatformKind) -> Self {
        Self {
            kind,
            projects: Vec::new(),
            repos: BTreeMap::new(),
            branches: HashMap::new(),
            empty: HashSet::new(),
            failures: HashMap::new(),
            rate_limits: Mutex::new(HashMap::new()),
            outages: Mutex::new(HashMap::new()),
            retry_after_secs: 0,
            latency: Duration::ZERO,
            calls: Calls::default(),
        }
    }

    pub fn with_project(mut self, project: Project) -> Self {
        self.repos.entry(project.key.clone()).or_default();
        self.projects.push(project);
        self
    }

    /// Add a repository with its branches. The project is created on first use.
    pub fn with_repo(mut self, repo: Repository, branches: Vec<Branch>) -> Self {
        if !self.projects.iter().any(|p| p.key == repo.project) {
            self.projects.push(Project::new(repo.project.clone(), repo.project.clone()));
        }
        self.branches.insert(repo.full_name(), branches);
        self.repos.entry(repo.project.clone()).or_default().push(repo);
        self
    }

    /// Add a repository that has no content.
    pub fn with_empty_repo(mut self, repo: Repository) -> Self {
        self.empty.insert(repo.full_name());
        self.with_repo(repo, Vec::new())
    }

    /// Make every branch listing of `full_name` fail permanently.
    pub fn failing(mut self, full_name: &str, message: &str) -> Self {
        self.failures.insert(full_name.to_string(), message.to_string());
        self
    }

    /// Answer the next `times` branch listings of `full_name` with a rate limit.
    pub fn rate_limited(self, full_name: &str, times: u32) -> Self {
        script(&self.rate_limits, full_name.to_string(), times);
        self
    }

    /// Answer the next `times` project listings with a rate limit.
    pub fn rate_limited_projects(self, times: u32) -> Self {
        script(&self.rate_limits, PROJECTS.to_string(), times);
        self
    }

    /// Answer the next `times` activity samples of one branch with a rate limit.
    pub fn rate_limited_sample(self, full_name: &str, branch: &str, times: u32) -> Self {
        script(&self.rate_limits, sample_key(full_name, branch), times);
        self
    }

    /// Answer the next `times` repository listings of `project` with a 503.
    pub fn unavailable_repositories(self, project: &str, times: u32) -> Self {
        script(&self.outages, repositories_key(project), times);
        self
    }

    /// Delay reported with scripted rate limits.
    pub fn retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = secs;
        self
    }

    /// Simulated per-call latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> &Calls {
        &self.calls
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn take_rate_limit(&self, key: &str) -> Result<(), HarvestError> {
        if take(&self.rate_limits, key)? {
            return Err(HarvestError::RateLimited {
                platform: self.kind.to_string(),
                retry_after_secs: self.retry_after_secs,
            });
        }
        Ok(())
    }

    fn take_outage(&self, key: &str) -> Result<(), HarvestError> {
        if take(&self.outages, key)? {
            return Err(HarvestError::ApiError {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(())
    }

    fn branches_of(&self, repo: &Repository) -> Result<&Vec<Branch>, HarvestError> {
        self.branches
            .get(&repo.full_name())
            .ok_or_else(|| HarvestError::RepoNotFound {
                name: repo.full_name(),
            })
    }
}

const PROJECTS: &str = "projects";

fn sample_key(full_name: &str, branch: &str) -> String {
    format!("{full_name}@{branch}")
}

fn repositories_key(project: &str) -> String {
    format!("repositories:{project}")
}

fn script(counters: &Mutex<HashMap<String, u32>>, key: String, times: u32) {
    if let Ok(mut counters) = counters.lock() {
        counters.insert(key, times);
    }
}

/// Consume one scripted answer for `key`, if any are left.
fn take(counters: &Mutex<HashMap<String, u32>>, key: &str) -> Result<bool, HarvestError> {
    let mut counters = counters.lock().map_err(|e| HarvestError::Other(e.to_string()))?;
    match counters.get_mut(key) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[async_trait]
impl PlatformAdapter for MemoryAdapter {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    async fn list_projects(&self) -> Result<Vec<Project>, HarvestError> {
        self.calls.list_projects.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.take_rate_limit(PROJECTS)?;
        Ok(self.projects.clone())
    }

    async fn list_repositories(&self, project: &Project) -> Result<Vec<Repository>, HarvestError> {
        self.calls.list_repositories.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.take_outage(&repositories_key(&project.key))?;
        self.repos
            .get(&project.key)
            .cloned()
            .ok_or_else(|| HarvestError::ProjectNotFound {
                key: project.key.clone(),
            })
    }

    async fn list_branches(&self, repo: &Repository) -> Result<Vec<Branch>, HarvestError> {
        self.calls.list_branches.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(message) = self.failures.get(&repo.full_name()) {
            return Err(HarvestError::ApiError {
                status: 404,
                message: message.clone(),
            });
        }
        self.take_rate_limit(&repo.full_name())?;
        Ok(self
            .branches_of(repo)?
            .iter()
            .map(|b| Branch {
                activity: Vec::new(),
                ..b.clone()
            })
            .collect())
    }

    async fn is_empty(&self, repo: &Repository, _branch: Option<&str>) -> Result<bool, HarvestError> {
        self.calls.is_empty.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.empty.contains(&repo.full_name()))
    }

    async fn sample_activity(
        &self,
        repo: &Repository,
        branch: &str,
        _window: &ActivityWindow,
    ) -> Result<ActivitySample, HarvestError> {
        self.calls.sample_activity.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.take_rate_limit(&sample_key(&repo.full_name(), branch))?;
        let branch = self
            .branches_of(repo)?
            .iter()
            .find(|b| b.name == branch)
            .ok_or_else(|| HarvestError::BranchNotFound {
                repo: repo.full_name(),
                branch: branch.to_string(),
            })?;
        Ok(branch.total_activity())
    }

    fn clone_url(&self, repo: &Repository) -> String {
        format!("memory://{}", repo.full_name())
    }
}
