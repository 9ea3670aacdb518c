use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use harvest_core::error::HarvestError;
use harvest_core::models::{
    format_code_lines, AnalysisResult, HarvestJob, InFlight, JobOutcome, Repository, RunSummary,
    SkipReason, SkipRecord,
};
use harvest_discover::{choose_branch, discover, BranchChoice, Inventory};
use harvest_host::retry::with_retry;
pub use harvest_host::retry::RetryPolicy;
use harvest_host::PlatformAdapter;

use crate::aggregate::{aggregate, Aggregate};
use crate::checkpoint::Checkpoint;
use crate::context::RunContext;
use crate::fetcher::SourceFetcher;
use crate::scanner::CodeScanner;
use crate::sink::ResultSink;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The rate-limit budget ran out. Resuming from `checkpoint` continues
    /// with `in_flight`, which is `None` when discovery was cut short
    /// before any job started.
    RateLimited {
        in_flight: Option<InFlight>,
        checkpoint: Option<PathBuf>,
    },
}

/// Everything a run produced, including work restored from a checkpoint.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub organization: String,
    pub platform: String,
    /// Ordered by sequence number.
    pub results: Vec<AnalysisResult>,
    pub skipped: Vec<SkipRecord>,
    pub aggregate: Aggregate,
    /// Jobs already finished by an earlier, interrupted run.
    pub resumed: usize,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        self.aggregate.summary(&self.organization, &self.platform)
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Runs admitted repositories in batches with a join barrier between them.
#[derive(Clone)]
pub struct Dispatcher {
    adapter: Arc<dyn PlatformAdapter>,
    fetcher: Arc<dyn SourceFetcher>,
    scanner: Arc<dyn CodeScanner>,
    ctx: Arc<RunContext>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        adapter: Arc<dyn PlatformAdapter>,
        fetcher: Arc<dyn SourceFetcher>,
        scanner: Arc<dyn CodeScanner>,
        ctx: RunContext,
    ) -> Self {
        Self {
            adapter,
            fetcher,
            scanner,
            ctx: Arc::new(ctx),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Enumerate and classify the organization's repositories, retrying
    /// each listing call under the run's retry policy.
    pub async fn discover(&self) -> Result<Inventory, HarvestError> {
        discover(
            self.adapter.as_ref(),
            &self.ctx.config,
            &self.ctx.exclusions,
            &self.retry,
        )
        .await
    }

    /// Discover, then run. A listing that exhausts its rate-limit budget
    /// ends the run as rate-limited without a job in flight; a checkpoint
    /// handed in as `resume` is left untouched for the next attempt.
    pub async fn harvest(&self, resume: Option<Checkpoint>) -> Result<RunReport, HarvestError> {
        match self.discover().await {
            Ok(inventory) => self.run(&inventory, resume).await,
            Err(e) if e.is_rate_limited() => {
                warn!(error = %e, "rate limit budget exhausted during discovery");
                self.stopped_before_dispatch(resume)
            }
            Err(e) => Err(e),
        }
    }

    fn stopped_before_dispatch(&self, resume: Option<Checkpoint>) -> Result<RunReport, HarvestError> {
        let config = &self.ctx.config;
        let (checkpoint, saved) = match resume {
            Some(cp) => {
                cp.ensure_matches(&config.name, &config.organization)?;
                (cp, self.ctx.checkpoint_path.clone())
            }
            None => (Checkpoint::new(self.ctx.run_id, &config.name, &config.organization), None),
        };
        let resumed = checkpoint.done().len();
        let mut results = checkpoint.results;
        results.sort_by_key(|r| r.sequence);
        let mut skipped = checkpoint.skipped;
        skipped.sort_by_key(|s| s.sequence);
        Ok(RunReport {
            run_id: checkpoint.run_id,
            outcome: RunOutcome::RateLimited {
                in_flight: None,
                checkpoint: saved,
            },
            organization: config.organization.clone(),
            platform: config.kind.to_string(),
            aggregate: aggregate(&results, &skipped),
            results,
            skipped,
            resumed,
        })
    }

    /// Harvest every admitted repository of `inventory`.
    ///
    /// With `resume`, repositories keep the sequence numbers the checkpoint
    /// gave them, repositories that appeared since are numbered after them,
    /// and jobs recorded as done are not dispatched again.
    #[instrument(skip_all, fields(run_id = %self.ctx.run_id, platform = %self.ctx.config.name))]
    pub async fn run(
        &self,
        inventory: &Inventory,
        resume: Option<Checkpoint>,
    ) -> Result<RunReport, HarvestError> {
        let config = &self.ctx.config;
        let mut checkpoint = match resume {
            Some(mut cp) => {
                cp.ensure_matches(&config.name, &config.organization)?;
                cp.clear_in_flight();
                cp
            }
            None => Checkpoint::new(self.ctx.run_id, &config.name, &config.organization),
        };

        let jobs = checkpoint.assign(&inventory.admitted);
        let total = jobs.len();
        let pending: Vec<(u64, Repository)> = jobs
            .into_iter()
            .filter(|(sequence, _)| !checkpoint.is_done(*sequence))
            .collect();
        let resumed = total - pending.len();
        let batch_size = config.concurrency.batch_size(pending.len());
        info!(total, pending = pending.len(), resumed, batch_size, "dispatching");

        let sink = self.ctx.results_dir.as_ref().map(ResultSink::new);
        let progress = MultiProgress::with_draw_target(if self.ctx.show_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        });

        let mut stopped: Option<InFlight> = None;
        for (index, batch) in pending.chunks(batch_size.max(1)).enumerate() {
            debug!(batch = index + 1, size = batch.len(), "batch started");
            let outcomes = self.run_batch(batch, &progress).await;
            for outcome in &outcomes {
                if let (JobOutcome::Analyzed(result), Some(sink)) = (outcome, &sink) {
                    if let Err(e) = sink.write_report(result) {
                        warn!(repo = %result.full_name(), error = %e, "could not write report");
                    }
                }
                if let JobOutcome::RateLimited { in_flight, .. } = outcome {
                    stopped.get_or_insert_with(|| in_flight.clone());
                }
                checkpoint.record(outcome);
            }
            if let Some(path) = &self.ctx.checkpoint_path {
                checkpoint.save(path)?;
            }
            if stopped.is_some() {
                break;
            }
        }

        let outcome = match stopped {
            Some(in_flight) => {
                warn!(
                    project = %in_flight.project,
                    repo = %in_flight.repo,
                    "rate limit budget exhausted, run stopped"
                );
                RunOutcome::RateLimited {
                    in_flight: Some(in_flight),
                    checkpoint: self.ctx.checkpoint_path.clone(),
                }
            }
            None => {
                if let Some(path) = &self.ctx.checkpoint_path {
                    Checkpoint::delete(path)?;
                }
                RunOutcome::Completed
            }
        };

        let mut results = checkpoint.results;
        results.sort_by_key(|r| r.sequence);
        let mut skipped = checkpoint.skipped;
        skipped.sort_by_key(|s| s.sequence);
        let aggregate = Aggregate::from_inventory(inventory).merge(aggregate(&results, &skipped));
        info!(
            analyzed = aggregate.analyzed,
            empty = aggregate.empty,
            failed = aggregate.failed,
            "run finished"
        );

        Ok(RunReport {
            run_id: checkpoint.run_id,
            outcome,
            organization: config.organization.clone(),
            platform: config.kind.to_string(),
            results,
            skipped,
            aggregate,
            resumed,
        })
    }

    /// Run one batch concurrently and wait for every job to finish.
    async fn run_batch(&self, batch: &[(u64, Repository)], progress: &MultiProgress) -> Vec<JobOutcome> {
        let (tx, mut rx) = mpsc::channel(batch.len().max(1));
        let mut handles = Vec::with_capacity(batch.len());

        for (sequence, repo) in batch.iter().cloned() {
            let tx = tx.clone();
            let this = self.clone();
            let pb = spinner(progress, &repo);
            let job_repo = repo.clone();
            let handle = tokio::spawn(async move {
                let outcome = this.run_job(sequence, job_repo).await;
                pb.finish_with_message(describe(&outcome));
                let _ = tx.send(outcome).await;
            });
            handles.push((sequence, repo, handle));
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(batch.len());
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        for (sequence, repo, handle) in handles {
            if let Err(e) = handle.await {
                if !outcomes.iter().any(|o| o.sequence() == sequence) {
                    warn!(repo = %repo.full_name(), error = %e, "job aborted");
                    outcomes.push(JobOutcome::Skipped(SkipRecord::failed(
                        sequence,
                        &repo,
                        format!("job aborted: {e}"),
                    )));
                }
            }
        }
        outcomes.sort_by_key(JobOutcome::sequence);
        outcomes
    }

    async fn run_job(self, sequence: u64, repo: Repository) -> JobOutcome {
        let choice = match self.select(&repo).await {
            Ok(Some(choice)) => choice,
            Ok(None) => {
                debug!(repo = %repo.full_name(), "empty repository");
                return JobOutcome::Skipped(SkipRecord::empty(sequence, &repo));
            }
            Err(e) => return self.failure(sequence, &repo, "", e),
        };
        let job = HarvestJob {
            sequence,
            repository: repo,
            branch: choice.selection.branch.clone(),
        };
        match self.analyze(&job, &choice).await {
            Ok(result) => JobOutcome::Analyzed(result),
            Err(e) => self.failure(job.sequence, &job.repository, &job.branch, e),
        }
    }

    /// Probe for content and pick the branch; `None` means nothing to analyze.
    async fn select(&self, repo: &Repository) -> Result<Option<BranchChoice>, HarvestError> {
        let adapter = self.adapter.as_ref();
        if self.call(repo, move || adapter.is_empty(repo, None)).await? {
            return Ok(None);
        }
        let choice =
            choose_branch(adapter, repo, &self.ctx.score, &self.ctx.window, &self.retry).await?;
        if let Some(choice) = &choice {
            debug!(
                repo = %repo.full_name(),
                branch = %choice.selection.branch,
                reason = %choice.selection.reason,
                "branch selected"
            );
        }
        Ok(choice)
    }

    async fn analyze(&self, job: &HarvestJob, choice: &BranchChoice) -> Result<AnalysisResult, HarvestError> {
        let repo = &job.repository;
        let url = self.adapter.clone_url(repo);
        let fetcher = self.fetcher.as_ref();
        let (url, branch) = (url.as_str(), job.branch.as_str());
        let tree = self.call(repo, move || fetcher.fetch(url, branch)).await?;

        let report = self.scanner.scan(tree.path()).await;
        if let Err(e) = tree.remove() {
            warn!(repo = %repo.full_name(), error = %e, "could not remove working tree");
        }
        let report = report?;

        Ok(AnalysisResult {
            sequence: job.sequence,
            project: repo.project.clone(),
            repo: repo.slug.clone(),
            branch: job.branch.clone(),
            size: repo.size,
            commits: choice.commits,
            branch_count: choice.branch_count,
            report,
        })
    }

    fn failure(&self, sequence: u64, repo: &Repository, branch: &str, error: HarvestError) -> JobOutcome {
        if error.is_rate_limited() {
            return JobOutcome::RateLimited {
                sequence,
                in_flight: InFlight {
                    project: repo.project.clone(),
                    repo: repo.slug.clone(),
                    branch: branch.to_string(),
                },
            };
        }
        warn!(repo = %repo.full_name(), error = %error, "job failed");
        JobOutcome::Skipped(SkipRecord::failed(sequence, repo, error.to_string()))
    }

    /// Retry `op` on transient errors and sit out rate limits within the budget.
    async fn call<T, F, Fut>(&self, repo: &Repository, op: F) -> Result<T, HarvestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HarvestError>>,
    {
        with_retry(&self.retry, &repo.full_name(), op).await
    }
}

fn spinner(progress: &MultiProgress, repo: &Repository) -> ProgressBar {
    let style = ProgressStyle::with_template("{spinner:.green} {msg}")
        .map(|s| s.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let pb = progress.add(ProgressBar::new_spinner());
    pb.set_style(style);
    pb.set_message(format!("harvesting {}", repo.full_name()));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn describe(outcome: &JobOutcome) -> String {
    match outcome {
        JobOutcome::Analyzed(r) => format!(
            "{} @ {}: {} lines",
            r.full_name(),
            r.branch,
            format_code_lines(r.report.total_code_lines)
        ),
        JobOutcome::Skipped(s) => match &s.reason {
            SkipReason::Empty => format!("{}/{}: empty", s.project, s.repo),
            SkipReason::Failed { message } => format!("{}/{}: failed ({message})", s.project, s.repo),
        },
        JobOutcome::RateLimited { in_flight, .. } => {
            format!("{}/{}: rate limited", in_flight.project, in_flight.repo)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use harvest_core::config::RawPlatform;
    use harvest_core::models::{ActivitySample, Branch, PlatformKind, ScanReport};
    use harvest_discover::ExclusionList;
    use harvest_host::memory::MemoryAdapter;
    use tempfile::TempDir;

    use crate::fetcher::WorkTree;

    struct TempFetcher;

    #[async_trait]
    impl SourceFetcher for TempFetcher {
        async fn fetch(&self, _url: &str, _branch: &str) -> Result<WorkTree, HarvestError> {
            Ok(WorkTree::new(TempDir::new()?))
        }
    }

    struct FixedScanner(u64);

    #[async_trait]
    impl CodeScanner for FixedScanner {
        async fn scan(&self, _tree: &std::path::Path) -> Result<ScanReport, HarvestError> {
            Ok(ScanReport {
                total_code_lines: self.0,
                ..ScanReport::default()
            })
        }
    }

    fn context() -> RunContext {
        let config = RawPlatform {
            dev_ops: "gitlab".into(),
            organization: Some("acme".into()),
            access_token: "t".into(),
            ..RawPlatform::default()
        }
        .validate("gl")
        .unwrap();
        RunContext::new(config, ExclusionList::new())
    }

    fn inventory(slugs: &[&str]) -> Inventory {
        Inventory {
            organization: "acme".into(),
            discovered: slugs.len(),
            admitted: slugs
                .iter()
                .map(|slug| Repository::new("core", *slug))
                .collect(),
            ..Inventory::default()
        }
    }

    fn dispatcher(adapter: MemoryAdapter) -> Dispatcher {
        Dispatcher::new(
            Arc::new(adapter),
            Arc::new(TempFetcher),
            Arc::new(FixedScanner(100)),
            context(),
        )
    }

    #[tokio::test]
    async fn test_outcomes_per_repository() {
        let adapter = MemoryAdapter::new(PlatformKind::GitLab)
            .with_repo(
                Repository::new("core", "api"),
                vec![Branch::new("main").with_activity(ActivitySample::commits(2))],
            )
            .with_empty_repo(Repository::new("core", "void"))
            .with_repo(Repository::new("core", "broken"), vec![Branch::new("main")])
            .failing("core/broken", "gone");

        let report = dispatcher(adapter)
            .run(&inventory(&["api", "broken", "void"]), None)
            .await
            .unwrap();

        assert!(report.is_completed());
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].commits, 2);
        assert_eq!(report.aggregate.empty, 1);
        assert_eq!(report.aggregate.failed, 1);
        assert_eq!(report.summary().number_repos, 1);
        assert_eq!(report.summary().dev_ops_platform, "gitlab");
    }

    #[tokio::test]
    async fn test_rate_limit_waits_within_budget() {
        let adapter = MemoryAdapter::new(PlatformKind::GitLab)
            .with_repo(Repository::new("core", "api"), vec![Branch::new("main")])
            .rate_limited("core/api", 2)
            .retry_after(0);

        let report = dispatcher(adapter).run(&inventory(&["api"]), None).await.unwrap();
        assert!(report.is_completed());
        assert_eq!(report.results.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_budget_exhausted_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint_gl.json");
        let adapter = MemoryAdapter::new(PlatformKind::GitLab)
            .with_repo(Repository::new("core", "a"), vec![Branch::new("main")])
            .with_repo(Repository::new("core", "b"), vec![Branch::new("main")])
            .rate_limited("core/b", 10)
            .retry_after(0);
        let dispatcher = Dispatcher::new(
            Arc::new(adapter),
            Arc::new(TempFetcher),
            Arc::new(FixedScanner(1)),
            context().with_checkpoint(&path),
        )
        .with_retry_policy(RetryPolicy {
            rate_limit_budget: 1,
            ..RetryPolicy::default()
        });

        let report = dispatcher.run(&inventory(&["a", "b"]), None).await.unwrap();
        match &report.outcome {
            RunOutcome::RateLimited { in_flight, checkpoint } => {
                assert_eq!(in_flight.as_ref().map(|f| f.repo.as_str()), Some("b"));
                assert_eq!(checkpoint.as_deref(), Some(path.as_path()));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let saved = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(saved.results.len(), 1);
        assert_eq!(saved.in_flight.unwrap().repo, "b");
    }

    struct FlakyFetcher {
        failures: AtomicUsize,
    }

    #[async_trait]
    impl SourceFetcher for FlakyFetcher {
        async fn fetch(&self, _url: &str, _branch: &str) -> Result<WorkTree, HarvestError> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(HarvestError::Network {
                    message: "reset by peer".into(),
                });
            }
            Ok(WorkTree::new(TempDir::new()?))
        }
    }

    #[tokio::test]
    async fn test_transient_errors_retried() {
        let adapter = MemoryAdapter::new(PlatformKind::GitLab)
            .with_repo(Repository::new("core", "api"), vec![Branch::new("main")]);
        let dispatcher = Dispatcher::new(
            Arc::new(adapter),
            Arc::new(FlakyFetcher {
                failures: AtomicUsize::new(2),
            }),
            Arc::new(FixedScanner(1)),
            context(),
        )
        .with_retry_policy(RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        });

        let report = dispatcher.run(&inventory(&["api"]), None).await.unwrap();
        assert_eq!(report.results.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_checkpoint_rejected() {
        let adapter = MemoryAdapter::new(PlatformKind::GitLab);
        let foreign = Checkpoint::new(Uuid::now_v7(), "other", "acme");
        let err = dispatcher(adapter)
            .run(&inventory(&["api"]), Some(foreign))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Checkpoint { .. }));
    }

    #[tokio::test]
    async fn test_harvest_stops_resumably_when_discovery_is_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint_gl.json");
        let adapter = MemoryAdapter::new(PlatformKind::GitLab)
            .with_repo(Repository::new("core", "api"), vec![Branch::new("main")])
            .rate_limited_projects(5);
        let dispatcher = Dispatcher::new(
            Arc::new(adapter),
            Arc::new(TempFetcher),
            Arc::new(FixedScanner(1)),
            context().with_checkpoint(&path),
        )
        .with_retry_policy(RetryPolicy {
            rate_limit_budget: 2,
            ..RetryPolicy::default()
        });

        let report = dispatcher.harvest(None).await.unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::RateLimited {
                in_flight: None,
                checkpoint: None,
            }
        );
        assert!(report.results.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_harvest_retries_discovery_then_runs() {
        let adapter = MemoryAdapter::new(PlatformKind::GitLab)
            .with_repo(Repository::new("core", "api"), vec![Branch::new("main")])
            .rate_limited_projects(1);
        let report = dispatcher(adapter).harvest(None).await.unwrap();
        assert!(report.is_completed());
        assert_eq!(report.results.len(), 1);
    }
}
