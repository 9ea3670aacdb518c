use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use harvest_core::config::PlatformConfig;
use harvest_core::models::ActivityWindow;
use harvest_discover::{ExclusionList, ScoreOptions};

/// Everything one harvest run shares between its jobs.
///
/// Built once before dispatch and read-only afterwards, so jobs hold it
/// behind an `Arc` without locking.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub config: Arc<PlatformConfig>,
    pub exclusions: Arc<ExclusionList>,
    pub window: ActivityWindow,
    pub score: ScoreOptions,
    /// Where per-repository reports are written, if anywhere.
    pub results_dir: Option<PathBuf>,
    /// Where the checkpoint lives; `None` disables checkpointing.
    pub checkpoint_path: Option<PathBuf>,
    pub show_progress: bool,
}

impl RunContext {
    pub fn new(config: PlatformConfig, exclusions: ExclusionList) -> Self {
        Self::at(config, exclusions, Utc::now())
    }

    /// Context whose activity window ends at `now`.
    pub fn at(config: PlatformConfig, exclusions: ExclusionList, now: DateTime<Utc>) -> Self {
        let window = ActivityWindow::trailing_months(config.period_months, now);
        let score = ScoreOptions::from_config(&config);
        Self {
            run_id: Uuid::now_v7(),
            config: Arc::new(config),
            exclusions: Arc::new(exclusions),
            window,
            score,
            results_dir: None,
            checkpoint_path: None,
            show_progress: false,
        }
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(dir.into());
        self
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Resume with the id of an interrupted run.
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }
}
