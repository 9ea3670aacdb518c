use serde::{Deserialize, Serialize};

use super::repo::Repository;

/// The unit of dispatch: one admitted repository, its selected branch and
/// the sequence number used for checkpointing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestJob {
    pub sequence: u64,
    pub repository: Repository,
    pub branch: String,
}

impl HarvestJob {
    pub fn identity(&self) -> InFlight {
        InFlight {
            project: self.repository.project.clone(),
            repo: self.repository.slug.clone(),
            branch: self.branch.clone(),
        }
    }
}

/// Repository/branch that was being processed when a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlight {
    pub project: String,
    pub repo: String,
    /// Empty when the stop happened before a branch was selected.
    pub branch: String,
}

/// Per-language totals reported by the code scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LanguageTotals {
    pub language: String,
    pub files: u64,
    pub lines: u64,
    pub blank_lines: u64,
    pub comments: u64,
    pub code_lines: u64,
}

/// Per-repository analysis output as produced by the code scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanReport {
    pub total_files: u64,
    pub total_lines: u64,
    pub total_blank_lines: u64,
    pub total_comments: u64,
    pub total_code_lines: u64,
    #[serde(default)]
    pub results: Vec<LanguageTotals>,
}

/// Outcome of one analyzed repository. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub sequence: u64,
    pub project: String,
    pub repo: String,
    pub branch: String,
    /// Declared repository size in bytes.
    pub size: u64,
    /// Commits on the chosen branch within the activity window.
    pub commits: u64,
    /// Number of branches the repository had when it was scored.
    #[serde(default)]
    pub branch_count: u64,
    pub report: ScanReport,
}

impl AnalysisResult {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.project, self.repo)
    }
}

/// Why a dispatched repository produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkipReason {
    Empty,
    Failed { message: String },
}

/// A dispatched repository that did not produce an `AnalysisResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipRecord {
    pub sequence: u64,
    pub project: String,
    pub repo: String,
    pub reason: SkipReason,
}

impl SkipRecord {
    pub fn empty(sequence: u64, repo: &Repository) -> Self {
        Self {
            sequence,
            project: repo.project.clone(),
            repo: repo.slug.clone(),
            reason: SkipReason::Empty,
        }
    }

    pub fn failed(sequence: u64, repo: &Repository, message: impl Into<String>) -> Self {
        Self {
            sequence,
            project: repo.project.clone(),
            repo: repo.slug.clone(),
            reason: SkipReason::Failed {
                message: message.into(),
            },
        }
    }
}

/// What a single dispatched job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Analyzed(AnalysisResult),
    Skipped(SkipRecord),
    /// The rate-limit retry budget ran out; the job is the resume point.
    RateLimited { sequence: u64, in_flight: InFlight },
}

impl JobOutcome {
    pub fn sequence(&self) -> u64 {
        match self {
            JobOutcome::Analyzed(r) => r.sequence,
            JobOutcome::Skipped(s) => s.sequence,
            JobOutcome::RateLimited { sequence, .. } => *sequence,
        }
    }
}
