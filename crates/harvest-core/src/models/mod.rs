pub mod branch;
pub mod job;
pub mod platform;
pub mod project;
pub mod repo;
pub mod summary;

pub use branch::{ActivitySample, ActivityWindow, Branch};
pub use job::{
    AnalysisResult, HarvestJob, InFlight, JobOutcome, LanguageTotals, ScanReport, SkipReason,
    SkipRecord,
};
pub use platform::PlatformKind;
pub use project::Project;
pub use repo::Repository;
pub use summary::{format_code_lines, format_size, RunSummary};
