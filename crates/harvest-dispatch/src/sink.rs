use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use harvest_core::error::HarvestError;
use harvest_core::models::{AnalysisResult, RunSummary};

use crate::aggregate::LanguageCodeLines;

pub const SUMMARY_FILE: &str = "GlobalReport.json";
pub const LANGUAGES_FILE: &str = "code_lines_by_language.json";

/// Writes run output under one results directory.
#[derive(Debug, Clone)]
pub struct ResultSink {
    dir: PathBuf,
}

impl ResultSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `Result_<project>_<repo>_<branch>.json`, with path separators flattened.
    pub fn report_name(result: &AnalysisResult) -> String {
        let flat = |s: &str| s.replace(['/', '\\'], "_");
        format!(
            "Result_{}_{}_{}.json",
            flat(&result.project),
            flat(&result.repo),
            flat(&result.branch)
        )
    }

    /// Write the scanner report of one analyzed repository.
    pub fn write_report(&self, result: &AnalysisResult) -> Result<PathBuf, HarvestError> {
        let path = self.dir.join(Self::report_name(result));
        self.write_json(&path, &result.report)?;
        Ok(path)
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf, HarvestError> {
        let path = self.dir.join(SUMMARY_FILE);
        self.write_json(&path, summary)?;
        Ok(path)
    }

    pub fn write_languages(&self, languages: &[LanguageCodeLines]) -> Result<PathBuf, HarvestError> {
        let path = self.dir.join(LANGUAGES_FILE);
        self.write_json(&path, &languages)?;
        Ok(path)
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), HarvestError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(path, serde_json::to_string_pretty(value)?)?;
        debug!(path = %path.display(), "wrote");
        Ok(())
    }
}
