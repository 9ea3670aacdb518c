use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use harvest_core::models::{format_code_lines, AnalysisResult, RunSummary, SkipReason, SkipRecord};
use harvest_discover::Inventory;

/// Code lines of one language across the organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LanguageCodeLines {
    pub language: String,
    pub code_lines: u64,
}

/// The largest analyzed repository/branch by some measure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Largest {
    pub project: String,
    pub repo: String,
    pub branch: String,
    pub value: u64,
}

impl Largest {
    fn of(result: &AnalysisResult, value: u64) -> Self {
        Self {
            project: result.project.clone(),
            repo: result.repo.clone(),
            branch: result.branch.clone(),
            value,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.project, self.repo)
    }

    // Larger value wins; equal values go to the smallest identity.
    fn rank(&self) -> (u64, Reverse<(&str, &str, &str)>) {
        (
            self.value,
            Reverse((self.project.as_str(), self.repo.as_str(), self.branch.as_str())),
        )
    }

    fn max(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if b.rank() > a.rank() { b } else { a }),
            (a, b) => a.or(b),
        }
    }
}

/// Run-level totals folded from job outcomes.
///
/// Folding is commutative and associative: any completion order, and any
/// split of the outcomes merged back together, yields the same totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub discovered: u64,
    pub excluded: u64,
    pub archived: u64,
    pub out_of_scope: u64,
    pub empty: u64,
    pub failed: u64,
    pub analyzed: u64,
    /// Branches listed across analyzed repositories.
    pub branches: u64,
    pub total_size: u64,
    pub total_code_lines: u64,
    pub largest_by_size: Option<Largest>,
    pub largest_by_code: Option<Largest>,
    pub languages: BTreeMap<String, u64>,
}

impl Aggregate {
    /// Totals known before dispatch.
    pub fn from_inventory(inventory: &Inventory) -> Self {
        Self {
            discovered: inventory.discovered as u64,
            excluded: inventory.excluded.len() as u64,
            archived: inventory.archived.len() as u64,
            out_of_scope: inventory.out_of_scope as u64,
            ..Self::default()
        }
    }

    pub fn add_result(&mut self, result: &AnalysisResult) {
        let code = result.report.total_code_lines;
        self.analyzed += 1;
        self.branches += result.branch_count;
        self.total_size += result.size;
        self.total_code_lines += code;
        self.largest_by_size = Largest::max(self.largest_by_size.take(), Some(Largest::of(result, result.size)));
        self.largest_by_code = Largest::max(self.largest_by_code.take(), Some(Largest::of(result, code)));
        for language in &result.report.results {
            *self.languages.entry(language.language.clone()).or_default() += language.code_lines;
        }
    }

    pub fn add_skip(&mut self, skip: &SkipRecord) {
        match skip.reason {
            SkipReason::Empty => self.empty += 1,
            SkipReason::Failed { .. } => self.failed += 1,
        }
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.discovered += other.discovered;
        self.excluded += other.excluded;
        self.archived += other.archived;
        self.out_of_scope += other.out_of_scope;
        self.empty += other.empty;
        self.failed += other.failed;
        self.analyzed += other.analyzed;
        self.branches += other.branches;
        self.total_size += other.total_size;
        self.total_code_lines += other.total_code_lines;
        self.largest_by_size = Largest::max(self.largest_by_size, other.largest_by_size);
        self.largest_by_code = Largest::max(self.largest_by_code, other.largest_by_code);
        for (language, lines) in other.languages {
            *self.languages.entry(language).or_default() += lines;
        }
        self
    }

    /// Language totals, largest first.
    pub fn language_totals(&self) -> Vec<LanguageCodeLines> {
        let mut totals: Vec<LanguageCodeLines> = self
            .languages
            .iter()
            .map(|(language, lines)| LanguageCodeLines {
                language: language.clone(),
                code_lines: *lines,
            })
            .collect();
        totals.sort_by(|a, b| b.code_lines.cmp(&a.code_lines).then_with(|| a.language.cmp(&b.language)));
        totals
    }

    pub fn summary(&self, organization: &str, platform: &str) -> RunSummary {
        let (largest, largest_lines) = match &self.largest_by_code {
            Some(l) => (l.full_name(), format_code_lines(l.value)),
            None => (String::new(), format_code_lines(0)),
        };
        RunSummary {
            organization: organization.to_string(),
            total_lines_of_code: format_code_lines(self.total_code_lines),
            largest_repository: largest,
            lines_of_code_largest_repo: largest_lines,
            dev_ops_platform: platform.to_string(),
            number_repos: self.analyzed,
        }
    }
}

/// Fold outcomes in any order.
pub fn aggregate(results: &[AnalysisResult], skipped: &[SkipRecord]) -> Aggregate {
    let mut agg = Aggregate::default();
    for result in results {
        agg.add_result(result);
    }
    for skip in skipped {
        agg.add_skip(skip);
    }
    agg
}
