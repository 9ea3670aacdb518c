use std::cmp::Reverse;

use harvest_core::config::PlatformConfig;
use harvest_core::models::{Branch, Repository};
use tracing::{debug, warn};

/// Operator overrides that short-circuit scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreOptions {
    /// Branch pinned in configuration; selected whenever it exists.
    pub pinned: Option<String>,
    /// Take the default branch without sampling activity.
    pub default_only: bool,
}

impl ScoreOptions {
    pub fn from_config(config: &PlatformConfig) -> Self {
        Self {
            pinned: config.branch.clone(),
            default_only: config.default_branch_only,
        }
    }
}

/// Why a branch was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    Pinned,
    DefaultOnly,
    Activity,
    DefaultFallback,
    SizeFallback,
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionReason::Pinned => write!(f, "pinned"),
            SelectionReason::DefaultOnly => write!(f, "default"),
            SelectionReason::Activity => write!(f, "activity"),
            SelectionReason::DefaultFallback => write!(f, "default (idle)"),
            SelectionReason::SizeFallback => write!(f, "size"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub branch: String,
    pub reason: SelectionReason,
}

impl Selection {
    fn new(branch: &str, reason: SelectionReason) -> Self {
        Self {
            branch: branch.to_string(),
            reason,
        }
    }
}

/// Name of the repository's default branch, if it is among `branches`.
fn default_branch<'a>(repo: &Repository, branches: &'a [Branch]) -> Option<&'a Branch> {
    repo.default_branch
        .as_deref()
        .and_then(|name| branches.iter().find(|b| b.name == name))
        .or_else(|| branches.iter().find(|b| b.is_default))
}

/// Selection that needs no activity data, if the options force one.
pub fn preselect(repo: &Repository, branches: &[Branch], options: &ScoreOptions) -> Option<Selection> {
    if let Some(pinned) = &options.pinned {
        if branches.iter().any(|b| &b.name == pinned) {
            return Some(Selection::new(pinned, SelectionReason::Pinned));
        }
        warn!(
            repo = %repo.full_name(),
            branch = %pinned,
            "pinned branch not found, scoring instead"
        );
    }
    if options.default_only {
        if let Some(branch) = default_branch(repo, branches) {
            return Some(Selection::new(&branch.name, SelectionReason::DefaultOnly));
        }
    }
    None
}

fn is_mainline(name: &str) -> bool {
    name == "main" || name == "master"
}

/// Pick the one branch of `repo` to analyze.
///
/// Branches are ranked by commits in the window, then by lines added plus
/// removed; remaining ties go to the default branch, then the smallest name.
/// When nothing moved in the window the default branch wins, and without a
/// known default the largest branch does. Returns `None` for an empty list.
pub fn select_branch(
    repo: &Repository,
    branches: &[Branch],
    options: &ScoreOptions,
) -> Option<Selection> {
    if branches.is_empty() {
        return None;
    }
    if let Some(selection) = preselect(repo, branches, options) {
        return Some(selection);
    }

    let default_name = default_branch(repo, branches).map(|b| b.name.as_str());
    let scored: Vec<(&Branch, (u64, u64))> = branches
        .iter()
        .map(|b| {
            let total = b.total_activity();
            (b, (total.commits, total.line_delta()))
        })
        .collect();

    if scored.iter().any(|(_, score)| *score != (0, 0)) {
        let (best, score) = scored.iter().max_by_key(|(b, score)| {
            (
                *score,
                Some(b.name.as_str()) == default_name,
                Reverse(b.name.as_str()),
            )
        })?;
        debug!(
            repo = %repo.full_name(),
            branch = %best.name,
            commits = score.0,
            lines = score.1,
            "selected by activity"
        );
        return Some(Selection::new(&best.name, SelectionReason::Activity));
    }

    if let Some(name) = default_name {
        return Some(Selection::new(name, SelectionReason::DefaultFallback));
    }

    let best = branches.iter().max_by(|a, b| {
        let size_a = a.size.unwrap_or(repo.size);
        let size_b = b.size.unwrap_or(repo.size);
        size_a
            .cmp(&size_b)
            .then_with(|| is_mainline(&a.name).cmp(&is_mainline(&b.name)))
            .then_with(|| b.name.cmp(&a.name))
    })?;
    Some(Selection::new(&best.name, SelectionReason::SizeFallback))
}
