use std::collections::BTreeSet;
use std::path::Path;

use harvest_core::error::HarvestError;
use tracing::debug;

/// Projects and `project/repo` pairs that must not be harvested.
///
/// Loaded once per run and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionList {
    projects: BTreeSet<String>,
    repos: BTreeSet<(String, String)>,
}

impl ExclusionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a line-oriented file. A missing file excludes nothing.
    pub fn load(path: &Path) -> Result<Self, HarvestError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let list = Self::parse(&content);
                debug!(
                    path = %path.display(),
                    projects = list.projects.len(),
                    repos = list.repos.len(),
                    "loaded exclusion list"
                );
                Ok(list)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(HarvestError::Exclusion {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Load from an optional path; `None` excludes nothing.
    pub fn load_optional(path: Option<&Path>) -> Result<Self, HarvestError> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Parse exclusion lines. `key` excludes a project, `key/repo` one
    /// repository. Nested project keys split at the last `/`. Blank lines
    /// and `#` comments are ignored.
    pub fn parse(content: &str) -> Self {
        let mut list = Self::default();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            list.add(line);
        }
        list
    }

    /// Add one exclusion entry in file syntax.
    pub fn add(&mut self, entry: &str) {
        let entry = entry.trim().trim_matches('/');
        if entry.is_empty() {
            return;
        }
        // GitLab subgroups put `/` inside project keys, so `group/sub/repo`
        // is repository `repo` of project `group/sub`. With one `/` this is
        // the plain `project/repo` pair.
        match entry.rsplit_once('/') {
            Some((project, repo)) => {
                self.repos.insert((project.to_string(), repo.to_string()));
            }
            None => {
                self.projects.insert(entry.to_string());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.repos.is_empty()
    }

    /// Whether the whole project is excluded: listed exactly, or nested under
    /// a listed key.
    pub fn is_project_excluded(&self, project: &str) -> bool {
        self.projects.iter().any(|key| {
            project == key
                || project
                    .strip_prefix(key.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn is_excluded(&self, project: &str, repo: &str) -> bool {
        self.is_project_excluded(project)
            || self
                .repos
                .contains(&(project.to_string(), repo.to_string()))
    }
}

/// Whether `project/repo` is excluded by `list`.
pub fn is_excluded(list: &ExclusionList, project: &str, repo: &str) -> bool {
    list.is_excluded(project, repo)
}
