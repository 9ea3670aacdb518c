use serde::{Deserialize, Serialize};

/// A repository as discovered by a platform adapter.
///
/// Every adapter produces this one canonical shape; platform-specific
/// response types never leave the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Key of the owning project.
    pub project: String,
    /// URL-safe name used in API paths and exclusion rules.
    pub slug: String,
    pub name: String,
    /// Platform identifier when API paths need it (GitLab project id, Azure repo id).
    pub id: Option<String>,
    /// Identifier of the owning project in API paths, when it differs from `project`.
    pub project_id: Option<String>,
    pub default_branch: Option<String>,
    /// Declared size as reported by the platform (bytes; 0 when unknown).
    pub size: u64,
    pub archived: bool,
}

impl Repository {
    pub fn new(project: impl Into<String>, slug: impl Into<String>) -> Self {
        let slug = slug.into();
        Self {
            project: project.into(),
            name: slug.clone(),
            slug,
            id: None,
            project_id: None,
            default_branch: None,
            size: 0,
            archived: false,
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = Some(branch.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    /// `project/slug`, the form used by exclusion rules and reports.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.project, self.slug)
    }

    /// Identifier to use in API paths.
    pub fn api_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.slug)
    }

    /// Owning project identifier to use in API paths.
    pub fn project_api_id(&self) -> &str {
        self.project_id.as_deref().unwrap_or(&self.project)
    }
}
