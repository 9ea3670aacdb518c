use serde::{Deserialize, Serialize};

/// A platform-scoped grouping of repositories.
///
/// Platforms without a project level (GitHub) synthesize a single implicit
/// project named after the organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Key used in exclusion rules and API paths.
    pub key: String,
    pub name: String,
    /// Platform identifier when it differs from the key (GitLab group id, Azure project id).
    pub id: Option<String>,
    /// Key of the enclosing project, for nested groups.
    pub parent: Option<String>,
}

impl Project {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            id: None,
            parent: None,
        }
    }

    /// The single project standing in for an organization on platforms that
    /// have no project level.
    pub fn implicit(organization: &str) -> Self {
        Self::new(organization, organization)
    }

    /// Identifier to use in API paths.
    pub fn api_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.key)
    }
}
