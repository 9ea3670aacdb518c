use std::path::PathBuf;
use std::time::Duration;

/// Central error type for codeharvest.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("project not found: {key}")]
    ProjectNotFound { key: String },

    #[error("repo not found: {name}")]
    RepoNotFound { name: String },

    #[error("branch {branch} not found in {repo}")]
    BranchNotFound { repo: String, branch: String },

    #[error("authentication failed for {platform}: {message}")]
    AuthFailed { platform: String, message: String },

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("rate limited by {platform}, retry after {retry_after_secs}s")]
    RateLimited {
        platform: String,
        retry_after_secs: u64,
    },

    #[error("git error: {message}")]
    GitError { message: String },

    #[error("scanner error: {message}")]
    Scanner { message: String },

    #[error("exclusion file {path}: {message}")]
    Exclusion { path: PathBuf, message: String },

    #[error("checkpoint error: {message}")]
    Checkpoint { message: String },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("credential error: {message}")]
    CredentialError { message: String },

    #[error("no repositories to analyze for {organization}")]
    NothingToAnalyze { organization: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

impl HarvestError {
    /// Network failures and server-side errors worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            HarvestError::Network { .. } => true,
            HarvestError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, HarvestError::RateLimited { .. })
    }

    /// Delay requested by the platform, if this is a rate-limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HarvestError::RateLimited {
                retry_after_secs, ..
            } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        HarvestError::Config {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(e: serde_json::Error) -> Self {
        HarvestError::Serialization(e.to_string())
    }
}
