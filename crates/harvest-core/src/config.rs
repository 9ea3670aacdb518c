use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use crate::error::HarvestError;
use crate::models::platform::PlatformKind;

/// Top-level codeharvest configuration, stored at `~/.codeharvest/config.json`.
///
/// JSON and TOML are both accepted; the file extension decides which.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Directory receiving per-repository reports, the run summary and checkpoints.
    #[serde(default = "default_results")]
    pub results: PathBuf,

    /// Platform entries keyed by the name used on the command line.
    #[serde(default)]
    pub platforms: BTreeMap<String, RawPlatform>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// External code scanner invocation. `{path}` in any argument is replaced by
/// the fetched working tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default)]
    pub command: Vec<String>,
}

fn default_results() -> PathBuf {
    PathBuf::from("Results")
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            platforms: BTreeMap::new(),
            logging: LoggingConfig::default(),
            scanner: ScannerConfig::default(),
            results: default_results(),
        }
    }
}

impl HarvestConfig {
    /// Returns the codeharvest home directory (`~/.codeharvest/`).
    pub fn home_dir() -> Result<PathBuf, HarvestError> {
        let base = dirs::home_dir()
            .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
        Ok(base.join(".codeharvest"))
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Result<PathBuf, HarvestError> {
        Ok(Self::home_dir()?.join("config.json"))
    }

    /// Load config from the default location, or return defaults if not found.
    pub fn load() -> Result<Self, HarvestError> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, HarvestError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = if is_toml(path) {
            toml::from_str(&content)
                .map_err(|e| HarvestError::config(format!("{}: {e}", path.display())))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| HarvestError::config(format!("{}: {e}", path.display())))?
        };
        debug!(path = %path.display(), platforms = config.platforms.len(), "loaded configuration");
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), HarvestError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = if is_toml(path) {
            toml::to_string_pretty(self).map_err(|e| HarvestError::Serialization(e.to_string()))?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Initialize the codeharvest home directory with a sample config.
    pub fn init() -> Result<PathBuf, HarvestError> {
        let home = Self::home_dir()?;
        std::fs::create_dir_all(&home)?;

        let config_path = Self::config_path()?;
        if !config_path.exists() {
            Self::sample().save_to(&config_path)?;
        }

        Ok(config_path)
    }

    /// A config with one placeholder GitHub entry, used by `config init`.
    pub fn sample() -> Self {
        let mut platforms = BTreeMap::new();
        platforms.insert(
            "github".to_string(),
            RawPlatform {
                dev_ops: "github".into(),
                organization: Some("my-org".into()),
                ..RawPlatform::default()
            },
        );
        Self {
            platforms,
            scanner: ScannerConfig {
                command: vec!["gcloc".into(), "--json".into(), "{path}".into()],
            },
            ..Self::default()
        }
    }

    /// Validate and return the named platform entry.
    pub fn platform(&self, name: &str) -> Result<PlatformConfig, HarvestError> {
        let raw = self.platforms.get(name).ok_or_else(|| {
            HarvestError::config(format!("no platform named '{name}' in configuration"))
        })?;
        raw.validate(name)
    }

    /// Checkpoint file for runs against the named platform.
    pub fn checkpoint_path(&self, platform: &str) -> PathBuf {
        self.results.join(format!("checkpoint_{platform}.json"))
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

/// A platform entry exactly as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPlatform {
    /// Platform kind: github, gitlab, bitbucket, bitbucket_dc, azure.
    pub dev_ops: String,
    /// API root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Host used in clone URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseapi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apiver: Option<String>,
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Bitbucket Data Center clone user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<String>,
    #[serde(default)]
    pub project: String,
    /// Comma-separated repository slugs restricting the run.
    #[serde(default)]
    pub repos: String,
    #[serde(default)]
    pub branch: String,
    /// Activity window in months. The sign is ignored.
    #[serde(default = "default_period")]
    pub period: i64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_threshold")]
    pub number_worker_repos: usize,
    #[serde(default = "default_true")]
    pub multithreading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_exclusion: Option<PathBuf>,
    #[serde(default)]
    pub ext_exclusion: Vec<String>,
    #[serde(default)]
    pub stats: bool,
    #[serde(default)]
    pub default_branch: bool,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_period() -> i64 {
    1
}

fn default_workers() -> usize {
    5
}

fn default_batch_threshold() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_protocol() -> String {
    "https".into()
}

impl Default for RawPlatform {
    fn default() -> Self {
        Self {
            dev_ops: String::new(),
            url: None,
            baseapi: None,
            apiver: None,
            access_token: String::new(),
            organization: None,
            workspace: None,
            users: None,
            project: String::new(),
            repos: String::new(),
            branch: String::new(),
            period: default_period(),
            workers: default_workers(),
            number_worker_repos: default_batch_threshold(),
            multithreading: true,
            file_exclusion: None,
            ext_exclusion: Vec::new(),
            stats: false,
            default_branch: false,
            protocol: default_protocol(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl RawPlatform {
    /// Check every field once and produce the typed configuration.
    pub fn validate(&self, name: &str) -> Result<PlatformConfig, HarvestError> {
        let fail = |message: String| HarvestError::config(format!("platform '{name}': {message}"));

        let kind: PlatformKind = self.dev_ops.parse().map_err(fail)?;

        let api_url = match (non_empty(&self.url), kind.default_api_url()) {
            (Some(url), _) => url,
            (None, Some(default)) => default.to_string(),
            (None, None) => return Err(fail(format!("Url is required for {kind}"))),
        };
        let api_url = parse_root(&api_url).map_err(fail)?;

        let organization = non_empty(&self.organization);
        let settings = match kind {
            PlatformKind::GitHub => PlatformSettings::GitHub {
                organization: organization
                    .clone()
                    .ok_or_else(|| fail("Organization is required".into()))?,
            },
            PlatformKind::GitLab => PlatformSettings::GitLab {
                group: organization
                    .clone()
                    .ok_or_else(|| fail("Organization (top-level group) is required".into()))?,
            },
            PlatformKind::Bitbucket => PlatformSettings::Bitbucket {
                workspace: non_empty(&self.workspace)
                    .or_else(|| organization.clone())
                    .ok_or_else(|| fail("Workspace is required".into()))?,
            },
            PlatformKind::BitbucketDc => PlatformSettings::BitbucketDc {
                clone_user: non_empty(&self.users)
                    .ok_or_else(|| fail("Users (clone user) is required".into()))?,
            },
            PlatformKind::AzureDevOps => PlatformSettings::AzureDevOps {
                organization: organization
                    .clone()
                    .ok_or_else(|| fail("Organization is required".into()))?,
            },
        };

        let clone_host = match non_empty(&self.baseapi) {
            Some(host) => host.trim_end_matches('/').to_string(),
            // Data Center serves git under the same host and context path as its API.
            None if kind == PlatformKind::BitbucketDc => {
                let host = api_url.host_str().unwrap_or_default();
                let authority = match api_url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                };
                format!("{authority}{}", api_url.path())
                    .trim_end_matches('/')
                    .to_string()
            }
            None => kind.default_clone_host().to_string(),
        };

        let label = match &settings {
            PlatformSettings::GitHub { organization }
            | PlatformSettings::AzureDevOps { organization } => organization.clone(),
            PlatformSettings::GitLab { group } => group.clone(),
            PlatformSettings::Bitbucket { workspace } => workspace.clone(),
            PlatformSettings::BitbucketDc { .. } => {
                organization.unwrap_or_else(|| clone_host.clone())
            }
        };

        if self.workers == 0 {
            return Err(fail("Workers must be at least 1".into()));
        }
        if self.period == 0 {
            return Err(fail("Period must not be 0".into()));
        }
        let period_months = u32::try_from(self.period.unsigned_abs())
            .map_err(|_| fail(format!("Period {} is out of range", self.period)))?;

        let protocol = match self.protocol.trim() {
            "" => default_protocol(),
            "http" | "https" => self.protocol.trim().to_string(),
            other => return Err(fail(format!("unsupported Protocol '{other}'"))),
        };

        let repos = self
            .repos
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();

        Ok(PlatformConfig {
            name: name.to_string(),
            kind,
            api_url,
            api_version: non_empty(&self.apiver)
                .unwrap_or_else(|| kind.default_api_version().to_string()),
            clone_host,
            protocol,
            access_token: self.access_token.trim().to_string(),
            organization: label,
            settings,
            project: optional(&self.project),
            repos,
            branch: optional(&self.branch),
            period_months,
            concurrency: Concurrency {
                workers: self.workers,
                batch_threshold: self.number_worker_repos,
                multithreading: self.multithreading,
            },
            stats: self.stats,
            default_branch_only: self.default_branch,
            exclusion_file: self
                .file_exclusion
                .clone()
                .filter(|p| !p.as_os_str().is_empty()),
            excluded_extensions: self.ext_exclusion.clone(),
        })
    }
}

fn parse_root(raw: &str) -> Result<Url, String> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&with_slash).map_err(|e| format!("invalid Url '{raw}': {e}"))?;
    if url.cannot_be_a_base() {
        return Err(format!("invalid Url '{raw}': not a base URL"));
    }
    Ok(url)
}

/// The platform-specific part of a platform entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSettings {
    GitHub { organization: String },
    GitLab { group: String },
    Bitbucket { workspace: String },
    BitbucketDc { clone_user: String },
    AzureDevOps { organization: String },
}

/// Concurrency limits for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concurrency {
    pub workers: usize,
    /// Lists no longer than this run as a single batch.
    pub batch_threshold: usize,
    pub multithreading: bool,
}

impl Concurrency {
    /// Number of jobs run together for a list of `total` jobs.
    pub fn batch_size(&self, total: usize) -> usize {
        if !self.multithreading {
            return 1;
        }
        let workers = self.workers.max(1);
        if total > self.batch_threshold {
            workers
        } else {
            total.clamp(1, workers)
        }
    }
}

/// A validated platform entry. Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Key of the entry in the configuration file.
    pub name: String,
    pub kind: PlatformKind,
    pub api_url: Url,
    pub api_version: String,
    pub clone_host: String,
    pub protocol: String,
    /// May be empty until resolved from the credential store.
    pub access_token: String,
    /// Name reported in the run summary.
    pub organization: String,
    pub settings: PlatformSettings,
    pub project: Option<String>,
    pub repos: Vec<String>,
    pub branch: Option<String>,
    pub period_months: u32,
    pub concurrency: Concurrency,
    pub stats: bool,
    pub default_branch_only: bool,
    pub exclusion_file: Option<PathBuf>,
    pub excluded_extensions: Vec<String>,
}

impl PlatformConfig {
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    pub fn has_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Resolve `path` against the API root, returning an error for malformed paths.
    pub fn endpoint(&self, path: &str) -> Result<Url, HarvestError> {
        self.api_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| HarvestError::config(format!("invalid endpoint '{path}': {e}")))
    }

    /// Whether `slug` is within the optional `Repos` restriction.
    pub fn repo_in_scope(&self, slug: &str) -> bool {
        self.repos.is_empty() || self.repos.iter().any(|r| r == slug)
    }
}
