use serde::{Deserialize, Serialize};

/// The kind of source-control platform being harvested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    Bitbucket,
    BitbucketDc,
    #[serde(rename = "azure")]
    AzureDevOps,
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformKind::GitHub => write!(f, "github"),
            PlatformKind::GitLab => write!(f, "gitlab"),
            PlatformKind::Bitbucket => write!(f, "bitbucket"),
            PlatformKind::BitbucketDc => write!(f, "bitbucket_dc"),
            PlatformKind::AzureDevOps => write!(f, "azure"),
        }
    }
}

impl std::str::FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(PlatformKind::GitHub),
            "gitlab" => Ok(PlatformKind::GitLab),
            "bitbucket" | "bitbucket_cloud" => Ok(PlatformKind::Bitbucket),
            "bitbucket_dc" | "bitbucketdc" | "bitbucketsrv" | "bitbucket-dc" => {
                Ok(PlatformKind::BitbucketDc)
            }
            "azure" | "azure_devops" | "azure-devops" | "azuredevops" => {
                Ok(PlatformKind::AzureDevOps)
            }
            _ => Err(format!("unknown platform kind: {s}")),
        }
    }
}

impl PlatformKind {
    /// Default API root for this platform kind. Bitbucket Data Center is
    /// self-hosted and has none.
    pub fn default_api_url(&self) -> Option<&'static str> {
        match self {
            PlatformKind::GitHub => Some("https://api.github.com/"),
            PlatformKind::GitLab => Some("https://gitlab.com/api/v4/"),
            PlatformKind::Bitbucket => Some("https://api.bitbucket.org/"),
            PlatformKind::BitbucketDc => None,
            PlatformKind::AzureDevOps => Some("https://dev.azure.com/"),
        }
    }

    /// Default host used when building clone URLs.
    pub fn default_clone_host(&self) -> &'static str {
        match self {
            PlatformKind::GitHub => "github.com",
            PlatformKind::GitLab => "gitlab.com",
            PlatformKind::Bitbucket => "bitbucket.org",
            PlatformKind::BitbucketDc => "",
            PlatformKind::AzureDevOps => "dev.azure.com",
        }
    }

    /// Default API version string sent to (or embedded in paths for) the platform.
    pub fn default_api_version(&self) -> &'static str {
        match self {
            PlatformKind::GitHub => "2022-11-28",
            PlatformKind::GitLab => "4",
            PlatformKind::Bitbucket => "2.0",
            PlatformKind::BitbucketDc => "1.0",
            PlatformKind::AzureDevOps => "7.1",
        }
    }

    /// Whether the platform has a native project level above repositories.
    pub fn has_projects(&self) -> bool {
        !matches!(self, PlatformKind::GitHub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("GitHub".parse::<PlatformKind>(), Ok(PlatformKind::GitHub));
        assert_eq!(
            "bitbucket_dc".parse::<PlatformKind>(),
            Ok(PlatformKind::BitbucketDc)
        );
        assert_eq!(
            "BitBucketSRV".parse::<PlatformKind>(),
            Ok(PlatformKind::BitbucketDc)
        );
        assert_eq!("azure".parse::<PlatformKind>(), Ok(PlatformKind::AzureDevOps));
        assert!("gitea".parse::<PlatformKind>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for kind in [
            PlatformKind::GitHub,
            PlatformKind::GitLab,
            PlatformKind::Bitbucket,
            PlatformKind::BitbucketDc,
            PlatformKind::AzureDevOps,
        ] {
            assert_eq!(kind.to_string().parse::<PlatformKind>(), Ok(kind));
        }
    }
}
