use std::time::Duration;

use chrono::Utc;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use harvest_core::error::HarvestError;
use harvest_core::models::platform::PlatformKind;

/// Delay used when a platform signals a rate limit without saying for how long.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

const USER_AGENT: &str = concat!("codeharvest/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How requests authenticate against the platform.
#[derive(Clone)]
pub enum Auth {
    Bearer(String),
    /// HTTP basic auth (Azure DevOps PATs use an empty user).
    Basic { user: String, password: String },
    /// A token sent in a platform-specific header (GitLab `PRIVATE-TOKEN`).
    Header { name: HeaderName, value: String },
}

/// Thin `reqwest` wrapper shared by every adapter.
///
/// It owns status handling: 404 stays visible to callers that ask for it,
/// rate limits become `RateLimited`, everything else non-2xx becomes
/// `AuthFailed` or `ApiError`.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    auth: Auth,
    kind: PlatformKind,
}

impl ApiClient {
    pub fn new(kind: PlatformKind, auth: Auth, mut headers: HeaderMap) -> Result<Self, HarvestError> {
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        if let Auth::Header { name, value } = &auth {
            let value = HeaderValue::from_str(value).map_err(|_| HarvestError::AuthFailed {
                platform: kind.to_string(),
                message: "access token contains invalid header characters".into(),
            })?;
            headers.insert(name.clone(), value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HarvestError::Network {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { client, auth, kind })
    }

    pub fn kind(&self) -> PlatformKind {
        self.kind
    }

    async fn send(&self, url: &Url) -> Result<Response, HarvestError> {
        debug!(platform = %self.kind, url = %url, "GET");
        let request = self.client.get(url.clone());
        let request = match &self.auth {
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { user, password } => request.basic_auth(user, Some(password)),
            Auth::Header { .. } => request,
        };
        request.send().await.map_err(|e| HarvestError::Network {
            message: format!("{}: {}", url.path(), e.without_url()),
        })
    }

    /// GET `url`, failing on any non-2xx status.
    pub async fn get(&self, url: &Url) -> Result<Response, HarvestError> {
        let resp = self.send(url).await?;
        self.check(url, resp).await
    }

    /// GET `url`, mapping 404 to `None`.
    pub async fn get_optional(&self, url: &Url) -> Result<Option<Response>, HarvestError> {
        let resp = self.send(url).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.check(url, resp).await.map(Some)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, HarvestError> {
        let resp = self.get(url).await?;
        decode(url, resp).await
    }

    /// GET and decode `url`, returning the response headers too (for
    /// header-driven pagination).
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        url: &Url,
    ) -> Result<(T, HeaderMap), HarvestError> {
        let resp = self.get(url).await?;
        let headers = resp.headers().clone();
        Ok((decode(url, resp).await?, headers))
    }

    pub async fn get_json_optional<T: DeserializeOwned>(
        &self,
        url: &Url,
    ) -> Result<Option<T>, HarvestError> {
        match self.get_optional(url).await? {
            Some(resp) => decode(url, resp).await.map(Some),
            None => Ok(None),
        }
    }

    async fn check(&self, url: &Url, resp: Response) -> Result<Response, HarvestError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if let Some(retry_after_secs) = rate_limit_delay(status, resp.headers()) {
            warn!(
                platform = %self.kind,
                path = url.path(),
                retry_after_secs,
                "rate limited"
            );
            return Err(HarvestError::RateLimited {
                platform: self.kind.to_string(),
                retry_after_secs,
            });
        }

        let body = resp.text().await.unwrap_or_default();
        let message = format!("{}: {}", url.path(), truncate(&body, 300));
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(HarvestError::AuthFailed {
                platform: self.kind.to_string(),
                message,
            }),
            _ => Err(HarvestError::ApiError {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

async fn decode<T: DeserializeOwned>(url: &Url, resp: Response) -> Result<T, HarvestError> {
    let bytes = resp.bytes().await.map_err(|e| HarvestError::Network {
        message: format!("{}: {}", url.path(), e.without_url()),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        HarvestError::Serialization(format!("unexpected response from {}: {e}", url.path()))
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Seconds to wait if the response is a rate-limit signal, `None` otherwise.
///
/// 429 always counts. 403 counts only when the remaining quota header is 0,
/// since platforms also use 403 for permission problems.
pub fn rate_limit_delay(status: StatusCode, headers: &HeaderMap) -> Option<u64> {
    let exhausted = header_u64(headers, "x-ratelimit-remaining") == Some(0)
        || header_u64(headers, "ratelimit-remaining") == Some(0);
    let limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && exhausted);
    if !limited {
        return None;
    }

    if let Some(secs) = header_u64(headers, "retry-after") {
        return Some(secs.max(1));
    }
    let reset = header_u64(headers, "x-ratelimit-reset").or_else(|| header_u64(headers, "ratelimit-reset"));
    if let Some(reset) = reset {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        return Some(reset.saturating_sub(now).max(1));
    }
    Some(DEFAULT_RETRY_AFTER_SECS)
}

/// The `rel="next"` target of an RFC 8288 `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<Url> {
    let link = headers.get(header::LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == r#"rel="next""# || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

/// `url` with `key` set to `value`, replacing any previous value.
pub fn with_query_param(url: &Url, key: &str, value: &str) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut next = url.clone();
    next.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair(key, value);
    next
}

/// Value of a header as a non-empty string.
pub fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Replace credentials embedded in a URL with `***`.
pub fn redact(raw: &str) -> String {
    let Some(scheme_end) = raw.find("://") else {
        return raw.to_string();
    };
    let rest = &raw[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}***{}", &raw[..scheme_end + 3], &rest[at..]),
        None => raw.to_string(),
    }
}

/// Percent-encode a credential or a path segment (branch names may contain `/`).
pub fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
