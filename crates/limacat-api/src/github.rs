use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::retry::{is_rate_limit_status, with_rate_limit_retry, RetryConfig};

const GITHUB_API_BASE: &str = "https://api.github.com";

/// GitHub caps code search pages at 100 items
pub const SEARCH_PAGE_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum GitHubError {
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limit exceeded")]
    RateLimited { reset: Option<DateTime<Utc>> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Content decoding failed: {0}")]
    DecodeError(String),
}

pub type Result<T> = std::result::Result<T, GitHubError>;

pub struct GitHubClient {
    client: reqwest::Client,
    token: Option<String>,
    base_url: String,
    retry_config: RetryConfig,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url(token, GITHUB_API_BASE.to_string())
    }

    /// For GitHub Enterprise, or a mock server in tests
    pub fn with_base_url(token: Option<String>, base_url: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("lima-catalog/0.1.0"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_config: RetryConfig::default(),
        }
    }

    /// Replace the rate-limit retry configuration
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Current quota for the core and search APIs
    ///
    /// Calling /rate_limit does not count against the quota itself.
    pub async fn rate_limits(&self) -> Result<RateLimits> {
        let url = format!("{}/rate_limit", self.base_url);
        let status: RateLimitStatus = self.get_json(&url, &[], "rate_limit").await?;

        Ok(RateLimits {
            core: status.resources.core.into(),
            search: status.resources.search.into(),
        })
    }

    /// One page of code search results (1-based page numbers)
    pub async fn search_code(&self, query: &str, page: u32) -> Result<CodeSearchPage> {
        let url = format!("{}/search/code", self.base_url);
        let page = page.to_string();
        let per_page = SEARCH_PAGE_SIZE.to_string();
        let params = [("q", query), ("page", page.as_str()), ("per_page", per_page.as_str())];

        self.get_json(&url, &params, query).await
    }

    /// Get a repository by owner and name
    pub async fn get_repository(&self, owner: &str, repo: &str) -> Result<GitHubRepo> {
        let url = format!("{}/repos/{}/{}", self.base_url, owner, repo);
        self.get_json(&url, &[], &format!("{}/{}", owner, repo)).await
    }

    /// Get a user or organization by login - /users works for both
    pub async fn get_user(&self, login: &str) -> Result<GitHubUser> {
        let url = format!("{}/users/{}", self.base_url, login);
        self.get_json(&url, &[], login).await
    }

    /// List a directory through the contents API
    pub async fn list_directory(&self, owner: &str, repo: &str, path: &str) -> Result<Vec<ContentEntry>> {
        let url = self.contents_url(owner, repo, path);
        self.get_json(&url, &[], &format!("{}/{}/{}", owner, repo, path)).await
    }

    /// Fetch and decode a single file through the contents API
    pub async fn get_file_content(&self, owner: &str, repo: &str, path: &str) -> Result<String> {
        let url = self.contents_url(owner, repo, path);
        let file: ContentFile = self
            .get_json(&url, &[], &format!("{}/{}/{}", owner, repo, path))
            .await?;

        decode_content(&file)
    }

    /// Download a raw file by absolute URL (raw.githubusercontent.com and friends)
    pub async fn download_raw(&self, url: &str) -> Result<String> {
        with_rate_limit_retry(&self.retry_config, || async {
            let response = self.client.get(url).send().await?;
            let response = check_response(response, url).await?;
            Ok(response.text().await?)
        })
        .await
    }

    fn contents_url(&self, owner: &str, repo: &str, path: &str) -> String {
        // Encode each segment but keep the slashes, the API wants a real path
        let encoded: Vec<String> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();

        format!(
            "{}/repos/{}/{}/contents/{}",
            self.base_url,
            owner,
            repo,
            encoded.join("/")
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
        what: &str,
    ) -> Result<T> {
        let token = self.token.clone();

        with_rate_limit_retry(&self.retry_config, || async {
            let mut request = self.client.get(url).query(params);

            if let Some(ref token) = token {
                request = request.bearer_auth(token);
            }

            debug!("GET {}", url);
            let response = request.send().await?;
            let response = check_response(response, what).await?;

            let body = response.text().await?;
            let parsed: T = serde_json::from_str(&body)?;
            Ok(parsed)
        })
        .await
    }
}

/// Turn a non-success response into the right error
async fn check_response(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    if status == 404 {
        return Err(GitHubError::NotFound(what.to_string()));
    }

    if status == 401 {
        return Err(GitHubError::AuthRequired);
    }

    if is_rate_limit_status(status) && looks_rate_limited(status, response.headers()) {
        return Err(GitHubError::RateLimited {
            reset: rate_limit_reset(response.headers(), Utc::now()),
        });
    }

    let body = response.text().await.unwrap_or_default();
    Err(GitHubError::RequestFailed(format!("Status {}: {}", status, body)))
}

/// A 403 is only a rate limit when GitHub says so, otherwise it's a permissions problem
fn looks_rate_limited(status: reqwest::StatusCode, headers: &HeaderMap) -> bool {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return true;
    }

    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);

    exhausted || headers.contains_key(reqwest::header::RETRY_AFTER)
}

/// Work out when the limit resets from `x-ratelimit-reset` or `retry-after`
pub fn rate_limit_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let header_number = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(epoch) = header_number("x-ratelimit-reset") {
        return Utc.timestamp_opt(epoch, 0).single();
    }

    header_number("retry-after").map(|secs| now + chrono::Duration::seconds(secs))
}

fn decode_content(file: &ContentFile) -> Result<String> {
    if file.encoding.as_deref().unwrap_or("base64") != "base64" {
        return Err(GitHubError::DecodeError(format!(
            "unsupported encoding for {}",
            file.path
        )));
    }

    // GitHub wraps the base64 body at 60 columns
    let compact: String = file
        .content
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| GitHubError::DecodeError(e.to_string()))?;

    String::from_utf8(bytes).map_err(|e| GitHubError::DecodeError(e.to_string()))
}

/// One quota bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset: DateTime<Utc>,
}

/// The two quotas we care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub core: RateLimit,
    pub search: RateLimit,
}

#[derive(Debug, Deserialize)]
struct RateLimitStatus {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RawRateLimit,
    search: RawRateLimit,
}

#[derive(Debug, Deserialize)]
struct RawRateLimit {
    limit: u32,
    remaining: u32,
    reset: i64,
}

impl From<RawRateLimit> for RateLimit {
    fn from(raw: RawRateLimit) -> Self {
        Self {
            limit: raw.limit,
            remaining: raw.remaining,
            reset: Utc.timestamp_opt(raw.reset, 0).single().unwrap_or_default(),
        }
    }
}

/// A page of code search results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSearchPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    #[serde(default)]
    pub items: Vec<CodeSearchItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSearchItem {
    pub name: String,
    pub path: String,
    pub sha: String,
    pub html_url: String,
    pub repository: CodeSearchRepository,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSearchRepository {
    pub full_name: String,
}

/// Repository as returned by GET /repos/{owner}/{repo}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepo {
    pub name: String,
    pub full_name: String,
    pub owner: GitHubOwner,
    pub description: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub stargazers_count: u32,
    #[serde(default)]
    pub forks_count: u32,
    #[serde(default)]
    pub watchers_count: u32,
    pub language: Option<String>,
    pub license: Option<GitHubLicense>,
    pub default_branch: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub homepage: Option<String>,
    #[serde(default)]
    pub fork: bool,
    pub parent: Option<GitHubParent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubOwner {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubLicense {
    pub spdx_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubParent {
    pub full_name: String,
}

/// User or organization as returned by GET /users/{login}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    #[serde(rename = "type")]
    pub account_type: String, // "User" or "Organization"
    pub name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub blog: Option<String>,
    pub email: Option<String>,
}

/// Directory entry from the contents API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    pub sha: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type")]
    pub entry_type: String, // "file", "dir", "symlink", "submodule"
    pub html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentFile {
    path: String,
    content: Option<String>,
    encoding: Option<String>,
}
