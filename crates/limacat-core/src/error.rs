use chrono::Utc;
use limacat_api::GitHubError;
use limacat_store::StoreError;
use thiserror::Error;

/// All the ways a catalog run can go wrong
///
/// Some of these end the run (config, quota, storage), the rest get
/// logged by whoever is looping over entities and the loop moves on.
#[derive(Error, Debug)]
pub enum Error {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded. Try again in {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Insufficient rate limit: only {remaining} {api} API calls remaining (need {required})")]
    InsufficientQuota {
        api: &'static str,
        remaining: u32,
        required: u32,
    },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Template parse error: {0}")]
    ParseError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<GitHubError> for Error {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::NotFound(what) => Error::NotFound(what),
            GitHubError::RateLimited { reset } => {
                let retry_after = reset
                    .map(|at| (at - Utc::now()).num_seconds().max(0) as u64)
                    .unwrap_or(0);
                Error::RateLimitExceeded { retry_after }
            }
            other => Error::ApiError(other.to_string()),
        }
    }
}
