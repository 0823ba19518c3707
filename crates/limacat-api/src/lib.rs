// GitHub REST API client - search, contents, repos, users, quota
pub mod github;
pub mod retry;

// Re-export common types
pub use github::{
    CodeSearchItem, CodeSearchPage, ContentEntry, GitHubClient, GitHubError, GitHubRepo,
    GitHubUser, RateLimit, RateLimits, SEARCH_PAGE_SIZE,
};
pub use retry::RetryConfig;
