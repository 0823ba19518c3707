use async_trait::async_trait;
use limacat_api::RateLimits;

use crate::models::{Organization, Repository};
use crate::Result;

/// One code search result, trimmed to what discovery needs
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// owner/name
    pub repo: String,
    pub path: String,
    pub sha: String,
    pub html_url: String,
}

/// One entry of a repository directory listing
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    pub sha: String,
    pub size: u64,
    /// "file", "dir", "symlink" or "submodule"
    pub entry_type: String,
    pub html_url: String,
}

impl DirectoryEntry {
    pub fn is_file(&self) -> bool {
        self.entry_type == "file"
    }
}

/// Everything the catalog needs from a code host
///
/// Discovery, metadata collection and analysis only ever talk to this,
/// so tests can hand them a mock instead of a live API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn rate_limits(&self) -> Result<RateLimits>;

    /// One page of code search results, pages start at 1
    async fn search_code(&self, query: &str, page: u32) -> Result<Vec<SearchHit>>;

    async fn list_directory(&self, owner: &str, repo: &str, path: &str) -> Result<Vec<DirectoryEntry>>;

    /// Decoded text of a file in a repository
    async fn file_content(&self, owner: &str, repo: &str, path: &str) -> Result<String>;

    /// Plain GET of a raw URL
    async fn download(&self, url: &str) -> Result<String>;

    async fn repository(&self, owner: &str, name: &str) -> Result<Repository>;

    async fn organization(&self, login: &str) -> Result<Organization>;
}
