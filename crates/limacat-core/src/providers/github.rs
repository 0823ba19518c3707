// GitHub provider implementation - bridges API client with CatalogSource trait
use async_trait::async_trait;
use chrono::Utc;
use limacat_api::{CodeSearchItem, ContentEntry, GitHubClient, GitHubRepo, GitHubUser, RateLimits};

use crate::{
    models::{Organization, Repository},
    source::{CatalogSource, DirectoryEntry, SearchHit},
    Result,
};

/// Wrapper around GitHubClient that implements CatalogSource
pub struct GitHubProvider {
    client: GitHubClient,
}

impl GitHubProvider {
    pub fn new(client: GitHubClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CatalogSource for GitHubProvider {
    async fn rate_limits(&self) -> Result<RateLimits> {
        Ok(self.client.rate_limits().await?)
    }

    async fn search_code(&self, query: &str, page: u32) -> Result<Vec<SearchHit>> {
        let page = self.client.search_code(query, page).await?;
        Ok(page.items.into_iter().map(github_to_hit).collect())
    }

    async fn list_directory(&self, owner: &str, repo: &str, path: &str) -> Result<Vec<DirectoryEntry>> {
        let entries = self.client.list_directory(owner, repo, path).await?;
        Ok(entries.into_iter().map(github_to_entry).collect())
    }

    async fn file_content(&self, owner: &str, repo: &str, path: &str) -> Result<String> {
        Ok(self.client.get_file_content(owner, repo, path).await?)
    }

    async fn download(&self, url: &str) -> Result<String> {
        Ok(self.client.download_raw(url).await?)
    }

    async fn repository(&self, owner: &str, name: &str) -> Result<Repository> {
        let repo = self.client.get_repository(owner, name).await?;
        Ok(github_to_repository(owner, name, repo))
    }

    async fn organization(&self, login: &str) -> Result<Organization> {
        let user = self.client.get_user(login).await?;
        Ok(github_to_organization(login, user))
    }
}

fn github_to_hit(item: CodeSearchItem) -> SearchHit {
    SearchHit {
        repo: item.repository.full_name,
        path: item.path,
        sha: item.sha,
        html_url: item.html_url,
    }
}

fn github_to_entry(entry: ContentEntry) -> DirectoryEntry {
    DirectoryEntry {
        name: entry.name,
        path: entry.path,
        sha: entry.sha,
        size: entry.size,
        entry_type: entry.entry_type,
        html_url: entry.html_url.unwrap_or_default(),
    }
}

/// Convert GitHub API repo to our Repository record, keyed by the name we asked for
fn github_to_repository(owner: &str, name: &str, gh: GitHubRepo) -> Repository {
    Repository {
        id: format!("{}/{}", owner, name),
        owner: owner.to_string(),
        name: name.to_string(),
        description: gh.description,
        topics: gh.topics,
        stars: gh.stargazers_count,
        forks: gh.forks_count,
        watchers: gh.watchers_count,
        language: gh.language,
        license: gh.license.and_then(|l| l.spdx_id),
        default_branch: gh.default_branch.unwrap_or_default(),
        created_at: gh.created_at,
        updated_at: gh.updated_at,
        pushed_at: gh.pushed_at,
        homepage: gh.homepage,
        is_fork: gh.fork,
        parent: gh.parent.map(|p| p.full_name),
        last_fetched: Utc::now(),
    }
}

fn github_to_organization(login: &str, gh: GitHubUser) -> Organization {
    Organization {
        id: login.to_string(),
        login: login.to_string(),
        account_type: gh.account_type,
        name: gh.name,
        description: gh.bio,
        location: gh.location,
        blog: gh.blog,
        email: gh.email,
        last_fetched: Utc::now(),
    }
}
