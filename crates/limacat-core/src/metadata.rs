// Repository and owner metadata collection
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::PacingConfig;
use crate::models::{split_repo, Organization, Repository, Template};
use crate::refresh::{select_orgs_to_refresh, select_repos_to_refresh, RefreshPolicy};
use crate::source::CatalogSource;
use crate::{Error, Result};

/// Repositories and organizations after a collection pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedMetadata {
    /// Sorted by owner, then name
    pub repositories: Vec<Repository>,
    /// Sorted by login
    pub organizations: Vec<Organization>,
}

pub struct MetadataCollector<'a> {
    source: &'a dyn CatalogSource,
    pacing: &'a PacingConfig,
}

impl<'a> MetadataCollector<'a> {
    pub fn new(source: &'a dyn CatalogSource, pacing: &'a PacingConfig) -> Self {
        Self { source, pacing }
    }

    /// Fetch one repository by "owner/name"
    pub async fn collect_repository(&self, full_name: &str) -> Result<Repository> {
        let (owner, name) = split_repo(full_name)
            .ok_or_else(|| Error::InvalidIdentifier(format!("invalid repository name: {}", full_name)))?;

        self.source.repository(owner, name).await
    }

    /// Fetch one user or organization by login
    pub async fn collect_organization(&self, login: &str) -> Result<Organization> {
        self.source.organization(login).await
    }

    /// Fetch metadata for every repo and owner the templates mention
    pub async fn collect_all(&self, templates: &[Template]) -> CollectedMetadata {
        let repos: BTreeSet<&str> = templates.iter().map(|t| t.repo.as_str()).collect();
        let owners: BTreeSet<&str> = templates.iter().filter_map(|t| t.owner()).collect();

        info!("=== Collecting Repository Metadata ===");
        let repositories = self.fetch_repositories(repos.into_iter()).await;
        info!("Collected metadata for {} repositories", repositories.len());

        info!("=== Collecting Organization Metadata ===");
        let organizations = self.fetch_organizations(owners.into_iter()).await;
        info!("Collected metadata for {} organizations", organizations.len());

        CollectedMetadata {
            repositories: merge_repositories(&[], repositories),
            organizations: merge_organizations(&[], organizations),
        }
    }

    /// Fetch metadata for new templates plus a slice of the stale snapshot
    ///
    /// Whatever was fetched replaces the snapshot entry with the same id.
    /// Everything else in the snapshot is carried over untouched.
    pub async fn collect_incremental(
        &self,
        new_templates: &[Template],
        existing_repos: &[Repository],
        existing_orgs: &[Organization],
        policy: &RefreshPolicy,
        now: DateTime<Utc>,
    ) -> CollectedMetadata {
        let repos_to_refresh = select_repos_to_refresh(new_templates, existing_repos, policy, now);
        let orgs_to_refresh = select_orgs_to_refresh(new_templates, existing_orgs, policy, now);

        info!("=== Collecting Repository Metadata (Incremental) ===");
        info!(
            "{} templates to cover, refreshing up to {}% of stale entries",
            new_templates.len(),
            policy.percent
        );
        info!("Fetching {} repositories...", repos_to_refresh.len());
        let repositories = self
            .fetch_repositories(repos_to_refresh.iter().map(String::as_str))
            .await;
        info!("Refreshed {} repositories", repositories.len());

        info!("=== Collecting Organization Metadata (Incremental) ===");
        info!("Fetching {} organizations...", orgs_to_refresh.len());
        let organizations = self
            .fetch_organizations(orgs_to_refresh.iter().map(String::as_str))
            .await;
        info!("Refreshed {} organizations", organizations.len());

        CollectedMetadata {
            repositories: merge_repositories(existing_repos, repositories),
            organizations: merge_organizations(existing_orgs, organizations),
        }
    }

    async fn fetch_repositories<'n>(&self, names: impl ExactSizeIterator<Item = &'n str>) -> Vec<Repository> {
        let total = names.len();
        let mut fetched = Vec::with_capacity(total);

        for (i, name) in names.enumerate() {
            if i > 0 {
                sleep(self.pacing.metadata_delay()).await;
            }
            info!("Fetching [{}/{}] {}...", i + 1, total, name);

            match self.collect_repository(name).await {
                Ok(repo) => fetched.push(repo),
                Err(e) => warn!("Failed to fetch repository {}: {}", name, e),
            }
        }

        fetched
    }

    async fn fetch_organizations<'n>(&self, logins: impl ExactSizeIterator<Item = &'n str>) -> Vec<Organization> {
        let total = logins.len();
        let mut fetched = Vec::with_capacity(total);

        for (i, login) in logins.enumerate() {
            if i > 0 {
                sleep(self.pacing.metadata_delay()).await;
            }
            info!("Fetching [{}/{}] {}...", i + 1, total, login);

            match self.collect_organization(login).await {
                Ok(org) => fetched.push(org),
                Err(e) => warn!("Failed to fetch organization {}: {}", login, e),
            }
        }

        fetched
    }
}

/// Overlay freshly collected repositories on the snapshot, sorted by owner then name
pub fn merge_repositories(existing: &[Repository], collected: Vec<Repository>) -> Vec<Repository> {
    let mut by_id: BTreeMap<String, Repository> =
        existing.iter().map(|r| (r.id.clone(), r.clone())).collect();
    for repo in collected {
        by_id.insert(repo.id.clone(), repo);
    }

    let mut merged: Vec<Repository> = by_id.into_values().collect();
    merged.sort_by(|a, b| a.owner.cmp(&b.owner).then_with(|| a.name.cmp(&b.name)));
    merged
}

/// Overlay freshly collected organizations on the snapshot, sorted by login
pub fn merge_organizations(existing: &[Organization], collected: Vec<Organization>) -> Vec<Organization> {
    let mut by_id: BTreeMap<String, Organization> =
        existing.iter().map(|o| (o.id.clone(), o.clone())).collect();
    for org in collected {
        by_id.insert(org.id.clone(), org);
    }

    by_id.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockCatalogSource;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn repo(owner: &str, name: &str, stars: u32, fetched: DateTime<Utc>) -> Repository {
        Repository {
            id: format!("{}/{}", owner, name),
            owner: owner.to_string(),
            name: name.to_string(),
            description: None,
            topics: Vec::new(),
            stars,
            forks: 0,
            watchers: 0,
            language: None,
            license: None,
            default_branch: "main".to_string(),
            created_at: None,
            updated_at: None,
            pushed_at: None,
            homepage: None,
            is_fork: false,
            parent: None,
            last_fetched: fetched,
        }
    }

    fn org(login: &str, fetched: DateTime<Utc>) -> Organization {
        Organization {
            id: login.to_string(),
            login: login.to_string(),
            account_type: "Organization".to_string(),
            name: None,
            description: None,
            location: None,
            blog: None,
            email: None,
            last_fetched: fetched,
        }
    }

    fn template(repo: &str, path: &str) -> Template {
        Template::discovered(repo, path, "s", "u", false, now())
    }

    #[tokio::test]
    async fn test_collect_all_dedupes_and_skips_failures() {
        let mut source = MockCatalogSource::new();
        source.expect_repository().times(2).returning(|owner, name| {
            if owner == "bob" {
                Err(Error::NotFound(format!("{}/{}", owner, name)))
            } else {
                Ok(repo(owner, name, 5, now()))
            }
        });
        source
            .expect_organization()
            .times(2)
            .returning(|login| Ok(org(login, now())));

        let pacing = PacingConfig::none();
        let collector = MetadataCollector::new(&source, &pacing);

        let templates = vec![
            template("alice/vms", "a.yaml"),
            template("alice/vms", "b.yaml"),
            template("bob/lab", "lima.yaml"),
            template("not-a-repo", "x.yaml"),
        ];
        let collected = collector.collect_all(&templates).await;

        assert_eq!(collected.repositories.len(), 1);
        assert_eq!(collected.repositories[0].id, "alice/vms");
        let logins: Vec<_> = collected.organizations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(logins, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_invalid_repository_name() {
        let source = MockCatalogSource::new();
        let pacing = PacingConfig::none();
        let collector = MetadataCollector::new(&source, &pacing);

        let result = collector.collect_repository("just-owner").await;
        assert!(matches!(result, Err(Error::InvalidIdentifier(_))));
    }

    #[tokio::test]
    async fn test_incremental_refreshes_new_and_oldest_stale() {
        let old = now() - Duration::days(90);
        let older = now() - Duration::days(120);
        let existing_repos = vec![
            repo("alice", "vms", 1, now() - Duration::days(2)),
            repo("bob", "lab", 2, old),
            repo("carol", "box", 3, older),
        ];
        let existing_orgs = vec![org("alice", now()), org("bob", old), org("carol", older)];

        let mut source = MockCatalogSource::new();
        source
            .expect_repository()
            .withf(|owner, name| owner == "alice" && name == "vms")
            .times(1)
            .returning(|owner, name| Ok(repo(owner, name, 100, now())));
        source
            .expect_repository()
            .withf(|owner, name| owner == "carol" && name == "box")
            .times(1)
            .returning(|owner, name| Ok(repo(owner, name, 300, now())));
        source
            .expect_organization()
            .withf(|login| login == "alice" || login == "carol")
            .times(2)
            .returning(|login| Ok(org(login, now())));

        let pacing = PacingConfig::none();
        let collector = MetadataCollector::new(&source, &pacing);

        let new_templates = vec![template("alice/vms", "new.yaml")];
        let collected = collector
            .collect_incremental(
                &new_templates,
                &existing_repos,
                &existing_orgs,
                &RefreshPolicy::default(),
                now(),
            )
            .await;

        assert_eq!(collected.repositories.len(), 3);
        let stars: Vec<_> = collected.repositories.iter().map(|r| (r.id.as_str(), r.stars)).collect();
        assert_eq!(stars, vec![("alice/vms", 100), ("bob/lab", 2), ("carol/box", 300)]);

        let bob = collected.organizations.iter().find(|o| o.id == "bob").unwrap();
        assert_eq!(bob.last_fetched, old);
        let carol = collected.organizations.iter().find(|o| o.id == "carol").unwrap();
        assert_eq!(carol.last_fetched, now());
    }

    #[test]
    fn test_merge_repositories_sorted_and_overwritten() {
        let existing = vec![repo("zed", "a", 1, now()), repo("amy", "b", 1, now())];
        let collected = vec![repo("amy", "b", 9, now()), repo("amy", "a", 4, now())];

        let merged = merge_repositories(&existing, collected);
        let ids: Vec<_> = merged.iter().map(|r| (r.id.as_str(), r.stars)).collect();
        assert_eq!(ids, vec![("amy/a", 4), ("amy/b", 9), ("zed/a", 1)]);
    }

    #[test]
    fn test_merge_organizations_sorted() {
        let merged = merge_organizations(&[org("zed", now())], vec![org("amy", now())]);
        let ids: Vec<_> = merged.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["amy", "zed"]);
    }
}
