// The whole collection run: quota check, discovery, metadata, analysis, combine
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::analyzer::Analyzer;
use crate::blocklist::Blocklist;
use crate::catalog_store::CatalogStore;
use crate::combiner::Combiner;
use crate::config::{Config, RunOptions};
use crate::discovery::{incremental_since, Discoverer};
use crate::merge::{log_merge_summary, merge_templates};
use crate::metadata::MetadataCollector;
use crate::models::{Phase, Progress, Template};
use crate::refresh::RefreshPolicy;
use crate::source::CatalogSource;
use crate::{Error, Result};

/// What a run did, for the final log lines and for tests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Phase stored at the end of the run
    pub phase: Phase,
    /// Merge tallies, only filled in by incremental runs
    pub new_count: usize,
    pub updated_count: usize,
    pub unchanged_count: usize,
    pub templates: usize,
    pub repositories: usize,
    pub organizations: usize,
    pub analyzed: usize,
    /// Records written to templates-combined.jsonl
    pub combined: usize,
}

pub struct Pipeline<'a> {
    source: &'a dyn CatalogSource,
    store: &'a CatalogStore,
    blocklist: &'a Blocklist,
    config: &'a Config,
    options: &'a RunOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn CatalogSource,
        store: &'a CatalogStore,
        blocklist: &'a Blocklist,
        config: &'a Config,
        options: &'a RunOptions,
    ) -> Self {
        Self {
            source,
            store,
            blocklist,
            config,
            options,
        }
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let incremental = self.options.incremental;
        let mut progress = self.store.load_progress()?;
        let mut summary = RunSummary::default();

        info!("Data directory: {}", self.store.data_dir().display());
        info!("Incremental mode: {}", incremental);
        info!("Analysis mode: {}", self.options.analyze);
        info!(
            "Current phase: {} ({} templates, {} repos, {} orgs)",
            progress.phase, progress.templates_discovered, progress.repos_fetched, progress.orgs_fetched
        );

        self.check_quota().await?;

        // Incremental runs always discover and collect, full runs resume where they stopped
        let mut discovered = Vec::new();
        if incremental || progress.phase == Phase::Discovery {
            info!("=== Phase 1: Template Discovery ===");
            discovered = self.discover(&mut progress, &mut summary).await?;
        }

        if incremental || progress.phase == Phase::Metadata {
            info!("=== Phase 2: Metadata Collection ===");
            self.collect_metadata(&discovered, &mut progress, &mut summary).await?;
        }

        if self.options.analyze {
            info!("=== Phase 3: Template Analysis ===");
            summary.analyzed = self.analyze().await?;
        }

        summary.combined = self.combine()?;
        summary.phase = progress.phase;
        summary.templates = progress.templates_discovered;
        summary.repositories = progress.repos_fetched;
        summary.organizations = progress.orgs_fetched;

        info!("=== Collection Complete ===");
        info!(
            "Total templates: {} ({} official, {} community)",
            progress.templates_discovered, progress.official_templates, progress.community_templates
        );
        info!("Repositories: {}", progress.repos_fetched);
        info!("Organizations: {}", progress.orgs_fetched);

        Ok(summary)
    }

    /// Refuse to start a run that would stall on quota halfway through
    async fn check_quota(&self) -> Result<()> {
        info!("Checking GitHub API rate limit...");
        let limits = self.source.rate_limits().await?;
        let discovery = &self.config.discovery;

        info!(
            "Core API: {}/{} remaining (resets at {})",
            limits.core.remaining,
            limits.core.limit,
            limits.core.reset.to_rfc3339()
        );
        info!(
            "Search API: {}/{} remaining (resets at {})",
            limits.search.remaining,
            limits.search.limit,
            limits.search.reset.to_rfc3339()
        );

        if limits.core.remaining < discovery.min_core_remaining {
            return Err(Error::InsufficientQuota {
                api: "core",
                remaining: limits.core.remaining,
                required: discovery.min_core_remaining,
            });
        }
        if limits.search.remaining < discovery.min_search_remaining {
            return Err(Error::InsufficientQuota {
                api: "search",
                remaining: limits.search.remaining,
                required: discovery.min_search_remaining,
            });
        }

        Ok(())
    }

    /// Returns what this run's searches found, before merging
    async fn discover(&self, progress: &mut Progress, summary: &mut RunSummary) -> Result<Vec<Template>> {
        let incremental = self.options.incremental;
        info!(
            "Loaded blocklist: {} path patterns, {} repo patterns",
            self.blocklist.path_pattern_count(),
            self.blocklist.repo_pattern_count()
        );

        let existing = if incremental {
            let existing = self.store.load_templates()?;
            info!("Loaded {} existing templates for incremental update", existing.len());
            existing
        } else {
            Vec::new()
        };

        let since = incremental_since(&existing, Duration::hours(self.config.discovery.lookback_hours));
        match since {
            Some(at) => info!("Searching for templates pushed since {} (lookback overlap)", at.to_rfc3339()),
            None if incremental => info!("No existing templates found, running full discovery"),
            None => {}
        }

        let discoverer = Discoverer::new(self.source, self.blocklist, &self.config.pacing);
        let discovered = discoverer.discover_all(since, &existing).await?;

        if since.is_some() && discovered.is_empty() {
            warn!("Incremental search returned 0 templates, expected at least the newest one from the previous run");
        }

        let templates = if incremental {
            let outcome = merge_templates(&existing, &discovered, Utc::now());
            log_merge_summary(&outcome);
            summary.new_count = outcome.new_count();
            summary.updated_count = outcome.updated_count();
            summary.unchanged_count = outcome.unchanged_count;
            outcome.templates
        } else {
            let mut templates = discovered.clone();
            templates.sort_by(|a, b| a.id.cmp(&b.id));
            templates
        };

        self.store.save_templates(&templates)?;

        let official = templates.iter().filter(|t| t.is_official).count();
        if !incremental {
            progress.phase = Phase::Metadata;
        }
        progress.templates_discovered = templates.len();
        progress.official_templates = official;
        progress.community_templates = templates.len() - official;
        progress.last_updated = Some(Utc::now());
        self.record_rate_limit(progress).await;
        self.store.save_progress(progress)?;

        info!(
            "Total templates: {} ({} official, {} community)",
            templates.len(),
            official,
            templates.len() - official
        );

        Ok(discovered)
    }

    async fn collect_metadata(
        &self,
        discovered: &[Template],
        progress: &mut Progress,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let collector = MetadataCollector::new(self.source, &self.config.pacing);

        let collected = if self.options.incremental {
            let existing_repos = self.store.load_repositories()?;
            let existing_orgs = self.store.load_organizations()?;
            let policy = RefreshPolicy::from_config(&self.config.refresh);

            collector
                .collect_incremental(discovered, &existing_repos, &existing_orgs, &policy, Utc::now())
                .await
        } else {
            let templates = self.store.load_templates()?;
            collector.collect_all(&templates).await
        };

        self.store.save_repositories(&collected.repositories)?;
        self.store.save_organizations(&collected.organizations)?;

        if !self.options.incremental {
            progress.phase = Phase::Complete;
        }
        progress.repos_fetched = collected.repositories.len();
        progress.orgs_fetched = collected.organizations.len();
        progress.last_updated = Some(Utc::now());
        self.record_rate_limit(progress).await;
        self.store.save_progress(progress)?;

        summary.repositories = collected.repositories.len();
        summary.organizations = collected.organizations.len();
        info!("Collected metadata for {} repositories", collected.repositories.len());
        info!("Collected metadata for {} organizations", collected.organizations.len());

        Ok(())
    }

    /// Core quota snapshot stored with the progress; failures only warn
    async fn record_rate_limit(&self, progress: &mut Progress) {
        match self.source.rate_limits().await {
            Ok(limits) => {
                progress.rate_limit_remaining = limits.core.remaining;
                progress.rate_limit_reset = Some(limits.core.reset);
            }
            Err(e) => warn!("Could not refresh rate limit snapshot: {}", e),
        }
    }

    /// Returns how many templates were looked at
    async fn analyze(&self) -> Result<usize> {
        let templates = self.store.load_templates()?;
        let repos: HashMap<String, _> = self
            .store
            .load_repositories()?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let pending = templates.iter().filter(|t| !t.is_analyzed()).count();
        info!("{} of {} templates need analysis", pending, templates.len());

        let analyzer = Analyzer::new(
            self.source,
            self.options.llm_api_key.clone(),
            self.config.pacing.analysis_delay(),
        );
        let analyzed = analyzer.analyze_templates(templates, &repos).await;

        self.store.save_templates(&analyzed)?;
        info!("Analyzed {} templates", pending);

        Ok(pending)
    }

    fn combine(&self) -> Result<usize> {
        let templates = self.store.load_templates()?;
        let repos = self.store.load_repositories()?;
        let orgs = self.store.load_organizations()?;

        let combined = Combiner::new(Some(self.blocklist)).combine(&templates, &repos, &orgs);
        self.store.save_combined(&combined)?;
        info!("Output file: {}", self.store.data_dir().join(crate::catalog_store::COMBINED_FILE).display());

        Ok(combined.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use crate::models::{Organization, Repository};
    use crate::source::{DirectoryEntry, MockCatalogSource, SearchHit};
    use chrono::DateTime;
    use limacat_api::{RateLimit, RateLimits};

    fn limits(core: u32, search: u32) -> RateLimits {
        let reset = Utc::now() + Duration::minutes(30);
        RateLimits {
            core: RateLimit {
                limit: 5000,
                remaining: core,
                reset,
            },
            search: RateLimit {
                limit: 30,
                remaining: search,
                reset,
            },
        }
    }

    fn repository(owner: &str, name: &str, pushed_at: Option<DateTime<Utc>>) -> Repository {
        Repository {
            id: format!("{}/{}", owner, name),
            owner: owner.to_string(),
            name: name.to_string(),
            description: Some("Handy VMs".to_string()),
            topics: Vec::new(),
            stars: 42,
            forks: 1,
            watchers: 42,
            language: None,
            license: None,
            default_branch: "main".to_string(),
            created_at: None,
            updated_at: Some(Utc::now()),
            pushed_at,
            homepage: None,
            is_fork: false,
            parent: None,
            last_fetched: Utc::now(),
        }
    }

    fn organization(login: &str) -> Organization {
        Organization {
            id: login.to_string(),
            login: login.to_string(),
            account_type: "User".to_string(),
            name: None,
            description: None,
            location: None,
            blog: None,
            email: None,
            last_fetched: Utc::now(),
        }
    }

    /// A GitHub with one community template (at `sha`) and one official one
    fn mock_github(sha: &'static str) -> MockCatalogSource {
        mock_github_with_quota(sha, 5000)
    }

    fn mock_github_with_quota(sha: &'static str, core_remaining: u32) -> MockCatalogSource {
        let mut source = MockCatalogSource::new();
        source
            .expect_rate_limits()
            .returning(move || Ok(limits(core_remaining, 30)));
        source.expect_search_code().returning(move |query, page| {
            if page == 1 && query.starts_with("minimumLimaVersion extension:yaml") {
                Ok(vec![SearchHit {
                    repo: "alice/vms".to_string(),
                    path: "dev/lima.yaml".to_string(),
                    sha: sha.to_string(),
                    html_url: format!("https://github.com/alice/vms/blob/{}/dev/lima.yaml", sha),
                }])
            } else {
                Ok(Vec::new())
            }
        });
        source
            .expect_file_content()
            .returning(|_, _, _| Ok("minimumLimaVersion: 1.0.0\nimages: []\n".to_string()));
        source.expect_list_directory().returning(|_, _, _| {
            Ok(vec![DirectoryEntry {
                name: "docker.yaml".to_string(),
                path: "templates/docker.yaml".to_string(),
                sha: "official-1".to_string(),
                size: 10,
                entry_type: "file".to_string(),
                html_url: "https://github.com/lima-vm/lima/blob/master/templates/docker.yaml".to_string(),
            }])
        });
        source.expect_repository().returning(|owner, name| {
            // lima-vm/lima hasn't been pushed in a long time
            let pushed = Utc::now() - Duration::days(365);
            Ok(repository(owner, name, Some(pushed)))
        });
        source
            .expect_organization()
            .returning(|login| Ok(organization(login)));
        source
    }

    fn options(data_dir: &std::path::Path, incremental: bool, analyze: bool) -> RunOptions {
        RunOptions {
            data_dir: data_dir.to_path_buf(),
            incremental,
            analyze,
            llm_api_key: None,
        }
    }

    fn quiet_config() -> Config {
        Config {
            pacing: PacingConfig::none(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_three_incremental_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path()).unwrap();
        let blocklist = Blocklist::empty();
        let config = quiet_config();
        let opts = options(dir.path(), true, false);
        let id = "alice/vms/dev/lima.yaml";

        // Run 1: nothing on disk yet
        let github = mock_github("s1");
        let first = Pipeline::new(&github, &store, &blocklist, &config, &opts).run().await.unwrap();
        assert_eq!(first.new_count, 2);
        assert_eq!(first.updated_count, 0);
        let first_seen = store
            .load_templates()
            .unwrap()
            .into_iter()
            .find(|t| t.id == id)
            .unwrap()
            .discovered_at;

        // Run 2: same content
        let github = mock_github("s1");
        let second = Pipeline::new(&github, &store, &blocklist, &config, &opts).run().await.unwrap();
        assert_eq!(second.new_count, 0);
        assert_eq!(second.updated_count, 0);
        assert_eq!(second.unchanged_count, 2);

        // Run 3: the community template changed
        let github = mock_github("s3");
        let third = Pipeline::new(&github, &store, &blocklist, &config, &opts).run().await.unwrap();
        assert_eq!(third.new_count, 0);
        assert_eq!(third.updated_count, 1);
        assert_eq!(third.unchanged_count, 1);

        let templates = store.load_templates().unwrap();
        assert_eq!(templates.len(), 2);
        let template = templates.iter().find(|t| t.id == id).unwrap();
        assert_eq!(template.sha, "s3");
        assert_eq!(template.discovered_at, first_seen);

        // Incremental runs never move the phase
        assert_eq!(store.load_progress().unwrap().phase, Phase::Discovery);
        assert_eq!(third.combined, 2);
        assert_eq!(store.load_combined().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_full_run_then_resume_from_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path()).unwrap();
        let blocklist = Blocklist::empty();
        let config = quiet_config();
        let opts = options(dir.path(), false, false);

        let github = mock_github("s1");
        let summary = Pipeline::new(&github, &store, &blocklist, &config, &opts).run().await.unwrap();

        assert_eq!(summary.phase, Phase::Complete);
        assert_eq!(summary.templates, 2);
        assert_eq!(summary.repositories, 2);
        assert_eq!(summary.organizations, 2);

        let progress = store.load_progress().unwrap();
        assert_eq!(progress.official_templates, 1);
        assert_eq!(progress.community_templates, 1);
        assert_eq!(progress.rate_limit_remaining, 5000);
        assert!(progress.rate_limit_reset.is_some());

        let combined = store.load_combined().unwrap();
        let ids: Vec<_> = combined.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["alice/vms/dev/lima.yaml", "lima-vm/lima/templates/docker.yaml"]);

        // Already complete: no searching, no fetching, just combine again
        let mut idle = MockCatalogSource::new();
        idle.expect_rate_limits().returning(|| Ok(limits(5000, 30)));
        idle.expect_search_code().never();
        idle.expect_repository().never();
        idle.expect_organization().never();
        let again = Pipeline::new(&idle, &store, &blocklist, &config, &opts).run().await.unwrap();
        assert_eq!(again.combined, 2);
    }

    #[tokio::test]
    async fn test_analysis_phase() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path()).unwrap();
        let blocklist = Blocklist::empty();
        let config = quiet_config();
        let opts = options(dir.path(), false, true);

        let mut github = mock_github("s1");
        github
            .expect_download()
            .returning(|_| Ok("images:\n- location: https://dl-cdn.alpinelinux.org/a.iso\n".to_string()));

        let summary = Pipeline::new(&github, &store, &blocklist, &config, &opts).run().await.unwrap();
        assert_eq!(summary.analyzed, 2);

        let templates = store.load_templates().unwrap();
        assert!(templates.iter().all(|t| t.analyzed_at.is_some()));
        let dev = templates.iter().find(|t| t.repo == "alice/vms").unwrap();
        assert_eq!(dev.name, "dev");
        assert_eq!(dev.keywords, vec!["alpine"]);

        let combined = store.load_combined().unwrap();
        let dev = combined.iter().find(|c| c.repo == "alice/vms").unwrap();
        assert_eq!(dev.name, "DEV");
        assert_eq!(dev.description, "Alpine-based general. Handy VMs");
    }

    #[tokio::test]
    async fn test_insufficient_quota_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path()).unwrap();
        let blocklist = Blocklist::empty();
        let config = quiet_config();
        let opts = options(dir.path(), true, false);

        let mut low_core = MockCatalogSource::new();
        low_core.expect_rate_limits().returning(|| Ok(limits(99, 30)));
        low_core.expect_search_code().never();
        let err = Pipeline::new(&low_core, &store, &blocklist, &config, &opts)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientQuota { api: "core", remaining: 99, required: 100 }));

        let mut low_search = MockCatalogSource::new();
        low_search.expect_rate_limits().returning(|| Ok(limits(5000, 4)));
        let err = Pipeline::new(&low_search, &store, &blocklist, &config, &opts)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientQuota { api: "search", .. }));

        assert!(store.load_templates().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_records_rate_limit_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        // Unreadable repos file: the run stops right after discovery
        std::fs::write(dir.path().join(crate::catalog_store::REPOSITORIES_FILE), "{oops\n").unwrap();
        let store = CatalogStore::open(dir.path()).unwrap();
        let blocklist = Blocklist::empty();
        let config = quiet_config();
        let opts = options(dir.path(), true, false);

        let github = mock_github_with_quota("s1", 4321);

        let err = Pipeline::new(&github, &store, &blocklist, &config, &opts)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));

        let progress = store.load_progress().unwrap();
        assert_eq!(progress.templates_discovered, 2);
        assert_eq!(progress.rate_limit_remaining, 4321);
        assert!(progress.rate_limit_reset.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(crate::catalog_store::TEMPLATES_FILE), "not json\n").unwrap();
        let store = CatalogStore::open(dir.path()).unwrap();
        let blocklist = Blocklist::empty();
        let config = quiet_config();
        let opts = options(dir.path(), true, false);

        let github = mock_github("s1");
        let err = Pipeline::new(&github, &store, &blocklist, &config, &opts)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));
    }
}
