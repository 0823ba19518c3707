// Template discovery - code search for community templates, directory listing for official ones
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use limacat_api::SEARCH_PAGE_SIZE;

use crate::blocklist::Blocklist;
use crate::classifier::has_images_key;
use crate::config::PacingConfig;
use crate::models::{split_repo, Template};
use crate::source::CatalogSource;
use crate::Result;

pub const OFFICIAL_OWNER: &str = "lima-vm";
pub const OFFICIAL_REPO: &str = "lima";
pub const OFFICIAL_TEMPLATES_DIR: &str = "templates";

/// GitHub stops serving code search results after 1000 hits
pub const MAX_SEARCH_PAGES: u32 = 10;

/// Search queries for community templates, most specific first
///
/// Each marker is searched once per extension since code search can't OR
/// extensions. With a lower bound every query gets a `pushed:>` filter.
pub fn community_queries(since: Option<DateTime<Utc>>) -> Vec<String> {
    let date_qualifier = since
        .map(|at| format!(" pushed:>{}", at.format("%Y-%m-%d")))
        .unwrap_or_default();
    let date_qualifier = date_qualifier.as_str();

    ["minimumLimaVersion", "images: provision:"]
        .iter()
        .flat_map(|marker| {
            ["yaml", "yml"].iter().map(move |ext| {
                format!(
                    "{} extension:{} -repo:{}/{}{}",
                    marker, ext, OFFICIAL_OWNER, OFFICIAL_REPO, date_qualifier
                )
            })
        })
        .collect()
}

/// Newest discovery timestamp in a snapshot
pub fn newest_discovered_at(templates: &[Template]) -> Option<DateTime<Utc>> {
    templates.iter().map(|t| t.discovered_at).max()
}

/// Lower bound for an incremental search, None means search everything
pub fn incremental_since(existing: &[Template], lookback: Duration) -> Option<DateTime<Utc>> {
    newest_discovered_at(existing).map(|newest| newest - lookback)
}

/// Finds Lima templates on GitHub
pub struct Discoverer<'a> {
    source: &'a dyn CatalogSource,
    blocklist: &'a Blocklist,
    pacing: &'a PacingConfig,
}

impl<'a> Discoverer<'a> {
    pub fn new(source: &'a dyn CatalogSource, blocklist: &'a Blocklist, pacing: &'a PacingConfig) -> Self {
        Self {
            source,
            blocklist,
            pacing,
        }
    }

    /// Community templates first, then official ones
    pub async fn discover_all(
        &self,
        since: Option<DateTime<Utc>>,
        existing: &[Template],
    ) -> Result<Vec<Template>> {
        info!("=== Discovering Community Templates ===");
        if let Some(at) = since {
            info!("Incremental mode: searching for templates pushed since {}", at.format("%Y-%m-%d"));
        }
        let mut templates = self.discover_community(since).await?;
        info!("Discovered {} community templates", templates.len());

        info!("=== Discovering Official Templates ===");
        let official = self.discover_official(since, existing).await?;
        info!("Discovered {} official templates", official.len());

        templates.extend(official);
        Ok(templates)
    }

    /// Run every community query, keeping the first sighting of each template
    pub async fn discover_community(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Template>> {
        let queries = community_queries(since);
        let mut seen = HashSet::new();
        let mut templates = Vec::new();

        for (i, query) in queries.iter().enumerate() {
            if i > 0 {
                debug!("Waiting {:?} before next query", self.pacing.query_delay());
                sleep(self.pacing.query_delay()).await;
            }

            info!("Query {}: {}", i + 1, query);
            let found = self.search_with_query(query).await?;

            let total = found.len();
            let mut added = 0;
            for template in found {
                if seen.insert(template.id.clone()) {
                    debug!("  + {}", template.id);
                    templates.push(template);
                    added += 1;
                }
            }
            info!("Query {} found {} templates, {} new (duplicates: {})", i + 1, total, added, total - added);
        }

        info!("Total unique templates after deduplication: {}", templates.len());
        Ok(templates)
    }

    /// Page through one code search and keep the hits that are real Lima templates
    pub async fn search_with_query(&self, query: &str) -> Result<Vec<Template>> {
        let mut templates = Vec::new();
        let mut blocklisted = 0;
        let mut excluded = 0;
        let mut page = 1;

        loop {
            debug!("Searching page {}...", page);
            let hits = self.source.search_code(query, page).await?;

            if hits.is_empty() {
                break;
            }
            info!("Found {} results on page {}", hits.len(), page);

            let page_len = hits.len();
            for hit in hits {
                let Some((owner, repo)) = split_repo(&hit.repo) else {
                    continue;
                };

                // Before the content fetch, saves an API call per blocked file
                if self.blocklist.is_blocklisted(owner, repo, &hit.path) {
                    blocklisted += 1;
                    continue;
                }

                if !self.is_lima_template(owner, repo, &hit.path).await {
                    excluded += 1;
                    continue;
                }

                templates.push(Template::discovered(
                    &hit.repo,
                    &hit.path,
                    &hit.sha,
                    &hit.html_url,
                    false,
                    Utc::now(),
                ));
            }

            if page_len < SEARCH_PAGE_SIZE {
                break;
            }
            if page >= MAX_SEARCH_PAGES {
                warn!("Stopping after {} pages, the search API serves no more", MAX_SEARCH_PAGES);
                break;
            }

            page += 1;
            sleep(self.pacing.page_delay()).await;
        }

        if blocklisted > 0 {
            info!("Blocklisted {} files (matched blocklist rules)", blocklisted);
        }
        if excluded > 0 {
            info!("Excluded {} files that don't have an 'images:' top-level key", excluded);
        }

        Ok(templates)
    }

    /// Anything we can't fetch is treated as "not a template"
    async fn is_lima_template(&self, owner: &str, repo: &str, path: &str) -> bool {
        match self.source.file_content(owner, repo, path).await {
            Ok(content) => has_images_key(&content),
            Err(e) => {
                debug!("Could not fetch {}/{}/{}: {}", owner, repo, path, e);
                false
            }
        }
    }

    /// Templates shipped in lima-vm/lima/templates
    ///
    /// With a lower bound and a previous snapshot, returns only new or
    /// changed files, and nothing at all when the repo hasn't been pushed to.
    pub async fn discover_official(
        &self,
        since: Option<DateTime<Utc>>,
        existing: &[Template],
    ) -> Result<Vec<Template>> {
        let incremental = since.filter(|_| !existing.is_empty());

        if let Some(since) = incremental {
            info!("Checking if {}/{} was updated...", OFFICIAL_OWNER, OFFICIAL_REPO);
            let repo = self.source.repository(OFFICIAL_OWNER, OFFICIAL_REPO).await?;

            let pushed_after = repo.pushed_at.is_some_and(|pushed| pushed > since);
            if !pushed_after {
                info!(
                    "{}/{} not updated since {}, skipping official templates",
                    OFFICIAL_OWNER,
                    OFFICIAL_REPO,
                    since.format("%Y-%m-%d")
                );
                return Ok(Vec::new());
            }
        } else {
            info!("Fetching official templates from {}/{}...", OFFICIAL_OWNER, OFFICIAL_REPO);
        }

        let entries = self
            .source
            .list_directory(OFFICIAL_OWNER, OFFICIAL_REPO, OFFICIAL_TEMPLATES_DIR)
            .await?;

        let known: HashMap<&str, &Template> = existing
            .iter()
            .filter(|t| t.is_official)
            .map(|t| (t.id.as_str(), t))
            .collect();

        let official_repo = format!("{}/{}", OFFICIAL_OWNER, OFFICIAL_REPO);
        let (mut new, mut changed, mut unchanged) = (0, 0, 0);
        let mut templates = Vec::new();

        for entry in entries {
            let is_yaml = entry.name.ends_with(".yaml") || entry.name.ends_with(".yml");
            // Underscore files are partials included by other templates
            if !is_yaml || !entry.is_file() || entry.name.starts_with('_') {
                continue;
            }

            let mut template = Template::discovered(
                &official_repo,
                &entry.path,
                &entry.sha,
                &entry.html_url,
                true,
                Utc::now(),
            );
            template.size = entry.size;

            if incremental.is_some() {
                match known.get(template.id.as_str()) {
                    Some(previous) if previous.sha == template.sha => {
                        unchanged += 1;
                        continue;
                    }
                    Some(previous) => {
                        template.discovered_at = previous.discovered_at;
                        changed += 1;
                    }
                    None => new += 1,
                }
            }

            templates.push(template);
        }

        if incremental.is_some() {
            info!(
                "Found {} new, {} changed, {} unchanged official templates",
                new, changed, unchanged
            );
        } else {
            info!("Found {} official templates", templates.len());
        }

        Ok(templates)
    }
}
