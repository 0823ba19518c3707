// Flattens templates + repo/org metadata into what the catalog web page loads
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::blocklist::{is_blocklisted, Blocklist};
use crate::models::{split_repo, Organization, Repository, Template};

pub const FALLBACK_DESCRIPTION: &str = "Lima VM template";
const FALLBACK_BRANCH: &str = "main";

/// One line of templates-combined.jsonl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub category: String,
    pub repo: String,
    pub org: String,
    pub path: String,
    pub stars: u32,
    /// YYYY-MM-DD, empty when unknown
    pub updated_at: String,
    pub official: bool,
    pub url: String,
    pub raw_url: String,
}

pub struct Combiner<'a> {
    blocklist: Option<&'a Blocklist>,
}

impl<'a> Combiner<'a> {
    pub fn new(blocklist: Option<&'a Blocklist>) -> Self {
        Self { blocklist }
    }

    /// Join templates with their repository and owner, sorted by org/repo/path
    ///
    /// Templates without repository data are dropped. A missing owner
    /// record only gets a warning.
    pub fn combine(
        &self,
        templates: &[Template],
        repos: &[Repository],
        orgs: &[Organization],
    ) -> Vec<CombinedTemplate> {
        let repo_map: HashMap<&str, &Repository> = repos.iter().map(|r| (r.id.as_str(), r)).collect();
        let org_map: HashMap<&str, &Organization> = orgs.iter().map(|o| (o.id.as_str(), o)).collect();

        let mut combined = Vec::with_capacity(templates.len());
        let mut filtered = 0;

        for template in templates {
            let Some((owner, repo_name)) = split_repo(&template.repo) else {
                warn!("Invalid repo format for template {}: {}", template.id, template.repo);
                continue;
            };

            if is_blocklisted(owner, repo_name, &template.path, self.blocklist) {
                filtered += 1;
                continue;
            }

            let Some(repo) = repo_map.get(template.repo.as_str()) else {
                warn!("No repo data for template {} (repo: {})", template.id, template.repo);
                continue;
            };

            if !org_map.contains_key(owner) {
                warn!("No org data for template {} (org: {})", template.id, owner);
            }

            combined.push(CombinedTemplate {
                id: template.id.clone(),
                name: display_name(template),
                description: description(template),
                keywords: template.keywords.clone(),
                category: template.category.clone(),
                repo: template.repo.clone(),
                org: owner.to_string(),
                path: template.path.clone(),
                stars: repo.stars,
                updated_at: format_date(repo.updated_at),
                official: template.is_official,
                url: template.url.clone(),
                raw_url: raw_url(template, repo),
            });
        }

        combined.sort_by(|a, b| {
            a.org
                .cmp(&b.org)
                .then_with(|| a.repo.cmp(&b.repo))
                .then_with(|| a.path.cmp(&b.path))
        });

        info!("=== Frontend Data Combination ===");
        info!("Total templates: {}", templates.len());
        info!("Filtered (blocklist): {}", filtered);
        info!("Combined output: {} templates", combined.len());

        combined
    }
}

/// Display name, then derived name, then the bare path
pub fn display_name(template: &Template) -> String {
    [&template.display_name, &template.name]
        .into_iter()
        .find(|name| !name.is_empty())
        .unwrap_or(&template.path)
        .clone()
}

/// Short description, or the first three keywords, or a stock phrase
pub fn description(template: &Template) -> String {
    if !template.short_description.is_empty() {
        return template.short_description.clone();
    }

    if !template.keywords.is_empty() {
        let count = template.keywords.len().min(3);
        return template.keywords[..count].join(", ");
    }

    FALLBACK_DESCRIPTION.to_string()
}

/// raw.githubusercontent.com URL on the repository's default branch
pub fn raw_url(template: &Template, repo: &Repository) -> String {
    let branch = if repo.default_branch.is_empty() {
        FALLBACK_BRANCH
    } else {
        repo.default_branch.as_str()
    };

    format!(
        "https://raw.githubusercontent.com/{}/{}/{}",
        template.repo, branch, template.path
    )
}

pub fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}
