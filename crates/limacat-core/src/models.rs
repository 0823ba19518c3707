use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A Lima template file found on GitHub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// owner/repo/path/to/template.yaml
    pub id: String,
    /// owner/repo
    pub repo: String,
    pub path: String,
    /// Git blob SHA, doubles as the content hash
    pub sha: String,
    #[serde(default)]
    pub size: u64,
    /// Where a human would look at it
    pub url: String,
    pub discovered_at: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
    /// Lives in lima-vm/lima/templates
    #[serde(default)]
    pub is_official: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub short_description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub use_case: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arch: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl Template {
    /// A freshly discovered template with no analysis yet
    pub fn discovered(
        repo: &str,
        path: &str,
        sha: &str,
        url: &str,
        is_official: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("{}/{}", repo, path),
            repo: repo.to_string(),
            path: path.to_string(),
            sha: sha.to_string(),
            size: 0,
            url: url.to_string(),
            discovered_at: now,
            last_checked: now,
            is_official,
            name: String::new(),
            display_name: String::new(),
            short_description: String::new(),
            description: String::new(),
            category: String::new(),
            use_case: String::new(),
            keywords: Vec::new(),
            images: Vec::new(),
            arch: Vec::new(),
            analyzed_at: None,
        }
    }

    /// Analysis is current for this record
    ///
    /// Older data files carry a zero timestamp (0001-01-01) for templates
    /// that were never analyzed, so a time before discovery doesn't count.
    pub fn is_analyzed(&self) -> bool {
        self.analyzed_at.is_some_and(|at| at >= self.discovered_at)
    }

    /// Owner login, if the repo field is well formed
    pub fn owner(&self) -> Option<&str> {
        split_repo(&self.repo).map(|(owner, _)| owner)
    }
}

/// Repository metadata for a repo that holds at least one template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// owner/name
    pub id: String,
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub stars: u32,
    #[serde(default)]
    pub forks: u32,
    #[serde(default)]
    pub watchers: u32,
    #[serde(default)]
    pub language: Option<String>,
    /// SPDX id
    #[serde(default)]
    pub license: Option<String>,
    /// Empty when GitHub didn't tell us
    #[serde(default)]
    pub default_branch: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub is_fork: bool,
    /// owner/name of the parent when this is a fork
    #[serde(default)]
    pub parent: Option<String>,
    pub last_fetched: DateTime<Utc>,
}

/// A GitHub user or organization that owns template repos
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    /// login
    pub id: String,
    pub login: String,
    /// "User" or "Organization"
    #[serde(rename = "type", default)]
    pub account_type: String,
    #[serde(default)]
    pub name: Option<String>,
    /// bio
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub blog: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub last_fetched: DateTime<Utc>,
}

/// Where a non-incremental run picks up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Discovery,
    Metadata,
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Discovery => write!(f, "discovery"),
            Phase::Metadata => write!(f, "metadata"),
            Phase::Complete => write!(f, "complete"),
        }
    }
}

/// Collection state, persisted as progress.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    pub phase: Phase,
    pub templates_discovered: usize,
    pub official_templates: usize,
    pub community_templates: usize,
    pub repos_fetched: usize,
    pub orgs_fetched: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub rate_limit_remaining: u32,
    pub rate_limit_reset: Option<DateTime<Utc>>,
}

/// Split "owner/name" into its two halves
///
/// Anything with fewer or more than two non-empty segments is rejected.
pub fn split_repo(full_name: &str) -> Option<(&str, &str)> {
    let (owner, name) = full_name.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((owner, name))
}

/// Treat an explicit `null` the same as a missing field
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_repo() {
        assert_eq!(split_repo("lima-vm/lima"), Some(("lima-vm", "lima")));
        assert_eq!(split_repo("lima-vm"), None);
        assert_eq!(split_repo("a/b/c"), None);
        assert_eq!(split_repo("/lima"), None);
        assert_eq!(split_repo("lima-vm/"), None);
    }

    #[test]
    fn test_template_skips_empty_analysis_fields() {
        let now = Utc::now();
        let template = Template::discovered("alice/vms", "dev.yaml", "abc", "https://x", false, now);

        let json = serde_json::to_string(&template).unwrap();
        assert!(json.contains("\"id\":\"alice/vms/dev.yaml\""));
        assert!(!json.contains("keywords"));
        assert!(!json.contains("analyzed_at"));

        let back: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(back, template);
        assert_eq!(back.owner(), Some("alice"));
    }

    #[test]
    fn test_zero_analyzed_at_means_not_analyzed() {
        let line = r#"{"id":"alice/vms/dev.yaml","repo":"alice/vms","path":"dev.yaml","sha":"abc","size":0,"last_modified":"0001-01-01T00:00:00Z","url":"https://github.com/alice/vms/blob/abc/dev.yaml","discovered_at":"2024-05-01T10:00:00Z","last_checked":"2024-05-01T10:00:00Z","is_official":false,"analyzed_at":"0001-01-01T00:00:00Z"}"#;
        let template: Template = serde_json::from_str(line).unwrap();

        assert!(template.analyzed_at.is_some());
        assert!(!template.is_analyzed());

        let mut done = template.clone();
        done.analyzed_at = Some(done.discovered_at + chrono::Duration::hours(1));
        assert!(done.is_analyzed());
    }

    #[test]
    fn test_repository_tolerates_null_topics() {
        let json = r#"{"id":"a/b","owner":"a","name":"b","topics":null,"last_fetched":"2024-01-01T00:00:00Z"}"#;
        let repo: Repository = serde_json::from_str(json).unwrap();
        assert!(repo.topics.is_empty());
        assert_eq!(repo.default_branch, "");
    }

    #[test]
    fn test_progress_defaults_to_discovery() {
        let progress: Progress = serde_json::from_str("{}").unwrap();
        assert_eq!(progress.phase, Phase::Discovery);

        let json = serde_json::to_string(&Progress {
            phase: Phase::Metadata,
            ..Default::default()
        })
        .unwrap();
        assert!(json.contains("\"phase\":\"metadata\""));
    }
}
