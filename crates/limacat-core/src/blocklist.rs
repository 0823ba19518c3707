use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

use crate::{Error, Result};

/// On-disk blocklist shape
///
/// ```yaml
/// paths:
///   - '^\.github/workflows/'
/// repos:
///   - '^spamorg/'
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlocklistFile {
    #[serde(default, deserialize_with = "crate::models::null_as_default")]
    pub paths: Vec<String>,
    #[serde(default, deserialize_with = "crate::models::null_as_default")]
    pub repos: Vec<String>,
}

/// Compiled blocklist patterns
///
/// Repo patterns see "owner/repo/path", path patterns see only the path
/// inside the repo. A hit on either list excludes the template.
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    paths: Vec<Regex>,
    repos: Vec<Regex>,
}

impl Blocklist {
    /// Blocks nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile patterns, dropping the ones that don't parse
    pub fn from_patterns(paths: &[String], repos: &[String]) -> Self {
        Self {
            paths: compile_patterns("path", paths),
            repos: compile_patterns("repo", repos),
        }
    }

    /// Load the YAML blocklist, a missing file means no filtering
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No blocklist at {}, nothing will be filtered", path.display());
            return Ok(Self::empty());
        }

        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Self::empty());
        }

        let file: BlocklistFile = serde_yaml::from_str(&contents)
            .map_err(|e| Error::ConfigError(format!("Failed to parse blocklist {}: {}", path.display(), e)))?;

        Ok(Self::from_patterns(&file.paths, &file.repos))
    }

    pub fn is_blocklisted(&self, owner: &str, repo: &str, path: &str) -> bool {
        let full_path = format!("{}/{}/{}", owner, repo, path);

        self.repos.iter().any(|re| re.is_match(&full_path))
            || self.paths.iter().any(|re| re.is_match(path))
    }

    pub fn path_pattern_count(&self) -> usize {
        self.paths.len()
    }

    pub fn repo_pattern_count(&self) -> usize {
        self.repos.len()
    }
}

/// Blocklist check that treats "no blocklist" as "allow everything"
pub fn is_blocklisted(owner: &str, repo: &str, path: &str, blocklist: Option<&Blocklist>) -> bool {
    blocklist.is_some_and(|b| b.is_blocklisted(owner, repo, path))
}

fn compile_patterns(kind: &str, patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Skipping invalid {} pattern {:?}: {}", kind, pattern, e);
                None
            }
        })
        .collect()
}
