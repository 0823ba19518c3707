use std::path::Path;

use limacat_store::JsonLinesStore;

use crate::combiner::CombinedTemplate;
use crate::models::{Organization, Progress, Repository, Template};
use crate::Result;

pub const TEMPLATES_FILE: &str = "templates.jsonl";
pub const REPOSITORIES_FILE: &str = "repos.jsonl";
pub const ORGANIZATIONS_FILE: &str = "orgs.jsonl";
pub const PROGRESS_FILE: &str = "progress.json";
pub const COMBINED_FILE: &str = "templates-combined.jsonl";

/// The catalog's data directory, one file per record kind
pub struct CatalogStore {
    store: JsonLinesStore,
}

impl CatalogStore {
    /// Open the data directory, creating it if needed
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        Ok(Self {
            store: JsonLinesStore::open(data_dir)?,
        })
    }

    pub fn data_dir(&self) -> &Path {
        self.store.data_dir()
    }

    pub fn load_templates(&self) -> Result<Vec<Template>> {
        Ok(self.store.load_lines(TEMPLATES_FILE)?)
    }

    pub fn save_templates(&self, templates: &[Template]) -> Result<()> {
        Ok(self.store.save_lines(TEMPLATES_FILE, templates)?)
    }

    pub fn load_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.store.load_lines(REPOSITORIES_FILE)?)
    }

    pub fn save_repositories(&self, repositories: &[Repository]) -> Result<()> {
        Ok(self.store.save_lines(REPOSITORIES_FILE, repositories)?)
    }

    pub fn load_organizations(&self) -> Result<Vec<Organization>> {
        Ok(self.store.load_lines(ORGANIZATIONS_FILE)?)
    }

    pub fn save_organizations(&self, organizations: &[Organization]) -> Result<()> {
        Ok(self.store.save_lines(ORGANIZATIONS_FILE, organizations)?)
    }

    /// Stored progress, or a fresh one starting at discovery
    pub fn load_progress(&self) -> Result<Progress> {
        Ok(self.store.load_document(PROGRESS_FILE)?.unwrap_or_default())
    }

    pub fn save_progress(&self, progress: &Progress) -> Result<()> {
        Ok(self.store.save_document(PROGRESS_FILE, progress)?)
    }

    pub fn load_combined(&self) -> Result<Vec<CombinedTemplate>> {
        Ok(self.store.load_lines(COMBINED_FILE)?)
    }

    pub fn save_combined(&self, combined: &[CombinedTemplate]) -> Result<()> {
        Ok(self.store.save_lines(COMBINED_FILE, combined)?)
    }
}
