// Catalog domain logic: find templates, collect metadata, merge, combine
pub mod analyzer;
pub mod blocklist;
pub mod catalog_store;
pub mod classifier;
pub mod combiner;
pub mod config;
pub mod discovery;
pub mod error;
pub mod merge;
pub mod metadata;
pub mod models;
pub mod naming;
pub mod pipeline;
pub mod providers;
pub mod refresh;
pub mod source;

pub use analyzer::Analyzer;
pub use blocklist::Blocklist;
pub use catalog_store::CatalogStore;
pub use combiner::{CombinedTemplate, Combiner};
pub use config::{Config, PacingConfig, RunOptions};
pub use discovery::Discoverer;
pub use error::Error;
pub use merge::{merge_templates, MergeOutcome};
pub use metadata::MetadataCollector;
pub use models::{Organization, Phase, Progress, Repository, Template};
pub use pipeline::{Pipeline, RunSummary};
pub use providers::GitHubProvider;
pub use refresh::RefreshPolicy;
pub use source::CatalogSource;

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
