// Code host implementations of CatalogSource
pub mod github;

pub use github::GitHubProvider;
