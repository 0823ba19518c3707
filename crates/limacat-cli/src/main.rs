use anyhow::Context;
use clap::{builder::FalseyValueParser, ArgAction, Parser};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use limacat_api::GitHubClient;
use limacat_core::{Blocklist, CatalogStore, Config, Error, GitHubProvider, Pipeline, RunOptions};

/// Builds the Lima template catalog from GitHub
///
/// Every flag can also come from the environment, which is how the
/// scheduled CI job drives it.
#[derive(Parser)]
#[command(name = "lima-catalog")]
#[command(version, about = "Discover Lima VM templates on GitHub and build the catalog data files", long_about = None)]
struct Cli {
    /// GitHub token for API access
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Where the .jsonl files live
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Merge into the existing data instead of resuming by phase
    #[arg(long, env = "INCREMENTAL", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
    incremental: bool,

    /// Download and classify each template
    #[arg(long, env = "ANALYZE", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
    analyze: bool,

    /// API key for generated descriptions
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Path/repo patterns to leave out of the catalog
    #[arg(long, env = "BLOCKLIST_PATH", default_value = "config/blocklist.yaml")]
    blocklist: PathBuf,

    /// Optional TOML file with pacing and refresh settings
    #[arg(long, env = "LIMACAT_CONFIG", default_value = "limacat.toml")]
    config: PathBuf,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    api_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lima_catalog=info,limacat_core=info,limacat_api=info,limacat_store=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // No token, no run - checked before touching anything else
    let token = cli
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::ConfigError("GITHUB_TOKEN environment variable not set".to_string()))?;

    let config = Config::load(&cli.config)?;
    let blocklist = Blocklist::load(&cli.blocklist).context("failed to load blocklist")?;

    let options = RunOptions {
        data_dir: cli.data_dir,
        incremental: cli.incremental,
        analyze: cli.analyze,
        llm_api_key: cli.llm_api_key.filter(|k| !k.is_empty()),
    };

    tracing::info!("Lima Template Catalog - Data Collection Tool");

    let store = CatalogStore::open(&options.data_dir).context("failed to initialize storage")?;
    let client =
        GitHubClient::with_base_url(Some(token), cli.api_url).with_retry_config(config.pacing.retry_config());
    let provider = GitHubProvider::new(client);

    let summary = Pipeline::new(&provider, &store, &blocklist, &config, &options)
        .run()
        .await?;

    if options.incremental {
        tracing::info!(
            "Run finished: {} new, {} updated, {} unchanged templates",
            summary.new_count,
            summary.updated_count,
            summary.unchanged_count
        );
    }
    tracing::info!(
        "Data saved to {} ({} combined templates)",
        options.data_dir.display(),
        summary.combined
    );

    Ok(())
}
