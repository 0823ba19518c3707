// Template analysis: names, category, keywords and a one-line description
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::classifier::{parse_template_content, raw_content_url, TemplateInfo};
use crate::models::{Repository, Template};
use crate::naming::{derive_template_name, display_name};
use crate::source::CatalogSource;
use crate::Result;

pub struct Analyzer<'a> {
    source: &'a dyn CatalogSource,
    llm_api_key: Option<String>,
    delay: Duration,
}

impl<'a> Analyzer<'a> {
    pub fn new(source: &'a dyn CatalogSource, llm_api_key: Option<String>, delay: Duration) -> Self {
        Self {
            source,
            llm_api_key: llm_api_key.filter(|key| !key.is_empty()),
            delay,
        }
    }

    /// Analyze every template that hasn't been analyzed yet
    ///
    /// Templates whose content changed come out of the merge without
    /// `analyzed_at`, so they get picked up again here. So do records
    /// with an analysis time older than their discovery.
    pub async fn analyze_templates(
        &self,
        templates: Vec<Template>,
        repos: &HashMap<String, Repository>,
    ) -> Vec<Template> {
        let total = templates.len();
        let mut analyzed = Vec::with_capacity(total);
        let mut fetched_any = false;

        for (i, mut template) in templates.into_iter().enumerate() {
            if template.is_analyzed() {
                analyzed.push(template);
                continue;
            }

            if fetched_any {
                sleep(self.delay).await;
            }
            fetched_any = true;

            info!("Analyzing [{}/{}] {}...", i + 1, total, template.id);
            let info = self.fetch_info(&template).await;
            let repo = repos.get(&template.repo);
            self.analyze_template(&mut template, &info, repo, Utc::now());
            analyzed.push(template);
        }

        analyzed
    }

    /// Download and classify, an unreadable template just gets no tags
    async fn fetch_info(&self, template: &Template) -> TemplateInfo {
        let url = raw_content_url(&template.url);

        let parsed = match self.source.download(&url).await {
            Ok(content) => parse_template_content(&content),
            Err(e) => Err(e),
        };

        parsed.unwrap_or_else(|e| {
            warn!("Failed to parse template {}: {}", template.id, e);
            TemplateInfo::default()
        })
    }

    /// Fill in the derived fields of one template from its parsed content
    pub fn analyze_template(
        &self,
        template: &mut Template,
        info: &TemplateInfo,
        repo: Option<&Repository>,
        now: DateTime<Utc>,
    ) {
        template.name = derive_template_name(&template.path, &template.repo);
        template.display_name = display_name(&template.name);

        template.images = info.images.clone();
        template.arch = info.arch.clone();
        template.keywords = info.keywords.clone();

        let (category, use_case) = infer_category(info, repo);
        template.category = category.to_string();
        template.use_case = use_case.to_string();
        template.short_description = basic_description(&template.category, info, repo);

        if let Some(key) = &self.llm_api_key {
            if let Err(e) = enhance_with_llm(key, template, info, repo) {
                warn!("LLM enhancement failed for {}: {}", template.id, e);
            }
        }

        template.analyzed_at = Some(now);
    }
}

/// Category and use case, first match wins
///
/// Kubernetes beats container runtimes, which beat whatever the scripts
/// suggested, which beats the repository topics.
pub fn infer_category(info: &TemplateInfo, repo: Option<&Repository>) -> (&'static str, &'static str) {
    if info.has_k8s {
        return ("orchestration", "kubernetes");
    }
    if info.has_docker || info.has_podman {
        return ("containers", "container-runtime");
    }

    match info.categories.first().map(String::as_str) {
        Some("development") => return ("development", "dev-environment"),
        Some("database") => return ("database", "data-storage"),
        _ => {}
    }

    if let Some(repo) = repo {
        let topics = repo.topics.join(" ").to_lowercase();

        if topics.contains("security") || topics.contains("pentest") {
            return ("security", "security-testing");
        }
        if topics.contains("test") || topics.contains("ci") {
            return ("testing", "ci-cd");
        }
        if topics.contains("ml") || topics.contains("machine-learning") {
            return ("ml", "machine-learning");
        }
    }

    ("general", "vm")
}

/// e.g. "Ubuntu-based orchestration with Kubernetes (x86_64/aarch64). Repo blurb"
pub fn basic_description(category: &str, info: &TemplateInfo, repo: Option<&Repository>) -> String {
    let mut parts = Vec::new();

    if let Some(image) = info.images.first() {
        parts.push(format!("{}-based", capitalize(image)));
    }

    parts.push(category.to_string());

    if info.has_k8s {
        parts.push("with Kubernetes".to_string());
    } else if info.has_docker {
        parts.push("with Docker".to_string());
    } else if info.has_podman {
        parts.push("with Podman".to_string());
    }

    // A template that runs everywhere doesn't need its arch list spelled out
    if !info.arch.is_empty() && info.arch.len() < 3 {
        parts.push(format!("({})", info.arch.join("/")));
    }

    let mut description = parts.join(" ");

    if let Some(repo_description) = repo
        .and_then(|r| r.description.as_deref())
        .filter(|d| !d.is_empty())
    {
        description.push_str(". ");
        description.push_str(repo_description);
    }

    description
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Hook for model-written descriptions; leaves the template as is for now
fn enhance_with_llm(
    _api_key: &str,
    template: &mut Template,
    _info: &TemplateInfo,
    _repo: Option<&Repository>,
) -> Result<()> {
    debug!("No LLM enhancement available for {}", template.id);
    Ok(())
}
