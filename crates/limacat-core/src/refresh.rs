// Which repository/organization records get re-fetched this run
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

use crate::config::RefreshConfig;
use crate::models::{split_repo, Organization, Repository, Template};

/// A metadata record that goes stale
pub trait Refreshable {
    fn key(&self) -> &str;
    fn last_fetched(&self) -> DateTime<Utc>;
}

impl Refreshable for Repository {
    fn key(&self) -> &str {
        &self.id
    }

    fn last_fetched(&self) -> DateTime<Utc> {
        self.last_fetched
    }
}

impl Refreshable for Organization {
    fn key(&self) -> &str {
        &self.id
    }

    fn last_fetched(&self) -> DateTime<Utc> {
        self.last_fetched
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    /// Older than this and a record becomes a refresh candidate
    pub stale_after: Duration,
    /// Share of the snapshot refreshed per run, in percent
    pub percent: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::from_config(&RefreshConfig::default())
    }
}

impl RefreshPolicy {
    pub fn from_config(config: &RefreshConfig) -> Self {
        Self {
            stale_after: Duration::days(config.stale_after_days),
            percent: config.refresh_percent,
        }
    }

    fn is_stale(&self, last_fetched: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last_fetched > self.stale_after
    }
}

/// How many stale records one run may refresh: ceil(total * percent / 100), at least 1
pub fn refresh_budget(total: usize, percent: u32) -> usize {
    if total == 0 {
        return 0;
    }
    let scaled = total.saturating_mul(percent.min(100) as usize);
    (scaled.saturating_add(99) / 100).clamp(1, total)
}

/// Oldest stale records not already scheduled, capped by the budget
///
/// Ties on `last_fetched` are broken by key so the pick is deterministic.
pub fn select_stale<T: Refreshable>(
    existing: &[T],
    scheduled: &BTreeSet<String>,
    policy: &RefreshPolicy,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut candidates: Vec<&T> = existing
        .iter()
        .filter(|record| !scheduled.contains(record.key()))
        .filter(|record| policy.is_stale(record.last_fetched(), now))
        .collect();

    candidates.sort_by(|a, b| {
        a.last_fetched()
            .cmp(&b.last_fetched())
            .then_with(|| a.key().cmp(b.key()))
    });

    candidates
        .into_iter()
        .take(refresh_budget(existing.len(), policy.percent))
        .map(|record| record.key().to_string())
        .collect()
}

/// Repositories referenced by new templates, then the stale picks
pub fn select_repos_to_refresh(
    new_templates: &[Template],
    existing: &[Repository],
    policy: &RefreshPolicy,
    now: DateTime<Utc>,
) -> Vec<String> {
    let scheduled: BTreeSet<String> = new_templates.iter().map(|t| t.repo.clone()).collect();
    let stale = select_stale(existing, &scheduled, policy, now);
    scheduled.into_iter().chain(stale).collect()
}

/// Owners referenced by new templates, then the stale picks
pub fn select_orgs_to_refresh(
    new_templates: &[Template],
    existing: &[Organization],
    policy: &RefreshPolicy,
    now: DateTime<Utc>,
) -> Vec<String> {
    let scheduled: BTreeSet<String> = new_templates
        .iter()
        .filter_map(|t| split_repo(&t.repo).map(|(owner, _)| owner.to_string()))
        .collect();
    let stale = select_stale(existing, &scheduled, policy, now);
    scheduled.into_iter().chain(stale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn repo(id: &str, age_days: i64) -> Repository {
        let (owner, name) = split_repo(id).unwrap();
        Repository {
            id: id.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
            description: None,
            topics: Vec::new(),
            stars: 0,
            forks: 0,
            watchers: 0,
            language: None,
            license: None,
            default_branch: String::new(),
            created_at: None,
            updated_at: None,
            pushed_at: None,
            homepage: None,
            is_fork: false,
            parent: None,
            last_fetched: now() - Duration::days(age_days),
        }
    }

    fn org(login: &str, age_days: i64) -> Organization {
        Organization {
            id: login.to_string(),
            login: login.to_string(),
            account_type: "User".to_string(),
            name: None,
            description: None,
            location: None,
            blog: None,
            email: None,
            last_fetched: now() - Duration::days(age_days),
        }
    }

    fn template(repo: &str) -> Template {
        Template::discovered(repo, "lima.yaml", "s", "u", false, now())
    }

    #[test]
    fn test_refresh_budget() {
        assert_eq!(refresh_budget(0, 5), 0);
        assert_eq!(refresh_budget(1, 5), 1);
        assert_eq!(refresh_budget(20, 5), 1);
        assert_eq!(refresh_budget(21, 5), 2);
        assert_eq!(refresh_budget(60, 5), 3);
        assert_eq!(refresh_budget(100, 5), 5);
        assert_eq!(refresh_budget(1000, 5), 50);
    }

    #[test]
    fn test_refresh_budget_never_exceeds_total() {
        assert_eq!(refresh_budget(7, 100), 7);
        assert_eq!(refresh_budget(7, 250), 7);
        assert_eq!(refresh_budget(usize::MAX, u32::MAX), usize::MAX);
        assert_eq!(refresh_budget(3, 0), 1);
    }

    #[test]
    fn test_stale_selection_is_oldest_first_and_bounded() {
        // 60 records, all stale, ages 31..=90 days
        let existing: Vec<Repository> = (0..60)
            .map(|i| repo(&format!("owner{:02}/repo", i), 31 + i))
            .collect();

        let selected = select_repos_to_refresh(&[], &existing, &RefreshPolicy::default(), now());

        assert_eq!(selected.len(), 3);
        assert_eq!(selected, vec!["owner59/repo", "owner58/repo", "owner57/repo"]);
    }

    #[test]
    fn test_minimum_one_stale_record() {
        let existing = vec![repo("a/one", 45), repo("b/two", 40), repo("c/three", 5)];

        let selected = select_repos_to_refresh(&[], &existing, &RefreshPolicy::default(), now());
        assert_eq!(selected, vec!["a/one"]);
    }

    #[test]
    fn test_fresh_records_are_left_alone() {
        let existing = vec![repo("a/one", 1), repo("b/two", 29)];

        let selected = select_repos_to_refresh(&[], &existing, &RefreshPolicy::default(), now());
        assert!(selected.is_empty());
    }

    #[test]
    fn test_new_template_repos_always_included() {
        let existing = vec![repo("a/fresh", 1), repo("b/old", 100), repo("c/older", 200)];
        let new_templates = vec![template("a/fresh"), template("c/older"), template("d/unknown")];

        let selected = select_repos_to_refresh(&new_templates, &existing, &RefreshPolicy::default(), now());

        // scheduled first (sorted), then one stale pick that wasn't already scheduled
        assert_eq!(selected, vec!["a/fresh", "c/older", "d/unknown", "b/old"]);
    }

    #[test]
    fn test_ties_broken_by_key() {
        let existing = vec![repo("z/repo", 50), repo("a/repo", 50)];

        let selected = select_repos_to_refresh(&[], &existing, &RefreshPolicy::default(), now());
        assert_eq!(selected, vec!["a/repo"]);
    }

    #[test]
    fn test_orgs_use_template_owners() {
        let existing = vec![org("alice", 3), org("bob", 90), org("carol", 120)];
        let new_templates = vec![template("alice/vms"), template("alice/other"), template("dave/lab")];

        let selected = select_orgs_to_refresh(&new_templates, &existing, &RefreshPolicy::default(), now());
        assert_eq!(selected, vec!["alice", "dave", "carol"]);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RefreshPolicy::from_config(&RefreshConfig {
            stale_after_days: 7,
            refresh_percent: 50,
        });
        let existing = vec![repo("a/one", 8), repo("b/two", 9), repo("c/three", 6), repo("d/four", 10)];

        let selected = select_repos_to_refresh(&[], &existing, &policy, now());
        assert_eq!(selected, vec!["d/four", "b/two"]);
    }
}
