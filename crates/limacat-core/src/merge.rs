// Incremental template reconciliation
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::models::Template;

/// Result of folding a discovery run into the previous snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Everything to persist (new + updated + unchanged), sorted by id
    pub templates: Vec<Template>,
    /// Ids seen for the first time
    pub new: Vec<String>,
    /// Ids whose content hash changed
    pub updated: Vec<String>,
    pub unchanged_count: usize,
    /// Always empty. A template that wasn't re-discovered is kept, not dropped
    pub removed: Vec<String>,
}

impl MergeOutcome {
    pub fn new_count(&self) -> usize {
        self.new.len()
    }

    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }
}

/// Merge freshly discovered templates into the previous snapshot
///
/// - in both, same sha: the old record survives, `last_checked` moves to `now`
/// - in both, different sha: the new record wins but keeps the old `discovered_at`
/// - only discovered: inserted as new
/// - only in the snapshot: kept with `last_checked = now`, counted as unchanged
///
/// Discovery is partial (page caps, date filters), so not finding a template
/// again says nothing about whether it still exists.
pub fn merge_templates(existing: &[Template], discovered: &[Template], now: DateTime<Utc>) -> MergeOutcome {
    let previous: HashMap<&str, &Template> = existing.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut merged: BTreeMap<String, Template> = BTreeMap::new();
    let mut outcome = MergeOutcome::default();

    for found in discovered {
        // Duplicate ids within one discovery run: first one wins
        if merged.contains_key(&found.id) {
            continue;
        }

        let record = match previous.get(found.id.as_str()) {
            Some(old) if old.sha == found.sha => {
                outcome.unchanged_count += 1;
                Template {
                    last_checked: now,
                    ..(*old).clone()
                }
            }
            Some(old) => {
                outcome.updated.push(found.id.clone());
                Template {
                    discovered_at: old.discovered_at,
                    last_checked: now,
                    ..found.clone()
                }
            }
            None => {
                outcome.new.push(found.id.clone());
                found.clone()
            }
        };

        merged.insert(record.id.clone(), record);
    }

    for old in existing {
        if merged.contains_key(&old.id) {
            continue;
        }
        outcome.unchanged_count += 1;
        merged.insert(
            old.id.clone(),
            Template {
                last_checked: now,
                ..old.clone()
            },
        );
    }

    outcome.templates = merged.into_values().collect();
    outcome
}

/// Log what a merge did
pub fn log_merge_summary(outcome: &MergeOutcome) {
    info!("=== Update Summary ===");
    info!("New templates discovered: {}", outcome.new_count());
    info!("Templates updated: {}", outcome.updated_count());
    info!("Templates unchanged: {}", outcome.unchanged_count);
    info!("Templates removed: {}", outcome.removed.len());

    for id in &outcome.new {
        info!("  + {}", id);
    }
    for id in &outcome.updated {
        info!("  ~ {}", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, day, 12, 0, 0).unwrap()
    }

    fn template(path: &str, sha: &str, discovered: DateTime<Utc>) -> Template {
        Template::discovered("alice/vms", path, sha, "https://github.com/alice/vms", false, discovered)
    }

    #[test]
    fn test_merge_against_itself_is_idempotent() {
        let snapshot = vec![template("a.yaml", "1", at(1)), template("b.yaml", "2", at(2))];

        let outcome = merge_templates(&snapshot, &snapshot, at(10));

        assert_eq!(outcome.new_count(), 0);
        assert_eq!(outcome.updated_count(), 0);
        assert_eq!(outcome.unchanged_count, 2);
        assert_eq!(outcome.templates.len(), 2);
        assert!(outcome.templates.iter().all(|t| t.last_checked == at(10)));
    }

    #[test]
    fn test_update_keeps_discovery_time() {
        let mut analyzed = template("a.yaml", "A", at(1));
        analyzed.category = "containers".to_string();
        analyzed.analyzed_at = Some(at(2));
        let discovered = template("a.yaml", "B", at(9));

        let outcome = merge_templates(&[analyzed], &[discovered], at(9));

        assert_eq!(outcome.updated, vec!["alice/vms/a.yaml"]);
        let merged = &outcome.templates[0];
        assert_eq!(merged.sha, "B");
        assert_eq!(merged.discovered_at, at(1));
        assert_eq!(merged.last_checked, at(9));
        // New content, so the old analysis doesn't carry over
        assert_eq!(merged.analyzed_at, None);
        assert_eq!(merged.category, "");
    }

    #[test]
    fn test_unchanged_keeps_old_record() {
        let mut old = template("a.yaml", "A", at(1));
        old.keywords = vec!["docker".to_string()];
        let rediscovered = template("a.yaml", "A", at(5));

        let outcome = merge_templates(&[old], &[rediscovered], at(5));

        let merged = &outcome.templates[0];
        assert_eq!(merged.discovered_at, at(1));
        assert_eq!(merged.keywords, vec!["docker"]);
        assert_eq!(merged.last_checked, at(5));
    }

    #[test]
    fn test_not_rediscovered_is_preserved() {
        let x = template("x.yaml", "1", at(1));
        let y = template("y.yaml", "2", at(1));

        let outcome = merge_templates(&[x.clone(), y], &[x], at(3));

        assert_eq!(outcome.templates.len(), 2);
        assert_eq!(outcome.unchanged_count, 2);
        assert!(outcome.removed.is_empty());
        let y = outcome.templates.iter().find(|t| t.path == "y.yaml").unwrap();
        assert_eq!(y.sha, "2");
        assert_eq!(y.last_checked, at(3));
    }

    #[test]
    fn test_new_templates_against_empty_snapshot() {
        let discovered = vec![template("b.yaml", "1", at(4)), template("a.yaml", "2", at(4))];

        let outcome = merge_templates(&[], &discovered, at(4));

        assert_eq!(outcome.new, vec!["alice/vms/b.yaml", "alice/vms/a.yaml"]);
        // persisted order is by id
        assert_eq!(outcome.templates[0].path, "a.yaml");
        assert_eq!(outcome.templates[0].discovered_at, at(4));
    }

    #[test]
    fn test_duplicate_discoveries_count_once() {
        let first = template("a.yaml", "1", at(4));
        let second = template("a.yaml", "2", at(4) + Duration::minutes(1));

        let outcome = merge_templates(&[], &[first, second], at(4));

        assert_eq!(outcome.new_count(), 1);
        assert_eq!(outcome.templates.len(), 1);
        assert_eq!(outcome.templates[0].sha, "1");
    }
}
