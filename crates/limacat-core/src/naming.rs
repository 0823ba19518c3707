// Human-friendly names for templates whose file is called lima.yaml

const GENERIC_NAMES: &[&str] = &["lima", "template", "config", "default", "example", "test"];
const GENERIC_DIRS: &[&str] = &["templates", "configs", "examples", "lima", ".lima", "vms"];

/// Pick a name for a template from its path, falling back on context
///
/// The file stem wins unless it's generic, then the parent directory,
/// then the repository name. As a last resort the whole path is used.
pub fn derive_template_name(path: &str, repo_full_name: &str) -> String {
    let (dir, file_name) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => file_name,
    };

    if !is_generic(stem, GENERIC_NAMES) {
        return sanitize_name(stem);
    }

    if let Some(parent) = dir.and_then(|d| d.rsplit('/').next()).filter(|p| !p.is_empty()) {
        if !is_generic(parent, GENERIC_DIRS) {
            return sanitize_name(parent);
        }
    }

    if let Some((_, repo_name)) = crate::models::split_repo(repo_full_name) {
        return sanitize_name(repo_name);
    }

    sanitize_name(&path.replace('/', "-"))
}

fn is_generic(name: &str, list: &[&str]) -> bool {
    let lower = name.to_lowercase();
    list.contains(&lower.as_str())
}

/// Lowercase, hyphen-separated, no leading/trailing or doubled hyphens
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '_' | ' ' | '.') { '-' } else { c })
        .collect();

    replaced
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// "docker-rootful" -> "Docker Rootful", short words like "k8s" go all caps
pub fn display_name(name: &str) -> String {
    name.replace('-', " ")
        .split_whitespace()
        .map(|word| {
            if word.len() <= 3 || word.to_uppercase() == word {
                word.to_uppercase()
            } else {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
