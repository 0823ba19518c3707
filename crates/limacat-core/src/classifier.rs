// Template content classification - what OS, what tools, what kind of VM
use serde::Deserialize;

use crate::models::null_as_default;
use crate::{Error, Result};

/// The parts of a Lima template we care about
///
/// Everything else in the file (cpus, mounts, port forwards...) is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct LimaTemplate {
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<ImageSpec>,
    #[serde(default)]
    pub arch: Option<Arch>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub provision: Vec<ProvisionStep>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub containerd: ContainerdSpec,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageSpec {
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub arch: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProvisionStep {
    #[serde(default, deserialize_with = "null_as_default")]
    pub mode: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub script: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerdSpec {
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub user: bool,
}

/// `arch:` is either a single string or a list of them
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Arch {
    Single(String),
    Multiple(Vec<String>),
}

impl Arch {
    /// Concrete architectures only, "default" and blanks are dropped
    pub fn resolve(arch: Option<&Arch>) -> Vec<String> {
        let values: Vec<&String> = match arch {
            Some(Arch::Single(a)) => vec![a],
            Some(Arch::Multiple(list)) => list.iter().collect(),
            None => Vec::new(),
        };

        values
            .into_iter()
            .filter(|a| !a.is_empty() && a.as_str() != "default")
            .cloned()
            .collect()
    }
}

/// What a template turned out to contain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateInfo {
    pub images: Vec<String>,
    pub arch: Vec<String>,
    pub keywords: Vec<String>,
    pub categories: Vec<String>,
    pub has_docker: bool,
    pub has_k8s: bool,
    pub has_podman: bool,
}

const OS_NAMES: &[&str] = &["ubuntu", "alpine", "debian", "fedora", "arch", "centos", "almalinux", "rocky"];
const DEV_TOOLS: &[&str] = &["git", "node", "npm", "yarn", "python", "pip", "go", "rust", "cargo"];
const DATABASES: &[&str] = &["postgres", "mysql", "mongodb", "redis", "sqlite"];

/// Parse template YAML and pull out images, arch, keywords and categories
///
/// Keyword detection is plain case-insensitive substring search over the
/// provisioning scripts, so "go" fires on "google". Good enough for tags.
pub fn parse_template_content(content: &str) -> Result<TemplateInfo> {
    if content.trim().is_empty() {
        return Ok(TemplateInfo::default());
    }

    let template: LimaTemplate =
        serde_yaml::from_str(content).map_err(|e| Error::ParseError(format!("failed to parse YAML: {}", e)))?;

    let mut info = TemplateInfo::default();

    for image in template.images.iter().filter(|i| !i.location.is_empty()) {
        let name = extract_image_name(&image.location);
        if let Some(os) = extract_os(&name) {
            append_unique(&mut info.keywords, os);
        }
        info.images.push(name);
    }

    info.arch = Arch::resolve(template.arch.as_ref());

    let provisioning = template
        .provision
        .iter()
        .map(|p| format!(" {}", p.script))
        .collect::<String>()
        .to_lowercase();

    info.has_docker = provisioning.contains("docker");
    info.has_k8s = ["k8s", "kubernetes", "kubectl"].iter().any(|t| provisioning.contains(t));
    info.has_podman = provisioning.contains("podman");

    if info.has_docker {
        append_unique(&mut info.keywords, "docker");
        append_unique(&mut info.categories, "containers");
    }
    if info.has_k8s {
        // Name the distribution when we can tell
        let flavour = if provisioning.contains("k3s") {
            "k3s"
        } else if provisioning.contains("k0s") {
            "k0s"
        } else {
            "k8s"
        };
        append_unique(&mut info.keywords, flavour);
        append_unique(&mut info.categories, "orchestration");
    }
    if info.has_podman {
        append_unique(&mut info.keywords, "podman");
        append_unique(&mut info.categories, "containers");
    }

    if template.containerd.system || template.containerd.user {
        append_unique(&mut info.keywords, "containerd");
    }

    for tool in DEV_TOOLS.iter().filter(|t| provisioning.contains(*t)) {
        append_unique(&mut info.keywords, tool);
        append_unique(&mut info.categories, "development");
    }

    for db in DATABASES.iter().filter(|d| provisioning.contains(*d)) {
        append_unique(&mut info.keywords, db);
        append_unique(&mut info.categories, "database");
    }

    Ok(info)
}

/// Readable image name from an image location URL
pub fn extract_image_name(location: &str) -> String {
    const KNOWN_HOSTS: &[(&str, &str)] = &[
        ("cloud-images.ubuntu.com", "ubuntu"),
        ("alpinelinux.org", "alpine"),
        ("debian.org", "debian"),
        ("fedoraproject.org", "fedora"),
        ("archlinux.org", "arch"),
        ("centos.org", "almalinux"),
        ("almalinux.org", "almalinux"),
    ];

    if let Some((_, name)) = KNOWN_HOSTS.iter().find(|(host, _)| location.contains(host)) {
        return name.to_string();
    }

    let file_name = location.rsplit('/').next().unwrap_or(location);
    let stem = file_name.strip_suffix(".qcow2").unwrap_or(file_name);
    let stem = stem.strip_suffix(".img").unwrap_or(stem);
    stem.split('-').next().unwrap_or(stem).to_string()
}

/// OS keyword for an image name, if it's one we know
pub fn extract_os(image_name: &str) -> Option<&'static str> {
    let lower = image_name.to_lowercase();
    OS_NAMES.iter().copied().find(|os| lower.contains(os))
}

/// Push unless empty or already there, keeps first-seen order
pub fn append_unique(list: &mut Vec<String>, item: &str) {
    if !item.is_empty() && !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

/// github.com/o/r/blob/ref/path -> raw.githubusercontent.com/o/r/ref/path
pub fn raw_content_url(html_url: &str) -> String {
    html_url
        .replacen("github.com", "raw.githubusercontent.com", 1)
        .replacen("/blob/", "/", 1)
}

/// Lima templates always have a top-level `images:` key
pub fn has_images_key(content: &str) -> bool {
    content.lines().any(|line| line.starts_with("images:"))
}
