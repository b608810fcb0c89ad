//! Manifest loading
//!
//! A manifest declares the resources to converge, the provider behind each
//! kind and run settings. TOML and JSON are both accepted, picked by file
//! extension.

use anyhow::{Context, Result, bail};
use converge::Declaration;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Resource ids and kinds: start alphanumeric, then word characters, dots or dashes
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("valid name regex")
});

/// Default manifest file name
pub const DEFAULT_MANIFEST: &str = "stratum.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// State file, relative to the manifest unless absolute
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Per provider call deadline
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Attempts per call for transient errors
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// First retry delay; doubles each attempt
    #[serde(default)]
    pub retry_delay_secs: Option<f64>,
}

/// External commands implementing one kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub create: Vec<String>,
    pub read: Vec<String>,
    #[serde(default)]
    pub update: Option<Vec<String>>,
    pub delete: Vec<String>,
    #[serde(default)]
    pub locate: Option<Vec<String>>,
    /// Extra environment for every call
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory, relative to the manifest
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// In-process objects, gone when the process exits
    Memory,
    /// One JSON file per object under `root/<kind>/`
    Directory { root: String },
    Command(CommandConfig),
}

impl ProviderConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Directory { .. } => "directory",
            Self::Command(_) => "command",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default, rename = "resource")]
    pub resources: Vec<Declaration>,
    /// Where the manifest was read from
    #[serde(skip)]
    pub path: PathBuf,
}

impl Manifest {
    /// Load and validate a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;

        let mut manifest = Self::parse(&content, path)?;
        manifest.path = path.to_path_buf();
        manifest.validate()?;

        log::debug!(
            "Loaded {} resources and {} providers from {}",
            manifest.resources.len(),
            manifest.providers.len(),
            path.display()
        );
        Ok(manifest)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(content)
                .with_context(|| format!("Invalid JSON in manifest {}", path.display()))
        } else {
            toml::from_str(content)
                .with_context(|| format!("Invalid TOML in manifest {}", path.display()))
        }
    }

    /// Checks the engine does not do: naming and provider coverage.
    /// Duplicate ids, unknown dependencies and cycles are left to the graph.
    pub fn validate(&self) -> Result<()> {
        for decl in &self.resources {
            if !NAME_RE.is_match(&decl.id) {
                bail!("Invalid resource id '{}'", decl.id);
            }
            if !NAME_RE.is_match(&decl.kind) {
                bail!("Resource '{}' has an invalid kind '{}'", decl.id, decl.kind);
            }
        }

        let used: HashSet<&str> = self.resources.iter().map(|d| d.kind.as_str()).collect();
        for kind in self.providers.keys() {
            if !used.contains(kind.as_str()) {
                log::debug!("Provider for kind '{kind}' is not used by any resource");
            }
        }
        Ok(())
    }

    pub fn declarations(&self) -> Vec<Declaration> {
        self.resources.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SURREALDB: &str = r#"
[settings]
state = "state/surrealdb.json"
jobs = 2
timeout_secs = 900

[providers.namespace]
type = "directory"
root = "objects"

[providers.helm_release]
type = "command"
create = ["./scripts/helm.sh", "create"]
read = ["./scripts/helm.sh", "read"]
update = ["./scripts/helm.sh", "update"]
delete = ["./scripts/helm.sh", "delete"]

[providers.helm_release.env]
KUBECONFIG = "~/.kube/config"

[[resource]]
id = "surrealdb-ns"
kind = "namespace"
[resource.spec]
name = "surrealdb"

[[resource]]
id = "surrealdb"
kind = "helm_release"
depends_on = ["surrealdb-ns"]
[resource.spec]
chart = "surrealdb/surrealdb"
values = { replicas = 3, image = { tag = "v2.2.1" } }
"#;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_toml_manifest() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "surrealdb.toml", SURREALDB);
        let manifest = Manifest::load(&path).unwrap();

        assert_eq!(manifest.settings.jobs, Some(2));
        assert_eq!(manifest.settings.timeout_secs, Some(900));
        assert_eq!(manifest.resources.len(), 2);
        assert_eq!(manifest.resources[1].depends_on, vec!["surrealdb-ns"]);
        assert_eq!(manifest.resources[1].spec["values"]["replicas"], 3);
        assert_eq!(manifest.path, path);

        let ProviderConfig::Command(helm) = &manifest.providers["helm_release"] else {
            panic!("expected a command provider");
        };
        assert_eq!(helm.create, vec!["./scripts/helm.sh", "create"]);
        assert_eq!(helm.env["KUBECONFIG"], "~/.kube/config");
        assert_eq!(manifest.providers["namespace"].type_name(), "directory");
    }

    #[test]
    fn test_load_json_manifest() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "kong.json",
            r#"{
                "providers": { "namespace": { "type": "memory" } },
                "resource": [
                    { "id": "kong-ns", "kind": "namespace", "spec": { "name": "kong" } }
                ]
            }"#,
        );
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.providers["namespace"], ProviderConfig::Memory);
        assert_eq!(manifest.declarations()[0].spec["name"], "kong");
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "bad.toml",
            "[[resource]]\nid = \"../escape\"\nkind = \"namespace\"\n",
        );
        let err = Manifest::load(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid resource id"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.toml", "[settings]\nparallelism = 4\n");
        assert!(Manifest::load(&path).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Manifest::load(Path::new("/nonexistent/stratum.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read manifest"));
    }
}
