//! Built-in providers and registry construction from a manifest

mod command;
mod directory;

pub use command::CommandProvider;
pub use directory::DirectoryProvider;

use anyhow::{Context, Result};
use converge::{MemoryProvider, ProviderRegistry, SharedProvider};
use std::sync::Arc;

use crate::config::{Manifest, ProviderConfig};
use crate::paths;

/// One provider instance per configured kind
pub fn registry(manifest: &Manifest) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    for (kind, config) in &manifest.providers {
        let provider: SharedProvider = match config {
            ProviderConfig::Memory => Arc::new(MemoryProvider::new()),
            ProviderConfig::Directory { root } => {
                let root = paths::relative_to(&manifest.path, &paths::expand(root));
                Arc::new(DirectoryProvider::new(root.join(kind)))
            }
            ProviderConfig::Command(command) => {
                let dir = command
                    .dir
                    .as_deref()
                    .map(|d| paths::relative_to(&manifest.path, &paths::expand(d)));
                Arc::new(CommandProvider::new(kind.clone(), command.clone(), dir))
            }
        };
        registry
            .register_shared(kind.clone(), provider)
            .with_context(|| format!("Failed to register provider for '{kind}'"))?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandConfig;
    use std::path::PathBuf;

    #[test]
    fn test_registry_has_every_configured_kind() {
        let mut manifest = Manifest {
            path: PathBuf::from("infra/stratum.toml"),
            ..Manifest::default()
        };
        manifest
            .providers
            .insert("namespace".into(), ProviderConfig::Memory);
        manifest.providers.insert(
            "bucket".into(),
            ProviderConfig::Directory {
                root: "objects".into(),
            },
        );
        manifest.providers.insert(
            "helm_release".into(),
            ProviderConfig::Command(CommandConfig::default()),
        );

        let registry = registry(&manifest).unwrap();
        let kinds: Vec<_> = registry.kinds().collect();
        assert_eq!(kinds, vec!["bucket", "helm_release", "namespace"]);
        assert_eq!(registry.get("bucket").unwrap().name(), "directory");
        assert_eq!(registry.get("helm_release").unwrap().name(), "command");
    }
}
