//! Directory provider: each object is a JSON file named after its resource id

use converge::{BackendId, ChangeSet, Provider, ProviderError, ProviderResult, Spec};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn load(path: &Path) -> ProviderResult<Option<Spec>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a temporary sibling so readers never see half a file
    fn store(&self, path: &Path, spec: &Spec) -> ProviderResult<()> {
        fs::create_dir_all(&self.root)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(spec)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Provider for DirectoryProvider {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn create(&self, id: &str, spec: &Spec) -> ProviderResult<BackendId> {
        let path = self.path_for(id);
        self.store(&path, spec)?;
        log::debug!("Wrote {}", path.display());
        Ok(path.to_string_lossy().into_owned())
    }

    fn read(&self, backend_id: &str) -> ProviderResult<Option<Spec>> {
        Self::load(Path::new(backend_id))
    }

    fn update(&self, backend_id: &str, changes: &ChangeSet) -> ProviderResult<()> {
        let path = Path::new(backend_id);
        let mut object = Self::load(path)?.ok_or_else(|| ProviderError::NotFound {
            backend_id: backend_id.to_string(),
        })?;

        for change in &changes.changes {
            match &change.after {
                Some(value) => object.insert(change.key.clone(), value.clone()),
                None => object.remove(&change.key),
            };
        }
        self.store(path, &object)
    }

    fn delete(&self, backend_id: &str) -> ProviderResult<()> {
        match fs::remove_file(backend_id) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ProviderError::NotFound {
                backend_id: backend_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn locate(&self, id: &str, _spec: &Spec) -> ProviderResult<Option<BackendId>> {
        let path = self.path_for(id);
        Ok(path
            .exists()
            .then(|| path.to_string_lossy().into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{Diff, diff_specs};
    use serde_json::json;
    use tempfile::TempDir;

    fn spec(v: serde_json::Value) -> Spec {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_create_read_delete() {
        let dir = TempDir::new().unwrap();
        let provider = DirectoryProvider::new(dir.path().join("namespace"));

        let id = provider
            .create("kong-ns", &spec(json!({"name": "kong"})))
            .unwrap();
        assert!(id.ends_with("kong-ns.json"));
        assert_eq!(
            provider.read(&id).unwrap(),
            Some(spec(json!({"name": "kong"})))
        );
        assert_eq!(
            provider.locate("kong-ns", &Spec::new()).unwrap(),
            Some(id.clone())
        );

        provider.delete(&id).unwrap();
        assert_eq!(provider.read(&id).unwrap(), None);
        assert!(matches!(
            provider.delete(&id).unwrap_err(),
            ProviderError::NotFound { .. }
        ));
    }

    #[test]
    fn test_update_merges_changes() {
        let dir = TempDir::new().unwrap();
        let provider = DirectoryProvider::new(dir.path());
        let last = spec(json!({"chart": "surrealdb", "replicas": 1, "debug": true}));
        let desired = spec(json!({"chart": "surrealdb", "replicas": 3}));
        let id = provider.create("surrealdb", &last).unwrap();

        let Diff::Changes(changes) = diff_specs(&last, &desired) else {
            panic!("expected changes");
        };
        provider.update(&id, &changes).unwrap();
        assert_eq!(provider.read(&id).unwrap(), Some(desired));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let provider = DirectoryProvider::new(dir.path());
        let ghost = dir.path().join("ghost.json");
        let err = provider
            .update(&ghost.to_string_lossy(), &ChangeSet::default())
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[test]
    fn test_corrupt_object_is_an_error() {
        let dir = TempDir::new().unwrap();
        let provider = DirectoryProvider::new(dir.path());
        let path = dir.path().join("broken.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(
            provider.read(&path.to_string_lossy()).unwrap_err(),
            ProviderError::Json(_)
        ));
    }
}
