//! Path resolution for stratum
//!
//! # Environment Variables
//!
//! - `STRATUM_STATE` - State file for this invocation (same as `--state`)
//! - `STRATUM_STATE_DIR` - Override the directory default state files live in
//!
//! # State File Resolution
//!
//! 1. `--state` / `STRATUM_STATE`
//! 2. `state` in the manifest's `[settings]`, relative to the manifest
//! 3. `<state dir>/<manifest stem>.json`, where the state dir is
//!    `STRATUM_STATE_DIR`, then `XDG_STATE_HOME/stratum`, then the platform
//!    default (`~/.local/state/stratum` on Unix)

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "STRATUM_STATE_DIR";

/// Get the stratum state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("stratum");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("stratum");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("stratum");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Resolve the state file for a manifest
///
/// `explicit` comes from the command line, `configured` from the manifest.
pub fn state_file(
    manifest: &Path,
    explicit: Option<&Path>,
    configured: Option<&str>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand(&path.to_string_lossy()));
    }

    if let Some(configured) = configured {
        return Ok(relative_to(manifest, &expand(configured)));
    }

    let stem = manifest
        .file_stem()
        .map_or_else(|| "stratum".into(), |s| s.to_string_lossy().into_owned());
    Ok(state_dir()?.join(format!("{stem}.json")))
}

/// Resolve `path` against the directory holding `manifest` unless absolute
pub fn relative_to(manifest: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match manifest.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to run a test with temporary env var
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_state_dir_env_override() {
        with_env_var(ENV_STATE_DIR, "/custom/state/path", || {
            assert_eq!(state_dir().unwrap(), PathBuf::from("/custom/state/path"));
        });
    }

    #[test]
    fn test_state_file_default_uses_manifest_stem() {
        with_env_var(ENV_STATE_DIR, "/var/lib/stratum-test", || {
            let path = state_file(Path::new("infra/surrealdb.toml"), None, None).unwrap();
            assert_eq!(path, PathBuf::from("/var/lib/stratum-test/surrealdb.json"));
        });
    }

    #[test]
    fn test_state_file_configured_is_relative_to_manifest() {
        let path = state_file(Path::new("infra/eks.toml"), None, Some("state/eks.json")).unwrap();
        assert_eq!(path, PathBuf::from("infra/state/eks.json"));

        let path = state_file(Path::new("eks.toml"), None, Some("/srv/eks.json")).unwrap();
        assert_eq!(path, PathBuf::from("/srv/eks.json"));
    }

    #[test]
    fn test_explicit_state_file_wins() {
        let path = state_file(
            Path::new("eks.toml"),
            Some(Path::new("/tmp/override.json")),
            Some("ignored.json"),
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/override.json"));
    }

    #[test]
    fn test_expand_with_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand("~/state/eks.json"), home.join("state").join("eks.json"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }
}
