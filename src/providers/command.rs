//! Command provider: each operation runs an external program
//!
//! Protocol, per call:
//! - environment: `STRATUM_KIND`, `STRATUM_OPERATION`, plus `STRATUM_RESOURCE_ID`
//!   (create, locate) or `STRATUM_BACKEND_ID` (read, update, delete)
//! - stdin: the spec as JSON (create, locate) or the change set (update)
//! - stdout: the backend id (create, locate) or the observed spec (read)
//! - exit codes: 0 success, 2 not found, 3 already exists (create, with the
//!   backend id on stdout), 75 temporary failure (retried), anything else is
//!   a rejection carrying stderr

use converge::{BackendId, ChangeSet, Operation, Provider, ProviderError, ProviderResult, Spec};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::CommandConfig;
use crate::runner::{self, Captured};

const EXIT_NOT_FOUND: i32 = 2;
const EXIT_ALREADY_EXISTS: i32 = 3;
/// sysexits EX_TEMPFAIL
const EXIT_TEMPFAIL: i32 = 75;

#[derive(Debug)]
pub struct CommandProvider {
    kind: String,
    config: CommandConfig,
    dir: Option<PathBuf>,
}

impl CommandProvider {
    pub fn new(kind: impl Into<String>, config: CommandConfig, dir: Option<PathBuf>) -> Self {
        Self {
            kind: kind.into(),
            config,
            dir,
        }
    }

    fn run(
        &self,
        argv: &[String],
        operation: Operation,
        target: (&str, &str),
        input: &[u8],
    ) -> ProviderResult<Captured> {
        let mut env: BTreeMap<String, String> = self
            .config
            .env
            .iter()
            .map(|(k, v)| {
                let v = shellexpand::full(v).map_or_else(|_| v.clone(), |e| e.into_owned());
                (k.clone(), v)
            })
            .collect();
        env.insert("STRATUM_KIND".into(), self.kind.clone());
        env.insert("STRATUM_OPERATION".into(), operation.to_string());
        env.insert(target.0.into(), target.1.into());

        let out = runner::run_with_input(argv, &env, self.dir.as_deref(), input)?;
        log::debug!(
            "{} {operation} {}: exit {:?}",
            self.kind,
            target.1,
            out.code
        );
        Ok(out)
    }

    /// Map a non-zero exit the operation has no special meaning for
    fn failure(&self, operation: Operation, out: &Captured) -> ProviderError {
        let detail = if out.stderr.is_empty() {
            &out.stdout
        } else {
            &out.stderr
        };
        match out.code {
            Some(EXIT_TEMPFAIL) => ProviderError::transient(format!("{operation}: {detail}")),
            Some(code) => ProviderError::rejected(format!(
                "{} {operation} exited with {code}: {detail}",
                self.kind
            )),
            None => ProviderError::Other(format!("{} {operation} was killed", self.kind)),
        }
    }
}

impl Provider for CommandProvider {
    fn name(&self) -> &'static str {
        "command"
    }

    fn create(&self, id: &str, spec: &Spec) -> ProviderResult<BackendId> {
        let input = serde_json::to_vec(spec)?;
        let out = self.run(
            &self.config.create,
            Operation::Create,
            ("STRATUM_RESOURCE_ID", id),
            &input,
        )?;
        let backend_id = if out.stdout.is_empty() {
            id.to_string()
        } else {
            out.stdout.clone()
        };
        match out.code {
            Some(0) => Ok(backend_id),
            Some(EXIT_ALREADY_EXISTS) => Err(ProviderError::AlreadyExists { backend_id }),
            _ => Err(self.failure(Operation::Create, &out)),
        }
    }

    fn read(&self, backend_id: &str) -> ProviderResult<Option<Spec>> {
        let out = self.run(
            &self.config.read,
            Operation::Read,
            ("STRATUM_BACKEND_ID", backend_id),
            b"",
        )?;
        match out.code {
            Some(0) if out.stdout.is_empty() => Ok(Some(Spec::new())),
            Some(0) => Ok(Some(serde_json::from_str(&out.stdout)?)),
            Some(EXIT_NOT_FOUND) => Ok(None),
            _ => Err(self.failure(Operation::Read, &out)),
        }
    }

    fn update(&self, backend_id: &str, changes: &ChangeSet) -> ProviderResult<()> {
        let Some(argv) = &self.config.update else {
            return Err(ProviderError::rejected(format!(
                "kind '{}' has no update command; change the resource id to replace it",
                self.kind
            )));
        };
        let input = serde_json::to_vec(changes)?;
        let out = self.run(
            argv,
            Operation::Update,
            ("STRATUM_BACKEND_ID", backend_id),
            &input,
        )?;
        match out.code {
            Some(0) => Ok(()),
            Some(EXIT_NOT_FOUND) => Err(ProviderError::NotFound {
                backend_id: backend_id.to_string(),
            }),
            _ => Err(self.failure(Operation::Update, &out)),
        }
    }

    fn delete(&self, backend_id: &str) -> ProviderResult<()> {
        let out = self.run(
            &self.config.delete,
            Operation::Delete,
            ("STRATUM_BACKEND_ID", backend_id),
            b"",
        )?;
        match out.code {
            Some(0) => Ok(()),
            Some(EXIT_NOT_FOUND) => Err(ProviderError::NotFound {
                backend_id: backend_id.to_string(),
            }),
            _ => Err(self.failure(Operation::Delete, &out)),
        }
    }

    fn locate(&self, id: &str, spec: &Spec) -> ProviderResult<Option<BackendId>> {
        let Some(argv) = &self.config.locate else {
            return Ok(None);
        };
        let input = serde_json::to_vec(spec)?;
        let out = self.run(
            argv,
            Operation::Locate,
            ("STRATUM_RESOURCE_ID", id),
            &input,
        )?;
        match out.code {
            Some(0) if out.stdout.is_empty() => Ok(Some(id.to_string())),
            Some(0) => Ok(Some(out.stdout)),
            Some(EXIT_NOT_FOUND) => Ok(None),
            _ => Err(self.failure(Operation::Locate, &out)),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    /// A provider that keeps objects as files in `dir`, written in shell
    fn file_backed(dir: &TempDir) -> CommandProvider {
        let config = CommandConfig {
            create: sh(r#"cat > "$STRATUM_RESOURCE_ID.json"; echo "$STRATUM_RESOURCE_ID""#),
            read: sh(r#"[ -f "$STRATUM_BACKEND_ID.json" ] || exit 2; cat "$STRATUM_BACKEND_ID.json""#),
            update: Some(sh(r#"[ -f "$STRATUM_BACKEND_ID.json" ] || exit 2; cat > "$STRATUM_BACKEND_ID.changes""#)),
            delete: sh(r#"rm "$STRATUM_BACKEND_ID.json" 2>/dev/null || exit 2"#),
            locate: Some(sh(r#"[ -f "$STRATUM_RESOURCE_ID.json" ] || exit 2"#)),
            ..CommandConfig::default()
        };
        CommandProvider::new("helm_release", config, Some(dir.path().to_path_buf()))
    }

    fn spec(v: serde_json::Value) -> Spec {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_lifecycle_through_commands() {
        let dir = TempDir::new().unwrap();
        let provider = file_backed(&dir);
        let desired = spec(json!({"chart": "kong/ingress"}));

        let id = provider.create("kong", &desired).unwrap();
        assert_eq!(id, "kong");
        assert_eq!(provider.read(&id).unwrap(), Some(desired.clone()));
        assert_eq!(provider.locate("kong", &desired).unwrap(), Some("kong".into()));

        provider.update(&id, &ChangeSet::default()).unwrap();
        assert!(dir.path().join("kong.changes").exists());

        provider.delete(&id).unwrap();
        assert_eq!(provider.read(&id).unwrap(), None);
        assert!(matches!(
            provider.delete(&id).unwrap_err(),
            ProviderError::NotFound { .. }
        ));
        assert_eq!(provider.locate("kong", &desired).unwrap(), None);
    }

    #[test]
    fn test_exit_codes_map_to_categories() {
        let config = CommandConfig {
            create: sh("echo throttled >&2; exit 75"),
            read: sh("echo 'no such release' >&2; exit 1"),
            delete: sh("exit 0"),
            ..CommandConfig::default()
        };
        let provider = CommandProvider::new("helm_release", config, None);

        let err = provider.create("kong", &Spec::new()).unwrap_err();
        assert!(err.is_retryable());

        let err = provider.read("kong").unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
        assert!(err.to_string().contains("no such release"));

        let err = provider.update("kong", &ChangeSet::default()).unwrap_err();
        assert!(err.to_string().contains("no update command"));
    }

    #[test]
    fn test_already_exists_carries_backend_id() {
        let config = CommandConfig {
            create: sh("echo release/kong; exit 3"),
            ..CommandConfig::default()
        };
        let provider = CommandProvider::new("helm_release", config, None);
        let err = provider.create("kong", &Spec::new()).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::AlreadyExists { backend_id } if backend_id == "release/kong"
        ));
    }

    #[test]
    fn test_env_values_are_expanded() {
        let config = CommandConfig {
            read: sh(r#"printf '{"home": "%s"}' "$TARGET_HOME""#),
            env: BTreeMap::from([("TARGET_HOME".to_string(), "~".to_string())]),
            ..CommandConfig::default()
        };
        let provider = CommandProvider::new("namespace", config, None);
        let observed = provider.read("anything").unwrap().unwrap();
        let home = dirs::home_dir().unwrap();
        assert_eq!(observed["home"], home.to_str().unwrap());
    }
}
