use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};

/// Captured result of an external command
#[derive(Debug, Clone)]
pub struct Captured {
    /// Exit code; `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `argv` with `input` on stdin and capture its output
pub fn run_with_input(
    argv: &[String],
    env: &BTreeMap<String, String>,
    dir: Option<&Path>,
    input: &[u8],
) -> io::Result<Captured> {
    let Some((program, args)) = argv.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    log::trace!("Running: {}", argv.join(" "));
    let mut child = command.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        // A command that ignores its input may close stdin early
        match stdin.write_all(input) {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
            _ => {}
        }
    }

    let output = child.wait_with_output()?;
    Ok(Captured {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn test_stdin_and_env_reach_the_command() {
        let env = BTreeMap::from([("GREETING".to_string(), "hello".to_string())]);
        let out = run_with_input(&sh("printf '%s ' \"$GREETING\"; cat"), &env, None, b"world").unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello world");
    }

    #[test]
    fn test_exit_code_and_stderr() {
        let out = run_with_input(&sh("echo boom >&2; exit 3"), &BTreeMap::new(), None, b"").unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stderr, "boom");
    }

    #[test]
    fn test_empty_command() {
        let err = run_with_input(&[], &BTreeMap::new(), None, b"").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
