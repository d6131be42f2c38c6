use super::{CommandRunner, display_command};
use crate::error::FetchError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Exit status git uses for fatal errors such as a missing repository
const GIT_FATAL_EXIT: i32 = 128;

/// Options placed before every subcommand: paths come back unquoted and
/// pathspecs are matched literally
const GLOBAL_ARGS: &[&str] = &["-c", "core.quotePath=false", "--literal-pathspecs"];

/// Runs `git` as a subprocess in a fixed working directory
#[derive(Debug, Clone)]
pub struct GitCommandRunner {
    workdir: PathBuf,
    program: String,
}

impl GitCommandRunner {
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            program: "git".to_string(),
        }
    }

    /// Use a different git executable (e.g. an absolute path)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}

#[async_trait]
impl CommandRunner for GitCommandRunner {
    async fn run(&self, args: &[String], timeout: Duration) -> Result<String, FetchError> {
        let command = display_command(args);
        tracing::debug!("Running '{}' in {}", command, self.workdir.display());

        let child = Command::new(&self.program)
            .args(GLOBAL_ARGS)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(FetchError::Spawn {
                    command,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!("'{}' timed out after {:?}", command, timeout);
                return Err(FetchError::Timeout {
                    command,
                    secs: timeout.as_secs(),
                });
            }
        };

        if output.status.success() {
            return Ok(decode_stdout(output.stdout, &command));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(
            command,
            output.status.code(),
            stderr,
            &self.workdir,
        ))
    }
}

/// Decode git output as UTF-8, replacing invalid sequences
fn decode_stdout(bytes: Vec<u8>, command: &str) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(
                "Output of '{}' is not valid UTF-8 after byte {}, decoding lossily",
                command,
                e.utf8_error().valid_up_to()
            );
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}

/// Map a nonzero git exit to the matching fetch error
pub(crate) fn classify_failure(
    command: String,
    code: Option<i32>,
    stderr: String,
    workdir: &Path,
) -> FetchError {
    if stderr.to_lowercase().contains("not a git repository") {
        return FetchError::NotARepository(workdir.display().to_string());
    }
    if code == Some(GIT_FATAL_EXIT) && stderr.contains("must be run in a work tree") {
        return FetchError::NotARepository(workdir.display().to_string());
    }
    FetchError::Failed {
        command,
        code,
        stderr,
    }
}
