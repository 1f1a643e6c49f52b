use std::path::{Path, PathBuf};
use std::process::Stdio;
use async_trait::async_trait;
use log::debug;
use tokio::process::Command;
use crate::config::QueueConfig;

/// Result of handing one file to the transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Success,
    /// Human-readable cause, stored verbatim in the failed collection
    Failure(String),
}

/// The external collaborator that converts a single file
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, absolute_path: &Path, working_dir: &Path) -> TranscodeOutcome;
}

/// Runs an external program once per file.
///
/// The program is invoked as `<program> <args...> <absolute_path>` with the
/// job's working directory as its current directory.
#[derive(Debug, Clone)]
pub struct CommandTranscoder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTranscoder {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(cfg: &QueueConfig) -> Self {
        Self::new(cfg.transcoder_program.clone(), cfg.transcoder_args.clone())
    }
}

#[async_trait]
impl Transcoder for CommandTranscoder {
    async fn transcode(&self, absolute_path: &Path, working_dir: &Path) -> TranscodeOutcome {
        debug!(
            "Running {} {:?} {} in {}",
            self.program.display(),
            self.args,
            absolute_path.display(),
            working_dir.display()
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(absolute_path)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => TranscodeOutcome::Success,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let code = output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                TranscodeOutcome::Failure(failure_message(&code, &stderr))
            }
            Err(e) => TranscodeOutcome::Failure(format!(
                "failed to start {}: {}",
                self.program.display(),
                e
            )),
        }
    }
}

/// `returncode=<code>` plus the last non-empty stderr line, if any
fn failure_message(code: &str, stderr: &str) -> String {
    match stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) => format!("returncode={}: {}", code, line),
        None => format!("returncode={}", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_uses_last_stderr_line() {
        let msg = failure_message("1", "probing...\nunsupported codec\n\n");
        assert_eq!(msg, "returncode=1: unsupported codec");
        assert_eq!(failure_message("2", ""), "returncode=2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_exit() {
        let dir = tempfile::tempdir().unwrap();
        let tc = CommandTranscoder::new("true", vec![]);
        let outcome = tc.transcode(&dir.path().join("a.mkv"), dir.path()).await;
        assert_eq!(outcome, TranscodeOutcome::Success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tc = CommandTranscoder::new(
            "sh",
            vec!["-c".to_string(), "echo unsupported codec >&2; exit 3".to_string(), "sh".to_string()],
        );
        let outcome = tc.transcode(&dir.path().join("a.mkv"), dir.path()).await;
        assert_eq!(
            outcome,
            TranscodeOutcome::Failure("returncode=3: unsupported codec".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let tc = CommandTranscoder::new("/nonexistent/avtc", vec![]);
        match tc.transcode(&dir.path().join("a.mkv"), dir.path()).await {
            TranscodeOutcome::Failure(msg) => assert!(msg.starts_with("failed to start")),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
