//! Notebook kernel adapter.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::io::config::NotebookConfig;
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone)]
pub struct KernelRequest {
    /// Repository path of the notebook, for messages.
    pub notebook: String,
    /// Notebook JSON to execute.
    pub content: String,
    /// Directory the notebook runs in; relative paths resolve against it.
    pub workdir: PathBuf,
}

/// Result of running a notebook top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelOutcome {
    /// Executed notebook JSON. Unchanged input when execution failed.
    pub content: String,
    /// Error reported by the kernel when a cell failed.
    pub error: Option<String>,
}

impl KernelOutcome {
    pub fn succeeded(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: None,
        }
    }

    pub fn failed(content: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: Some(error.into()),
        }
    }
}

/// Runs a notebook and returns the executed document.
///
/// A cell failure is reported through [`KernelOutcome::error`]; `Err` means
/// the kernel could not be run at all.
pub trait NotebookRunner {
    fn run(&self, request: &KernelRequest) -> Result<KernelOutcome>;
}

impl<N: NotebookRunner + ?Sized> NotebookRunner for &N {
    fn run(&self, request: &KernelRequest) -> Result<KernelOutcome> {
        (**self).run(request)
    }
}

/// Runner that shells out to the configured kernel command
/// (`jupyter nbconvert --execute --stdout` by default).
#[derive(Debug, Clone)]
pub struct JupyterRunner {
    config: NotebookConfig,
}

impl JupyterRunner {
    pub fn new(config: NotebookConfig) -> Self {
        Self { config }
    }
}

impl NotebookRunner for JupyterRunner {
    #[instrument(skip_all, fields(notebook = %request.notebook))]
    fn run(&self, request: &KernelRequest) -> Result<KernelOutcome> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .context("notebook command is empty")?;

        let mut input = tempfile::Builder::new()
            .prefix(".resolver-")
            .suffix(".ipynb")
            .tempfile_in(&request.workdir)
            .with_context(|| format!("create temp notebook in {}", request.workdir.display()))?;
        input
            .write_all(request.content.as_bytes())
            .context("write temp notebook")?;
        input.flush().context("flush temp notebook")?;

        let mut cmd = Command::new(program);
        cmd.args(args).arg(input.path()).current_dir(&request.workdir);

        let timeout = self.config.timeout();
        let output =
            run_command_with_timeout(cmd, None, timeout, self.config.output_limit_bytes)
                .with_context(|| format!("run {program} on {}", request.notebook))?;

        if !output.success() {
            warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "notebook execution failed");
            return Ok(KernelOutcome::failed(
                request.content.clone(),
                output.failure_summary(program, timeout),
            ));
        }
        if output.stdout_truncated > 0 {
            return Ok(KernelOutcome::failed(
                request.content.clone(),
                format!(
                    "executed notebook exceeds {} bytes",
                    self.config.output_limit_bytes
                ),
            ));
        }
        debug!(bytes = output.stdout.len(), "notebook executed");
        Ok(KernelOutcome::succeeded(output.stdout_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(script: &str) -> JupyterRunner {
        JupyterRunner::new(NotebookConfig {
            // The notebook path is appended, so it lands in `$0`.
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs: 10,
            output_limit_bytes: 1_000_000,
        })
    }

    fn request(dir: &std::path::Path) -> KernelRequest {
        KernelRequest {
            notebook: "analysis.ipynb".to_string(),
            content: "{\"cells\": []}".to_string(),
            workdir: dir.to_path_buf(),
        }
    }

    #[test]
    fn returns_kernel_stdout_as_executed_notebook() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = runner("cat \"$0\"; pwd > where.txt")
            .run(&request(temp.path()))
            .expect("run");
        assert_eq!(outcome, KernelOutcome::succeeded("{\"cells\": []}"));
        let cwd = std::fs::read_to_string(temp.path().join("where.txt")).expect("where");
        assert_eq!(
            std::fs::canonicalize(cwd.trim()).expect("canonical"),
            std::fs::canonicalize(temp.path()).expect("canonical")
        );
    }

    #[test]
    fn failing_cell_is_reported_not_raised() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = runner("echo \"NameError: name 'x' is not defined\" >&2; exit 1")
            .run(&request(temp.path()))
            .expect("run");
        let error = outcome.error.expect("error");
        assert!(error.contains("NameError"));
        assert_eq!(outcome.content, "{\"cells\": []}");
    }

    #[test]
    fn temp_notebook_is_removed_afterwards() {
        let temp = tempfile::tempdir().expect("tempdir");
        runner("true").run(&request(temp.path())).expect("run");
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".ipynb"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
