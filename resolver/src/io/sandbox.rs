//! Isolated notebook execution.
//!
//! Executed notebooks are untrusted code: they may change environment
//! variables or the working directory of the host process. [`EnvGuard`] and
//! [`WorkdirGuard`] restore both on every exit path, including unwinding.

use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::action::{ProtectedPrefix, normalize_filename};
use crate::core::notebook::Notebook;
use crate::core::response::extract_string_list;
use crate::error::NotebookExecutionError;
use crate::io::kernel::{KernelRequest, NotebookRunner};
use crate::io::oracle::Oracle;
use crate::io::prompt::PromptEngine;

/// Full copy of the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: HashMap<OsString, OsString>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars_os().collect(),
        }
    }

    /// Make the process environment equal to this snapshot again.
    ///
    /// Callers must not race other threads reading or writing the
    /// environment; the pipeline runs single-threaded.
    #[allow(unsafe_code)]
    pub fn restore(&self) {
        let current: HashMap<OsString, OsString> = env::vars_os().collect();
        for key in current.keys().filter(|key| !self.vars.contains_key(*key)) {
            debug!(key = ?key, "removing variable set during execution");
            // SAFETY: no other thread touches the environment while a sandbox runs.
            unsafe { env::remove_var(key) };
        }
        for (key, value) in &self.vars {
            if current.get(key) != Some(value) {
                debug!(key = ?key, "restoring variable changed during execution");
                // SAFETY: as above.
                unsafe { env::set_var(key, value) };
            }
        }
    }
}

/// Restores the captured environment when dropped.
#[derive(Debug)]
pub struct EnvGuard {
    snapshot: EnvSnapshot,
}

impl EnvGuard {
    pub fn acquire() -> Self {
        Self {
            snapshot: EnvSnapshot::capture(),
        }
    }

    pub fn snapshot(&self) -> &EnvSnapshot {
        &self.snapshot
    }

    /// Restore now; the guard restores once more on drop.
    pub fn restore(&self) {
        self.snapshot.restore();
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        self.snapshot.restore();
    }
}

/// Switches the working directory and switches back when dropped.
#[derive(Debug)]
pub struct WorkdirGuard {
    original: PathBuf,
}

impl WorkdirGuard {
    pub fn enter(dir: &Path) -> Result<Self> {
        let original = env::current_dir().context("read current directory")?;
        env::set_current_dir(dir).with_context(|| format!("enter {}", dir.display()))?;
        debug!(dir = %dir.display(), "entered sandbox directory");
        Ok(Self { original })
    }
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if let Err(err) = env::set_current_dir(&self.original) {
            warn!(err = %err, dir = %self.original.display(), "failed to restore working directory");
        }
    }
}

/// File produced by an executed notebook, staged for commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Repository-relative path.
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedNotebook {
    /// Executed notebook JSON, outputs included.
    pub content: String,
    pub artifacts: Vec<Artifact>,
}

/// Runs notebooks inside a local checkout of the repository.
#[derive(Debug)]
pub struct Sandbox<N> {
    runner: N,
    workspace_root: PathBuf,
    guard: ProtectedPrefix,
}

impl<N: NotebookRunner> Sandbox<N> {
    /// `workspace_root` must be absolute; the working directory changes
    /// while a notebook runs.
    pub fn new(runner: N, workspace_root: PathBuf, guard: ProtectedPrefix) -> Self {
        Self {
            runner,
            workspace_root,
            guard,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn runner(&self) -> &N {
        &self.runner
    }

    /// Execute `content` as repository file `notebook`, then ask the oracle
    /// which files it produced and stage the ones that exist.
    #[instrument(skip_all, fields(notebook = %notebook))]
    pub fn execute<O: Oracle>(
        &self,
        oracle: &O,
        prompts: &PromptEngine,
        notebook: &str,
        content: &str,
    ) -> Result<ExecutedNotebook> {
        let env_guard = EnvGuard::acquire();
        let notebook_path = self.workspace_root.join(notebook);
        let dir = notebook_path
            .parent()
            .map_or_else(|| self.workspace_root.clone(), Path::to_path_buf);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

        let executed = {
            let _workdir = WorkdirGuard::enter(&dir)?;
            let request = KernelRequest {
                notebook: notebook.to_string(),
                content: content.to_string(),
                workdir: dir.clone(),
            };
            let outcome = self.runner.run(&request);
            env_guard.restore();
            let outcome = outcome.map_err(|err| execution_error(notebook, format!("{err:#}")))?;
            if let Some(message) = outcome.error {
                return Err(execution_error(notebook, message));
            }
            let parsed = Notebook::parse(&outcome.content).map_err(|err| {
                execution_error(notebook, format!("kernel returned an invalid notebook: {err}"))
            })?;
            parsed
                .render()
                .context("render executed notebook")?
        };
        info!(notebook, "notebook executed");

        let artifacts = self.discover_artifacts(oracle, prompts, notebook, content);
        env_guard.restore();
        let artifacts = artifacts?;

        Ok(ExecutedNotebook {
            content: executed,
            artifacts,
        })
    }

    fn discover_artifacts<O: Oracle>(
        &self,
        oracle: &O,
        prompts: &PromptEngine,
        notebook: &str,
        source: &str,
    ) -> Result<Vec<Artifact>> {
        let prompt = prompts.artifacts(notebook, source)?;
        let response = oracle
            .generate(&prompt)
            .context("ask oracle for created files")?;
        let Some(names) = extract_string_list(&response) else {
            warn!(notebook, "oracle listed no parsable artifact names");
            return Ok(Vec::new());
        };

        let mut artifacts: Vec<Artifact> = Vec::new();
        for name in names {
            let Some(path) = self.accept_artifact_name(notebook, &name) else {
                continue;
            };
            if artifacts.iter().any(|a| a.path == path) {
                continue;
            }
            let local = self.workspace_root.join(&path);
            if !local.is_file() {
                debug!(path, "named artifact does not exist");
                continue;
            }
            let bytes = fs::read(&local).with_context(|| format!("read {}", local.display()))?;
            debug!(path, bytes = bytes.len(), "staged artifact");
            artifacts.push(Artifact { path, bytes });
        }
        Ok(artifacts)
    }

    fn accept_artifact_name(&self, notebook: &str, name: &str) -> Option<String> {
        let path = match normalize_filename(name) {
            Ok(path) => path,
            Err(err) => {
                warn!(name, err = %err, "ignoring artifact name");
                return None;
            }
        };
        if Path::new(&path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            warn!(name, "ignoring artifact outside the workspace");
            return None;
        }
        if self.guard.is_protected(&path) {
            warn!(name, "ignoring protected artifact");
            return None;
        }
        if path == notebook {
            return None;
        }
        Some(path)
    }
}

fn execution_error(notebook: &str, message: String) -> anyhow::Error {
    NotebookExecutionError {
        notebook: notebook.to_string(),
        message,
    }
    .into()
}
