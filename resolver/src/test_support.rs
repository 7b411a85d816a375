//! Deterministic collaborators for tests: an in-memory repository host, a
//! scripted oracle and a scripted notebook kernel.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow, bail};
use serde_json::{Value, json};

use crate::core::notebook::{Cell, Notebook};
use crate::error::{OracleError, PullRequestCreationError};
use crate::io::host::{PullRequest, PullRequestDraft, RepositoryHost};
use crate::io::kernel::{KernelOutcome, KernelRequest, NotebookRunner};
use crate::io::oracle::Oracle;
use crate::io::prompt::PromptEngine;

static PROCESS_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that touch the environment or the working directory.
pub fn process_lock() -> MutexGuard<'static, ()> {
    PROCESS_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Prompt engine with a fixed system prompt and a generous budget.
pub fn test_prompts() -> PromptEngine {
    PromptEngine::new("You are a test assistant.", 1_000_000).expect("prompt templates")
}

/// Notebook JSON with a markdown cell before each code cell and no outputs.
pub fn notebook_json(code: &[&str]) -> String {
    let cells: Vec<Value> = code
        .iter()
        .enumerate()
        .flat_map(|(i, source)| {
            [
                json!({"cell_type": "markdown", "metadata": {}, "source": format!("Step {}", i + 1)}),
                json!({
                    "cell_type": "code",
                    "execution_count": null,
                    "metadata": {},
                    "outputs": [],
                    "source": source,
                }),
            ]
        })
        .collect();
    notebook_document(cells)
}

/// Notebook JSON whose code cells carry a stream output each.
pub fn executed_notebook_json(cells: &[(&str, &str)]) -> String {
    let cells: Vec<Value> = cells
        .iter()
        .enumerate()
        .map(|(i, (source, output))| {
            json!({
                "cell_type": "code",
                "execution_count": i + 1,
                "metadata": {},
                "outputs": [{"output_type": "stream", "name": "stdout", "text": [output]}],
                "source": source,
            })
        })
        .collect();
    notebook_document(cells)
}

fn notebook_document(cells: Vec<Value>) -> String {
    let doc = json!({
        "cells": cells,
        "metadata": {"kernelspec": {"display_name": "Python 3", "language": "python", "name": "python3"}},
        "nbformat": 4,
        "nbformat_minor": 5,
    });
    serde_json::to_string_pretty(&doc).expect("serialize notebook")
}

/// One commit recorded by [`FakeHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCommit {
    pub branch: String,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct FakeState {
    branches: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    commits: Vec<FakeCommit>,
    comments: Vec<(u64, String)>,
    pull_requests: Vec<PullRequestDraft>,
    discussions: HashMap<u64, String>,
    pull_request_diffs: HashMap<u64, String>,
    created_issues: Vec<(String, String)>,
    downloads: HashMap<String, Vec<u8>>,
    failing_paths: HashSet<String>,
    reject_pull_requests: Option<String>,
}

/// In-memory [`RepositoryHost`].
#[derive(Debug)]
pub struct FakeHost {
    default_branch: String,
    state: RefCell<FakeState>,
}

impl FakeHost {
    pub fn new(default_branch: &str) -> Self {
        let mut state = FakeState::default();
        state
            .branches
            .insert(default_branch.to_string(), BTreeMap::new());
        Self {
            default_branch: default_branch.to_string(),
            state: RefCell::new(state),
        }
    }

    pub fn seed_file(&self, branch: &str, path: &str, content: &[u8]) {
        self.state
            .borrow_mut()
            .branches
            .entry(branch.to_string())
            .or_default()
            .insert(path.to_string(), content.to_vec());
    }

    /// Add a branch holding a copy of the default branch.
    pub fn seed_branch(&self, name: &str) {
        let mut state = self.state.borrow_mut();
        let files = state
            .branches
            .get(&self.default_branch)
            .cloned()
            .unwrap_or_default();
        state.branches.insert(name.to_string(), files);
    }

    pub fn seed_discussion(&self, issue: u64, text: &str) {
        self.state
            .borrow_mut()
            .discussions
            .insert(issue, text.to_string());
    }

    pub fn seed_pull_request_diff(&self, number: u64, diff: &str) {
        self.state
            .borrow_mut()
            .pull_request_diffs
            .insert(number, diff.to_string());
    }

    pub fn seed_download(&self, url: &str, content: &[u8]) {
        self.state
            .borrow_mut()
            .downloads
            .insert(url.to_string(), content.to_vec());
    }

    /// Writes to `path` fail on every branch.
    pub fn fail_writes_to(&self, path: &str) {
        self.state
            .borrow_mut()
            .failing_paths
            .insert(path.to_string());
    }

    pub fn reject_pull_requests(&self, message: &str) {
        self.state.borrow_mut().reject_pull_requests = Some(message.to_string());
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .branches
            .get(branch)
            .and_then(|files| files.get(path).cloned())
    }

    pub fn file_text(&self, branch: &str, path: &str) -> Option<String> {
        self.file(branch, path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn branches(&self) -> Vec<String> {
        self.state.borrow().branches.keys().cloned().collect()
    }

    pub fn commits(&self) -> Vec<FakeCommit> {
        self.state.borrow().commits.clone()
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.state.borrow().comments.clone()
    }

    pub fn pull_requests(&self) -> Vec<PullRequestDraft> {
        self.state.borrow().pull_requests.clone()
    }

    /// `(title, body)` of every issue opened through the host.
    pub fn created_issues(&self) -> Vec<(String, String)> {
        self.state.borrow().created_issues.clone()
    }

    fn files_of(&self, branch: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        self.state
            .borrow()
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| anyhow!("branch {branch} does not exist"))
    }
}

impl RepositoryHost for FakeHost {
    fn default_branch(&self) -> Result<String> {
        Ok(self.default_branch.clone())
    }

    fn issue_discussion(&self, issue: u64) -> Result<String> {
        self.state
            .borrow()
            .discussions
            .get(&issue)
            .cloned()
            .ok_or_else(|| anyhow!("issue #{issue} does not exist"))
    }

    fn list_files(&self, branch: &str) -> Result<Vec<String>> {
        Ok(self.files_of(branch)?.into_keys().collect())
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.state.borrow().branches.contains_key(branch))
    }

    fn create_branch(&self, name: &str, parent: &str) -> Result<()> {
        let files = self.files_of(parent)?;
        let mut state = self.state.borrow_mut();
        if state.branches.contains_key(name) {
            bail!("branch {name} already exists");
        }
        state.branches.insert(name.to_string(), files);
        Ok(())
    }

    fn read_file(&self, branch: &str, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files_of(branch)?.get(path).cloned())
    }

    fn write_file(&self, branch: &str, path: &str, content: &[u8], message: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.failing_paths.contains(path) {
            bail!("HTTP 409: write to {path} rejected");
        }
        let files = state
            .branches
            .get_mut(branch)
            .ok_or_else(|| anyhow!("branch {branch} does not exist"))?;
        files.insert(path.to_string(), content.to_vec());
        state.commits.push(FakeCommit {
            branch: branch.to_string(),
            path: path.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    fn delete_file(&self, branch: &str, path: &str, message: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let files = state
            .branches
            .get_mut(branch)
            .ok_or_else(|| anyhow!("branch {branch} does not exist"))?;
        if files.remove(path).is_none() {
            bail!("file {path} does not exist on branch {branch}");
        }
        state.commits.push(FakeCommit {
            branch: branch.to_string(),
            path: path.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    fn download(&self, branch: &str, url: &str, target: &str, message: &str) -> Result<()> {
        let content = self
            .state
            .borrow()
            .downloads
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("download {url}: HTTP 404"))?;
        self.write_file(branch, target, &content, message)
    }

    fn diff(&self, base: &str, head: &str) -> Result<String> {
        let base_files = self.files_of(base)?;
        let head_files = self.files_of(head)?;
        let mut paths: Vec<&String> = base_files.keys().chain(head_files.keys()).collect();
        paths.sort();
        paths.dedup();

        let mut diff = String::new();
        for path in paths {
            let old = base_files.get(path);
            let new = head_files.get(path);
            if old == new {
                continue;
            }
            diff.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));
            for line in old.map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default().lines() {
                diff.push_str(&format!("-{line}\n"));
            }
            for line in new.map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default().lines() {
                diff.push_str(&format!("+{line}\n"));
            }
        }
        Ok(diff)
    }

    fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<PullRequest> {
        let mut state = self.state.borrow_mut();
        if let Some(message) = &state.reject_pull_requests {
            return Err(PullRequestCreationError {
                head: draft.head.clone(),
                base: draft.base.clone(),
                message: message.clone(),
            }
            .into());
        }
        state.pull_requests.push(draft.clone());
        let number = 100 + state.pull_requests.len() as u64;
        Ok(PullRequest {
            number,
            url: format!("https://example.test/pull/{number}"),
        })
    }

    fn post_comment(&self, issue: u64, body: &str) -> Result<()> {
        self.state
            .borrow_mut()
            .comments
            .push((issue, body.to_string()));
        Ok(())
    }

    fn pull_request_diff(&self, number: u64) -> Result<String> {
        self.state
            .borrow()
            .pull_request_diffs
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("pull request #{number} does not exist"))
    }

    fn create_issue(&self, title: &str, body: &str) -> Result<u64> {
        let mut state = self.state.borrow_mut();
        state
            .created_issues
            .push((title.to_string(), body.to_string()));
        Ok(200 + state.created_issues.len() as u64)
    }
}

#[derive(Debug)]
enum Reply {
    Text(String),
    Fail(OracleError),
}

/// Oracle answering from a queue and recording every prompt.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    replies: RefCell<VecDeque<Reply>>,
    when_exhausted: Option<OracleError>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(
                responses
                    .into_iter()
                    .map(|r| Reply::Text(r.into()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// Oracle whose every call fails with `err`.
    pub fn failing(err: OracleError) -> Self {
        Self {
            when_exhausted: Some(err),
            ..Self::default()
        }
    }

    pub fn then_reply(self, response: impl Into<String>) -> Self {
        self.replies
            .borrow_mut()
            .push_back(Reply::Text(response.into()));
        self
    }

    pub fn then_fail(self, err: OracleError) -> Self {
        self.replies.borrow_mut().push_back(Reply::Fail(err));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl Oracle for ScriptedOracle {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        match self.replies.borrow_mut().pop_front() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(err)) => Err(err.into()),
            None => match &self.when_exhausted {
                Some(err) => Err(err.clone().into()),
                None => Err(anyhow!("scripted oracle has no reply left")),
            },
        }
    }
}

/// Notebook kernel that fakes execution.
///
/// On success every code cell gets an execution count and a stream output.
/// Environment changes and files are applied before the outcome is returned,
/// as a real kernel would.
#[derive(Debug, Default)]
pub struct ScriptedNotebookRunner {
    error: Option<String>,
    env: Vec<(String, String)>,
    files: Vec<(String, Vec<u8>)>,
    runs: RefCell<Vec<KernelRequest>>,
    cwds: RefCell<Vec<PathBuf>>,
}

impl ScriptedNotebookRunner {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn sets_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Write `name` (relative to the notebook directory) during execution.
    pub fn writes_file(mut self, name: &str, content: &[u8]) -> Self {
        self.files.push((name.to_string(), content.to_vec()));
        self
    }

    pub fn runs(&self) -> Vec<KernelRequest> {
        self.runs.borrow().clone()
    }

    /// Working directories observed during each run.
    pub fn working_dirs(&self) -> Vec<PathBuf> {
        self.cwds.borrow().clone()
    }
}

impl NotebookRunner for ScriptedNotebookRunner {
    #[allow(unsafe_code)]
    fn run(&self, request: &KernelRequest) -> Result<KernelOutcome> {
        self.runs.borrow_mut().push(request.clone());
        self.cwds.borrow_mut().push(env::current_dir()?);
        for (key, value) in &self.env {
            // SAFETY: tests that run notebooks hold `process_lock`.
            unsafe { env::set_var(key, value) };
        }
        for (name, content) in &self.files {
            let path = request.workdir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        if let Some(message) = &self.error {
            return Ok(KernelOutcome::failed(request.content.clone(), message.clone()));
        }

        let mut notebook = Notebook::parse(&request.content)?;
        let mut count = 0;
        for cell in &mut notebook.cells {
            if let Cell::Code(code) = cell {
                count += 1;
                code.execution_count = Some(count);
                code.outputs = vec![json!({
                    "output_type": "stream",
                    "name": "stdout",
                    "text": [format!("ran cell {count}\n")],
                })];
            }
        }
        Ok(KernelOutcome::succeeded(notebook.render()?))
    }
}
