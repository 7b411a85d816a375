//! Repository host abstraction.
//!
//! Everything the pipeline does to the remote repository goes through
//! [`RepositoryHost`]: branches, file contents, diffs, comments, issues and
//! pull requests. The GitHub adapter lives in [`crate::io::github`]; tests use the
//! in-memory host from `test_support`.

use anyhow::{Result, anyhow};
use serde::Serialize;

/// Pull request about to be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

/// Pull request as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

pub trait RepositoryHost {
    fn default_branch(&self) -> Result<String>;

    /// Title, body and comments of an issue, rendered as plain text.
    fn issue_discussion(&self, issue: u64) -> Result<String>;

    /// Every file path on `branch`.
    fn list_files(&self, branch: &str) -> Result<Vec<String>>;

    fn branch_exists(&self, branch: &str) -> Result<bool>;

    fn create_branch(&self, name: &str, parent: &str) -> Result<()>;

    /// File bytes, or `None` when the path does not exist on `branch`.
    fn read_file(&self, branch: &str, path: &str) -> Result<Option<Vec<u8>>>;

    /// Create or overwrite `path` on `branch` with a single commit.
    fn write_file(&self, branch: &str, path: &str, content: &[u8], message: &str) -> Result<()>;

    fn delete_file(&self, branch: &str, path: &str, message: &str) -> Result<()>;

    /// Fetch `url` and commit its body to `target`.
    fn download(&self, branch: &str, url: &str, target: &str, message: &str) -> Result<()>;

    /// Unified diff of `head` against `base`.
    fn diff(&self, base: &str, head: &str) -> Result<String>;

    fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<PullRequest>;

    fn post_comment(&self, issue: u64, body: &str) -> Result<()>;

    /// Unified diff of an open pull request.
    fn pull_request_diff(&self, number: u64) -> Result<String>;

    /// Open a new issue and return its number.
    fn create_issue(&self, title: &str, body: &str) -> Result<u64>;

    fn rename_file(&self, branch: &str, old: &str, new: &str, message: &str) -> Result<()> {
        let content = self.require_file(branch, old)?;
        self.write_file(branch, new, &content, message)?;
        self.delete_file(branch, old, message)
    }

    fn copy_file(&self, branch: &str, old: &str, new: &str, message: &str) -> Result<()> {
        let content = self.require_file(branch, old)?;
        self.write_file(branch, new, &content, message)
    }

    /// Like [`read_file`](Self::read_file) but a missing file is an error.
    fn require_file(&self, branch: &str, path: &str) -> Result<Vec<u8>> {
        self.read_file(branch, path)?
            .ok_or_else(|| anyhow!("file {path} does not exist on branch {branch}"))
    }
}

impl<H: RepositoryHost + ?Sized> RepositoryHost for &H {
    fn default_branch(&self) -> Result<String> {
        (**self).default_branch()
    }

    fn issue_discussion(&self, issue: u64) -> Result<String> {
        (**self).issue_discussion(issue)
    }

    fn list_files(&self, branch: &str) -> Result<Vec<String>> {
        (**self).list_files(branch)
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        (**self).branch_exists(branch)
    }

    fn create_branch(&self, name: &str, parent: &str) -> Result<()> {
        (**self).create_branch(name, parent)
    }

    fn read_file(&self, branch: &str, path: &str) -> Result<Option<Vec<u8>>> {
        (**self).read_file(branch, path)
    }

    fn write_file(&self, branch: &str, path: &str, content: &[u8], message: &str) -> Result<()> {
        (**self).write_file(branch, path, content, message)
    }

    fn delete_file(&self, branch: &str, path: &str, message: &str) -> Result<()> {
        (**self).delete_file(branch, path, message)
    }

    fn download(&self, branch: &str, url: &str, target: &str, message: &str) -> Result<()> {
        (**self).download(branch, url, target, message)
    }

    fn diff(&self, base: &str, head: &str) -> Result<String> {
        (**self).diff(base, head)
    }

    fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<PullRequest> {
        (**self).open_pull_request(draft)
    }

    fn post_comment(&self, issue: u64, body: &str) -> Result<()> {
        (**self).post_comment(issue, body)
    }

    fn pull_request_diff(&self, number: u64) -> Result<String> {
        (**self).pull_request_diff(number)
    }

    fn create_issue(&self, title: &str, body: &str) -> Result<u64> {
        (**self).create_issue(title, body)
    }

    fn rename_file(&self, branch: &str, old: &str, new: &str, message: &str) -> Result<()> {
        (**self).rename_file(branch, old, new, message)
    }

    fn copy_file(&self, branch: &str, old: &str, new: &str, message: &str) -> Result<()> {
        (**self).copy_file(branch, old, new, message)
    }
}
