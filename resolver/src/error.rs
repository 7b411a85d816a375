//! Typed errors that orchestration code inspects with `downcast_ref`.
//!
//! Everything else travels as plain `anyhow::Error` with context attached.

use thiserror::Error;

/// A planned action record that cannot be turned into an [`Action`](crate::core::action::Action).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidActionError {
    #[error("action record is not a JSON object: {0}")]
    NotAnObject(String),

    #[error("unknown action kind '{0}'")]
    UnknownKind(String),

    #[error("action '{kind}' is missing required field '{field}'")]
    MissingField { kind: String, field: &'static str },

    #[error("invalid path '{0}'")]
    InvalidPath(String),

    #[error("modifying '{path}' is not allowed: files under '{prefix}' are protected")]
    ProtectedPath { path: String, prefix: String },

    #[error("invalid download url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Prior outputs could not be matched onto a regenerated notebook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconciliationFailure {
    #[error("code cell count changed from {original} to {new}")]
    CellCountChanged { original: usize, new: usize },

    #[error("code cell {index} has no matching source in the original notebook")]
    SourceMismatch { index: usize },
}

/// Sandboxed notebook execution failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error during execution of notebook {notebook}: {message}")]
pub struct NotebookExecutionError {
    pub notebook: String,
    pub message: String,
}

/// The oracle returned something that is not an nbformat v4 notebook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("generated content is not a valid notebook: {0}")]
pub struct NotebookFormatError(pub String);

/// The oracle response has no separable summary line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("response has no separate summary line after the content")]
pub struct ContentSplitError;

/// The oracle command failed or produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("oracle failed: {0}")]
pub struct OracleError(pub String);

/// The host rejected a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pull request from '{head}' into '{base}' was rejected: {message}")]
pub struct PullRequestCreationError {
    pub head: String,
    pub base: String,
    pub message: String,
}

/// A prompt cannot fit its byte budget without shortening a section whose
/// content must reach the oracle whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "prompt '{prompt}' exceeds its budget of {budget} bytes by {excess} bytes and section '{section}' cannot be shortened"
)]
pub struct PromptBudgetError {
    pub prompt: String,
    pub section: String,
    pub budget: usize,
    pub excess: usize,
}

/// True when another attempt at generating content may succeed.
///
/// Only failures caused by what the oracle produced (or by the oracle itself)
/// qualify; host failures and policy violations never do.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.is::<ContentSplitError>()
            || cause.is::<NotebookFormatError>()
            || cause.is::<NotebookExecutionError>()
            || cause.is::<OracleError>()
    })
}
