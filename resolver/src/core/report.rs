//! Per-action outcomes accumulated over one orchestration run.

use serde::Serialize;

use crate::core::response::strip_ansi;

/// Result of processing a single action (or rejecting a planner record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ActionOutcome {
    Success {
        action: String,
        message: String,
        created_files: Vec<String>,
    },
    Failure {
        action: String,
        error: String,
        trace: String,
    },
}

/// Append-only log of action outcomes, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    outcomes: Vec<ActionOutcome>,
}

impl ExecutionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(
        &mut self,
        action: impl Into<String>,
        message: impl Into<String>,
        created_files: Vec<String>,
    ) {
        self.outcomes.push(ActionOutcome::Success {
            action: action.into(),
            message: message.into(),
            created_files,
        });
    }

    /// Record a failure; `err` is rendered with its full cause chain.
    pub fn record_failure(&mut self, action: impl Into<String>, err: &anyhow::Error) {
        self.outcomes.push(ActionOutcome::Failure {
            action: action.into(),
            error: strip_ansi(&err.to_string()),
            trace: strip_ansi(&format!("{err:?}")),
        });
    }

    pub fn outcomes(&self) -> &[ActionOutcome] {
        &self.outcomes
    }

    pub fn success_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ActionOutcome::Success { .. }))
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }

    /// Commit messages of successful actions, as a markdown bullet list.
    pub fn commit_list(&self) -> String {
        let messages: Vec<&str> = self
            .outcomes
            .iter()
            .filter_map(|o| match o {
                ActionOutcome::Success { message, .. } => Some(message.as_str()),
                ActionOutcome::Failure { .. } => None,
            })
            .collect();
        if messages.is_empty() {
            return "* (no changes were committed)".to_string();
        }
        format!("* {}", messages.join("\n* "))
    }

    /// Failures as collapsible markdown detail blocks; empty when all succeeded.
    pub fn error_section(&self) -> String {
        let blocks: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| match o {
                ActionOutcome::Failure {
                    action,
                    error,
                    trace,
                } => Some(render_failure(action, error, trace)),
                ActionOutcome::Success { .. } => None,
            })
            .collect();
        if blocks.is_empty() {
            return String::new();
        }
        format!(
            "\n\nDuring solving this task, the following errors occurred:\n\n* {}\n",
            blocks.join("\n* ")
        )
    }
}

fn render_failure(action: &str, error: &str, trace: &str) -> String {
    let indented = format!("    {}", trace.trim_end().replace('\n', "\n    "));
    format!(
        "<details>\n    <summary>Error during {action}: {error}</summary>\n    <pre>{indented}</pre>\n</details>"
    )
}
