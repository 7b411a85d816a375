//! Issue resolution: plan, pick a branch, apply every action in isolation,
//! then report through a pull request or a comment.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::action::{Action, ProtectedPrefix};
use crate::core::report::ExecutionReport;
use crate::core::response::split_content_and_summary;
use crate::core::sequence::ActionPlan;
use crate::error::PullRequestCreationError;
use crate::io::config::ResolverConfig;
use crate::io::host::{PullRequestDraft, RepositoryHost};
use crate::io::kernel::NotebookRunner;
use crate::io::oracle::Oracle;
use crate::io::prompt::{PromptEngine, ReportPrompt};
use crate::io::sandbox::Sandbox;
use crate::mutation::{FileMutator, IssueContext};
use crate::plan::{PlanRequest, plan_actions};

#[derive(Debug, Clone)]
pub struct SolveRequest<'a> {
    /// `owner/name`.
    pub repository: &'a str,
    pub issue: u64,
    /// Existing branch to keep working on. `None` (or the default branch)
    /// starts a fresh branch.
    pub branch: Option<&'a str>,
}

/// How the final report reached the issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delivery {
    PullRequest { number: u64, url: String },
    Comment { fallback_reason: Option<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct SolveOutcome {
    pub branch: String,
    pub created_branch: bool,
    pub report: ExecutionReport,
    pub delivery: Delivery,
}

/// Everything one resolution run needs.
pub struct Pipeline<'a, H, O, N> {
    pub host: &'a H,
    pub oracle: &'a O,
    pub sandbox: &'a Sandbox<N>,
    pub prompts: &'a PromptEngine,
    pub config: &'a ResolverConfig,
}

/// Branches known before planning; nothing has been created yet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BranchTarget {
    base: String,
    pinned: Option<String>,
}

impl BranchTarget {
    fn planning_branch(&self) -> &str {
        self.pinned.as_deref().unwrap_or(&self.base)
    }
}

/// Working branch chosen for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WorkingBranch {
    name: String,
    base: String,
    created: bool,
}

impl<H, O, N> Pipeline<'_, H, O, N>
where
    H: RepositoryHost,
    O: Oracle,
    N: NotebookRunner,
{
    fn guard(&self) -> ProtectedPrefix {
        ProtectedPrefix::new(self.config.protected_prefix.as_str())
    }

    /// Plan only, against the pinned branch or the default branch.
    pub fn plan_issue(&self, request: &SolveRequest<'_>) -> Result<ActionPlan> {
        let discussion = self.read_discussion(request.issue)?;
        let target = self.resolve_target(request)?;
        self.plan_against(request, &discussion, &target)
    }

    #[instrument(skip_all, fields(repository = request.repository, issue = request.issue))]
    pub fn solve_issue(&self, request: &SolveRequest<'_>) -> Result<SolveOutcome> {
        let discussion = self.read_discussion(request.issue)?;
        let target = self.resolve_target(request)?;
        let plan = self.plan_against(request, &discussion, &target)?;

        let branch = self.open_working_branch(request.issue, target)?;
        info!(branch = %branch.name, created = branch.created, "working branch selected");

        let mut report = ExecutionReport::new();
        for rejected in &plan.rejected {
            report.record_failure(
                rejected.record.to_string(),
                &anyhow::Error::new(rejected.error.clone()),
            );
        }

        let ctx = IssueContext {
            issue: request.issue,
            branch: &branch.name,
            discussion: &discussion,
        };
        for action in &plan.actions {
            match self.apply(&ctx, action) {
                Ok((message, created_files)) => {
                    info!(%action, "action succeeded");
                    report.record_success(action.to_string(), message, created_files);
                }
                Err(err) => {
                    warn!(%action, err = %format!("{err:#}"), "action failed");
                    report.record_failure(action.to_string(), &err);
                }
            }
        }
        info!(
            succeeded = report.success_count(),
            failed = report.failure_count(),
            "actions processed"
        );

        let delivery = self.deliver(request, &branch, &discussion, &report)?;
        Ok(SolveOutcome {
            branch: branch.name,
            created_branch: branch.created,
            report,
            delivery,
        })
    }

    fn read_discussion(&self, issue: u64) -> Result<String> {
        self.host
            .issue_discussion(issue)
            .with_context(|| format!("read discussion of #{issue}"))
    }

    fn plan_against(
        &self,
        request: &SolveRequest<'_>,
        discussion: &str,
        target: &BranchTarget,
    ) -> Result<ActionPlan> {
        let files = self.host.list_files(target.planning_branch())?;
        plan_actions(
            self.oracle,
            self.prompts,
            &PlanRequest {
                repository: request.repository,
                issue: request.issue,
                discussion,
                files: &files,
            },
            &self.guard(),
            self.config.max_attempts,
        )
    }

    /// Default branch plus the pinned branch, if any. A pinned branch must exist.
    fn resolve_target(&self, request: &SolveRequest<'_>) -> Result<BranchTarget> {
        let base = self.host.default_branch()?;
        let pinned = match request.branch.filter(|pinned| *pinned != base) {
            Some(pinned) => {
                if !self.host.branch_exists(pinned)? {
                    bail!("branch {pinned} does not exist");
                }
                Some(pinned.to_string())
            }
            None => None,
        };
        Ok(BranchTarget { base, pinned })
    }

    /// Continue on the pinned branch, or create a fresh one off the base.
    fn open_working_branch(&self, issue: u64, target: BranchTarget) -> Result<WorkingBranch> {
        let BranchTarget { base, pinned } = target;
        if let Some(name) = pinned {
            return Ok(WorkingBranch {
                name,
                base,
                created: false,
            });
        }

        let stem = fresh_branch_name(&self.config.branch_prefix, issue, Utc::now());
        let mut name = stem.clone();
        let mut suffix = 2;
        while self.host.branch_exists(&name)? {
            name = format!("{stem}-{suffix}");
            suffix += 1;
        }
        self.host.create_branch(&name, &base)?;
        Ok(WorkingBranch {
            name,
            base,
            created: true,
        })
    }

    /// Apply one action; returns its commit message and created files.
    fn apply(&self, ctx: &IssueContext<'_>, action: &Action) -> Result<(String, Vec<String>)> {
        let mutator = FileMutator {
            host: self.host,
            oracle: self.oracle,
            sandbox: self.sandbox,
            prompts: self.prompts,
            max_attempts: self.config.max_attempts,
        };
        let branch = ctx.branch;
        match action {
            Action::Create { filename } | Action::Modify { filename } => {
                let outcome = mutator.create_or_modify(ctx, filename)?;
                Ok((format!("{filename}: {}", outcome.report_line()), outcome.created_files))
            }
            Action::Execute { filename } => {
                let outcome = mutator.execute(ctx, filename)?;
                Ok((format!("{filename}: {}", outcome.report_line()), outcome.created_files))
            }
            Action::Download {
                source_url,
                target_filename,
            } => {
                let message = format!("Downloaded {source_url}, saved as {target_filename}.");
                self.host
                    .download(branch, source_url, target_filename, &message)?;
                Ok((message, vec![target_filename.clone()]))
            }
            Action::Rename {
                old_filename,
                new_filename,
            } => {
                let message = format!("Renamed {old_filename} to {new_filename}.");
                self.host
                    .rename_file(branch, old_filename, new_filename, &message)?;
                Ok((message, vec![new_filename.clone()]))
            }
            Action::Copy {
                old_filename,
                new_filename,
            } => {
                let message = format!("Copied {old_filename} to {new_filename}.");
                self.host
                    .copy_file(branch, old_filename, new_filename, &message)?;
                Ok((message, vec![new_filename.clone()]))
            }
            Action::Delete { filename } => {
                let message = format!("Deleted {filename}.");
                self.host.delete_file(branch, filename, &message)?;
                Ok((message, Vec::new()))
            }
        }
    }

    fn deliver(
        &self,
        request: &SolveRequest<'_>,
        branch: &WorkingBranch,
        discussion: &str,
        report: &ExecutionReport,
    ) -> Result<Delivery> {
        let remark = remark(&self.config.agent_name);
        let errors = report.error_section();
        let commits = report.commit_list();

        let diff = if branch.created {
            self.host
                .diff(&branch.base, &branch.name)
                .context("diff working branch")?
        } else {
            String::new()
        };
        let prompt_input = ReportPrompt {
            repository: request.repository,
            branch: &branch.name,
            issue: request.issue,
            discussion,
            commits: &commits,
            diff: &diff,
        };

        if !branch.created || diff.trim().is_empty() {
            let summary = self.summarize(&self.prompts.comment(&prompt_input)?, &commits);
            self.host
                .post_comment(request.issue, &format!("{remark}{summary}{errors}"))?;
            return Ok(Delivery::Comment {
                fallback_reason: None,
            });
        }

        let response = self.summarize(&self.prompts.pull_request(&prompt_input)?, &commits);
        let (description, title) = split_content_and_summary(&response).unwrap_or_else(|_| {
            warn!("pull request summary has no title line");
            (response.clone(), format!("Resolve #{}", request.issue))
        });
        let draft = PullRequestDraft {
            title,
            head: branch.name.clone(),
            base: branch.base.clone(),
            body: format!(
                "{remark}{}{errors}\n\ncloses #{}",
                description.trim(),
                request.issue
            ),
        };
        match self.host.open_pull_request(&draft) {
            Ok(pr) => Ok(Delivery::PullRequest {
                number: pr.number,
                url: pr.url,
            }),
            Err(err) => {
                let Some(rejection) = err.downcast_ref::<PullRequestCreationError>() else {
                    return Err(err);
                };
                warn!(err = %rejection, "pull request rejected, commenting instead");
                let reason = rejection.to_string();
                self.host.post_comment(
                    request.issue,
                    &format!("{remark}Error creating pull-request: {reason}{errors}"),
                )?;
                Ok(Delivery::Comment {
                    fallback_reason: Some(reason),
                })
            }
        }
    }

    /// Oracle summary, or the raw commit list when the oracle fails.
    fn summarize(&self, prompt: &str, commits: &str) -> String {
        match self.oracle.generate(prompt) {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                warn!(err = %err, "could not summarize changes");
                commits.to_string()
            }
        }
    }
}

/// `<prefix>/issue-<n>-<YYYYmmddHHMMSS>`.
pub fn fresh_branch_name(prefix: &str, issue: u64, now: DateTime<Utc>) -> String {
    format!(
        "{}/issue-{issue}-{}",
        prefix.trim_end_matches('/'),
        now.format("%Y%m%d%H%M%S")
    )
}

/// Opening remark of every posted message.
pub fn remark(agent_name: &str) -> String {
    format!(
        "This message was generated by {agent_name} (resolver {}), an AI-based assistant. \
         Double-check its work before relying on it.\n\n",
        env!("CARGO_PKG_VERSION")
    )
}
