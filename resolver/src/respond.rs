//! Conversational commands: answer an issue, review a pull request and split
//! an issue into sub-issues. None of them touches branches or files.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::response::{extract_string_list, remove_outer_markdown};
use crate::core::retry::retry_with_budget;
use crate::error::is_retryable;
use crate::io::config::ResolverConfig;
use crate::io::host::RepositoryHost;
use crate::io::oracle::Oracle;
use crate::io::prompt::{FileExcerpt, PromptEngine, SubTask};
use crate::orchestrate::remark;

/// Comment posted on an issue or pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostedComment {
    pub issue: u64,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitOutcome {
    pub issue: u64,
    pub sub_issues: Vec<u64>,
}

pub struct Responder<'a, H, O> {
    pub host: &'a H,
    pub oracle: &'a O,
    pub prompts: &'a PromptEngine,
    pub config: &'a ResolverConfig,
}

impl<H, O> Responder<'_, H, O>
where
    H: RepositoryHost,
    O: Oracle,
{
    /// Read the files the oracle deems relevant, then answer the discussion.
    #[instrument(skip_all, fields(repository = repository, issue = issue))]
    pub fn comment_on_issue(&self, repository: &str, issue: u64) -> Result<PostedComment> {
        let discussion = self.discussion(issue)?;
        let branch = self.host.default_branch()?;
        let files = self.host.list_files(&branch)?;

        let selection = self.ask(&self.prompts.select_files(repository, issue, &discussion, &files)?)?;
        let selected = extract_string_list(&selection).unwrap_or_else(|| {
            warn!("file selection contains no JSON list");
            Vec::new()
        });
        let contents = self.excerpts(&branch, &files, selected)?;
        info!(files = contents.len(), "read relevant files");

        let reply = self.ask(&self.prompts.reply(repository, issue, &discussion, &contents)?)?;
        self.post(issue, &remove_outer_markdown(reply.trim()))
    }

    /// Comment on a pull request, comparing its discussion with its diff.
    #[instrument(skip_all, fields(repository = repository, number = number))]
    pub fn review_pull_request(&self, repository: &str, number: u64) -> Result<PostedComment> {
        let discussion = self.discussion(number)?;
        let diff = self
            .host
            .pull_request_diff(number)
            .with_context(|| format!("read diff of pull request #{number}"))?;
        let review = self.ask(&self.prompts.review(repository, number, &discussion, &diff)?)?;
        self.post(number, &remove_outer_markdown(review.trim()))
    }

    /// Open one issue per sub-task and list them on the parent issue.
    #[instrument(skip_all, fields(issue = issue))]
    pub fn split_issue(&self, issue: u64) -> Result<SplitOutcome> {
        let discussion = self.discussion(issue)?;
        let response = self.ask(&self.prompts.sub_tasks(issue, &discussion)?)?;
        let titles = unique_titles(extract_string_list(&response).unwrap_or_default());
        if titles.is_empty() {
            warn!("no sub-tasks identified");
            self.post(issue, "No sub-tasks could be identified in this discussion.")?;
            return Ok(SplitOutcome {
                issue,
                sub_issues: Vec::new(),
            });
        }

        let remark = remark(&self.config.agent_name);
        let mut earlier: Vec<SubTask> = Vec::new();
        let mut sub_issues = Vec::with_capacity(titles.len());
        for title in titles {
            let body = self.ask(&self.prompts.sub_task(issue, &discussion, &title, &earlier)?)?;
            let body = defuse_mentions(body.trim(), &self.config.agent_name);
            let number = self
                .host
                .create_issue(&title, &format!("{remark}{body}"))
                .with_context(|| format!("create sub-issue '{title}'"))?;
            info!(number, title = %title, "created sub-issue");
            sub_issues.push(number);
            earlier.push(SubTask { title, body });
        }

        let links: Vec<String> = sub_issues.iter().map(|n| format!("- #{n}")).collect();
        self.post(
            issue,
            &format!("Sub-issues have been created:\n{}", links.join("\n")),
        )?;
        Ok(SplitOutcome { issue, sub_issues })
    }

    fn discussion(&self, issue: u64) -> Result<String> {
        self.host
            .issue_discussion(issue)
            .with_context(|| format!("read discussion of #{issue}"))
    }

    fn ask(&self, prompt: &str) -> Result<String> {
        retry_with_budget(self.config.max_attempts, is_retryable, |_| {
            self.oracle.generate(prompt)
        })
    }

    /// Text content of the selected files that exist on `branch`.
    fn excerpts(
        &self,
        branch: &str,
        files: &[String],
        selected: Vec<String>,
    ) -> Result<Vec<FileExcerpt>> {
        let known: HashSet<&str> = files.iter().map(String::as_str).collect();
        let mut excerpts = Vec::new();
        for path in unique_titles(selected) {
            if !known.contains(path.as_str()) {
                debug!(path = %path, "skipping unknown file");
                continue;
            }
            let Some(bytes) = self.host.read_file(branch, &path)? else {
                continue;
            };
            match String::from_utf8(bytes) {
                Ok(content) => excerpts.push(FileExcerpt { path, content }),
                Err(_) => debug!(path = %path, "skipping binary file"),
            }
        }
        Ok(excerpts)
    }

    fn post(&self, issue: u64, text: &str) -> Result<PostedComment> {
        let body = format!("{}{text}", remark(&self.config.agent_name));
        self.host.post_comment(issue, &body)?;
        Ok(PostedComment { issue, body })
    }
}

/// Trimmed, non-empty entries in first-seen order.
fn unique_titles(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

/// Spell the agent name differently so a created issue does not summon it.
pub fn defuse_mentions(text: &str, agent_name: &str) -> String {
    if agent_name.is_empty() {
        return text.to_string();
    }
    let mut defused = agent_name.replace('-', "_");
    if defused == agent_name {
        let mut chars = agent_name.chars();
        if let Some(first) = chars.next() {
            defused = format!("{first}_{}", chars.as_str());
        }
    }
    text.replace(agent_name, &defused)
}
