//! Oracle prompt rendering.
//!
//! Templates live in `prompts/` and are split into sections with
//! `<!-- section:KEY required|droppable|verbatim -->` markers. When a rendered
//! prompt exceeds the byte budget, droppable sections are removed first and the
//! largest remaining section is truncated last. Verbatim sections are never
//! truncated; a prompt that only fits by cutting one fails with
//! [`PromptBudgetError`].

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::PromptBudgetError;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const FILE_TEMPLATE: &str = include_str!("prompts/file.md");
const ARTIFACTS_TEMPLATE: &str = include_str!("prompts/artifacts.md");
const PULL_REQUEST_TEMPLATE: &str = include_str!("prompts/pull_request.md");
const COMMENT_TEMPLATE: &str = include_str!("prompts/comment.md");
const LINKS_TEMPLATE: &str = include_str!("prompts/links.md");
const SELECT_FILES_TEMPLATE: &str = include_str!("prompts/select_files.md");
const REPLY_TEMPLATE: &str = include_str!("prompts/reply.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");
const SUB_TASKS_TEMPLATE: &str = include_str!("prompts/sub_tasks.md");
const SUB_TASK_TEMPLATE: &str = include_str!("prompts/sub_task.md");

/// Sections dropped first when a prompt is over budget.
const DROP_ORDER: [&str; 4] = ["files", "earlier", "diff", "discussion"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable|verbatim)\s*-->")
        .expect("valid section marker regex")
});

/// Inputs of the planning prompt.
#[derive(Debug, Clone)]
pub struct PlanPrompt<'a> {
    pub repository: &'a str,
    pub issue: u64,
    pub discussion: &'a str,
    pub files: &'a [String],
    pub protected_prefix: &'a str,
}

/// Inputs of the content-generation prompt for one file.
#[derive(Debug, Clone)]
pub struct FilePrompt<'a> {
    pub issue: u64,
    pub filename: &'a str,
    pub discussion: &'a str,
    /// Current content (notebook outputs already stripped), if the file exists.
    pub existing: Option<&'a str>,
    /// Format-specific instructions.
    pub instructions: &'a str,
}

/// Inputs of the final report prompts.
#[derive(Debug, Clone)]
pub struct ReportPrompt<'a> {
    pub repository: &'a str,
    pub branch: &'a str,
    pub issue: u64,
    pub discussion: &'a str,
    pub commits: &'a str,
    pub diff: &'a str,
}

/// Repository file shown to the oracle when replying to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileExcerpt {
    pub path: String,
    pub content: String,
}

/// Sub-task already turned into an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubTask {
    pub title: String,
    pub body: String,
}

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
    system_prompt: String,
    budget_bytes: usize,
}

impl PromptEngine {
    pub fn new(system_prompt: impl Into<String>, budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("plan", PLAN_TEMPLATE),
            ("file", FILE_TEMPLATE),
            ("artifacts", ARTIFACTS_TEMPLATE),
            ("pull_request", PULL_REQUEST_TEMPLATE),
            ("comment", COMMENT_TEMPLATE),
            ("links", LINKS_TEMPLATE),
            ("select_files", SELECT_FILES_TEMPLATE),
            ("reply", REPLY_TEMPLATE),
            ("review", REVIEW_TEMPLATE),
            ("sub_tasks", SUB_TASKS_TEMPLATE),
            ("sub_task", SUB_TASK_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load prompt template {name}"))?;
        }
        Ok(Self {
            env,
            system_prompt: system_prompt.into(),
            budget_bytes,
        })
    }

    pub fn plan(&self, input: &PlanPrompt<'_>) -> Result<String> {
        self.render(
            "plan",
            context! {
                system_prompt => self.system_prompt.as_str(),
                repository => input.repository,
                issue => input.issue,
                discussion => input.discussion.trim(),
                files => input.files,
                protected_prefix => input.protected_prefix,
            },
        )
    }

    pub fn file(&self, input: &FilePrompt<'_>) -> Result<String> {
        self.render(
            "file",
            context! {
                system_prompt => self.system_prompt.as_str(),
                issue => input.issue,
                filename => input.filename,
                discussion => input.discussion.trim(),
                modify => input.existing.is_some(),
                existing => input.existing.unwrap_or_default(),
                instructions => input.instructions,
            },
        )
    }

    /// Ask which files an executed notebook wrote to disk.
    pub fn artifacts(&self, notebook: &str, content: &str) -> Result<String> {
        self.render(
            "artifacts",
            context! {
                notebook => notebook,
                content => content,
            },
        )
    }

    pub fn pull_request(&self, input: &ReportPrompt<'_>) -> Result<String> {
        self.render("pull_request", self.report_context(input))
    }

    pub fn comment(&self, input: &ReportPrompt<'_>) -> Result<String> {
        self.render("comment", self.report_context(input))
    }

    /// Ask which repository files matter for answering an issue.
    pub fn select_files(
        &self,
        repository: &str,
        issue: u64,
        discussion: &str,
        files: &[String],
    ) -> Result<String> {
        self.render(
            "select_files",
            context! {
                system_prompt => self.system_prompt.as_str(),
                repository => repository,
                issue => issue,
                discussion => discussion.trim(),
                files => files,
            },
        )
    }

    pub fn reply(
        &self,
        repository: &str,
        issue: u64,
        discussion: &str,
        contents: &[FileExcerpt],
    ) -> Result<String> {
        self.render(
            "reply",
            context! {
                system_prompt => self.system_prompt.as_str(),
                repository => repository,
                issue => issue,
                discussion => discussion.trim(),
                contents => contents,
            },
        )
    }

    pub fn review(&self, repository: &str, number: u64, discussion: &str, diff: &str) -> Result<String> {
        self.render(
            "review",
            context! {
                system_prompt => self.system_prompt.as_str(),
                repository => repository,
                number => number,
                discussion => discussion.trim(),
                diff => diff.trim(),
            },
        )
    }

    pub fn sub_tasks(&self, issue: u64, discussion: &str) -> Result<String> {
        self.render(
            "sub_tasks",
            context! {
                system_prompt => self.system_prompt.as_str(),
                issue => issue,
                discussion => discussion.trim(),
            },
        )
    }

    /// Describe one sub-task, given the ones already described.
    pub fn sub_task(&self, issue: u64, discussion: &str, title: &str, earlier: &[SubTask]) -> Result<String> {
        self.render(
            "sub_task",
            context! {
                system_prompt => self.system_prompt.as_str(),
                issue => issue,
                discussion => discussion.trim(),
                title => title,
                earlier => earlier,
            },
        )
    }

    fn report_context(&self, input: &ReportPrompt<'_>) -> minijinja::Value {
        context! {
            system_prompt => self.system_prompt.as_str(),
            repository => input.repository,
            branch => input.branch,
            issue => input.issue,
            discussion => input.discussion.trim(),
            commits => input.commits.trim(),
            diff => input.diff.trim(),
        }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let rendered = self
            .env
            .get_template(name)?
            .render(ctx)
            .with_context(|| format!("render prompt {name}"))?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(name, &mut sections, self.budget_bytes)?;
        Ok(render_sections(&sections))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Required,
    Droppable,
    /// Required and never truncated.
    Verbatim,
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    kind: SectionKind,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let kind = match kind.as_str() {
            "droppable" => SectionKind::Droppable,
            "verbatim" => SectionKind::Verbatim,
            _ => SectionKind::Required,
        };
        if !content.is_empty() || kind != SectionKind::Droppable {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                kind,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget_to_sections(
    prompt: &str,
    sections: &mut Vec<ParsedSection>,
    budget: usize,
) -> Result<(), PromptBudgetError> {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return Ok(());
        }
        if let Some(idx) = sections
            .iter()
            .position(|s| s.key == key && s.kind == SectionKind::Droppable)
        {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped prompt section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return Ok(());
    }
    let excess = total - budget;
    let verbatim = sections
        .iter()
        .filter(|s| s.kind == SectionKind::Verbatim)
        .max_by_key(|s| s.content.len())
        .map(|s| s.key.clone());
    let largest = sections
        .iter_mut()
        .filter(|s| s.kind != SectionKind::Verbatim)
        .max_by_key(|s| s.content.len());
    let short = largest
        .as_ref()
        .is_none_or(|s| s.content.len() < excess + TRUNCATION_MARKER.len());
    if let Some(section) = verbatim.filter(|_| short) {
        return Err(PromptBudgetError {
            prompt: prompt.to_string(),
            section,
            budget,
            excess,
        });
    }
    let Some(largest) = largest else {
        return Ok(());
    };

    let keep = largest
        .content
        .len()
        .saturating_sub(excess + TRUNCATION_MARKER.len());
    let mut cut = keep;
    while !largest.content.is_char_boundary(cut) {
        cut -= 1;
    }
    debug!(
        section = %largest.key,
        before_len = largest.content.len(),
        after_len = cut,
        "truncated prompt section for budget"
    );
    largest.content.truncate(cut);
    largest.content.push_str(TRUNCATION_MARKER);
    Ok(())
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(budget: usize) -> PromptEngine {
        PromptEngine::new("You are a careful engineer.", budget).expect("engine")
    }

    fn plan_input(files: &[String]) -> PlanPrompt<'_> {
        PlanPrompt {
            repository: "octo/demo",
            issue: 7,
            discussion: "alice: please add report.py",
            files,
            protected_prefix: ".github",
        }
    }

    #[test]
    fn plan_prompt_lists_files_and_action_formats() {
        let files = vec!["README.md".to_string(), "src/app.py".to_string()];
        let prompt = engine(100_000).plan(&plan_input(&files)).expect("render");

        assert!(prompt.starts_with("You are a careful engineer."));
        assert!(prompt.contains("* src/app.py"));
        assert!(prompt.contains(r#"{"action": "download", "source_url": "...", "target_filename": "..."}"#));
        assert!(!prompt.contains("<!--"));
    }

    #[test]
    fn over_budget_plan_drops_file_listing_first() {
        let files: Vec<String> = (0..500).map(|i| format!("data/file_{i}.csv")).collect();
        let prompt = engine(3_000).plan(&plan_input(&files)).expect("render");

        assert!(!prompt.contains("### Repository Files"));
        assert!(prompt.contains("please add report.py"));
        assert!(prompt.contains("JSON list"));
    }

    #[test]
    fn file_prompt_switches_between_create_and_modify() {
        let engine = engine(100_000);
        let mut input = FilePrompt {
            issue: 3,
            filename: "report.py",
            discussion: "add a report",
            existing: None,
            instructions: "When writing new functions, use numpy-style docstrings.",
        };
        let create = engine.file(&input).expect("render");
        assert!(create.contains("new file \"report.py\""));
        assert!(!create.contains("### Current Content"));
        assert!(create.contains("numpy-style"));

        input.existing = Some("print('old')");
        let modify = engine.file(&input).expect("render");
        assert!(modify.contains("Modify the file \"report.py\""));
        assert!(modify.contains("<file>\nprint('old')\n</file>"));
    }

    #[test]
    fn report_prompts_share_link_instructions() {
        let input = ReportPrompt {
            repository: "octo/demo",
            branch: "resolver/issue-3-20260101000000",
            issue: 3,
            discussion: "add a report",
            commits: "* report.py: add report",
            diff: "+print('hi')",
        };
        let engine = engine(100_000);
        let pr = engine.pull_request(&input).expect("render");
        let comment = engine.comment(&input).expect("render");
        for prompt in [&pr, &comment] {
            assert!(prompt.contains(
                "https://github.com/octo/demo/blob/resolver/issue-3-20260101000000/"
            ));
        }
        assert!(pr.contains("+print('hi')"));
        assert!(pr.contains("title"));
        assert!(!comment.contains("+print('hi')"));
    }

    #[test]
    fn truncates_largest_section_when_dropping_is_not_enough() {
        let mut sections = vec![
            ParsedSection {
                key: "contract".to_string(),
                kind: SectionKind::Required,
                content: "c".repeat(10),
            },
            ParsedSection {
                key: "notebook".to_string(),
                kind: SectionKind::Required,
                content: "é".repeat(100),
            },
        ];
        apply_budget_to_sections("artifacts", &mut sections, 60).expect("fits after truncation");

        assert!(total_len(&sections) <= 60);
        assert_eq!(sections[0].content.len(), 10);
        assert!(sections[1].content.ends_with("[truncated]"));
    }

    #[test]
    fn verbatim_section_is_never_truncated() {
        let mut sections = vec![
            ParsedSection {
                key: "discussion".to_string(),
                kind: SectionKind::Required,
                content: "d".repeat(200),
            },
            ParsedSection {
                key: "existing".to_string(),
                kind: SectionKind::Verbatim,
                content: "x".repeat(100),
            },
        ];
        apply_budget_to_sections("file", &mut sections, 250).expect("discussion absorbs the cut");
        assert_eq!(sections[1].content.len(), 100);
        assert!(sections[0].content.ends_with("[truncated]"));

        let err = apply_budget_to_sections("file", &mut sections, 50).unwrap_err();
        assert_eq!(err.section, "existing");
        assert_eq!(err.prompt, "file");
    }

    #[test]
    fn modify_prompt_fails_instead_of_truncating_large_file() {
        let existing: String = (0..400).map(|i| format!("line_{i} = {i}\n")).collect();
        let input = FilePrompt {
            issue: 3,
            filename: "big.py",
            discussion: "rename a variable",
            existing: Some(&existing),
            instructions: "",
        };

        let err = engine(2_000).file(&input).unwrap_err();
        let budget = err.downcast_ref::<PromptBudgetError>().expect("budget error");
        assert_eq!(budget.section, "existing");
        assert!(err.to_string().contains("cannot be shortened"));

        let fits = engine(100_000).file(&input).expect("render");
        assert!(fits.contains("line_399 = 399"));
        assert!(!fits.contains("[truncated]"));
    }

    #[test]
    fn reply_prompt_embeds_selected_files() {
        let contents = vec![FileExcerpt {
            path: "src/app.py".to_string(),
            content: "def main(): pass".to_string(),
        }];
        let prompt = engine(100_000)
            .reply("octo/demo", 7, "alice: how does main work?", &contents)
            .expect("render");

        assert!(prompt.contains("### File src/app.py"));
        assert!(prompt.contains("def main(): pass"));
        assert!(!prompt.contains("<!--"));
    }

    #[test]
    fn sub_task_prompt_lists_earlier_sub_tasks_only_when_present() {
        let engine = engine(100_000);
        let first = engine
            .sub_task(9, "alice: load, then plot", "Load data", &[])
            .expect("render");
        assert!(!first.contains("Other Sub-tasks"));

        let earlier = vec![SubTask {
            title: "Load data".to_string(),
            body: "Read data.csv with pandas.".to_string(),
        }];
        let second = engine
            .sub_task(9, "alice: load, then plot", "Plot data", &earlier)
            .expect("render");
        assert!(second.contains("#### Load data"));
        assert!(second.contains("Read data.csv with pandas."));
        assert!(second.contains("\"Plot data\""));
    }
}
