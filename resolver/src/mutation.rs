//! Resolving a single `create`/`modify`/`execute` action into commits.
//!
//! One resolution runs the oracle call, response parsing, notebook
//! reconciliation and sandboxed execution as a unit, retried within the
//! attempt budget. Nothing is committed until a resolution succeeds.

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::format::FileFormat;
use crate::core::notebook::{Notebook, erase_outputs};
use crate::core::response::split_content_and_summary;
use crate::core::retry::retry_with_budget;
use crate::error::is_retryable;
use crate::io::host::RepositoryHost;
use crate::io::kernel::NotebookRunner;
use crate::io::oracle::Oracle;
use crate::io::prompt::{FilePrompt, PromptEngine};
use crate::io::sandbox::{Artifact, Sandbox};

/// Issue and branch a mutation works against.
#[derive(Debug, Clone, Copy)]
pub struct IssueContext<'a> {
    pub issue: u64,
    pub branch: &'a str,
    pub discussion: &'a str,
}

/// What a successful mutation committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Oracle-provided summary, used as the commit message of the primary file.
    pub summary: String,
    /// Artifacts first, primary file last.
    pub created_files: Vec<String>,
}

impl MutationOutcome {
    /// Summary followed by the list of files the mutation created.
    pub fn report_line(&self) -> String {
        format!(
            "{}\n\nCreated files:\n* {}",
            self.summary,
            self.created_files.join("\n* ")
        )
    }
}

/// Content ready to be committed.
#[derive(Debug)]
struct Resolution {
    content: String,
    summary: String,
    artifacts: Vec<Artifact>,
}

pub struct FileMutator<'a, H, O, N> {
    pub host: &'a H,
    pub oracle: &'a O,
    pub sandbox: &'a Sandbox<N>,
    pub prompts: &'a PromptEngine,
    pub max_attempts: u32,
}

impl<H, O, N> FileMutator<'_, H, O, N>
where
    H: RepositoryHost,
    O: Oracle,
    N: NotebookRunner,
{
    /// Generate new content for `filename` and commit it.
    #[instrument(skip_all, fields(filename = %filename, issue = ctx.issue))]
    pub fn create_or_modify(&self, ctx: &IssueContext<'_>, filename: &str) -> Result<MutationOutcome> {
        let format = FileFormat::from_path(filename);
        let existing = match self.host.read_file(ctx.branch, filename)? {
            Some(bytes) => Some(
                String::from_utf8(bytes)
                    .map_err(|_| anyhow!("{filename} is not a UTF-8 text file"))?,
            ),
            None => None,
        };
        info!(exists = existing.is_some(), ?format, "resolving file");

        let original = match (&existing, format.is_notebook()) {
            (Some(text), true) => Some(
                Notebook::parse(text)
                    .map_err(|err| anyhow!("existing notebook {filename} is unreadable: {err}"))?,
            ),
            _ => None,
        };
        let prompt_content = match &original {
            Some(notebook) => {
                let mut stripped = notebook.clone();
                stripped.strip_outputs();
                Some(stripped.render().context("render stripped notebook")?)
            }
            None => existing,
        };
        let prompt = self.prompts.file(&FilePrompt {
            issue: ctx.issue,
            filename,
            discussion: ctx.discussion,
            existing: prompt_content.as_deref(),
            instructions: format.instructions(),
        })?;

        let resolution = retry_with_budget(self.max_attempts, is_retryable, |attempt| {
            debug!(attempt, "requesting content");
            self.resolve_once(&prompt, filename, format, original.as_ref())
                .inspect_err(|err| warn!(attempt, err = %err, "resolution attempt failed"))
        })?;

        self.commit(ctx.branch, filename, resolution)
    }

    /// Re-run an existing notebook and commit it with its outputs.
    #[instrument(skip_all, fields(filename = %filename))]
    pub fn execute(&self, ctx: &IssueContext<'_>, filename: &str) -> Result<MutationOutcome> {
        if !FileFormat::from_path(filename).is_notebook() {
            bail!("{filename} is not a notebook and cannot be executed");
        }
        let bytes = self.host.require_file(ctx.branch, filename)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| anyhow!("{filename} is not a UTF-8 text file"))?;
        let stripped = erase_outputs(&text)
            .map_err(|err| anyhow!("notebook {filename} is unreadable: {err}"))?;

        let executed = retry_with_budget(self.max_attempts, is_retryable, |attempt| {
            debug!(attempt, "executing notebook");
            self.sandbox
                .execute(self.oracle, self.prompts, filename, &stripped)
        })?;

        self.commit(
            ctx.branch,
            filename,
            Resolution {
                content: executed.content,
                summary: format!("Executed {filename}."),
                artifacts: executed.artifacts,
            },
        )
    }

    fn resolve_once(
        &self,
        prompt: &str,
        filename: &str,
        format: FileFormat,
        original: Option<&Notebook>,
    ) -> Result<Resolution> {
        let response = self.oracle.generate(prompt)?;
        let (content, summary) = split_content_and_summary(&response)?;
        if !format.is_notebook() {
            return Ok(Resolution {
                content,
                summary,
                artifacts: Vec::new(),
            });
        }

        let mut notebook = Notebook::parse(&content)?;
        if let Some(original) = original {
            match notebook.restore_outputs_from(original) {
                Ok(restored) => {
                    info!(restored, "restored outputs from previous version");
                    return Ok(Resolution {
                        content: notebook.render().context("render reconciled notebook")?,
                        summary,
                        artifacts: Vec::new(),
                    });
                }
                Err(failure) => {
                    info!(reason = %failure, "outputs cannot be restored, executing notebook");
                }
            }
        }

        notebook.strip_outputs();
        let stripped = notebook.render().context("render stripped notebook")?;
        let executed = self
            .sandbox
            .execute(self.oracle, self.prompts, filename, &stripped)?;
        Ok(Resolution {
            content: executed.content,
            summary,
            artifacts: executed.artifacts,
        })
    }

    /// Artifacts first, then the primary file.
    fn commit(&self, branch: &str, filename: &str, resolution: Resolution) -> Result<MutationOutcome> {
        let mut created_files = Vec::with_capacity(resolution.artifacts.len() + 1);
        for artifact in &resolution.artifacts {
            self.host
                .write_file(
                    branch,
                    &artifact.path,
                    &artifact.bytes,
                    &format!("Adding {} created by {filename}", artifact.path),
                )
                .with_context(|| format!("commit artifact {}", artifact.path))?;
            created_files.push(artifact.path.clone());
        }

        let mut content = resolution.content;
        content.push('\n');
        self.host
            .write_file(branch, filename, content.as_bytes(), &resolution.summary)
            .with_context(|| format!("commit {filename}"))?;
        created_files.push(filename.to_string());

        Ok(MutationOutcome {
            summary: resolution.summary,
            created_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::ProtectedPrefix;
    use crate::error::{NotebookExecutionError, OracleError, PromptBudgetError};
    use crate::test_support::{
        FakeHost, ScriptedNotebookRunner, ScriptedOracle, executed_notebook_json, notebook_json,
        process_lock, test_prompts,
    };
    use std::fmt;
    use std::path::Path;
    use std::sync::{Arc, Mutex, PoisonError};
    use tracing::field::{Field, Visit};
    use tracing::span;
    use tracing_subscriber::layer::{self, Layer, SubscriberExt};

    const CTX: IssueContext<'static> = IssueContext {
        issue: 4,
        branch: "work",
        discussion: "alice: please help",
    };

    fn host() -> FakeHost {
        let host = FakeHost::new("main");
        host.seed_branch("work");
        host
    }

    fn sandbox(runner: ScriptedNotebookRunner, root: &Path) -> Sandbox<ScriptedNotebookRunner> {
        Sandbox::new(runner, root.to_path_buf(), ProtectedPrefix::new(".github"))
    }

    fn mutator<'a>(
        host: &'a FakeHost,
        oracle: &'a ScriptedOracle,
        sandbox: &'a Sandbox<ScriptedNotebookRunner>,
        prompts: &'a PromptEngine,
    ) -> FileMutator<'a, FakeHost, ScriptedOracle, ScriptedNotebookRunner> {
        FileMutator {
            host,
            oracle,
            sandbox,
            prompts,
            max_attempts: 3,
        }
    }

    #[test]
    fn creates_plain_file_with_summary_as_commit_message() {
        let temp = tempfile::tempdir().expect("tempdir");
        let host = host();
        let oracle = ScriptedOracle::new(["```python\nprint('report')\n```\nAdd report script"]);
        let sandbox = sandbox(ScriptedNotebookRunner::succeeding(), temp.path());
        let prompts = test_prompts();

        let outcome = mutator(&host, &oracle, &sandbox, &prompts)
            .create_or_modify(&CTX, "report.py")
            .expect("create");

        assert_eq!(outcome.created_files, vec!["report.py"]);
        assert_eq!(
            outcome.report_line(),
            "Add report script\n\nCreated files:\n* report.py"
        );
        assert_eq!(host.file_text("work", "report.py").as_deref(), Some("print('report')\n"));
        assert_eq!(host.commits()[0].message, "Add report script");
        assert!(oracle.prompts()[0].contains("numpy-style docstrings"));
    }

    /// Collects `name=value` for every field recorded when a span opens.
    #[derive(Clone, Default)]
    struct SpanFields(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> Layer<S> for SpanFields {
        fn on_new_span(&self, attrs: &span::Attributes<'_>, _id: &span::Id, _ctx: layer::Context<'_, S>) {
            let mut visitor = FieldList(Vec::new());
            attrs.record(&mut visitor);
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(visitor.0);
        }
    }

    struct FieldList(Vec<String>);

    impl Visit for FieldList {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.push(format!("{}={value:?}", field.name()));
        }
    }

    #[test]
    fn spans_carry_the_filename() {
        let temp = tempfile::tempdir().expect("tempdir");
        let host = host();
        let oracle = ScriptedOracle::new(["print('report')\nAdd report script"]);
        let sandbox = sandbox(ScriptedNotebookRunner::succeeding(), temp.path());
        let prompts = test_prompts();
        let spans = SpanFields::default();

        tracing::subscriber::with_default(tracing_subscriber::registry().with(spans.clone()), || {
            mutator(&host, &oracle, &sandbox, &prompts)
                .create_or_modify(&CTX, "report.py")
                .expect("create");
        });

        let fields = spans.0.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert!(fields.contains(&"filename=report.py".to_string()), "{fields:?}");
        assert!(fields.contains(&"issue=4".to_string()), "{fields:?}");
    }

    #[test]
    fn unsplittable_response_is_retried() {
        let temp = tempfile::tempdir().expect("tempdir");
        let host = host();
        let oracle = ScriptedOracle::new(["no summary line", "x = 1\nSet x"]);
        let sandbox = sandbox(ScriptedNotebookRunner::succeeding(), temp.path());
        let prompts = test_prompts();

        let outcome = mutator(&host, &oracle, &sandbox, &prompts)
            .create_or_modify(&CTX, "x.py")
            .expect("second attempt succeeds");

        assert_eq!(outcome.summary, "Set x");
        assert_eq!(oracle.prompts().len(), 2);
        assert_eq!(host.commits().len(), 1);
    }

    #[test]
    fn file_too_large_for_prompt_budget_is_left_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let host = host();
        let original: String = (0..400).map(|i| format!("line_{i} = {i}\n")).collect();
        host.seed_file("work", "big.py", original.as_bytes());
        let oracle = ScriptedOracle::new(["x = 1\nShorten file"]);
        let sandbox = sandbox(ScriptedNotebookRunner::succeeding(), temp.path());
        let prompts = PromptEngine::new("You are a test assistant.", 2_000).expect("prompts");

        let err = mutator(&host, &oracle, &sandbox, &prompts)
            .create_or_modify(&CTX, "big.py")
            .unwrap_err();

        assert!(err.downcast_ref::<PromptBudgetError>().is_some());
        assert!(!is_retryable(&err));
        assert!(oracle.prompts().is_empty());
        assert_eq!(host.file_text("work", "big.py"), Some(original));
        assert!(host.commits().is_empty());
    }

    #[test]
    fn budget_exhaustion_surfaces_last_error_and_commits_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let host = host();
        let oracle = ScriptedOracle::failing(OracleError("overloaded".to_string()));
        let sandbox = sandbox(ScriptedNotebookRunner::succeeding(), temp.path());
        let prompts = test_prompts();

        let err = mutator(&host, &oracle, &sandbox, &prompts)
            .create_or_modify(&CTX, "x.py")
            .unwrap_err();

        assert!(err.to_string().contains("overloaded"));
        assert_eq!(oracle.prompts().len(), 3);
        assert!(host.commits().is_empty());
    }

    #[test]
    fn modify_notebook_with_unchanged_code_restores_outputs_without_execution() {
        let temp = tempfile::tempdir().expect("tempdir");
        let host = host();
        let original = executed_notebook_json(&[("a = 1", "one"), ("print(a)", "1")]);
        host.seed_file("work", "nb.ipynb", original.as_bytes());
        let regenerated = notebook_json(&["a = 1", "print(a)"]);
        let oracle = ScriptedOracle::new([format!("{regenerated}\nExplain each step")]);
        let runner = ScriptedNotebookRunner::succeeding();
        let sandbox = sandbox(runner, temp.path());
        let prompts = test_prompts();

        mutator(&host, &oracle, &sandbox, &prompts)
            .create_or_modify(&CTX, "nb.ipynb")
            .expect("modify");

        let committed =
            Notebook::parse(&host.file_text("work", "nb.ipynb").expect("committed")).expect("parse");
        let before = Notebook::parse(&original).expect("parse");
        let outputs: Vec<_> = committed.code_cells().map(|c| c.outputs.clone()).collect();
        let expected: Vec<_> = before.code_cells().map(|c| c.outputs.clone()).collect();
        assert_eq!(outputs, expected);
        assert!(sandbox_runs(&sandbox).is_empty());
        assert!(!oracle.prompts()[0].contains("\"one\""));
    }

    #[test]
    fn modify_notebook_with_changed_code_executes_whole_document() {
        let _lock = process_lock();
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("canonical");
        let host = host();
        let original = executed_notebook_json(&[("a = 1", "one"), ("print(a)", "1")]);
        host.seed_file("work", "nb.ipynb", original.as_bytes());
        let regenerated = notebook_json(&["a = 2", "print(a)"]);
        let oracle = ScriptedOracle::new([format!("{regenerated}\nChange a"), "[]".to_string()]);
        let sandbox = sandbox(ScriptedNotebookRunner::succeeding(), &root);
        let prompts = test_prompts();

        mutator(&host, &oracle, &sandbox, &prompts)
            .create_or_modify(&CTX, "nb.ipynb")
            .expect("modify");

        assert_eq!(sandbox_runs(&sandbox).len(), 1);
        let committed = host.file_text("work", "nb.ipynb").expect("committed");
        assert!(committed.contains("ran cell 2"));
        assert!(!committed.contains("\"one\""));
    }

    #[test]
    fn new_notebook_is_executed_and_artifacts_committed_first() {
        let _lock = process_lock();
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("canonical");
        let host = host();
        let generated = executed_notebook_json(&[("save()", "stale output")]);
        let oracle = ScriptedOracle::new([
            format!("{generated}\nAdd analysis"),
            "[\"docs/plot.png\"]".to_string(),
        ]);
        let runner = ScriptedNotebookRunner::succeeding().writes_file("plot.png", b"png");
        let sandbox = sandbox(runner, &root);
        let prompts = test_prompts();

        let outcome = mutator(&host, &oracle, &sandbox, &prompts)
            .create_or_modify(&CTX, "docs/analysis.ipynb")
            .expect("create");

        assert_eq!(outcome.created_files, vec!["docs/plot.png", "docs/analysis.ipynb"]);
        let commits = host.commits();
        assert_eq!(commits[0].path, "docs/plot.png");
        assert_eq!(commits[0].message, "Adding docs/plot.png created by docs/analysis.ipynb");
        assert_eq!(commits[1].path, "docs/analysis.ipynb");
        let runs = sandbox_runs(&sandbox);
        assert!(!runs[0].content.contains("stale output"));
    }

    #[test]
    fn failing_execution_is_retried_then_reported() {
        let _lock = process_lock();
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("canonical");
        let host = host();
        let generated = notebook_json(&["1/0"]);
        let oracle = ScriptedOracle::new(vec![format!("{generated}\nDivide"); 3]);
        let sandbox = sandbox(ScriptedNotebookRunner::failing("ZeroDivisionError"), &root);
        let prompts = test_prompts();

        let err = mutator(&host, &oracle, &sandbox, &prompts)
            .create_or_modify(&CTX, "nb.ipynb")
            .unwrap_err();

        assert!(err.downcast_ref::<NotebookExecutionError>().is_some());
        assert_eq!(sandbox_runs(&sandbox).len(), 3);
        assert!(host.commits().is_empty());
    }

    #[test]
    fn execute_action_commits_executed_notebook() {
        let _lock = process_lock();
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("canonical");
        let host = host();
        host.seed_file("work", "nb.ipynb", notebook_json(&["x = 1"]).as_bytes());
        let oracle = ScriptedOracle::new(["[]"]);
        let sandbox = sandbox(ScriptedNotebookRunner::succeeding(), &root);
        let prompts = test_prompts();

        let outcome = mutator(&host, &oracle, &sandbox, &prompts)
            .execute(&CTX, "nb.ipynb")
            .expect("execute");

        assert_eq!(outcome.summary, "Executed nb.ipynb.");
        assert!(host.file_text("work", "nb.ipynb").expect("file").contains("ran cell 1"));
    }

    #[test]
    fn execute_rejects_missing_and_non_notebook_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let host = host();
        let oracle = ScriptedOracle::new(Vec::<String>::new());
        let sandbox = sandbox(ScriptedNotebookRunner::succeeding(), temp.path());
        let prompts = test_prompts();
        let mutator = mutator(&host, &oracle, &sandbox, &prompts);

        assert!(mutator.execute(&CTX, "script.py").is_err());
        let err = mutator.execute(&CTX, "ghost.ipynb").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    fn sandbox_runs(
        sandbox: &Sandbox<ScriptedNotebookRunner>,
    ) -> Vec<crate::io::kernel::KernelRequest> {
        sandbox.runner().runs()
    }
}
