//! Automated issue resolver.
//!
//! Reads an issue discussion from GitHub, asks an oracle which files to
//! create, modify, execute, download, rename, copy or delete, applies those
//! actions on a working branch and reports back through a pull request or a
//! comment. Lighter commands answer an issue, review a pull request or split
//! an issue into sub-issues.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use resolver::core::action::ProtectedPrefix;
use resolver::exit_codes;
use resolver::io::config::{DEFAULT_CONFIG_PATH, ResolverConfig, load_config, write_config};
use resolver::io::github::GithubHost;
use resolver::io::kernel::JupyterRunner;
use resolver::io::oracle::CommandOracle;
use resolver::io::prompt::PromptEngine;
use resolver::io::sandbox::Sandbox;
use resolver::logging;
use resolver::orchestrate::{Pipeline, SolveRequest};
use resolver::respond::Responder;

#[derive(Parser)]
#[command(
    name = "resolver",
    version,
    about = "Resolve repository issues with an AI oracle"
)]
struct Cli {
    /// Path to the TOML config.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the validated action plan for an issue without applying it.
    Plan {
        #[command(flatten)]
        target: Target,
    },
    /// Plan, apply and report on an issue.
    SolveIssue {
        #[command(flatten)]
        target: Target,
        /// Directory in which notebooks are executed.
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
    },
    /// Answer an issue discussion with a comment.
    Comment {
        #[command(flatten)]
        target: IssueRef,
    },
    /// Comment on a pull request after reading its diff.
    ReviewPr {
        /// Repository as `owner/name`.
        #[arg(long)]
        repository: String,
        /// Pull request number.
        #[arg(long)]
        pull_request: u64,
    },
    /// Open one issue per sub-task of an issue.
    SplitIssue {
        #[command(flatten)]
        target: IssueRef,
    },
}

#[derive(clap::Args)]
struct IssueRef {
    /// Repository as `owner/name`.
    #[arg(long)]
    repository: String,
    /// Issue number.
    #[arg(long)]
    issue: u64,
}

#[derive(clap::Args)]
struct Target {
    /// Repository as `owner/name`.
    #[arg(long)]
    repository: String,
    /// Issue number.
    #[arg(long)]
    issue: u64,
    /// Existing branch to work on instead of creating a fresh one.
    #[arg(long)]
    branch: Option<String>,
}

fn main() -> ExitCode {
    logging::init();
    match run() {
        Ok(code) => ExitCode::from(code_byte(code)),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(code_byte(exit_codes::FAILED))
        }
    }
}

fn code_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Plan { target } => cmd_plan(&cli.config, &target),
        Command::SolveIssue { target, workspace } => cmd_solve(&cli.config, &target, workspace),
        Command::Comment { target } => cmd_respond(&cli.config, &target.repository, |responder| {
            print_json(&responder.comment_on_issue(&target.repository, target.issue)?)
        }),
        Command::ReviewPr {
            repository,
            pull_request,
        } => cmd_respond(&cli.config, &repository, |responder| {
            print_json(&responder.review_pull_request(&repository, pull_request)?)
        }),
        Command::SplitIssue { target } => cmd_respond(&cli.config, &target.repository, |responder| {
            print_json(&responder.split_issue(target.issue)?)
        }),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &ResolverConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_plan(config_path: &Path, target: &Target) -> Result<i32> {
    let config = load_config(config_path)?;
    let parts = Parts::build(&config, &target.repository, PathBuf::from("."))?;
    let plan = parts.pipeline(&config).plan_issue(&SolveRequest {
        repository: &target.repository,
        issue: target.issue,
        branch: target.branch.as_deref(),
    })?;
    print_json(&plan)?;
    Ok(exit_codes::OK)
}

fn cmd_solve(config_path: &Path, target: &Target, workspace: PathBuf) -> Result<i32> {
    let config = load_config(config_path)?;
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("resolve workspace {}", workspace.display()))?;
    let parts = Parts::build(&config, &target.repository, workspace)?;
    let outcome = parts.pipeline(&config).solve_issue(&SolveRequest {
        repository: &target.repository,
        issue: target.issue,
        branch: target.branch.as_deref(),
    })?;
    print_json(&outcome)?;
    Ok(exit_codes::for_report(outcome.report.has_failures()))
}

fn cmd_respond<F>(config_path: &Path, repository: &str, run: F) -> Result<i32>
where
    F: FnOnce(&Responder<'_, GithubHost, CommandOracle>) -> Result<()>,
{
    let config = load_config(config_path)?;
    let parts = Parts::build(&config, repository, PathBuf::from("."))?;
    run(&Responder {
        host: &parts.host,
        oracle: &parts.oracle,
        prompts: &parts.prompts,
        config: &config,
    })?;
    Ok(exit_codes::OK)
}

/// Production implementations of every collaborator.
struct Parts {
    host: GithubHost,
    oracle: CommandOracle,
    sandbox: Sandbox<JupyterRunner>,
    prompts: PromptEngine,
}

impl Parts {
    fn build(config: &ResolverConfig, repository: &str, workspace: PathBuf) -> Result<Self> {
        Ok(Self {
            host: GithubHost::new(repository, config.host.command.clone())?,
            oracle: CommandOracle::new(config.oracle.clone()),
            sandbox: Sandbox::new(
                JupyterRunner::new(config.notebook.clone()),
                workspace,
                ProtectedPrefix::new(config.protected_prefix.as_str()),
            ),
            prompts: PromptEngine::new(config.system_prompt(), config.prompt_budget_bytes)?,
        })
    }

    fn pipeline<'a>(
        &'a self,
        config: &'a ResolverConfig,
    ) -> Pipeline<'a, GithubHost, CommandOracle, JupyterRunner> {
        Pipeline {
            host: &self.host,
            oracle: &self.oracle,
            sandbox: &self.sandbox,
            prompts: &self.prompts,
            config,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
