//! Resolver configuration stored in `resolver.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "resolver.toml";

/// Resolver configuration (TOML).
///
/// Missing fields default to values suitable for a CI job running inside a
/// checkout of the target repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Name used in prompts and in the footer of posted messages.
    pub agent_name: String,

    /// Preamble for every oracle prompt. Empty means derived from `agent_name`.
    pub system_prompt: String,

    /// Files under this directory may never be touched by an action.
    pub protected_prefix: String,

    /// Fresh branches are named `<branch_prefix>/issue-<n>-<stamp>`.
    pub branch_prefix: String,

    /// Attempt budget for resolving one file (oracle call through execution).
    pub max_attempts: u32,

    /// Upper bound on rendered prompt size; droppable sections go first.
    pub prompt_budget_bytes: usize,

    pub oracle: OracleConfig,
    pub notebook: NotebookConfig,
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Command that reads a prompt on stdin and prints the response.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotebookConfig {
    /// Kernel command; the input notebook path is appended as last argument.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    /// GitHub CLI executable.
    pub command: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 2_000_000,
        }
    }
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            command: ["jupyter", "nbconvert", "--to", "notebook", "--execute", "--stdout"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 50_000_000,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            command: "gh".to_string(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            agent_name: "resolver".to_string(),
            system_prompt: String::new(),
            protected_prefix: ".github".to_string(),
            branch_prefix: "resolver".to_string(),
            max_attempts: 3,
            prompt_budget_bytes: 200_000,
            oracle: OracleConfig::default(),
            notebook: NotebookConfig::default(),
            host: HostConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agent_name.trim().is_empty() {
            return Err(anyhow!("agent_name must be non-empty"));
        }
        if self.protected_prefix.trim_matches('/').trim().is_empty() {
            return Err(anyhow!("protected_prefix must be non-empty"));
        }
        if self.branch_prefix.trim().is_empty() {
            return Err(anyhow!("branch_prefix must be non-empty"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        validate_command("oracle.command", &self.oracle.command)?;
        validate_command("notebook.command", &self.notebook.command)?;
        if self.host.command.trim().is_empty() {
            return Err(anyhow!("host.command must be non-empty"));
        }
        if self.oracle.timeout_secs == 0 || self.notebook.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.oracle.output_limit_bytes == 0 || self.notebook.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    /// The system prompt, falling back to one derived from `agent_name`.
    pub fn system_prompt(&self) -> String {
        if !self.system_prompt.trim().is_empty() {
            return self.system_prompt.trim().to_string();
        }
        format!(
            "You are an AI-based coding assistant named {}. You are an excellent software engineer.",
            self.agent_name
        )
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl NotebookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn validate_command(name: &str, command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{name} must be a non-empty array"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ResolverConfig::default()`.
pub fn load_config(path: &Path) -> Result<ResolverConfig> {
    if !path.exists() {
        let cfg = ResolverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ResolverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ResolverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
