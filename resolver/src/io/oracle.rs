//! Text-generation oracle abstraction.
//!
//! The [`Oracle`] trait decouples planning and content generation from the
//! actual model backend. Tests use scripted oracles that return predetermined
//! responses without spawning processes.

use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::error::OracleError;
use crate::io::config::OracleConfig;
use crate::io::process::run_command_with_timeout;

/// Blocking `generate(prompt) -> response` capability.
pub trait Oracle {
    fn generate(&self, prompt: &str) -> Result<String>;
}

impl<O: Oracle + ?Sized> Oracle for &O {
    fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt)
    }
}

/// Oracle backed by a command that reads the prompt on stdin and prints the
/// response on stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    config: OracleConfig,
}

impl CommandOracle {
    pub fn new(config: OracleConfig) -> Self {
        Self { config }
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .context("oracle command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        info!("querying oracle");
        let timeout = self.config.timeout();
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            timeout,
            self.config.output_limit_bytes,
        )
        .context("run oracle command")?;

        if !output.success() {
            warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "oracle failed");
            return Err(OracleError(output.failure_summary(program, timeout)).into());
        }
        if output.stdout_truncated > 0 {
            warn!(truncated_bytes = output.stdout_truncated, "oracle response truncated");
            return Err(OracleError(format!(
                "{program} response exceeds {} bytes",
                self.config.output_limit_bytes
            ))
            .into());
        }
        let response = output.stdout_text();
        if response.trim().is_empty() {
            return Err(OracleError(format!("{program} returned an empty response")).into());
        }
        debug!(response_bytes = response.len(), "oracle answered");
        Ok(response)
    }
}
