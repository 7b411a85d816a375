//! I/O helpers for resolver commands.

pub mod config;
pub mod github;
pub mod host;
pub mod kernel;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod sandbox;
