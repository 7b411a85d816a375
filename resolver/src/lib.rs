//! Automated issue resolution against a hosted repository.
//!
//! An oracle turns an issue discussion into a list of file actions, which are
//! validated, sequenced and applied one by one on a working branch. The
//! outcome is reported back as a pull request or an issue comment.
//!
//! - **[`core`]**: Pure, deterministic logic (action model, sequencing,
//!   notebook reconciliation, response parsing). No I/O.
//! - **[`io`]**: Side-effecting operations (repository host, oracle process,
//!   notebook kernel, sandbox, config).
//!
//! [`plan`], [`mutation`] and [`orchestrate`] coordinate the two to implement
//! the CLI commands; [`respond`] covers the commands that only talk.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod mutation;
pub mod orchestrate;
pub mod plan;
pub mod respond;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
