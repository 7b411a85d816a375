//! Stable exit codes for resolver CLI commands.

/// Command succeeded and every planned action was applied.
pub const OK: i32 = 0;
/// Command failed before a report could be delivered (bad config, unknown
/// branch, host unreachable).
pub const FAILED: i32 = 1;
/// A report was delivered but at least one action failed or was rejected.
pub const PARTIAL: i32 = 2;

/// Exit code for a finished `solve-issue` run.
pub fn for_report(has_failures: bool) -> i32 {
    if has_failures { PARTIAL } else { OK }
}
