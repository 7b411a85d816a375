//! Deriving the action list for an issue.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::action::ProtectedPrefix;
use crate::core::response::extract_json_list;
use crate::core::retry::retry_with_budget;
use crate::core::sequence::{ActionPlan, plan_from_records};
use crate::error::is_retryable;
use crate::io::oracle::Oracle;
use crate::io::prompt::{PlanPrompt, PromptEngine};

#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub repository: &'a str,
    pub issue: u64,
    pub discussion: &'a str,
    pub files: &'a [String],
}

/// Ask the oracle once for an action list and validate it.
///
/// A response without a JSON list yields an empty plan. Oracle failures are
/// retried within `max_attempts`.
#[instrument(skip_all, fields(repository = request.repository, issue = request.issue))]
pub fn plan_actions<O: Oracle>(
    oracle: &O,
    prompts: &PromptEngine,
    request: &PlanRequest<'_>,
    guard: &ProtectedPrefix,
    max_attempts: u32,
) -> Result<ActionPlan> {
    let prompt = prompts.plan(&PlanPrompt {
        repository: request.repository,
        issue: request.issue,
        discussion: request.discussion,
        files: request.files,
        protected_prefix: guard.as_str(),
    })?;
    let response = retry_with_budget(max_attempts, is_retryable, |_| oracle.generate(&prompt))?;

    let Some(records) = extract_json_list(&response) else {
        warn!("planner response contains no JSON list");
        return Ok(ActionPlan::default());
    };
    let plan = plan_from_records(&records, guard);
    for rejected in &plan.rejected {
        warn!(reason = %rejected.reason, record = %rejected.record, "rejected planned action");
    }
    info!(
        actions = plan.actions.len(),
        rejected = plan.rejected.len(),
        "planned actions"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::Action;
    use crate::error::{InvalidActionError, OracleError};
    use crate::test_support::{ScriptedOracle, test_prompts};

    fn request(files: &[String]) -> PlanRequest<'_> {
        PlanRequest {
            repository: "octo/demo",
            issue: 12,
            discussion: "alice: fetch the data and plot it",
            files,
        }
    }

    #[test]
    fn downloads_are_sequenced_first_and_invalid_records_rejected() {
        let oracle = ScriptedOracle::new([r#"```json
[
  {"action": "create", "filename": "plot.py"},
  {"action": "modify", "filename": ".github/workflows/ci.yml"},
  {"action": "download", "source_url": "https://example.org/data.csv", "target_filename": "data.csv"},
  {"action": "rename"},
  {"action": "delete", "filename": "old.py"}
]
```"#]);
        let files = vec!["old.py".to_string()];

        let plan = plan_actions(
            &oracle,
            &test_prompts(),
            &request(&files),
            &ProtectedPrefix::new(".github"),
            3,
        )
        .expect("plan");

        let kinds: Vec<&str> = plan.actions.iter().map(|a| a.kind().as_str()).collect();
        assert_eq!(kinds, vec!["download", "create", "delete"]);
        assert_eq!(plan.rejected.len(), 2);
        assert!(matches!(
            plan.rejected[0].error,
            InvalidActionError::ProtectedPath { .. }
        ));
        assert!(matches!(
            plan.rejected[1].error,
            InvalidActionError::MissingField { .. }
        ));
        assert!(oracle.prompts()[0].contains("* old.py"));
    }

    #[test]
    fn prose_response_yields_empty_plan() {
        let oracle = ScriptedOracle::new(["Nothing needs to change."]);
        let plan = plan_actions(
            &oracle,
            &test_prompts(),
            &request(&[]),
            &ProtectedPrefix::new(".github"),
            3,
        )
        .expect("plan");
        assert!(plan.actions.is_empty());
        assert!(plan.rejected.is_empty());
    }

    #[test]
    fn oracle_failure_is_retried() {
        let oracle = ScriptedOracle::new(Vec::<String>::new())
            .then_fail(OracleError("timeout".to_string()))
            .then_reply(r#"[{"action": "execute", "filename": "nb.ipynb"}]"#);
        let plan = plan_actions(
            &oracle,
            &test_prompts(),
            &request(&[]),
            &ProtectedPrefix::new(".github"),
            2,
        )
        .expect("plan");
        assert_eq!(
            plan.actions,
            vec![Action::Execute {
                filename: "nb.ipynb".to_string()
            }]
        );
    }
}
