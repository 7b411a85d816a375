//! Turning raw planner records into an ordered action list.

use serde::Serialize;
use serde_json::Value;

use crate::core::action::{Action, ProtectedPrefix};
use crate::error::InvalidActionError;

/// A planner record that failed validation, kept for the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub record: Value,
    pub reason: String,
    #[serde(skip)]
    pub error: InvalidActionError,
}

/// Validated, sequenced actions plus the records that were filtered out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionPlan {
    pub actions: Vec<Action>,
    pub rejected: Vec<RejectedRecord>,
}

/// Validate every record, keep the valid ones, and sequence them.
///
/// Never drops a structurally valid action; invalid records end up in
/// `rejected` instead of raising.
pub fn plan_from_records(records: &[Value], guard: &ProtectedPrefix) -> ActionPlan {
    let mut actions = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for record in records {
        match Action::from_record(record, guard) {
            Ok(action) => actions.push(action),
            Err(error) => rejected.push(RejectedRecord {
                record: record.clone(),
                reason: error.to_string(),
                error,
            }),
        }
    }
    ActionPlan {
        actions: sequence(actions),
        rejected,
    }
}

/// Stable partition: downloads first, everything else after, each group in
/// generation order.
pub fn sequence(actions: Vec<Action>) -> Vec<Action> {
    let (mut ordered, rest): (Vec<Action>, Vec<Action>) =
        actions.into_iter().partition(Action::is_download);
    ordered.extend(rest);
    ordered
}
