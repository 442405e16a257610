//! Planner trait, the abstraction over the external tool/plan subsystem.
//!
//! The planner synthesizes a plan for a conversational goal and executes
//! it. It may instead hand back a proposed plan that requires explicit user
//! approval; the engine then short-circuits response generation and emits
//! a plan-proposal message.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PlannerError;

/// Lifecycle state of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanState {
    /// Awaiting user approval
    Proposed,
    /// Approved and ready to run
    Approved,
    /// Declined by the user
    Rejected,
    /// Ran to completion
    Executed,
}

/// One step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// What this step does
    pub description: String,

    /// Tool backing the step, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Tool arguments
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub arguments: serde_json::Value,
}

/// A plan produced by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub state: PlanState,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            steps,
            state: PlanState::Approved,
        }
    }
}

/// What the planner decided to do with a goal.
#[derive(Debug, Clone)]
pub enum PlanDisposition {
    /// The plan can run immediately.
    Ready(Plan),

    /// The plan needs user approval before anything executes.
    RequiresApproval(Plan),
}

/// The planner trait. Arguments to `execute_plan` are the turn's
/// pass-through variables.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Synthesize a plan for a goal.
    async fn create_plan(&self, goal: &str) -> Result<PlanDisposition, PlannerError>;

    /// Execute a plan and return its textual result.
    async fn execute_plan(
        &self,
        plan: &Plan,
        args: &BTreeMap<String, String>,
    ) -> Result<String, PlannerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_plan_is_ready_to_run() {
        let plan = Plan::new("look up the weather", vec![]);
        assert_eq!(plan.state, PlanState::Approved);
        assert!(!plan.id.is_empty());
    }

    #[test]
    fn plan_serialization_roundtrip() {
        let mut plan = Plan::new(
            "summarize the report",
            vec![PlanStep {
                description: "fetch the report".into(),
                tool: Some("document_fetch".into()),
                arguments: serde_json::json!({"path": "reports/q3.md"}),
            }],
        );
        plan.state = PlanState::Proposed;

        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"proposed\""));

        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, PlanState::Proposed);
        assert_eq!(back.steps.len(), 1);
        assert_eq!(back.steps[0].tool.as_deref(), Some("document_fetch"));
    }
}
