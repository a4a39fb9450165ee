//! The `agent` built-in: delegates an entire step to the computer-use agent
//! to accomplish a natural-language goal rather than a single primitive.

use async_trait::async_trait;

use crate::session::GameSession;
use crate::spec::Step;

use super::{Action, ActionError, ActionOutcome, ActionResult, ExecutionContext, delegate_to_agent};

/// Whole-step delegation to the AI computer-use agent. Always CUA by
/// definition.
pub struct AgentAction;

#[async_trait]
impl Action for AgentAction {
    fn action_type(&self) -> &'static str {
        "agent"
    }

    async fn execute(
        &self,
        session: &dyn GameSession,
        step: &Step,
        ctx: &ExecutionContext,
    ) -> ActionResult<ActionOutcome> {
        let Step::Agent { goal } = step else {
            return Err(ActionError::Mismatch(format!(
                "agent handler received '{}'",
                step.action_type()
            )));
        };

        delegate_to_agent(goal, session, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testutil::context;
    use crate::cua::MockAgent;
    use crate::results::ExecutionMethod;
    use crate::session::MockSession;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_agent_step_delegates_goal() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(MockAgent::new());
        let ctx = context(dir.path(), Some(agent.clone() as _));
        let session = MockSession::new();

        let step = Step::Agent { goal: "reach level 2".into() };
        let outcome = AgentAction.execute(&session, &step, &ctx).await.unwrap();

        assert_eq!(outcome.method, ExecutionMethod::Cua);
        assert_eq!(agent.performed_goals(), vec!["reach level 2"]);
    }

    #[tokio::test]
    async fn test_agent_goal_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(MockAgent::new());
        agent.fail_goals_containing("impossible");
        let ctx = context(dir.path(), Some(agent as _));
        let session = MockSession::new();

        let step = Step::Agent { goal: "do the impossible".into() };
        let err = AgentAction.execute(&session, &step, &ctx).await.unwrap_err();
        assert!(matches!(err, ActionError::Agent(_)));
    }

    #[tokio::test]
    async fn test_agent_step_without_capability_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), None);
        let session = MockSession::new();

        let step = Step::Agent { goal: "reach level 2".into() };
        let err = AgentAction.execute(&session, &step, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("not available"));
    }
}
