//! Interactive built-ins: click, press, axis.
//!
//! All three are CUA-eligible. The hybrid policy is resolved through
//! [`select_method`]; when it lands on CUA the handler ships a
//! natural-language goal to the agent instead of touching the DOM.

use async_trait::async_trait;

use crate::results::ExecutionMethod;
use crate::session::GameSession;
use crate::spec::Step;

use super::{
    Action, ActionError, ActionOutcome, ActionResult, ExecutionContext, delegate_to_agent,
    select_method,
};

/// Locates and activates a target element
pub struct ClickAction;

#[async_trait]
impl Action for ClickAction {
    fn action_type(&self) -> &'static str {
        "click"
    }

    async fn execute(
        &self,
        session: &dyn GameSession,
        step: &Step,
        ctx: &ExecutionContext,
    ) -> ActionResult<ActionOutcome> {
        let Step::Click { target, .. } = step else {
            return Err(ActionError::Mismatch(format!(
                "click handler received '{}'",
                step.action_type()
            )));
        };

        if select_method(step, ctx.always_cua) == ExecutionMethod::Cua {
            let goal = format!("Click the '{}' element", target);
            return delegate_to_agent(&goal, session, ctx).await;
        }

        session.click(target).await?;
        Ok(ActionOutcome::dom().detail(format!("clicked '{}'", target)))
    }
}

/// Dispatches a key, optionally repeated
pub struct PressAction;

#[async_trait]
impl Action for PressAction {
    fn action_type(&self) -> &'static str {
        "press"
    }

    async fn execute(
        &self,
        session: &dyn GameSession,
        step: &Step,
        ctx: &ExecutionContext,
    ) -> ActionResult<ActionOutcome> {
        let Step::Press { key, repeat, .. } = step else {
            return Err(ActionError::Mismatch(format!(
                "press handler received '{}'",
                step.action_type()
            )));
        };

        if select_method(step, ctx.always_cua) == ExecutionMethod::Cua {
            let goal = format!("Press the '{}' key {} time(s)", key, repeat);
            return delegate_to_agent(&goal, session, ctx).await;
        }

        for _ in 0..*repeat {
            session.press_key(key).await?;
        }
        Ok(ActionOutcome::dom().detail(format!("pressed '{}' x{}", key, repeat)))
    }
}

/// Continuous/analog input, distinct from a discrete key press
pub struct AxisAction;

#[async_trait]
impl Action for AxisAction {
    fn action_type(&self) -> &'static str {
        "axis"
    }

    async fn execute(
        &self,
        session: &dyn GameSession,
        step: &Step,
        ctx: &ExecutionContext,
    ) -> ActionResult<ActionOutcome> {
        let Step::Axis {
            axis,
            value,
            duration_ms,
            ..
        } = step
        else {
            return Err(ActionError::Mismatch(format!(
                "axis handler received '{}'",
                step.action_type()
            )));
        };

        if select_method(step, ctx.always_cua) == ExecutionMethod::Cua {
            let goal = format!("Hold the '{}' axis at {} for {}ms", axis, value, duration_ms);
            return delegate_to_agent(&goal, session, ctx).await;
        }

        session.set_axis(axis, *value, *duration_ms).await?;
        Ok(ActionOutcome::dom().detail(format!("axis '{}' = {}", axis, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testutil::context;
    use crate::cua::MockAgent;
    use crate::session::MockSession;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_click_dom_native() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), None);
        let session = MockSession::new();

        let step = Step::Click { target: "start".into(), use_cua: false };
        let outcome = ClickAction.execute(&session, &step, &ctx).await.unwrap();

        assert_eq!(outcome.method, ExecutionMethod::Dom);
        assert_eq!(session.call_log(), vec!["click:start"]);
    }

    #[tokio::test]
    async fn test_flagged_click_goes_through_agent() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(MockAgent::new());
        let ctx = context(dir.path(), Some(agent.clone() as _));
        let session = MockSession::new();

        let step = Step::Click { target: "start".into(), use_cua: true };
        let outcome = ClickAction.execute(&session, &step, &ctx).await.unwrap();

        assert_eq!(outcome.method, ExecutionMethod::Cua);
        assert!(session.call_log().is_empty(), "CUA click must not touch the DOM");
        assert_eq!(agent.performed_goals(), vec!["Click the 'start' element"]);
    }

    #[tokio::test]
    async fn test_flagged_click_without_agent_fails_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), None);
        let session = MockSession::new();

        let step = Step::Click { target: "start".into(), use_cua: true };
        let err = ClickAction.execute(&session, &step, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("not available"));
    }

    #[tokio::test]
    async fn test_press_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), None);
        let session = MockSession::new();

        let step = Step::Press { key: "ArrowUp".into(), repeat: 3, use_cua: false };
        PressAction.execute(&session, &step, &ctx).await.unwrap();

        assert_eq!(session.call_log(), vec!["press:ArrowUp"; 3]);
    }

    #[tokio::test]
    async fn test_axis_dispatches_value() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), None);
        let session = MockSession::new();

        let step = Step::Axis { axis: "steer".into(), value: -0.5, duration_ms: 0, use_cua: false };
        let outcome = AxisAction.execute(&session, &step, &ctx).await.unwrap();

        assert_eq!(outcome.method, ExecutionMethod::Dom);
        assert_eq!(session.call_log(), vec!["axis:steer=-0.5"]);
    }
}
