//! Non-interactive built-ins: wait, screenshot, observe.

use async_trait::async_trait;

use crate::session::{GameSession, SessionError};
use crate::spec::Step;

use super::{Action, ActionError, ActionOutcome, ActionResult, ExecutionContext};

/// Pure delay for a specified duration. No session interaction beyond
/// scheduling, so its method is `none`.
pub struct WaitAction;

#[async_trait]
impl Action for WaitAction {
    fn action_type(&self) -> &'static str {
        "wait"
    }

    async fn execute(
        &self,
        _session: &dyn GameSession,
        step: &Step,
        _ctx: &ExecutionContext,
    ) -> ActionResult<ActionOutcome> {
        let Step::Wait { duration_ms } = step else {
            return Err(ActionError::Mismatch(format!(
                "wait handler received '{}'",
                step.action_type()
            )));
        };

        tokio::time::sleep(std::time::Duration::from_millis(*duration_ms)).await;
        Ok(ActionOutcome::none().detail(format!("waited {}ms", duration_ms)))
    }
}

/// Captures the current visual state. Always DOM-native; never routed to the
/// AI fallback.
pub struct ScreenshotAction;

#[async_trait]
impl Action for ScreenshotAction {
    fn action_type(&self) -> &'static str {
        "screenshot"
    }

    async fn execute(
        &self,
        session: &dyn GameSession,
        step: &Step,
        ctx: &ExecutionContext,
    ) -> ActionResult<ActionOutcome> {
        if !matches!(step, Step::Screenshot) {
            return Err(ActionError::Mismatch(format!(
                "screenshot handler received '{}'",
                step.action_type()
            )));
        }

        let shot = ctx
            .capture
            .capture(session)
            .await
            .map_err(ActionError::Capture)?;

        let path = ctx.artifacts.screenshot_path(ctx.action_index, "screenshot");
        tokio::fs::write(&path, &shot.image_data).await?;

        Ok(ActionOutcome::dom()
            .artifact(path)
            .detail(format!("{}x{}", shot.width, shot.height)))
    }
}

/// Queries current state without mutating it. Used for assertions and
/// pre-conditions; with `gate` set on the step, the orchestrator aborts the
/// remaining sequence when the observation fails.
pub struct ObserveAction;

#[async_trait]
impl Action for ObserveAction {
    fn action_type(&self) -> &'static str {
        "observe"
    }

    async fn execute(
        &self,
        session: &dyn GameSession,
        step: &Step,
        _ctx: &ExecutionContext,
    ) -> ActionResult<ActionOutcome> {
        let Step::Observe { target, .. } = step else {
            return Err(ActionError::Mismatch(format!(
                "observe handler received '{}'",
                step.action_type()
            )));
        };

        match session.query_text(target).await? {
            Some(text) => Ok(ActionOutcome::dom().detail(text)),
            None => Err(ActionError::Session(SessionError::Query(format!(
                "target '{}' not present",
                target
            )))),
        }
    }
}
