//! Service container: wires collaborators into a ready orchestrator.
//!
//! The one decision point for the optional AI capability lives here. The
//! spec's steps are scanned for AI-fallback demand; when none exists the
//! agent is never initialized (no network or session cost), and when
//! initialization fails the run proceeds without the capability. The
//! degradation is a logged warning plus reported per-step failures, never a
//! crash and never a silent skip.

use std::sync::Arc;

use tracing::{info, warn};

use crate::actions::default_registry;
use crate::capture::CaptureSource;
use crate::cua::ComputerUseAgent;
use crate::orchestrator::{EngineError, EngineResult, Orchestrator};
use crate::session::{GameSession, RunSession};
use crate::spec::TestSpec;

/// Collects the session, capture, and optional agent collaborators, then
/// builds an [`Orchestrator`] for one spec
pub struct ServiceContainer {
    session: Arc<dyn GameSession>,
    capture: Arc<dyn CaptureSource>,
    agent: Option<Arc<dyn ComputerUseAgent>>,
}

impl ServiceContainer {
    pub fn new(session: Arc<dyn GameSession>, capture: Arc<dyn CaptureSource>) -> Self {
        Self {
            session,
            capture,
            agent: None,
        }
    }

    /// Provide an agent client. It is only initialized if the spec demands
    /// AI fallback.
    pub fn with_agent(mut self, agent: Arc<dyn ComputerUseAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Initialize the session, conditionally initialize the agent, and wire
    /// the default registry into a ready orchestrator.
    ///
    /// Agent initialization requires an active session, so the session comes
    /// up first.
    pub async fn build(self, spec: TestSpec, artifacts: Arc<RunSession>) -> EngineResult<Orchestrator> {
        self.session
            .initialize()
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?;

        let agent = if spec.needs_computer_use() {
            match self.agent {
                Some(agent) => {
                    match agent.initialize(&spec.cua_model, spec.cua_max_steps).await {
                        Ok(()) => {
                            info!(model = %spec.cua_model, max_steps = spec.cua_max_steps, "computer-use agent ready");
                            Some(agent)
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                "computer-use agent initialization failed; continuing without AI fallback"
                            );
                            None
                        }
                    }
                }
                None => {
                    warn!(
                        "spec requests AI fallback but no agent client was provided; affected steps will fail"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Orchestrator::new(
            default_registry(),
            self.session,
            self.capture,
            agent,
            spec,
            artifacts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MockCapture;
    use crate::cua::MockAgent;
    use crate::session::MockSession;
    use crate::spec::validate;
    use serde_json::json;

    fn spec_from(raw: serde_json::Value) -> TestSpec {
        validate(&raw).unwrap().spec
    }

    fn artifacts(dir: &std::path::Path) -> Arc<RunSession> {
        Arc::new(RunSession::in_dir(dir))
    }

    #[tokio::test]
    async fn test_agent_skipped_when_no_step_requires_it() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(MockAgent::new());
        let spec = spec_from(json!({
            "sequence": [{ "action": "click", "target": "start" }]
        }));

        let container = ServiceContainer::new(
            Arc::new(MockSession::new()),
            Arc::new(MockCapture::default()),
        )
        .with_agent(agent.clone());
        let orchestrator = container.build(spec, artifacts(dir.path())).await.unwrap();

        assert!(!orchestrator.has_agent());
        assert!(!agent.was_initialized(), "agent must not be initialized eagerly");
    }

    #[tokio::test]
    async fn test_per_step_flag_triggers_agent_init() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(MockAgent::new());
        // alwaysCUA is off; the scan must still catch the per-step flag
        let spec = spec_from(json!({
            "sequence": [
                { "action": "screenshot" },
                { "action": "click", "target": "start", "useCUA": true }
            ],
            "alwaysCUA": false
        }));

        let container = ServiceContainer::new(
            Arc::new(MockSession::new()),
            Arc::new(MockCapture::default()),
        )
        .with_agent(agent.clone());
        let orchestrator = container.build(spec, artifacts(dir.path())).await.unwrap();

        assert!(orchestrator.has_agent());
        assert!(agent.was_initialized());
    }

    #[tokio::test]
    async fn test_agent_init_failure_degrades_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(MockAgent::failing_initialization());
        let spec = spec_from(json!({
            "sequence": [{ "action": "agent", "goal": "win the game" }]
        }));

        let container = ServiceContainer::new(
            Arc::new(MockSession::new()),
            Arc::new(MockCapture::default()),
        )
        .with_agent(agent);
        let orchestrator = container.build(spec, artifacts(dir.path())).await.unwrap();

        // Build succeeds; the capability is simply absent
        assert!(!orchestrator.has_agent());
    }

    #[tokio::test]
    async fn test_session_initialized_before_agent() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());
        let spec = spec_from(json!({
            "sequence": [{ "action": "agent", "goal": "win" }]
        }));

        let container = ServiceContainer::new(session.clone(), Arc::new(MockCapture::default()))
            .with_agent(Arc::new(MockAgent::new()));
        container.build(spec, artifacts(dir.path())).await.unwrap();

        assert_eq!(session.call_log().first().map(String::as_str), Some("initialize"));
    }
}
