//! Action contracts and the capability-indexed registry.
//!
//! Every step type is implemented by one [`Action`]: a polymorphic handler
//! identified by a stable string, executing against a session handle with an
//! [`ExecutionContext`] of timeouts and optional capabilities. The
//! [`ActionRegistry`] maps type identifiers to handlers; registering a
//! duplicate type silently replaces the prior handler, which lets tests
//! override a single action without rebuilding the whole registry.

pub mod agent;
pub mod basic;
pub mod input;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capture::CaptureSource;
use crate::cua::ComputerUseAgent;
use crate::results::ExecutionMethod;
use crate::session::{GameSession, SessionError};
use crate::spec::{Step, Timeouts};

pub use agent::AgentAction;
pub use basic::{ObserveAction, ScreenshotAction, WaitAction};
pub use input::{AxisAction, ClickAction, PressAction};

/// Result type for action execution
pub type ActionResult<T> = Result<T, ActionError>;

/// Errors surfaced by an action handler
#[derive(Debug)]
pub enum ActionError {
    /// A session primitive failed
    Session(SessionError),
    /// The computer-use agent is unavailable or could not accomplish the goal
    Agent(String),
    /// Screenshot capture failed
    Capture(String),
    /// The step attempt exceeded its budget
    Timeout(String),
    /// IO error while persisting an artifact
    Io(std::io::Error),
    /// The handler was dispatched a step of the wrong variant
    Mismatch(String),
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionError::Session(e) => write!(f, "{}", e),
            ActionError::Agent(msg) => write!(f, "agent execution failed: {}", msg),
            ActionError::Capture(msg) => write!(f, "capture failed: {}", msg),
            ActionError::Timeout(msg) => write!(f, "{}", msg),
            ActionError::Io(e) => write!(f, "artifact IO error: {}", e),
            ActionError::Mismatch(msg) => write!(f, "handler/step mismatch: {}", msg),
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ActionError::Session(e) => Some(e),
            ActionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SessionError> for ActionError {
    fn from(e: SessionError) -> Self {
        ActionError::Session(e)
    }
}

impl From<std::io::Error> for ActionError {
    fn from(e: std::io::Error) -> Self {
        ActionError::Io(e)
    }
}

/// Everything a handler may need beyond the session: budgets, the optional
/// agent capability, the capture source, and artifact storage
#[derive(Clone)]
pub struct ExecutionContext {
    /// Timeout budgets from the validated spec
    pub timeouts: Timeouts,
    /// Global AI-fallback force
    pub always_cua: bool,
    /// The computer-use capability, absent when the container skipped or
    /// failed agent initialization
    pub agent: Option<Arc<dyn ComputerUseAgent>>,
    /// Screenshot source
    pub capture: Arc<dyn CaptureSource>,
    /// Artifact storage for this run
    pub artifacts: Arc<crate::session::RunSession>,
    /// Index of the step being executed
    pub action_index: usize,
}

/// Result of a successful action execution
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// How the step was executed
    pub method: ExecutionMethod,
    /// Captured artifact, if the action produced one
    pub artifact: Option<PathBuf>,
    /// Free-text detail (observed state, agent summary)
    pub detail: Option<String>,
}

impl ActionOutcome {
    pub fn dom() -> Self {
        Self::with_method(ExecutionMethod::Dom)
    }

    pub fn cua() -> Self {
        Self::with_method(ExecutionMethod::Cua)
    }

    pub fn none() -> Self {
        Self::with_method(ExecutionMethod::None)
    }

    fn with_method(method: ExecutionMethod) -> Self {
        Self {
            method,
            artifact: None,
            detail: None,
        }
    }

    pub fn artifact(mut self, path: PathBuf) -> Self {
        self.artifact = Some(path);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Common capability all step handlers implement
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable action-type identifier
    fn action_type(&self) -> &'static str;

    /// Execute one step against the live session
    async fn execute(
        &self,
        session: &dyn GameSession,
        step: &Step,
        ctx: &ExecutionContext,
    ) -> ActionResult<ActionOutcome>;
}

/// The hybrid DOM/CUA policy, evaluated once per step.
///
/// CUA is selected when the step explicitly requests it, when the step type
/// is `agent`, or when the global force is set and the step type is
/// force-eligible. `screenshot` and `wait` are never CUA regardless of
/// flags; `wait` performs no session interaction at all.
pub fn select_method(step: &Step, always_cua: bool) -> ExecutionMethod {
    match step {
        Step::Wait { .. } => ExecutionMethod::None,
        Step::Screenshot | Step::Observe { .. } => ExecutionMethod::Dom,
        Step::Agent { .. } => ExecutionMethod::Cua,
        Step::Click { use_cua, .. } => {
            if *use_cua || always_cua {
                ExecutionMethod::Cua
            } else {
                ExecutionMethod::Dom
            }
        }
        Step::Press { use_cua, .. } | Step::Axis { use_cua, .. } => {
            if *use_cua {
                ExecutionMethod::Cua
            } else {
                ExecutionMethod::Dom
            }
        }
    }
}

/// Delegate one goal to the computer-use agent, shipping the current visual
/// state. Shared by every CUA-eligible handler.
pub(crate) async fn delegate_to_agent(
    goal: &str,
    session: &dyn GameSession,
    ctx: &ExecutionContext,
) -> ActionResult<ActionOutcome> {
    let Some(agent) = ctx.agent.as_ref() else {
        return Err(ActionError::Agent(
            "computer-use agent is not available for this run".to_string(),
        ));
    };

    let shot = ctx
        .capture
        .capture(session)
        .await
        .map_err(ActionError::Capture)?;

    let outcome = agent
        .perform(goal, &shot.image_data)
        .await
        .map_err(|e| ActionError::Agent(e.to_string()))?;

    if outcome.success {
        let mut result = ActionOutcome::cua();
        result = result.detail(format!("agent finished in {} step(s)", outcome.steps_taken));
        Ok(result)
    } else {
        Err(ActionError::Agent(
            outcome
                .detail
                .unwrap_or_else(|| "agent could not accomplish the goal".to_string()),
        ))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Capability-indexed lookup of action implementations
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register a handler under its action type. Registering a duplicate
    /// type replaces the prior handler.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.action_type().to_string(), action);
    }

    /// Look up a handler by action type
    pub fn get(&self, action_type: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(action_type).cloned()
    }

    /// Whether a handler is registered for the type
    pub fn has(&self, action_type: &str) -> bool {
        self.actions.contains_key(action_type)
    }

    /// Remove a handler; returns whether one was registered
    pub fn unregister(&mut self, action_type: &str) -> bool {
        self.actions.remove(action_type).is_some()
    }

    /// All registered action types, sorted for deterministic introspection
    pub fn action_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.actions.keys().cloned().collect();
        types.sort();
        types
    }

    /// Remove every handler
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Registry with the default action set installed
pub fn default_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(WaitAction));
    registry.register(Arc::new(ScreenshotAction));
    registry.register(Arc::new(ObserveAction));
    registry.register(Arc::new(ClickAction));
    registry.register(Arc::new(PressAction));
    registry.register(Arc::new(AxisAction));
    registry.register(Arc::new(AgentAction));
    registry
}


#[cfg(test)]
mod tests {
    use super::*;

    struct StubAction(&'static str);

    #[async_trait]
    impl Action for StubAction {
        fn action_type(&self) -> &'static str {
            self.0
        }

        async fn execute(
            &self,
            _session: &dyn GameSession,
            _step: &Step,
            _ctx: &ExecutionContext,
        ) -> ActionResult<ActionOutcome> {
            Ok(ActionOutcome::dom().detail(self.0))
        }
    }

    #[test]
    fn test_default_registry_action_types() {
        let registry = default_registry();
        assert_eq!(
            registry.action_types(),
            vec!["agent", "axis", "click", "observe", "press", "screenshot", "wait"]
        );
    }

    #[test]
    fn test_register_replaces_duplicate_type() {
        let mut registry = ActionRegistry::new();
        let first: Arc<dyn Action> = Arc::new(StubAction("click"));
        let second: Arc<dyn Action> = Arc::new(StubAction("click"));

        registry.register(first.clone());
        registry.register(second.clone());

        assert_eq!(registry.len(), 1);
        let resolved = registry.get("click").unwrap();
        assert!(Arc::ptr_eq(&resolved, &second));
        assert!(!Arc::ptr_eq(&resolved, &first));
    }

    #[test]
    fn test_unregister_and_clear() {
        let mut registry = default_registry();
        assert!(registry.unregister("axis"));
        assert!(!registry.unregister("axis"));
        assert!(!registry.has("axis"));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_select_method_policy() {
        use ExecutionMethod::*;

        let plain_click = Step::Click { target: "start".into(), use_cua: false };
        let flagged_click = Step::Click { target: "start".into(), use_cua: true };
        let agent_step = Step::Agent { goal: "win".into() };
        let screenshot = Step::Screenshot;
        let wait = Step::Wait { duration_ms: 5 };

        assert_eq!(select_method(&plain_click, false), Dom);
        assert_eq!(select_method(&flagged_click, false), Cua);
        assert_eq!(select_method(&plain_click, true), Cua);
        assert_eq!(select_method(&agent_step, false), Cua);
        // never eligible, regardless of the global force
        assert_eq!(select_method(&screenshot, true), Dom);
        assert_eq!(select_method(&wait, true), None);
    }

    #[test]
    fn test_press_only_cua_on_per_step_flag() {
        let press = Step::Press { key: "Space".into(), repeat: 1, use_cua: false };
        assert_eq!(select_method(&press, true), ExecutionMethod::Dom);

        let flagged = Step::Press { key: "Space".into(), repeat: 1, use_cua: true };
        assert_eq!(select_method(&flagged, false), ExecutionMethod::Cua);
    }
}
