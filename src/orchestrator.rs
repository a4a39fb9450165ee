//! Execution orchestrator: drives a validated spec against a live session.
//!
//! One run executes its steps strictly sequentially; a step never begins
//! before the previous one reaches a terminal state, because each step
//! mutates shared session state the next one depends on. Failures are
//! handled at two granularities with the same backoff law:
//! - a transient step failure is re-attempted up to the spec's
//!   `actionRetries` budget, each attempt bounded by the action timeout
//! - a run-level infrastructure failure (persistent session loss) restarts
//!   the whole sequence from step 0 up to `retries` times, with a fresh
//!   result document and a re-initialized session per attempt
//!
//! A fatally failed step is recorded in its timing and the run continues,
//! unless the step is a gate observation or the halt-on-failure policy is
//! set. Exhaustion of the whole-run budget is the only condition surfaced
//! as an error from [`Orchestrator::run`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::actions::{ActionError, ActionRegistry, ExecutionContext, select_method};
use crate::capture::CaptureSource;
use crate::cua::ComputerUseAgent;
use crate::results::{ActionTiming, EvaluationStep, ResultWriter, TestResult};
use crate::retry::{RetryOptions, is_retryable_error, retry_transient};
use crate::session::{GameSession, RunSession};
use crate::spec::{Step, TestSpec};

/// Backoff base for re-attempting a failed step (milliseconds)
const ACTION_RETRY_BASE_DELAY_MS: u64 = 500;

/// Backoff base for restarting a failed run (milliseconds)
const RUN_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Run-level errors
#[derive(Debug)]
pub enum EngineError {
    /// A step references an action type the registry does not know.
    /// A malformed sequence is a configuration defect, not a transient
    /// fault, so this aborts the whole run.
    UnknownAction(String),
    /// The session was lost or could not be brought up
    Session(String),
    /// The result document could not be initialized
    Store(crate::results::ResultStoreError),
    /// The whole-run retry budget is spent
    RetriesExhausted { attempts: u32, last_error: String },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::UnknownAction(t) => write!(f, "unknown action type '{}'", t),
            EngineError::Session(msg) => write!(f, "session failure: {}", msg),
            EngineError::Store(e) => write!(f, "result store failure: {}", e),
            EngineError::RetriesExhausted { attempts, last_error } => write!(
                f,
                "run failed after {} attempt(s); last error: {}",
                attempts, last_error
            ),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Drives one spec against one session, producing one result document per
/// run attempt
pub struct Orchestrator {
    registry: ActionRegistry,
    session: Arc<dyn GameSession>,
    capture: Arc<dyn CaptureSource>,
    agent: Option<Arc<dyn ComputerUseAgent>>,
    spec: TestSpec,
    artifacts: Arc<RunSession>,
    halt_on_failure: bool,
}

impl Orchestrator {
    pub fn new(
        registry: ActionRegistry,
        session: Arc<dyn GameSession>,
        capture: Arc<dyn CaptureSource>,
        agent: Option<Arc<dyn ComputerUseAgent>>,
        spec: TestSpec,
        artifacts: Arc<RunSession>,
    ) -> Self {
        Self {
            registry,
            session,
            capture,
            agent,
            spec,
            artifacts,
            halt_on_failure: false,
        }
    }

    /// Abort the remaining sequence on any fatal step failure, instead of
    /// the default record-and-continue
    pub fn halt_on_failure(mut self, halt: bool) -> Self {
        self.halt_on_failure = halt;
        self
    }

    /// Mutable registry access, for overriding single action types with
    /// test doubles
    pub fn registry_mut(&mut self) -> &mut ActionRegistry {
        &mut self.registry
    }

    /// Whether the AI fallback capability is present for this run
    pub fn has_agent(&self) -> bool {
        self.agent.is_some()
    }

    /// Execute the full sequence, restarting on retryable run-level
    /// failures up to the spec's `retries` budget.
    pub async fn run(&self) -> EngineResult<TestResult> {
        let attempts = self.spec.retries + 1;
        let backoff = RetryOptions::new(attempts, RUN_RETRY_BASE_DELAY_MS);

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = backoff.delay_for_attempt(attempt - 1);
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "restarting run after retryable failure"
                );
                tokio::time::sleep(delay).await;
            }

            match self.run_once(attempt).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    let exhausted = attempt + 1 == attempts;
                    let retryable = is_retryable_error(&error);
                    if retryable && exhausted {
                        return Err(EngineError::RetriesExhausted {
                            attempts,
                            last_error: error.to_string(),
                        });
                    }
                    if !retryable {
                        return Err(error);
                    }
                    warn!(error = %error, attempt = attempt + 1, "run attempt failed");
                }
            }
        }

        unreachable!("run loop returns from its final attempt")
    }

    /// One run attempt: fresh result document, bounded by the total budget
    async fn run_once(&self, attempt: u32) -> EngineResult<TestResult> {
        if attempt > 0 {
            self.session
                .initialize()
                .await
                .map_err(|e| EngineError::Session(e.to_string()))?;
        }

        let writer = ResultWriter::new(self.artifacts.result_path());
        let mut result = TestResult::begin(Some(self.artifacts.dir.clone()));
        writer.initialize(&result).await.map_err(EngineError::Store)?;

        let total = Duration::from_millis(self.spec.timeouts.total);
        let sequence = timeout(total, self.execute_sequence(&writer, &mut result)).await;

        let (success, error) = match sequence {
            Ok(Ok(Some(abort_reason))) => (false, Some(abort_reason)),
            Ok(Ok(None)) => {
                let all_ok = result.action_timings.iter().all(|t| t.succeeded);
                (all_ok, (!all_ok).then(|| "one or more steps failed".to_string()))
            }
            Ok(Err(engine_error)) => {
                // Fatal run-level failure: still leave a valid final document
                result.finalize(false, Some(engine_error.to_string()));
                writer.finalize(&result).await;
                return Err(engine_error);
            }
            Err(_elapsed) => (
                false,
                Some(format!(
                    "run timed out after {}ms ({} of {} steps completed)",
                    self.spec.timeouts.total,
                    result.action_timings.len(),
                    self.spec.sequence.len()
                )),
            ),
        };

        let evaluation = self.heuristic_evaluation(&result);
        result.upsert_evaluation(evaluation.clone());
        writer.add_evaluation_step(evaluation).await;

        result.finalize(success, error);
        writer.finalize(&result).await;

        info!(
            success,
            steps = result.action_timings.len(),
            cua = result.action_methods.cua,
            dom = result.action_methods.dom,
            "run finished"
        );
        Ok(result)
    }

    /// Execute every step in order. Returns `Some(reason)` when the
    /// sequence was aborted early by a gate or the halt policy.
    async fn execute_sequence(
        &self,
        writer: &ResultWriter,
        result: &mut TestResult,
    ) -> EngineResult<Option<String>> {
        for (index, step) in self.spec.sequence.iter().enumerate() {
            let timing = self.execute_step(index, step).await?;
            let succeeded = timing.succeeded;
            let error_text = timing.error.clone();

            result.action_methods.record(timing.method);
            result.upsert_timing(timing.clone());
            writer.add_action(timing).await;
            writer.update_action_methods(result.action_methods).await;

            if succeeded {
                continue;
            }

            // A step that still fails transiently after its own retry
            // budget means the infrastructure under the run is gone;
            // escalate to the whole-run retry loop.
            if let Some(text) = &error_text {
                if is_retryable_error(text) {
                    return Err(EngineError::Session(format!(
                        "step {} exhausted its retry budget: {}",
                        index, text
                    )));
                }
            }

            if step.aborts_on_failure() {
                return Ok(Some(format!(
                    "gate observation at step {} failed; remaining steps skipped",
                    index
                )));
            }
            if self.halt_on_failure {
                return Ok(Some(format!(
                    "step {} failed and halt-on-failure is set",
                    index
                )));
            }
        }

        Ok(None)
    }

    /// Execute one step through its registered handler, with per-attempt
    /// timeout and action-level retry. Produces exactly one timing.
    async fn execute_step(&self, index: usize, step: &Step) -> EngineResult<ActionTiming> {
        let action_type = step.action_type();
        let handler = self
            .registry
            .get(action_type)
            .ok_or_else(|| EngineError::UnknownAction(action_type.to_string()))?;

        let ctx = ExecutionContext {
            timeouts: self.spec.timeouts.clone(),
            always_cua: self.spec.always_cua,
            agent: self.agent.clone(),
            capture: self.capture.clone(),
            artifacts: self.artifacts.clone(),
            action_index: index,
        };
        let method_hint = select_method(step, self.spec.always_cua);

        // A wait step is bounded by its own duration, not just the action
        // budget.
        let attempt_budget = Duration::from_millis(match step {
            Step::Wait { duration_ms } => self.spec.timeouts.action + duration_ms,
            _ => self.spec.timeouts.action,
        });

        let retry = RetryOptions::new(self.spec.action_retries + 1, ACTION_RETRY_BASE_DELAY_MS);
        let started_at = Utc::now();
        let start = std::time::Instant::now();

        let outcome = retry_transient(
            |_attempt| {
                let handler = handler.clone();
                let ctx = ctx.clone();
                let session = self.session.clone();
                async move {
                    match timeout(attempt_budget, handler.execute(session.as_ref(), step, &ctx)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ActionError::Timeout(format!(
                            "action '{}' timed out after {}ms",
                            action_type,
                            attempt_budget.as_millis()
                        ))),
                    }
                }
            },
            &retry,
        )
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let timing = match outcome {
            Ok(out) => ActionTiming {
                action_index: index,
                action_type: action_type.to_string(),
                started_at,
                duration_ms,
                method: out.method,
                succeeded: true,
                error: None,
            },
            Err(error) => {
                warn!(step = index, action = action_type, error = %error, "step failed");
                ActionTiming {
                    action_index: index,
                    action_type: action_type.to_string(),
                    started_at,
                    duration_ms,
                    method: method_hint,
                    succeeded: false,
                    error: Some(error.to_string()),
                }
            }
        };

        Ok(timing)
    }

    /// Coarse end-of-run scoring: the fraction of steps that succeeded
    fn heuristic_evaluation(&self, result: &TestResult) -> EvaluationStep {
        let total = result.action_timings.len();
        let succeeded = result.action_timings.iter().filter(|t| t.succeeded).count();
        let score = if total == 0 {
            0.0
        } else {
            succeeded as f64 / total as f64
        };

        EvaluationStep {
            step_type: "heuristic".to_string(),
            status: "completed".to_string(),
            score: Some(score),
            detail: Some(format!("{}/{} steps succeeded", succeeded, total)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::default_registry;
    use crate::capture::MockCapture;
    use crate::results::ExecutionMethod;
    use crate::session::MockSession;
    use crate::spec::validate;
    use serde_json::json;

    fn orchestrator_for(
        raw: serde_json::Value,
        session: Arc<MockSession>,
        dir: &std::path::Path,
    ) -> Orchestrator {
        let spec = validate(&raw).expect("test spec must validate").spec;
        Orchestrator::new(
            default_registry(),
            session,
            Arc::new(MockCapture::new(32, 32)),
            None,
            spec,
            Arc::new(RunSession::in_dir(dir)),
        )
    }

    #[tokio::test]
    async fn test_happy_path_one_timing_per_step() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());
        session.set_observation("#hud", "ready");

        let orchestrator = orchestrator_for(
            json!({
                "sequence": [
                    { "action": "screenshot" },
                    { "action": "click", "target": "start" },
                    { "action": "wait", "durationMs": 1 },
                    { "action": "observe", "target": "#hud" }
                ]
            }),
            session,
            dir.path(),
        );

        let result = orchestrator.run().await.unwrap();
        assert!(result.success);
        assert_eq!(result.action_timings.len(), 4);
        let indexes: Vec<usize> = result.action_timings.iter().map(|t| t.action_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        assert_eq!(result.action_methods.dom, 3);
        assert_eq!(result.action_methods.none, 1);
        assert_eq!(result.action_methods.cua, 0);
        assert!(result.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_action_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());
        let mut orchestrator = orchestrator_for(
            json!({ "sequence": [{ "action": "click", "target": "start" }] }),
            session,
            dir.path(),
        );
        orchestrator.registry_mut().unregister("click");

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownAction(_)));
        assert!(err.to_string().contains("click"));
    }

    #[tokio::test]
    async fn test_fatal_step_recorded_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());
        session.fail_on("broken", "element not found");

        let orchestrator = orchestrator_for(
            json!({
                "sequence": [
                    { "action": "click", "target": "broken" },
                    { "action": "click", "target": "start" }
                ],
                "actionRetries": 0
            }),
            session.clone(),
            dir.path(),
        );

        let result = orchestrator.run().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.action_timings.len(), 2);
        assert!(!result.action_timings[0].succeeded);
        assert!(result.action_timings[0].error.as_deref().unwrap().contains("element not found"));
        assert!(result.action_timings[1].succeeded);
    }

    #[tokio::test]
    async fn test_gate_observation_aborts_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());

        let orchestrator = orchestrator_for(
            json!({
                "sequence": [
                    { "action": "observe", "target": "#missing", "gate": true },
                    { "action": "click", "target": "start" }
                ],
                "actionRetries": 0
            }),
            session.clone(),
            dir.path(),
        );

        let result = orchestrator.run().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.action_timings.len(), 1, "gated failure must skip the rest");
        assert!(result.error.as_deref().unwrap().contains("gate"));
        assert!(session.call_log().iter().all(|c| !c.starts_with("click")));
    }

    #[tokio::test]
    async fn test_halt_on_failure_policy() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());
        session.fail_on("broken", "element not found");

        let orchestrator = orchestrator_for(
            json!({
                "sequence": [
                    { "action": "click", "target": "broken" },
                    { "action": "click", "target": "start" }
                ],
                "actionRetries": 0
            }),
            session,
            dir.path(),
        )
        .halt_on_failure(true);

        let result = orchestrator.run().await.unwrap();
        assert_eq!(result.action_timings.len(), 1);
        assert!(result.error.as_deref().unwrap().contains("halt-on-failure"));
    }

    #[tokio::test]
    async fn test_transient_step_failure_retried_within_step() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());
        session.fail_next_n(1);

        let orchestrator = orchestrator_for(
            json!({
                "sequence": [{ "action": "click", "target": "start" }],
                "actionRetries": 2
            }),
            session,
            dir.path(),
        );

        let result = orchestrator.run().await.unwrap();
        assert!(result.success);
        assert!(result.action_timings[0].succeeded);
    }

    #[tokio::test]
    async fn test_persistent_transient_failure_restarts_run() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());
        // One transient fault per step attempt; actionRetries = 0 means the
        // first run attempt escalates, the second run attempt succeeds.
        session.fail_next_n(1);

        let orchestrator = orchestrator_for(
            json!({
                "sequence": [{ "action": "click", "target": "start" }],
                "actionRetries": 0,
                "retries": 1
            }),
            session.clone(),
            dir.path(),
        );

        let result = orchestrator.run().await.unwrap();
        assert!(result.success);
        // Restart re-initialized the session
        assert!(session.call_log().iter().filter(|c| *c == "initialize").count() >= 1);
    }

    #[tokio::test]
    async fn test_run_retry_exhaustion_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());
        session.fail_next_n(1000);

        let orchestrator = orchestrator_for(
            json!({
                "sequence": [{ "action": "click", "target": "start" }],
                "actionRetries": 0,
                "retries": 1
            }),
            session,
            dir.path(),
        );

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, EngineError::RetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_total_timeout_marks_run_failed_with_final_write() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());

        let orchestrator = orchestrator_for(
            json!({
                "sequence": [
                    { "action": "wait", "durationMs": 500 },
                    { "action": "click", "target": "start" }
                ],
                "timeouts": { "total": 50 }
            }),
            session,
            dir.path(),
        );

        let result = orchestrator.run().await.unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timed out"));

        // The final document still landed on disk as valid JSON
        let bytes = std::fs::read(dir.path().join("result.json")).unwrap();
        let doc: TestResult = serde_json::from_slice(&bytes).unwrap();
        assert!(!doc.success);
        assert!(doc.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_method_counts_follow_hybrid_policy() {
        use crate::cua::MockAgent;

        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());
        let spec = validate(&json!({
            "sequence": [
                { "action": "screenshot" },
                { "action": "click", "target": "start", "useCUA": true },
                { "action": "wait", "durationMs": 1 }
            ]
        }))
        .unwrap()
        .spec;

        let orchestrator = Orchestrator::new(
            default_registry(),
            session,
            Arc::new(MockCapture::new(32, 32)),
            Some(Arc::new(MockAgent::new()) as _),
            spec,
            Arc::new(RunSession::in_dir(dir.path())),
        );

        let result = orchestrator.run().await.unwrap();
        assert!(result.success);
        assert_eq!(result.action_methods.dom, 1);
        assert_eq!(result.action_methods.cua, 1);
        assert_eq!(result.action_methods.none, 1);
        assert_eq!(result.action_timings[1].method, ExecutionMethod::Cua);
    }

    #[tokio::test]
    async fn test_flagged_step_without_agent_records_cua_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(MockSession::new());

        let orchestrator = orchestrator_for(
            json!({
                "sequence": [{ "action": "click", "target": "start", "useCUA": true }],
                "actionRetries": 0
            }),
            session,
            dir.path(),
        );

        let result = orchestrator.run().await.unwrap();
        assert!(!result.success);
        let timing = &result.action_timings[0];
        assert!(!timing.succeeded);
        assert_eq!(timing.method, ExecutionMethod::Cua, "attempted method must be recorded");
        assert!(timing.error.as_deref().unwrap().contains("not available"));
    }
}
