//! Live test result document and incremental persistence.
//!
//! The result document is the engine's contract with external observers: a
//! single JSON file rewritten in full after every action so a polling or
//! streaming dashboard always reads valid JSON with the latest timeline.
//! Rewrites go through a sibling temp file and an atomic rename, so no
//! reader ever observes a torn write.
//!
//! The document is exclusively owned by one [`ResultWriter`] for the
//! duration of a run. Incremental update failures are logged and swallowed:
//! an observability hiccup must not abort the underlying test run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tracing::warn;

// ============================================================================
// Model
// ============================================================================

/// How a step was ultimately executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMethod {
    /// Deterministic DOM-level execution
    Dom,
    /// Delegated to the computer-use agent
    Cua,
    /// No session interaction (pure delays)
    None,
}

impl ExecutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMethod::Dom => "dom",
            ExecutionMethod::Cua => "cua",
            ExecutionMethod::None => "none",
        }
    }
}

/// Timing record for one executed step.
///
/// Produced exactly once per step; a re-executed index overwrites the prior
/// entry, keyed by `actionIndex`, never duplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTiming {
    pub action_index: usize,
    #[serde(rename = "type")]
    pub action_type: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub method: ExecutionMethod,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Running per-method execution counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMethods {
    pub cua: u32,
    pub dom: u32,
    pub none: u32,
}

impl ActionMethods {
    /// Increment the counter for a finally-determined method
    pub fn record(&mut self, method: ExecutionMethod) {
        match method {
            ExecutionMethod::Cua => self.cua += 1,
            ExecutionMethod::Dom => self.dom += 1,
            ExecutionMethod::None => self.none += 1,
        }
    }
}

/// One evaluation phase entry, at most one live entry per `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStep {
    #[serde(rename = "type")]
    pub step_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The live/final result document for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub action_timings: Vec<ActionTiming>,
    pub action_methods: ActionMethods,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluation_progress: Vec<EvaluationStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshots_dir: Option<PathBuf>,
}

impl TestResult {
    /// Fresh document at run start
    pub fn begin(screenshots_dir: Option<PathBuf>) -> Self {
        Self {
            started_at: Utc::now(),
            completed_at: None,
            success: false,
            error: None,
            action_timings: Vec::new(),
            action_methods: ActionMethods::default(),
            evaluation_progress: Vec::new(),
            screenshots_dir,
        }
    }

    /// Insert or replace the timing for its action index, keeping the
    /// timeline ordered by index
    pub fn upsert_timing(&mut self, timing: ActionTiming) {
        match self
            .action_timings
            .iter_mut()
            .find(|t| t.action_index == timing.action_index)
        {
            Some(existing) => *existing = timing,
            None => {
                self.action_timings.push(timing);
                self.action_timings.sort_by_key(|t| t.action_index);
            }
        }
    }

    /// Insert or replace the evaluation entry for its type
    pub fn upsert_evaluation(&mut self, step: EvaluationStep) {
        match self
            .evaluation_progress
            .iter_mut()
            .find(|s| s.step_type == step.step_type)
        {
            Some(existing) => *existing = step,
            None => self.evaluation_progress.push(step),
        }
    }

    /// Mark the run finished
    pub fn finalize(&mut self, success: bool, error: Option<String>) {
        self.success = success;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }
}

// ============================================================================
// Persistence Errors
// ============================================================================

/// Errors from the result store (logged, never propagated past the writer)
#[derive(Debug)]
pub enum ResultStoreError {
    /// The document was never initialized by the run starter
    Missing(PathBuf),
    /// IO error
    Io(std::io::Error),
    /// Serialization error
    Serialization(serde_json::Error),
}

impl std::fmt::Display for ResultStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultStoreError::Missing(path) => write!(
                f,
                "result document {} does not exist; it must be initialized before incremental updates",
                path.display()
            ),
            ResultStoreError::Io(e) => write!(f, "result document IO error: {}", e),
            ResultStoreError::Serialization(e) => write!(f, "result document serialization error: {}", e),
        }
    }
}

impl std::error::Error for ResultStoreError {}

impl From<std::io::Error> for ResultStoreError {
    fn from(e: std::io::Error) -> Self {
        ResultStoreError::Io(e)
    }
}

impl From<serde_json::Error> for ResultStoreError {
    fn from(e: serde_json::Error) -> Self {
        ResultStoreError::Serialization(e)
    }
}

// ============================================================================
// Incremental Writer
// ============================================================================

/// Maintains the file-backed result document through whole-document
/// read-modify-write cycles
#[derive(Debug, Clone)]
pub struct ResultWriter {
    path: PathBuf,
}

impl ResultWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the initial document. Called by the run starter before any
    /// incremental update; failures here are real errors, not observability
    /// hiccups.
    pub async fn initialize(&self, result: &TestResult) -> Result<(), ResultStoreError> {
        self.write_document(result).await
    }

    /// Upsert one action timing into the persisted document
    pub async fn add_action(&self, timing: ActionTiming) {
        self.apply("add_action", |doc| doc.upsert_timing(timing)).await;
    }

    /// Upsert one evaluation entry into the persisted document
    pub async fn add_evaluation_step(&self, step: EvaluationStep) {
        self.apply("add_evaluation_step", |doc| doc.upsert_evaluation(step))
            .await;
    }

    /// Replace the per-method counters in the persisted document
    pub async fn update_action_methods(&self, methods: ActionMethods) {
        self.apply("update_action_methods", |doc| doc.action_methods = methods)
            .await;
    }

    /// Write the finalized document. Best-effort like every incremental
    /// update, so a full disk cannot mask the run's real outcome.
    pub async fn finalize(&self, result: &TestResult) {
        if let Err(e) = self.write_document(result).await {
            warn!(path = %self.path.display(), error = %e, "failed to write final result document");
        }
    }

    /// One read-modify-write cycle; failures are logged and swallowed
    async fn apply<F>(&self, operation: &str, update: F)
    where
        F: FnOnce(&mut TestResult),
    {
        let outcome = async {
            let mut document = self.read_document().await?;
            update(&mut document);
            self.write_document(&document).await
        }
        .await;

        if let Err(e) = outcome {
            warn!(
                operation,
                path = %self.path.display(),
                error = %e,
                "incremental result update failed; continuing run"
            );
        }
    }

    async fn read_document(&self) -> Result<TestResult, ResultStoreError> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Err(ResultStoreError::Missing(self.path.clone()));
        }
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whole-document rewrite via temp file + rename, so the on-disk JSON is
    /// valid at every observation point
    async fn write_document(&self, result: &TestResult) -> Result<(), ResultStoreError> {
        let json = serde_json::to_string_pretty(result)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
