//! Game session contract and run artifact management.
//!
//! Two concerns live here:
//! - [`GameSession`]: the narrow contract the engine holds against the
//!   underlying browser-driver session. The engine only ever initializes the
//!   session and dispatches input/query primitives through it; everything
//!   else about the driver is opaque.
//! - [`RunSession`]: organized on-disk storage for one run's artifacts
//!   (screenshots, the result document), with unique run directories under a
//!   global base location and automatic cleanup unless explicitly preserved.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::config;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by a session collaborator
#[derive(Debug)]
pub enum SessionError {
    /// The session could not be brought up
    Launch(String),
    /// An input primitive failed against the live page
    Input(String),
    /// A state query failed
    Query(String),
    /// The underlying transport dropped
    ConnectionLost(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Launch(msg) => write!(f, "session launch failed: {}", msg),
            SessionError::Input(msg) => write!(f, "input dispatch failed: {}", msg),
            SessionError::Query(msg) => write!(f, "state query failed: {}", msg),
            SessionError::ConnectionLost(msg) => write!(f, "session connection lost: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Narrow contract over a live interactive game session.
///
/// `initialize` must be idempotent: the orchestrator re-initializes the
/// session at the start of every whole-run restart attempt.
#[async_trait]
pub trait GameSession: Send + Sync {
    /// Bring the session up (navigation, load waits). Idempotent.
    async fn initialize(&self) -> SessionResult<()>;

    /// Locate and activate a target element
    async fn click(&self, target: &str) -> SessionResult<()>;

    /// Dispatch a single key press
    async fn press_key(&self, key: &str) -> SessionResult<()>;

    /// Apply an analog axis value, held for `hold_ms` milliseconds
    async fn set_axis(&self, axis: &str, value: f64, hold_ms: u64) -> SessionResult<()>;

    /// Query the text content of a target without mutating state.
    /// Returns `None` when the target does not exist.
    async fn query_text(&self, target: &str) -> SessionResult<Option<String>>;
}

// ============================================================================
// Mock Session
// ============================================================================

/// An in-process scripted session for dry runs and tests.
///
/// Every primitive succeeds by default and is appended to a call log;
/// individual targets/keys can be scripted to fail, and `fail_next_n`
/// injects transient faults for retry tests.
#[derive(Debug, Default)]
pub struct MockSession {
    calls: Mutex<Vec<String>>,
    failing_targets: Mutex<HashMap<String, String>>,
    transient_failures: Mutex<u32>,
    observations: Mutex<HashMap<String, String>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `target` (or key, or axis) to fail with `message`
    pub fn fail_on(&self, target: &str, message: &str) {
        self.failing_targets
            .lock()
            .unwrap()
            .insert(target.to_string(), message.to_string());
    }

    /// Make the next `n` primitives fail with a transient connection error
    pub fn fail_next_n(&self, n: u32) {
        *self.transient_failures.lock().unwrap() = n;
    }

    /// Script the text returned for an observed target
    pub fn set_observation(&self, target: &str, text: &str) {
        self.observations
            .lock()
            .unwrap()
            .insert(target.to_string(), text.to_string());
    }

    /// Every primitive dispatched so far, in order
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn dispatch(&self, call: String, target: &str) -> SessionResult<()> {
        {
            let mut transient = self.transient_failures.lock().unwrap();
            if *transient > 0 {
                *transient -= 1;
                return Err(SessionError::ConnectionLost(
                    "scripted transient network fault".to_string(),
                ));
            }
        }
        if let Some(message) = self.failing_targets.lock().unwrap().get(target) {
            return Err(SessionError::Input(message.clone()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl GameSession for MockSession {
    async fn initialize(&self) -> SessionResult<()> {
        self.calls.lock().unwrap().push("initialize".to_string());
        Ok(())
    }

    async fn click(&self, target: &str) -> SessionResult<()> {
        self.dispatch(format!("click:{}", target), target)
    }

    async fn press_key(&self, key: &str) -> SessionResult<()> {
        self.dispatch(format!("press:{}", key), key)
    }

    async fn set_axis(&self, axis: &str, value: f64, hold_ms: u64) -> SessionResult<()> {
        if hold_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(hold_ms)).await;
        }
        self.dispatch(format!("axis:{}={}", axis, value), axis)
    }

    async fn query_text(&self, target: &str) -> SessionResult<Option<String>> {
        {
            let mut transient = self.transient_failures.lock().unwrap();
            if *transient > 0 {
                *transient -= 1;
                return Err(SessionError::ConnectionLost(
                    "scripted transient network fault".to_string(),
                ));
            }
        }
        self.calls.lock().unwrap().push(format!("observe:{}", target));
        Ok(self.observations.lock().unwrap().get(target).cloned())
    }
}

// ============================================================================
// Run Artifact Storage
// ============================================================================

/// On-disk storage for one run's artifacts
#[derive(Debug, Clone)]
pub struct RunSession {
    /// Unique run ID
    pub id: String,
    /// Root directory for this run
    pub dir: PathBuf,
    /// Whether to keep files after the run ends
    pub keep: bool,
}

impl RunSession {
    /// Create a new run with a unique ID under the configured base directory
    pub fn new() -> Self {
        let id = generate_run_id();
        let dir = PathBuf::from(config::run_base_dir()).join(&id);

        Self {
            id,
            dir,
            keep: false,
        }
    }

    /// Create a run with a specific name prefix
    pub fn with_name(name: &str) -> Self {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let id = format!("{}_{}", sanitize_name(name), timestamp);
        let dir = PathBuf::from(config::run_base_dir()).join(&id);

        Self {
            id,
            dir,
            keep: false,
        }
    }

    /// Create a run in a specific directory. User-specified directories are
    /// kept by default.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_run_id);

        Self {
            id,
            dir,
            keep: true,
        }
    }

    /// Set whether to keep files after the run ends
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Initialize the run directory and write run metadata
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
        });
        fs::write(
            self.dir.join(".run.json"),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        Ok(())
    }

    /// Path for a screenshot captured at a given step
    pub fn screenshot_path(&self, action_index: usize, label: &str) -> PathBuf {
        self.dir
            .join(format!("step_{}_{}.png", action_index, sanitize_name(label)))
    }

    /// Path of the live result document for this run
    pub fn result_path(&self) -> PathBuf {
        self.dir.join("result.json")
    }

    /// List all PNG artifacts captured in this run
    pub fn list_screenshots(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut shots = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().map(|e| e == "png").unwrap_or(false) {
                    shots.push(path);
                }
            }
        }
        shots.sort();
        Ok(shots)
    }

    /// Remove the run directory unless it is marked kept
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Default for RunSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RunSession {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// Generate a unique run ID
fn generate_run_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let pid = std::process::id();
    format!("run_{}_{}", timestamp, pid)
}

/// Sanitize a name for use in filenames
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Clean up runs older than the specified duration
pub fn cleanup_old_runs(max_age: std::time::Duration) -> std::io::Result<usize> {
    let base = PathBuf::from(config::run_base_dir());
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(&base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                if let Ok(age) = now.duration_since(modified) {
                    if age > max_age && fs::remove_dir_all(&path).is_ok() {
                        cleaned += 1;
                    }
                }
            }
        }
    }

    Ok(cleaned)
}

/// List all existing run directories
pub fn list_runs() -> std::io::Result<Vec<PathBuf>> {
    let base = PathBuf::from(config::run_base_dir());
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(&base)? {
        let path = entry?.path();
        if path.is_dir() {
            runs.push(path);
        }
    }
    runs.sort();
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_session_new() {
        let run = RunSession::new();
        assert!(run.id.starts_with("run_"));
        assert!(!run.keep);
    }

    #[test]
    fn test_run_session_with_name() {
        let run = RunSession::with_name("smoke test");
        assert!(run.id.starts_with("smoke_test_"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("hello world"), "hello_world");
        assert_eq!(sanitize_name("#start-button"), "_start-button");
    }

    #[test]
    fn test_artifact_paths() {
        let run = RunSession::in_dir("/tmp/game-vision-test/x");
        assert!(run.screenshot_path(0, "screenshot").ends_with("step_0_screenshot.png"));
        assert!(run.screenshot_path(3, "click").ends_with("step_3_click.png"));
        assert!(run.result_path().ends_with("result.json"));
    }

    #[tokio::test]
    async fn test_mock_session_logs_calls() {
        let session = MockSession::new();
        session.initialize().await.unwrap();
        session.click("start").await.unwrap();
        session.press_key("Space").await.unwrap();
        assert_eq!(session.call_log(), vec!["initialize", "click:start", "press:Space"]);
    }

    #[tokio::test]
    async fn test_mock_session_scripted_failure() {
        let session = MockSession::new();
        session.fail_on("start", "element not found");
        let err = session.click("start").await.unwrap_err();
        assert!(err.to_string().contains("element not found"));
    }

    #[tokio::test]
    async fn test_mock_session_transient_failures_drain() {
        let session = MockSession::new();
        session.fail_next_n(2);
        assert!(session.click("a").await.is_err());
        assert!(session.click("a").await.is_err());
        assert!(session.click("a").await.is_ok());
    }
}
