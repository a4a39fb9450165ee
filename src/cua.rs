//! Computer-use agent (CUA) client.
//!
//! The AI fallback path: a delegated step ships the current screenshot and a
//! natural-language goal to an agent endpoint, which drives its own input
//! channel and reports a structured outcome. The engine never inspects the
//! agent's reasoning; it sees success/failure, steps taken, and timing.
//!
//! # Configuration
//!
//! Client settings can be configured via environment variables:
//! - `GAME_VISION_CUA_ENDPOINT`: API endpoint URL
//! - `GAME_VISION_CUA_MODEL`: model name
//! - `GAME_VISION_CUA_MAX_STEPS`: max agent steps per delegated action
//! - `GAME_VISION_CUA_TIMEOUT`: activity timeout (seconds)
//! - `GAME_VISION_CUA_CONNECT_TIMEOUT`: connection timeout (seconds)

use base64::Engine;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config;

/// Result type for agent operations
pub type CuaResult<T> = Result<T, CuaError>;

/// Errors that can occur while driving the computer-use agent
#[derive(Debug)]
pub enum CuaError {
    /// Failed to connect to the agent endpoint
    ConnectionFailed(String),
    /// The agent produced no result within the activity timeout
    ActivityTimeout(Duration),
    /// The agent returned a malformed outcome
    InvalidResponse(String),
    /// The client was used before `initialize`
    NotInitialized,
    /// IO error
    Io(std::io::Error),
}

impl std::fmt::Display for CuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CuaError::ConnectionFailed(msg) => write!(f, "agent connection failed: {}", msg),
            CuaError::ActivityTimeout(d) => write!(f, "agent timed out after {:?}", d),
            CuaError::InvalidResponse(msg) => write!(f, "invalid agent response: {}", msg),
            CuaError::NotInitialized => write!(f, "agent client used before initialization"),
            CuaError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for CuaError {}

impl From<std::io::Error> for CuaError {
    fn from(e: std::io::Error) -> Self {
        CuaError::Io(e)
    }
}

/// Structured outcome of one delegated step
#[derive(Debug, Clone)]
pub struct CuaOutcome {
    /// Whether the agent accomplished the goal
    pub success: bool,
    /// Input steps the agent performed
    pub steps_taken: u32,
    /// Optional free-text detail from the agent
    pub detail: Option<String>,
}

/// Contract for the AI computer-use collaborator.
///
/// `initialize` is called once by the service container, and only when the
/// spec actually requests AI fallback; `perform` executes one
/// natural-language goal against the current visual state.
#[async_trait]
pub trait ComputerUseAgent: Send + Sync {
    /// Prepare the agent for this run. Requires an active session.
    async fn initialize(&self, model: &str, max_steps: u32) -> CuaResult<()>;

    /// Accomplish `goal`, starting from the supplied PNG screenshot
    async fn perform(&self, goal: &str, screenshot: &[u8]) -> CuaResult<CuaOutcome>;
}

// ============================================================================
// HTTP Client
// ============================================================================

/// Configuration for the default agent client
#[derive(Debug, Clone)]
pub struct CuaClientConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Timeout for the initial connection (seconds)
    pub connection_timeout: u64,
    /// Timeout for waiting on the agent's outcome (seconds)
    pub activity_timeout: u64,
}

impl Default for CuaClientConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.cua.endpoint.clone(),
            connection_timeout: cfg.cua.connect_timeout,
            activity_timeout: cfg.cua.activity_timeout,
        }
    }
}

impl CuaClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn activity_timeout(mut self, seconds: u64) -> Self {
        self.activity_timeout = seconds;
        self
    }
}

/// Default agent client speaking JSON-over-HTTP through curl
#[derive(Debug)]
pub struct CuaClient {
    client_config: CuaClientConfig,
    settings: Mutex<Option<(String, u32)>>,
}

impl CuaClient {
    pub fn new(client_config: CuaClientConfig) -> Self {
        Self {
            client_config,
            settings: Mutex::new(None),
        }
    }

    fn settings(&self) -> CuaResult<(String, u32)> {
        self.settings
            .lock()
            .unwrap()
            .clone()
            .ok_or(CuaError::NotInitialized)
    }
}

#[async_trait]
impl ComputerUseAgent for CuaClient {
    async fn initialize(&self, model: &str, max_steps: u32) -> CuaResult<()> {
        let reachable =
            check_health(&self.client_config.endpoint, self.client_config.connection_timeout)
                .await?;
        if !reachable {
            return Err(CuaError::ConnectionFailed(format!(
                "no response from {}",
                self.client_config.endpoint
            )));
        }
        *self.settings.lock().unwrap() = Some((model.to_string(), max_steps));
        Ok(())
    }

    async fn perform(&self, goal: &str, screenshot: &[u8]) -> CuaResult<CuaOutcome> {
        let (model, max_steps) = self.settings()?;
        let img_base64 = base64::engine::general_purpose::STANDARD.encode(screenshot);

        let request = serde_json::json!({
            "model": model,
            "goal": goal,
            "max_steps": max_steps,
            "screenshot": format!("data:image/png;base64,{}", img_base64),
        });
        let request_json = serde_json::to_string(&request)
            .map_err(|e| CuaError::InvalidResponse(e.to_string()))?;

        let output = Command::new("curl")
            .args([
                "-s",
                "-X", "POST",
                &self.client_config.endpoint,
                "-H", "Content-Type: application/json",
                "-d", &request_json,
                "--connect-timeout", &self.client_config.connection_timeout.to_string(),
                "--max-time", &self.client_config.activity_timeout.to_string(),
            ])
            .output()
            .await?;

        if !output.status.success() {
            // curl exit 28 is a hit of --max-time
            if output.status.code() == Some(28) {
                return Err(CuaError::ActivityTimeout(Duration::from_secs(
                    self.client_config.activity_timeout,
                )));
            }
            return Err(CuaError::ConnectionFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let response: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| CuaError::InvalidResponse(e.to_string()))?;

        let success = response["success"]
            .as_bool()
            .ok_or_else(|| CuaError::InvalidResponse("missing 'success' field".to_string()))?;
        let steps_taken = response["steps"].as_u64().unwrap_or(0) as u32;
        let detail = response["detail"].as_str().map(|s| s.to_string());

        Ok(CuaOutcome {
            success,
            steps_taken,
            detail,
        })
    }
}

/// Check if an agent endpoint is reachable (connection-only check).
///
/// Only verifies the server accepts connections; a delegated step can take
/// far longer than any health-check budget, so no full round trip here.
pub async fn check_health(endpoint: &str, timeout_secs: u64) -> CuaResult<bool> {
    let url = endpoint
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host_port = url.split('/').next().unwrap_or("127.0.0.1:8090");

    let output = Command::new("curl")
        .args([
            "-s",
            "-o", "/dev/null",
            "-w", "%{http_code}",
            "--connect-timeout", &timeout_secs.to_string(),
            "--max-time", &timeout_secs.to_string(),
            "-I",
            &format!("http://{}", host_port),
        ])
        .output()
        .await?;

    let status = String::from_utf8_lossy(&output.stdout);
    // Any HTTP status means the server is reachable; 000 means the
    // connection itself failed
    let code: u16 = status.trim().parse().unwrap_or(0);
    Ok(code > 0)
}

// ============================================================================
// Mock Agent
// ============================================================================

/// A scripted agent for dry runs and tests
#[derive(Debug, Default)]
pub struct MockAgent {
    /// Fail `initialize` to exercise graceful degradation
    pub fail_initialization: bool,
    /// Goals the agent should report as failed
    failing_goals: Mutex<Vec<String>>,
    performed: Mutex<Vec<String>>,
    initialized: Mutex<bool>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_initialization() -> Self {
        Self {
            fail_initialization: true,
            ..Self::default()
        }
    }

    /// Script goals containing `fragment` to fail
    pub fn fail_goals_containing(&self, fragment: &str) {
        self.failing_goals.lock().unwrap().push(fragment.to_string());
    }

    /// Goals performed so far, in order
    pub fn performed_goals(&self) -> Vec<String> {
        self.performed.lock().unwrap().clone()
    }

    /// Whether `initialize` was ever called
    pub fn was_initialized(&self) -> bool {
        *self.initialized.lock().unwrap()
    }
}

#[async_trait]
impl ComputerUseAgent for MockAgent {
    async fn initialize(&self, _model: &str, _max_steps: u32) -> CuaResult<()> {
        if self.fail_initialization {
            return Err(CuaError::ConnectionFailed(
                "scripted initialization failure".to_string(),
            ));
        }
        *self.initialized.lock().unwrap() = true;
        Ok(())
    }

    async fn perform(&self, goal: &str, _screenshot: &[u8]) -> CuaResult<CuaOutcome> {
        self.performed.lock().unwrap().push(goal.to_string());
        let failing = self
            .failing_goals
            .lock()
            .unwrap()
            .iter()
            .any(|fragment| goal.contains(fragment));
        Ok(CuaOutcome {
            success: !failing,
            steps_taken: 1,
            detail: failing.then(|| "scripted goal failure".to_string()),
        })
    }
}
