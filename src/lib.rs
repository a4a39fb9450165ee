//! Game Vision - Automated behavioral testing for interactive web games.
//!
//! This crate provides:
//! - Declarative test specs: typed step sequences with timeouts and retry
//!   budgets, validated with aggregated errors and non-fatal warnings
//! - A capability-indexed action registry with hybrid DOM/AI dispatch
//! - A sequential execution orchestrator with action-level and run-level
//!   exponential-backoff retry
//! - A crash-tolerant incremental result writer for live dashboards
//! - A service container with conditional computer-use agent wiring
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use game_vision::{MockCapture, MockSession, RunSession, ServiceContainer, validate_str};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let validated = validate_str(r#"{ "sequence": [{ "action": "screenshot" }] }"#)?;
//!
//! let artifacts = Arc::new(RunSession::with_name("demo"));
//! artifacts.init()?;
//!
//! let container = ServiceContainer::new(
//!     Arc::new(MockSession::new()),
//!     Arc::new(MockCapture::default()),
//! );
//! let orchestrator = container.build(validated.spec, artifacts).await?;
//! let result = orchestrator.run().await?;
//! println!("success: {}", result.success);
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod capture;
pub mod config;
pub mod container;
pub mod cua;
pub mod orchestrator;
pub mod results;
pub mod retry;
pub mod session;
pub mod spec;

// Re-export spec types and validation
pub use spec::{ConfigValidationError, Step, TestSpec, Timeouts, Validated, validate, validate_str};

// Re-export action contracts and registry
pub use actions::{
    Action, ActionError, ActionOutcome, ActionRegistry, ExecutionContext, default_registry,
    select_method,
};

// Re-export the orchestrator and container
pub use container::ServiceContainer;
pub use orchestrator::{EngineError, EngineResult, Orchestrator};

// Re-export result model and writer
pub use results::{
    ActionMethods, ActionTiming, EvaluationStep, ExecutionMethod, ResultWriter, TestResult,
};

// Re-export retry engine
pub use retry::{RetryOptions, is_retryable_error, retry_transient, retry_with_backoff};

// Re-export collaborator contracts and doubles
pub use capture::{CaptureResult, CaptureSource, MockCapture};
pub use cua::{ComputerUseAgent, CuaClient, CuaClientConfig, CuaError, CuaOutcome, MockAgent};
pub use session::{
    GameSession, MockSession, RunSession, SessionError, cleanup_old_runs, list_runs,
};
