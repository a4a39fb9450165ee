//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for Game Vision, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults for local development
//! - Builder-free, section-per-concern layout
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `GAME_VISION_CUA_ENDPOINT` | Computer-use agent API endpoint URL | `http://127.0.0.1:8090/v1/computer-use` |
//! | `GAME_VISION_CUA_MODEL` | Model name for the computer-use agent | `cua-default` |
//! | `GAME_VISION_CUA_MAX_STEPS` | Maximum agent steps per delegated action | `15` |
//! | `GAME_VISION_CUA_TIMEOUT` | Agent activity timeout in seconds | `60` |
//! | `GAME_VISION_CUA_CONNECT_TIMEOUT` | Agent connection timeout in seconds | `10` |
//! | `GAME_VISION_RUN_DIR` | Base directory for run artifacts | `/tmp/game-vision` |
//!
//! # Example
//!
//! ```bash
//! # Point the engine at a different agent endpoint
//! export GAME_VISION_CUA_ENDPOINT="http://localhost:9000/v1/computer-use"
//! export GAME_VISION_CUA_MODEL="cua-large"
//!
//! # Use a custom run directory
//! export GAME_VISION_RUN_DIR="/var/tmp/game-vision-runs"
//! ```

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default computer-use agent API endpoint
pub const DEFAULT_CUA_ENDPOINT: &str = "http://127.0.0.1:8090/v1/computer-use";

/// Default computer-use agent model name
pub const DEFAULT_CUA_MODEL: &str = "cua-default";

/// Default maximum agent steps per delegated action
pub const DEFAULT_CUA_MAX_STEPS: u32 = 15;

/// Default agent connection timeout (seconds)
pub const DEFAULT_CUA_CONNECT_TIMEOUT: u64 = 10;

/// Default agent activity timeout (seconds)
pub const DEFAULT_CUA_ACTIVITY_TIMEOUT: u64 = 60;

/// Default base directory for run artifacts
pub const DEFAULT_RUN_DIR: &str = "/tmp/game-vision";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the agent endpoint
pub const ENV_CUA_ENDPOINT: &str = "GAME_VISION_CUA_ENDPOINT";

/// Environment variable for the agent model
pub const ENV_CUA_MODEL: &str = "GAME_VISION_CUA_MODEL";

/// Environment variable for max agent steps
pub const ENV_CUA_MAX_STEPS: &str = "GAME_VISION_CUA_MAX_STEPS";

/// Environment variable for the agent connection timeout
pub const ENV_CUA_CONNECT_TIMEOUT: &str = "GAME_VISION_CUA_CONNECT_TIMEOUT";

/// Environment variable for the agent activity timeout
pub const ENV_CUA_ACTIVITY_TIMEOUT: &str = "GAME_VISION_CUA_TIMEOUT";

/// Environment variable for the run artifact directory
pub const ENV_RUN_DIR: &str = "GAME_VISION_RUN_DIR";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for Game Vision
#[derive(Debug, Clone)]
pub struct Config {
    /// Computer-use agent configuration
    pub cua: CuaSettings,
    /// Run artifact configuration
    pub runs: RunSettings,
}

/// Computer-use agent settings
#[derive(Debug, Clone)]
pub struct CuaSettings {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Maximum agent steps per delegated action
    pub max_steps: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Activity timeout while waiting on the agent (seconds)
    pub activity_timeout: u64,
}

/// Run artifact settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Base directory for run artifact storage
    pub base_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            cua: CuaSettings::from_env(),
            runs: RunSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            cua: CuaSettings::defaults(),
            runs: RunSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl CuaSettings {
    /// Create agent settings from environment variables
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_CUA_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_CUA_ENDPOINT.to_string()),
            model: env::var(ENV_CUA_MODEL)
                .unwrap_or_else(|_| DEFAULT_CUA_MODEL.to_string()),
            max_steps: env::var(ENV_CUA_MAX_STEPS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CUA_MAX_STEPS),
            connect_timeout: env::var(ENV_CUA_CONNECT_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CUA_CONNECT_TIMEOUT),
            activity_timeout: env::var(ENV_CUA_ACTIVITY_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CUA_ACTIVITY_TIMEOUT),
        }
    }

    /// Create agent settings with defaults
    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_CUA_ENDPOINT.to_string(),
            model: DEFAULT_CUA_MODEL.to_string(),
            max_steps: DEFAULT_CUA_MAX_STEPS,
            connect_timeout: DEFAULT_CUA_CONNECT_TIMEOUT,
            activity_timeout: DEFAULT_CUA_ACTIVITY_TIMEOUT,
        }
    }
}

impl RunSettings {
    /// Create run settings from environment variables
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_RUN_DIR)
                .unwrap_or_else(|_| DEFAULT_RUN_DIR.to_string()),
        }
    }

    /// Create run settings with defaults
    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_RUN_DIR.to_string(),
        }
    }
}

// ============================================================================
// Convenience Accessors
// ============================================================================

/// Get the agent endpoint from the cached configuration
pub fn cua_endpoint() -> String {
    get().cua.endpoint.clone()
}

/// Get the agent model name from the cached configuration
pub fn cua_model() -> String {
    get().cua.model.clone()
}

/// Get the run artifact base directory from the cached configuration
pub fn run_base_dir() -> String {
    get().runs.base_dir.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.cua.endpoint, DEFAULT_CUA_ENDPOINT);
        assert_eq!(config.cua.model, DEFAULT_CUA_MODEL);
        assert_eq!(config.cua.max_steps, DEFAULT_CUA_MAX_STEPS);
        assert_eq!(config.runs.base_dir, DEFAULT_RUN_DIR);
    }

    #[test]
    fn test_cua_settings_defaults() {
        let cua = CuaSettings::defaults();
        assert_eq!(cua.connect_timeout, DEFAULT_CUA_CONNECT_TIMEOUT);
        assert_eq!(cua.activity_timeout, DEFAULT_CUA_ACTIVITY_TIMEOUT);
    }
}
