//! Test specification model and validation.
//!
//! A test spec is a declarative JSON document: an ordered sequence of typed
//! steps plus timeouts and retry budgets. Validation happens in two passes:
//! - structural: the raw document is walked field by field, collecting every
//!   issue instead of stopping at the first, rejecting unknown step shapes
//!   and unknown fields outright
//! - semantic: runs after structural parsing and produces fatal errors and
//!   non-fatal warnings; warnings are surfaced to the caller but never abort
//!   loading
//!
//! Defaults are applied only for absent fields. A field that is present but
//! invalid is a hard error, never silently replaced. The `timeouts` object
//! merges key-by-key with its defaults; scalar fields are wholly replaced.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config;

// ============================================================================
// Defaults and Bounds
// ============================================================================

/// Default run-level retry budget
pub const DEFAULT_RETRIES: u32 = 3;

/// Default action-level retry budget
pub const DEFAULT_ACTION_RETRIES: u32 = 2;

/// Upper bound for both retry budgets, to prevent unbounded backoff storms
pub const MAX_RETRIES: u32 = 10;

/// Default page/game load timeout (milliseconds)
pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 30_000;

/// Default single-action timeout (milliseconds)
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 10_000;

/// Default whole-run timeout (milliseconds)
pub const DEFAULT_TOTAL_TIMEOUT_MS: u64 = 45_000;

// ============================================================================
// Data Model
// ============================================================================

/// One entry in a test's declarative action sequence.
///
/// The identifier in the raw document's `action` field selects the variant;
/// interactive variants may carry a `useCUA` flag requesting AI-fallback
/// execution for that step only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Step {
    /// Locate and activate a target element
    Click {
        target: String,
        #[serde(rename = "useCUA", default)]
        use_cua: bool,
    },

    /// Dispatch a key, optionally repeated
    Press {
        key: String,
        #[serde(default = "default_repeat")]
        repeat: u32,
        #[serde(rename = "useCUA", default)]
        use_cua: bool,
    },

    /// Capture the current visual state
    Screenshot,

    /// Pure delay for a specified duration
    Wait {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },

    /// Query current state without mutating it; with `gate` set, a failed
    /// observation aborts the remaining sequence
    Observe {
        target: String,
        #[serde(default)]
        gate: bool,
    },

    /// Continuous/analog input, held for an optional duration
    Axis {
        axis: String,
        value: f64,
        #[serde(rename = "durationMs", default)]
        duration_ms: u64,
        #[serde(rename = "useCUA", default)]
        use_cua: bool,
    },

    /// Delegate the entire step to the computer-use agent
    Agent { goal: String },
}

fn default_repeat() -> u32 {
    1
}

impl Step {
    /// Stable action-type identifier, matching the registry's default set
    pub fn action_type(&self) -> &'static str {
        match self {
            Step::Click { .. } => "click",
            Step::Press { .. } => "press",
            Step::Screenshot => "screenshot",
            Step::Wait { .. } => "wait",
            Step::Observe { .. } => "observe",
            Step::Axis { .. } => "axis",
            Step::Agent { .. } => "agent",
        }
    }

    /// Whether this step explicitly requests AI-fallback execution
    pub fn requests_cua(&self) -> bool {
        match self {
            Step::Click { use_cua, .. }
            | Step::Press { use_cua, .. }
            | Step::Axis { use_cua, .. } => *use_cua,
            Step::Agent { .. } => true,
            _ => false,
        }
    }

    /// Whether a global `alwaysCUA` force covers this step type
    pub fn global_cua_eligible(&self) -> bool {
        matches!(self, Step::Click { .. } | Step::Agent { .. })
    }

    /// Whether a fatal failure of this step aborts the remaining sequence
    pub fn aborts_on_failure(&self) -> bool {
        matches!(self, Step::Observe { gate: true, .. })
    }
}

/// Timeout budgets in milliseconds, all positive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Page/game load budget
    pub load: u64,
    /// Single step attempt budget
    pub action: u64,
    /// Whole-run budget
    pub total: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            load: DEFAULT_LOAD_TIMEOUT_MS,
            action: DEFAULT_ACTION_TIMEOUT_MS,
            total: DEFAULT_TOTAL_TIMEOUT_MS,
        }
    }
}

/// A validated test specification, immutable for the rest of the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Ordered action sequence, never empty
    pub sequence: Vec<Step>,

    /// Timeout budgets
    pub timeouts: Timeouts,

    /// Run-level retry budget (0-10)
    pub retries: u32,

    /// Action-level retry budget (0-10)
    #[serde(rename = "actionRetries")]
    pub action_retries: u32,

    /// Force AI fallback for every eligible step
    #[serde(rename = "alwaysCUA")]
    pub always_cua: bool,

    /// Model name for the computer-use agent
    #[serde(rename = "cuaModel")]
    pub cua_model: String,

    /// Maximum agent steps per delegated action
    #[serde(rename = "cuaMaxSteps")]
    pub cua_max_steps: u32,
}

impl TestSpec {
    /// Whether any part of this spec requires the computer-use agent.
    ///
    /// Scans per-step flags and `agent` steps, not just the global force.
    pub fn needs_computer_use(&self) -> bool {
        self.sequence.iter().any(|step| step.requests_cua())
            || (self.always_cua && self.sequence.iter().any(|s| s.global_cua_eligible()))
    }
}

/// A validated spec together with the non-fatal warnings the semantic pass
/// produced for it
#[derive(Debug, Clone)]
pub struct Validated {
    pub spec: TestSpec,
    pub warnings: Vec<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Aggregated fatal validation issues
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Every fatal issue found, each naming the offending field
    pub issues: Vec<String>,
}

impl ConfigValidationError {
    pub fn new(issues: Vec<String>) -> Self {
        Self { issues }
    }
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid test spec: {}", self.issues.join("; "))
    }
}

impl std::error::Error for ConfigValidationError {}

// ============================================================================
// Validation
// ============================================================================

/// Parse and validate a raw JSON string into a [`TestSpec`]
pub fn validate_str(raw: &str) -> Result<Validated, ConfigValidationError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ConfigValidationError::new(vec![format!("not valid JSON: {}", e)]))?;
    validate(&value)
}

/// Validate a raw JSON document into a [`TestSpec`], collecting every issue.
///
/// Fatal issues from the structural walk and the semantic pass aggregate into
/// one [`ConfigValidationError`]; warnings ride along on the [`Validated`]
/// result and never abort loading.
pub fn validate(raw: &Value) -> Result<Validated, ConfigValidationError> {
    let mut issues = Vec::new();

    let Some(obj) = raw.as_object() else {
        return Err(ConfigValidationError::new(vec![
            "top level: must be a JSON object".to_string(),
        ]));
    };

    const KNOWN_FIELDS: &[&str] = &[
        "sequence",
        "timeouts",
        "retries",
        "actionRetries",
        "alwaysCUA",
        "cuaModel",
        "cuaMaxSteps",
    ];
    for key in obj.keys() {
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            issues.push(format!("unknown field '{}'", key));
        }
    }

    let sequence = match obj.get("sequence") {
        Some(Value::Array(items)) => {
            let mut steps = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                if let Some(step) = parse_step(index, item, &mut issues) {
                    steps.push(step);
                }
            }
            if items.is_empty() {
                issues.push("sequence: must contain at least one step".to_string());
            }
            steps
        }
        Some(other) => {
            issues.push(format!("sequence: must be an array (got {})", type_name(other)));
            Vec::new()
        }
        None => {
            issues.push("sequence: required".to_string());
            Vec::new()
        }
    };

    let timeouts = parse_timeouts(obj.get("timeouts"), &mut issues);

    let retries = parse_bounded_u32(obj, "retries", DEFAULT_RETRIES, &mut issues);
    let action_retries = parse_bounded_u32(obj, "actionRetries", DEFAULT_ACTION_RETRIES, &mut issues);

    let always_cua = match obj.get("alwaysCUA") {
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            issues.push(format!("alwaysCUA: must be a boolean (got {})", type_name(other)));
            false
        }
        None => false,
    };

    let cua_model = match obj.get("cuaModel") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::String(_)) => {
            issues.push("cuaModel: must not be empty".to_string());
            String::new()
        }
        Some(other) => {
            issues.push(format!("cuaModel: must be a string (got {})", type_name(other)));
            String::new()
        }
        None => config::cua_model(),
    };

    let cua_max_steps = match obj.get("cuaMaxSteps") {
        Some(value) => match positive_u64(value) {
            Some(n) if n <= u32::MAX as u64 => n as u32,
            _ => {
                issues.push(format!("cuaMaxSteps: must be a positive integer (got {})", value));
                0
            }
        },
        None => config::get().cua.max_steps,
    };

    let spec = TestSpec {
        sequence,
        timeouts,
        retries,
        action_retries,
        always_cua,
        cua_model,
        cua_max_steps,
    };

    let (semantic_errors, warnings) = semantic_check(&spec);
    issues.extend(semantic_errors);

    if issues.is_empty() {
        Ok(Validated { spec, warnings })
    } else {
        Err(ConfigValidationError::new(issues))
    }
}

/// Parse one step object, pushing issues for unknown shapes or bad fields
fn parse_step(index: usize, value: &Value, issues: &mut Vec<String>) -> Option<Step> {
    let at = |field: &str| format!("sequence[{}].{}", index, field);

    let Some(obj) = value.as_object() else {
        issues.push(format!("sequence[{}]: must be an object", index));
        return None;
    };

    let Some(action) = obj.get("action").and_then(Value::as_str) else {
        issues.push(format!("sequence[{}].action: required", index));
        return None;
    };

    let known: &[&str] = match action {
        "click" => &["action", "target", "useCUA"],
        "press" => &["action", "key", "repeat", "useCUA"],
        "screenshot" => &["action"],
        "wait" => &["action", "durationMs"],
        "observe" => &["action", "target", "gate"],
        "axis" => &["action", "axis", "value", "durationMs", "useCUA"],
        "agent" => &["action", "goal"],
        other => {
            issues.push(format!("sequence[{}].action: unknown action '{}'", index, other));
            return None;
        }
    };
    for key in obj.keys() {
        if !known.contains(&key.as_str()) {
            issues.push(format!("{}: unknown field for action '{}'", at(key), action));
        }
    }

    let before = issues.len();
    let step = match action {
        "click" => Step::Click {
            target: require_string(obj, "target", &at, issues),
            use_cua: optional_bool(obj, "useCUA", &at, issues),
        },
        "press" => Step::Press {
            key: require_string(obj, "key", &at, issues),
            repeat: match obj.get("repeat") {
                Some(value) => match positive_u64(value) {
                    Some(n) if n <= u32::MAX as u64 => n as u32,
                    _ => {
                        issues.push(format!("{}: must be a positive integer (got {})", at("repeat"), value));
                        0
                    }
                },
                None => 1,
            },
            use_cua: optional_bool(obj, "useCUA", &at, issues),
        },
        "screenshot" => Step::Screenshot,
        "wait" => Step::Wait {
            duration_ms: require_positive(obj, "durationMs", &at, issues),
        },
        "observe" => Step::Observe {
            target: require_string(obj, "target", &at, issues),
            gate: optional_bool(obj, "gate", &at, issues),
        },
        "axis" => Step::Axis {
            axis: require_string(obj, "axis", &at, issues),
            value: match obj.get("value") {
                Some(value) => match value.as_f64() {
                    Some(v) => v,
                    None => {
                        issues.push(format!("{}: must be a number (got {})", at("value"), value));
                        0.0
                    }
                },
                None => {
                    issues.push(format!("{}: required", at("value")));
                    0.0
                }
            },
            duration_ms: match obj.get("durationMs") {
                Some(value) => match positive_u64(value) {
                    Some(n) => n,
                    None => {
                        issues.push(format!("{}: must be a positive integer (got {})", at("durationMs"), value));
                        0
                    }
                },
                None => 0,
            },
            use_cua: optional_bool(obj, "useCUA", &at, issues),
        },
        "agent" => Step::Agent {
            goal: require_string(obj, "goal", &at, issues),
        },
        _ => unreachable!(),
    };

    (issues.len() == before).then_some(step)
}

/// Merge the `timeouts` object key-by-key with the defaults
fn parse_timeouts(value: Option<&Value>, issues: &mut Vec<String>) -> Timeouts {
    let mut timeouts = Timeouts::default();

    let Some(value) = value else {
        return timeouts;
    };
    let Some(obj) = value.as_object() else {
        issues.push(format!("timeouts: must be an object (got {})", type_name(value)));
        return timeouts;
    };

    for (key, raw) in obj {
        let slot = match key.as_str() {
            "load" => &mut timeouts.load,
            "action" => &mut timeouts.action,
            "total" => &mut timeouts.total,
            other => {
                issues.push(format!("timeouts.{}: unknown field", other));
                continue;
            }
        };
        match positive_u64(raw) {
            Some(ms) => *slot = ms,
            None => issues.push(format!(
                "timeouts.{}: must be a positive integer (got {})",
                key, raw
            )),
        }
    }

    timeouts
}

/// Semantic pass: fatal errors plus non-fatal warnings, run after the
/// structural walk so it sees typed steps
fn semantic_check(spec: &TestSpec) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (index, step) in spec.sequence.iter().enumerate() {
        match step {
            Step::Click { target, .. } | Step::Observe { target, .. } if target.is_empty() => {
                errors.push(format!("sequence[{}].target: must not be empty", index));
            }
            Step::Press { key, .. } if key.is_empty() => {
                errors.push(format!("sequence[{}].key: must not be empty", index));
            }
            Step::Agent { goal } if goal.is_empty() => {
                errors.push(format!("sequence[{}].goal: must not be empty", index));
            }
            Step::Axis { axis, .. } if axis.is_empty() => {
                errors.push(format!("sequence[{}].axis: must not be empty", index));
            }
            Step::Wait { duration_ms } if *duration_ms > spec.timeouts.total => {
                warnings.push(format!(
                    "sequence[{}]: wait of {}ms exceeds the total budget of {}ms",
                    index, duration_ms, spec.timeouts.total
                ));
            }
            _ => {}
        }
    }

    if spec.always_cua && !spec.sequence.iter().any(|s| s.global_cua_eligible()) {
        warnings.push("alwaysCUA is set but the sequence has no CUA-eligible steps".to_string());
    }

    (errors, warnings)
}

// ============================================================================
// Field Helpers
// ============================================================================

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A strictly positive integer, rejecting floats and negatives
fn positive_u64(value: &Value) -> Option<u64> {
    value.as_u64().filter(|n| *n > 0)
}

fn require_string(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    at: &dyn Fn(&str) -> String,
    issues: &mut Vec<String>,
) -> String {
    match obj.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            issues.push(format!("{}: must be a string (got {})", at(field), type_name(other)));
            String::new()
        }
        None => {
            issues.push(format!("{}: required", at(field)));
            String::new()
        }
    }
}

fn require_positive(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    at: &dyn Fn(&str) -> String,
    issues: &mut Vec<String>,
) -> u64 {
    match obj.get(field) {
        Some(value) => match positive_u64(value) {
            Some(n) => n,
            None => {
                issues.push(format!("{}: must be a positive integer (got {})", at(field), value));
                0
            }
        },
        None => {
            issues.push(format!("{}: required", at(field)));
            0
        }
    }
}

fn optional_bool(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    at: &dyn Fn(&str) -> String,
    issues: &mut Vec<String>,
) -> bool {
    match obj.get(field) {
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            issues.push(format!("{}: must be a boolean (got {})", at(field), type_name(other)));
            false
        }
        None => false,
    }
}

/// Bounded retry budget: 0 to [`MAX_RETRIES`], default when absent
fn parse_bounded_u32(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    default: u32,
    issues: &mut Vec<String>,
) -> u32 {
    match obj.get(field) {
        Some(value) => match value.as_u64() {
            Some(n) if n <= MAX_RETRIES as u64 => n as u32,
            _ => {
                issues.push(format!(
                    "{}: must be between 0 and {} (got {})",
                    field, MAX_RETRIES, value
                ));
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_applied_when_absent() {
        let raw = json!({ "sequence": [{ "action": "screenshot" }] });
        let validated = validate(&raw).expect("minimal spec should validate");
        let spec = validated.spec;
        assert_eq!(spec.retries, DEFAULT_RETRIES);
        assert_eq!(spec.action_retries, DEFAULT_ACTION_RETRIES);
        assert_eq!(spec.timeouts.total, DEFAULT_TOTAL_TIMEOUT_MS);
        assert_eq!(spec.timeouts.load, DEFAULT_LOAD_TIMEOUT_MS);
        assert!(!spec.always_cua);
        assert!(validated.warnings.is_empty());
    }

    #[test]
    fn test_timeouts_merge_key_by_key() {
        let raw = json!({
            "sequence": [{ "action": "screenshot" }],
            "timeouts": { "load": 5000 }
        });
        let spec = validate(&raw).unwrap().spec;
        assert_eq!(spec.timeouts.load, 5000);
        assert_eq!(spec.timeouts.action, DEFAULT_ACTION_TIMEOUT_MS);
        assert_eq!(spec.timeouts.total, DEFAULT_TOTAL_TIMEOUT_MS);
    }

    #[test]
    fn test_retries_out_of_bounds() {
        let raw = json!({
            "sequence": [{ "action": "screenshot" }],
            "retries": 11
        });
        let err = validate(&raw).unwrap_err();
        assert!(err.issues.iter().any(|i| i.contains("retries")), "{:?}", err.issues);
    }

    #[test]
    fn test_negative_timeout_is_hard_error() {
        let raw = json!({
            "sequence": [{ "action": "screenshot" }],
            "timeouts": { "load": -5 }
        });
        let err = validate(&raw).unwrap_err();
        assert!(err.issues.iter().any(|i| i.contains("timeouts.load")), "{:?}", err.issues);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let raw = json!({ "sequence": [{ "action": "teleport" }] });
        let err = validate(&raw).unwrap_err();
        assert!(err.issues.iter().any(|i| i.contains("unknown action 'teleport'")));
    }

    #[test]
    fn test_unknown_step_field_rejected() {
        let raw = json!({
            "sequence": [{ "action": "click", "target": "start", "selektor": "#x" }]
        });
        let err = validate(&raw).unwrap_err();
        assert!(err.issues.iter().any(|i| i.contains("selektor")));
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let raw = json!({ "sequence": [] });
        let err = validate(&raw).unwrap_err();
        assert!(err.issues.iter().any(|i| i.contains("at least one step")));
    }

    #[test]
    fn test_issues_aggregate() {
        let raw = json!({
            "sequence": [{ "action": "teleport" }, { "action": "wait" }],
            "retries": 99,
            "bogus": true
        });
        let err = validate(&raw).unwrap_err();
        assert!(err.issues.len() >= 4, "expected aggregation, got {:?}", err.issues);
    }

    #[test]
    fn test_warning_does_not_abort() {
        let raw = json!({
            "sequence": [{ "action": "wait", "durationMs": 60000 }],
            "timeouts": { "total": 1000 }
        });
        let validated = validate(&raw).expect("warnings must not abort loading");
        assert_eq!(validated.warnings.len(), 1);
        assert!(validated.warnings[0].contains("exceeds the total budget"));
    }

    #[test]
    fn test_always_cua_without_eligible_steps_warns() {
        let raw = json!({
            "sequence": [{ "action": "wait", "durationMs": 10 }],
            "alwaysCUA": true
        });
        let validated = validate(&raw).unwrap();
        assert!(validated.warnings.iter().any(|w| w.contains("alwaysCUA")));
    }

    #[test]
    fn test_needs_computer_use_sees_per_step_flags() {
        let raw = json!({
            "sequence": [
                { "action": "screenshot" },
                { "action": "click", "target": "start", "useCUA": true }
            ],
            "alwaysCUA": false
        });
        let spec = validate(&raw).unwrap().spec;
        assert!(spec.needs_computer_use());
    }

    #[test]
    fn test_needs_computer_use_false_for_plain_dom() {
        let raw = json!({
            "sequence": [
                { "action": "click", "target": "start" },
                { "action": "press", "key": "Space", "repeat": 3 }
            ]
        });
        let spec = validate(&raw).unwrap().spec;
        assert!(!spec.needs_computer_use());
    }

    #[test]
    fn test_step_round_trip() {
        let step = Step::Press {
            key: "ArrowUp".to_string(),
            repeat: 2,
            use_cua: false,
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["action"], "press");
        let back: Step = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }
}
