//! Configuration tree for the Minder host.
//!
//! Loaded from a TOML file; every field has a serde default so a missing
//! file (or a partial one) yields a fully usable configuration.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::usage::ModelPricing;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub delegate: DelegateConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Default IANA timezone for schedules created without one.
    #[serde(default = "d_utc")]
    pub timezone: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            delegate: DelegateConfig::default(),
            router: RouterConfig::default(),
            context: ContextConfig::default(),
            detector: DetectorConfig::default(),
            tools: ToolsConfig::default(),
            queue: QueueConfig::default(),
            server: ServerConfig::default(),
            paths: PathsConfig::default(),
            timezone: d_utc(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM tiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Model tier specs use the form `provider/model`, e.g.
/// `anthropic/claude-sonnet-4-20250514` or `openai/gpt-4o-mini`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Tier used by the agent loop itself.
    #[serde(default = "d_model_main")]
    pub model_main: String,
    /// Tier used by delegates and the summarizer.
    #[serde(default = "d_model_cheap")]
    pub model_cheap: String,
    /// Tier used by the capability router.
    #[serde(default = "d_model_router")]
    pub model_router: String,
    /// Per-model pricing for cost estimation (key = model name).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_main: d_model_main(),
            model_cheap: d_model_cheap(),
            model_router: d_model_router(),
            pricing: HashMap::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop budgets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum agent steps per job before it fails as exhausted.
    #[serde(default = "d_100")]
    pub max_steps: u32,
    /// Wall-clock budget per job, in seconds.
    #[serde(default = "d_1800")]
    pub max_wall_seconds: u64,
    /// Upper bound on tool calls dispatched from one assistant step.
    #[serde(default = "d_16")]
    pub max_tool_calls_per_step: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_wall_seconds: 1800,
            max_tool_calls_per_step: 16,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delegation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateConfig {
    /// Step budget for a `delegate` sub-agent.
    #[serde(default = "d_50")]
    pub max_steps: u32,
    /// Step budget for an `explore` sub-agent (read-only tools).
    #[serde(default = "d_15")]
    pub explore_max_steps: u32,
    /// Hard cap on successful delegate calls per conversation.
    #[serde(default = "d_25")]
    pub quota_per_conversation: u32,
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            explore_max_steps: 15,
            quota_per_conversation: 25,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// TTL (in agent steps) assigned on activation and renewal.
    #[serde(default = "d_5")]
    pub default_ttl: u32,
    /// Steps between routing LLM calls (1 = every step).
    #[serde(default = "d_1")]
    pub stride: u32,
    /// How many recent user-visible messages the routing prompt includes.
    #[serde(default = "d_6")]
    pub recent_messages: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_ttl: 5,
            stride: 1,
            recent_messages: 6,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for one completion request.
    #[serde(default = "d_200k")]
    pub max_tokens: u32,
    /// Fraction of the budget that triggers compression.
    #[serde(default = "d_compression_threshold")]
    pub compression_threshold: f64,
    /// Recent exchanges kept verbatim through compression.
    #[serde(default = "d_5us")]
    pub keep_recent: usize,
    /// Cap on the generated summary size.
    #[serde(default = "d_1000")]
    pub summary_max_tokens: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 200_000,
            compression_threshold: 0.7,
            keep_recent: 5,
            summary_max_tokens: 1000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop detector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thresholds for the no-progress detector. The detector only nudges; it
/// never terminates a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Rolling window of recent tool calls inspected for patterns.
    #[serde(default = "d_8us")]
    pub window: usize,
    /// Identical (tool, args) occurrences in the window that count as a
    /// repeat.
    #[serde(default = "d_3us")]
    pub repeat_threshold: usize,
    /// Consecutive steps with trivially unchanged assistant text that
    /// count as a stall.
    #[serde(default = "d_4us")]
    pub stall_threshold: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window: 8,
            repeat_threshold: 3,
            stall_threshold: 4,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Hard per-call timeout for every tool handler, in seconds.
    #[serde(default = "d_120")]
    pub timeout_seconds: u64,
    /// Shell commands matching any of these patterns are refused.
    #[serde(default = "d_denied_commands")]
    pub denied_commands: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            denied_commands: d_denied_commands(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue / server / paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Worker tasks draining the job queue.
    #[serde(default = "d_1us")]
    pub worker_count: usize,
    /// Queue depth that triggers a soft warning.
    #[serde(default = "d_50us")]
    pub warn_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            warn_depth: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: d_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// SQLite database path.
    #[serde(default = "d_db_path")]
    pub db_path: String,
    /// Root of the shared workspace used by file tools and delegates.
    #[serde(default = "d_workspace_dir")]
    pub workspace_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db_path: d_db_path(),
            workspace_dir: d_workspace_dir(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Parse a TOML document into a config. Unknown keys are ignored;
    /// missing keys take their defaults.
    pub fn from_toml(text: &str) -> crate::Result<Self> {
        toml::from_str(text).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Validate the config, returning every issue found. Issues at
    /// `Error` severity should abort startup.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut error = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        };

        for (field, spec) in [
            ("llm.model_main", &self.llm.model_main),
            ("llm.model_cheap", &self.llm.model_cheap),
            ("llm.model_router", &self.llm.model_router),
        ] {
            if !spec.contains('/') {
                error(field, format!("expected provider/model, got '{spec}'"));
            }
        }

        if self.agent.max_steps == 0 {
            error("agent.max_steps", "must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.context.compression_threshold)
            || self.context.compression_threshold == 0.0
        {
            error(
                "context.compression_threshold",
                format!("must be in (0, 1], got {}", self.context.compression_threshold),
            );
        }
        if self.context.keep_recent == 0 {
            error("context.keep_recent", "must be at least 1".into());
        }
        if self.queue.worker_count == 0 {
            error("queue.worker_count", "must be at least 1".into());
        }
        if self.delegate.quota_per_conversation == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "delegate.quota_per_conversation".into(),
                message: "zero quota disables delegation entirely".into(),
            });
        }

        issues
    }

    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues.iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_utc() -> String {
    "UTC".into()
}
fn d_model_main() -> String {
    "anthropic/claude-sonnet-4-20250514".into()
}
fn d_model_cheap() -> String {
    "anthropic/claude-3-5-haiku-20241022".into()
}
fn d_model_router() -> String {
    "anthropic/claude-3-5-haiku-20241022".into()
}
fn d_bind_addr() -> String {
    "127.0.0.1:7171".into()
}
fn d_db_path() -> String {
    "minder.db".into()
}
fn d_workspace_dir() -> String {
    "workspace".into()
}
fn d_denied_commands() -> Vec<String> {
    vec![
        r"^\s*rm\s+-rf\s+/\s*$".into(),
        r"mkfs".into(),
        r":\(\)\s*\{.*\};\s*:".into(),
    ]
}
fn d_compression_threshold() -> f64 {
    0.7
}
fn d_1() -> u32 {
    1
}
fn d_5() -> u32 {
    5
}
fn d_15() -> u32 {
    15
}
fn d_25() -> u32 {
    25
}
fn d_50() -> u32 {
    50
}
fn d_100() -> u32 {
    100
}
fn d_1000() -> u32 {
    1000
}
fn d_200k() -> u32 {
    200_000
}
fn d_120() -> u64 {
    120
}
fn d_1800() -> u64 {
    1800
}
fn d_16() -> usize {
    16
}
fn d_6() -> usize {
    6
}
fn d_3us() -> usize {
    3
}
fn d_4us() -> usize {
    4
}
fn d_8us() -> usize {
    8
}
fn d_1us() -> usize {
    1
}
fn d_5us() -> usize {
    5
}
fn d_50us() -> usize {
    50
}
