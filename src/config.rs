//! Configuration management
//!
//! Two layers:
//! - [`Settings`]: process-wide endpoints, credentials and paths from
//!   environment variables. A missing model credential is fatal at startup.
//! - [`PipelineConfig`]: agent and team records parsed from a TOML file.
//!   One configurable agent/team pair replaces per-front-end copies of the
//!   same construction code.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AgentError;
use crate::format::{Delivery, Markup};

/// Default per-call timeout for tools and knowledge queries, seconds.
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 20;

/// Default planning round cap. Hard bound on the reasoning loop.
const DEFAULT_MAX_ROUNDS: usize = 3;

/// Default answer bound, chars. Matches the tightest target platform limit.
const DEFAULT_MAX_OUTPUT_CHARS: usize = 2000;

/// Process-wide settings from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// OpenAI-compatible chat completions base URL.
    pub model_url: String,

    /// Bearer key for the model endpoint. Required.
    pub model_api_key: String,

    /// Model identifier sent with each completion request.
    pub model_name: String,

    /// Embedding provider base URL (Ollama-style API).
    pub embedding_url: String,

    /// Embedding model name.
    pub embedding_model: String,

    /// SQLite database path for the session store.
    pub db_path: PathBuf,

    /// Web search provider base URL.
    pub search_url: String,

    /// Financial data provider base URL.
    pub finance_url: String,

    /// Outbound message webhook URL (optional - messaging tool disabled
    /// without it).
    pub webhook_url: Option<String>,

    /// Per-call timeout for every tool and knowledge query.
    pub tool_timeout: Duration,
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// Fails with `AgentError::Configuration` when the model credential is
    /// missing; no partial operation without it.
    pub fn from_env() -> Result<Self, AgentError> {
        let model_api_key = std::env::var("MODEL_API_KEY").map_err(|_| {
            AgentError::Configuration("MODEL_API_KEY is not set".to_string())
        })?;

        let model_url = std::env::var("MODEL_URL")
            .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string());

        let model_name = std::env::var("MODEL_NAME")
            .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string());

        let embedding_url = std::env::var("EMBEDDING_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());

        let embedding_model = std::env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "nomic-embed-text".to_string());

        let db_path = std::env::var("AGENTPIPE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("agentpipe.db"));

        let search_url = std::env::var("SEARCH_API_URL")
            .unwrap_or_else(|_| "https://api.duckduckgo.com".to_string());

        let finance_url = std::env::var("FINANCE_API_URL")
            .unwrap_or_else(|_| "https://query1.finance.yahoo.com".to_string());

        let webhook_url = std::env::var("MESSAGE_WEBHOOK_URL").ok();

        let tool_timeout = std::env::var("AGENTPIPE_TOOL_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS));

        Ok(Self {
            model_url,
            model_api_key,
            model_name,
            embedding_url,
            embedding_model,
            db_path,
            search_url,
            finance_url,
            webhook_url,
            tool_timeout,
        })
    }
}

/// One agent record: which capabilities it carries and how it answers.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Role name, unique within the pipeline ("finance", "web_search", ...).
    pub role: String,

    /// Tool names this agent may dispatch to.
    #[serde(default)]
    pub tools: Vec<String>,

    /// Behavioral instructions folded into planning and synthesis prompts.
    #[serde(default)]
    pub instructions: Vec<String>,

    /// Knowledge sources (URLs) ingested for this agent at startup.
    #[serde(default)]
    pub knowledge_sources: Vec<String>,

    /// Hard cap on planning rounds per turn.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Answer bound in characters.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,

    /// Markup handling for the final answer.
    #[serde(default)]
    pub markup: Markup,

    /// Delivery mode for the final answer.
    #[serde(default)]
    pub delivery: Delivery,
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}

impl AgentConfig {
    /// A minimal general-purpose agent with the given role.
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            tools: Vec::new(),
            instructions: Vec::new(),
            knowledge_sources: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            markup: Markup::default(),
            delivery: Delivery::default(),
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_instructions(mut self, instructions: &[&str]) -> Self {
        self.instructions = instructions.iter().map(|i| i.to_string()).collect();
        self
    }

    pub fn with_knowledge_sources(mut self, sources: &[&str]) -> Self {
        self.knowledge_sources = sources.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_max_output_chars(mut self, max_output_chars: usize) -> Self {
        self.max_output_chars = max_output_chars;
        self
    }
}

/// One team stage: which agent role runs, with what stage instructions.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanEntryConfig {
    pub role: String,
    #[serde(default)]
    pub instructions: String,
}

/// Team configuration: fixed stage ordering is a design contract, not
/// inferred at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct TeamConfig {
    pub plan: Vec<PlanEntryConfig>,

    /// Instructions for the coordinator's own synthesis step.
    #[serde(default)]
    pub instructions: Vec<String>,
}

/// Full pipeline configuration parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default, rename = "agent")]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub team: Option<TeamConfig>,

    /// Recurring report: a prompt re-run on a timer, result pushed through
    /// the messaging tool.
    #[serde(default)]
    pub report: Option<ReportConfig>,
}

/// Recurring report task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    pub prompt: String,
    pub channel_id: String,
    /// Interval between runs, hours.
    #[serde(default = "default_report_hours")]
    pub every_hours: u64,
}

fn default_report_hours() -> u64 {
    24
}

impl PipelineConfig {
    /// Parse a TOML configuration string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, AgentError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| AgentError::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn load(path: &std::path::Path) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// A single general agent bound to the search tool. Used when no config
    /// file is present.
    pub fn default_single() -> Self {
        Self {
            agents: vec![AgentConfig::new("general")
                .with_tools(&["search"])
                .with_instructions(&["Always include sources"])],
            team: None,
            report: None,
        }
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.agents.is_empty() {
            return Err(AgentError::Configuration(
                "at least one [[agent]] record is required".to_string(),
            ));
        }

        for agent in &self.agents {
            if agent.max_rounds == 0 {
                return Err(AgentError::Configuration(format!(
                    "agent '{}': max_rounds must be at least 1",
                    agent.role
                )));
            }
        }

        if let Some(team) = &self.team {
            if team.plan.is_empty() {
                return Err(AgentError::Configuration(
                    "team.plan must list at least one stage".to_string(),
                ));
            }
            for entry in &team.plan {
                if !self.agents.iter().any(|a| a.role == entry.role) {
                    return Err(AgentError::Configuration(format!(
                        "team stage references unknown agent role '{}'",
                        entry.role
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[agent]]
role = "finance"
tools = ["finance"]
instructions = ["Use tables to display the data"]

[[agent]]
role = "web_search"
tools = ["search"]
instructions = ["Always include sources"]
max_rounds = 2
markup = "plain"
delivery = "streaming"

[team]
plan = [
    { role = "finance", instructions = "Get stock data first" },
    { role = "web_search", instructions = "Then find recent news" },
]
instructions = ["Always include sources", "Use tables to display the data"]
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].role, "finance");
        assert_eq!(config.agents[1].max_rounds, 2);
        assert_eq!(config.agents[1].markup, Markup::Plain);
        assert_eq!(config.agents[1].delivery, Delivery::Streaming);

        let team = config.team.unwrap();
        assert_eq!(team.plan.len(), 2);
        assert_eq!(team.plan[0].role, "finance");
        assert_eq!(team.plan[1].role, "web_search");
    }

    #[test]
    fn test_defaults_applied() {
        let config = PipelineConfig::from_toml_str("[[agent]]\nrole = \"general\"\n").unwrap();
        let agent = &config.agents[0];
        assert_eq!(agent.max_rounds, DEFAULT_MAX_ROUNDS);
        assert_eq!(agent.max_output_chars, DEFAULT_MAX_OUTPUT_CHARS);
        assert!(agent.tools.is_empty());
    }

    #[test]
    fn test_team_stage_must_reference_known_role() {
        let bad = r#"
[[agent]]
role = "finance"

[team]
plan = [{ role = "missing" }]
"#;
        let err = PipelineConfig::from_toml_str(bad).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_empty_agents_rejected() {
        assert!(PipelineConfig::from_toml_str("").is_err());
    }

    #[test]
    fn test_report_config() {
        let raw = r#"
[[agent]]
role = "general"

[report]
prompt = "Generate daily health trends report"
channel_id = "123456789012345678"
"#;
        let config = PipelineConfig::from_toml_str(raw).unwrap();
        let report = config.report.unwrap();
        assert_eq!(report.every_hours, 24);
        assert!(report.prompt.contains("daily"));
    }
}
