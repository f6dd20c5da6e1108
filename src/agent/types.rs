//! Turn-level data model
//!
//! A [`Request`] enters the pipeline, the agent loop appends one
//! [`ToolCall`] per external invocation, and the completed cycle is an
//! [`AgentTurn`], owned by the agent while running and by the session
//! store once persisted. All of it serializes so turns survive persistence.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::agent::tools::{ToolArgs, ToolOutput};

/// One natural-language request. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Free-text prompt.
    pub prompt: String,
    /// Requesting identity (user or channel id).
    pub user_id: String,
    /// Optional structured parameters (e.g. a ticker symbol).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Request {
    pub fn new(prompt: &str, user_id: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            user_id: user_id.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }
}

/// Outcome of one capability invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(ToolOutput),
    Failed {
        detail: String,
        /// True when the call hit its per-call timeout.
        #[serde(default)]
        timed_out: bool,
    },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn output(&self) -> Option<&ToolOutput> {
        match self {
            Self::Success(output) => Some(output),
            Self::Failed { .. } => None,
        }
    }
}

fn args_value(args: &ToolArgs) -> Value {
    serde_json::to_value(args).unwrap_or_default()
}

/// Record of one capability invocation. Created by the agent loop, one per
/// external call, never mutated after completion.
///
/// `args` holds the JSON form of the dispatched [`ToolArgs`], or the raw
/// planner output when the call was rejected before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Capability name ("search", "finance", "knowledge", "message").
    pub tool: String,
    /// Arguments as dispatched (or as planned, for rejected calls).
    pub args: Value,
    /// Result payload or failure detail.
    pub outcome: ToolOutcome,
    /// Wall-clock execution time.
    pub duration_ms: u64,
}

impl ToolCall {
    pub fn succeeded(tool: &str, args: &ToolArgs, output: ToolOutput, duration_ms: u64) -> Self {
        Self {
            tool: tool.to_string(),
            args: args_value(args),
            outcome: ToolOutcome::Success(output),
            duration_ms,
        }
    }

    pub fn failed(tool: &str, args: &ToolArgs, detail: String, duration_ms: u64) -> Self {
        Self {
            tool: tool.to_string(),
            args: args_value(args),
            outcome: ToolOutcome::Failed { detail, timed_out: false },
            duration_ms,
        }
    }

    pub fn timed_out(tool: &str, args: &ToolArgs, duration_ms: u64) -> Self {
        Self {
            tool: tool.to_string(),
            args: args_value(args),
            outcome: ToolOutcome::Failed {
                detail: "timed out".to_string(),
                timed_out: true,
            },
            duration_ms,
        }
    }

    /// A call rejected before dispatch (unknown tool, wrong argument
    /// variant, invalid arguments). Permanent, no execution time.
    pub fn rejected(tool: &str, raw_args: Value, detail: String) -> Self {
        Self {
            tool: tool.to_string(),
            args: raw_args,
            outcome: ToolOutcome::Failed { detail, timed_out: false },
            duration_ms: 0,
        }
    }
}

/// Phases of one agent turn. The loop is a bounded state machine; there is
/// no path that re-enters Planning past the round cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Planning,
    ToolDispatch,
    Synthesizing,
    Done,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::ToolDispatch => "tool_dispatch",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
        }
    }
}

/// One completed request/response cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTurn {
    pub request: Request,
    /// Every external call made during the turn, in dispatch order.
    pub calls: Vec<ToolCall>,
    /// Final answer, already bounded by the output formatter.
    pub answer: String,
    /// True when the round cap was hit without a stop condition, or a
    /// degradation forced a best-effort answer.
    pub incomplete: bool,
    /// Surfaced degradations (failed tools, failed team stages) for caller
    /// logging. Never silently swallowed.
    pub errors: Vec<String>,
    /// Unix timestamp, milliseconds.
    pub created_at: i64,
}

impl AgentTurn {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            calls: Vec::new(),
            answer: String::new(),
            incomplete: false,
            errors: Vec::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Failed calls recorded during the turn.
    pub fn failed_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.calls.iter().filter(|c| !c.outcome.is_success())
    }

    /// Successful outputs, in dispatch order.
    pub fn successful_outputs(&self) -> impl Iterator<Item = (&str, &ToolOutput)> {
        self.calls
            .iter()
            .filter_map(|c| c.outcome.output().map(|o| (c.tool.as_str(), o)))
    }
}
