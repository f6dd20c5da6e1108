//! Error taxonomy for the pipeline.
//!
//! Only `Configuration` is allowed to terminate the process (fatal at
//! startup). Everything else degrades into the final answer: tool and
//! timeout failures are recorded on their ToolCall, ingestion failures
//! disable retrieval for the affected source only, formatting failures fall
//! back to raw truncation. Degradations are surfaced in `AgentTurn::errors`,
//! never silently swallowed.

/// Error types for pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Missing credentials or invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A tool invocation failed. `permanent` distinguishes rejected
    /// arguments (checked before dispatch) from transient provider errors.
    #[error("tool '{tool}' failed: {detail}")]
    ToolInvocation {
        tool: String,
        detail: String,
        permanent: bool,
    },

    /// A tool or knowledge query exceeded its per-call timeout.
    /// Treated as a tool-invocation failure by the agent loop.
    #[error("tool '{tool}' timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    /// Ingestion of a single knowledge source failed. Isolated per source.
    #[error("ingestion of '{source_id}' failed: {detail}")]
    Ingestion { source_id: String, detail: String },

    /// Output formatting failed on well-formed input. Callers fall back to
    /// raw char-safe truncation.
    #[error("formatting error: {0}")]
    Formatting(String),

    /// The model endpoint failed or returned an unusable response.
    #[error("model call failed: {0}")]
    Model(String),

    /// Session store I/O failure.
    #[error("session store error: {0}")]
    Session(String),
}

impl AgentError {
    /// Transient tool failure (network, provider error).
    pub fn tool_transient(tool: &str, detail: impl Into<String>) -> Self {
        Self::ToolInvocation {
            tool: tool.to_string(),
            detail: detail.into(),
            permanent: false,
        }
    }

    /// Permanent tool failure (invalid arguments, rejected before dispatch).
    pub fn tool_permanent(tool: &str, detail: impl Into<String>) -> Self {
        Self::ToolInvocation {
            tool: tool.to_string(),
            detail: detail.into(),
            permanent: true,
        }
    }

    /// Whether this error counts as a failed tool call (including timeouts).
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, Self::ToolInvocation { .. } | Self::Timeout { .. })
    }

    /// Whether the error may terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(AgentError::Configuration("no key".into()).is_fatal());
        assert!(!AgentError::tool_transient("search", "503").is_fatal());
        assert!(!AgentError::Timeout { tool: "search".into(), seconds: 20 }.is_fatal());
        assert!(!AgentError::Ingestion { source_id: "a.pdf".into(), detail: "404".into() }.is_fatal());
    }

    #[test]
    fn test_timeout_counts_as_tool_failure() {
        assert!(AgentError::Timeout { tool: "finance".into(), seconds: 20 }.is_tool_failure());
        assert!(AgentError::tool_permanent("search", "bad args").is_tool_failure());
        assert!(!AgentError::Formatting("bad".into()).is_tool_failure());
    }
}
