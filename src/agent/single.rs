//! Single Agent
//!
//! One model-calling capability bound to a tool set and instructions,
//! driven through a bounded state machine per turn:
//! Idle → Planning → ToolDispatch → Synthesizing → Done.
//!
//! The round cap is a hard bound: when Planning never resolves, the agent
//! still reaches Done with a best-effort answer and an explicit
//! `incomplete` flag. Tool failures degrade into the answer, never abort
//! the turn.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::tools::{extract_json_array, extract_json_object, PlannedCall, ToolRegistry};
use crate::agent::types::{AgentTurn, Request, ToolOutcome, TurnPhase};
use crate::config::AgentConfig;
use crate::model::ModelProvider;

/// What the planner asked for in one round.
#[derive(Debug)]
enum PlannerDecision {
    /// Stop condition: the model produced the final answer.
    Answer(String),
    /// Dispatch these calls, then plan again.
    Calls(Vec<PlannedCall>),
    /// Nothing actionable in the response.
    Unusable,
}

/// Parse a planning response. The contract is JSON-only, but models wrap
/// JSON in prose often enough that balanced-extraction comes first.
fn parse_decision(response: &str) -> PlannerDecision {
    if let Some(json) = extract_json_object(response) {
        if let Ok(value) = serde_json::from_str::<Value>(json) {
            if let Some(answer) = value.get("answer").and_then(|a| a.as_str()) {
                return PlannerDecision::Answer(answer.to_string());
            }
            if let Some(calls) = value.get("calls") {
                if let Ok(calls) = serde_json::from_value::<Vec<PlannedCall>>(calls.clone()) {
                    if !calls.is_empty() {
                        return PlannerDecision::Calls(calls);
                    }
                }
            }
        }
    }

    // Bare array of calls, without the wrapper object.
    if let Some(json) = extract_json_array(response) {
        if let Ok(calls) = serde_json::from_str::<Vec<PlannedCall>>(json) {
            if !calls.is_empty() {
                return PlannerDecision::Calls(calls);
            }
        }
    }

    PlannerDecision::Unusable
}

/// Detect a dominant secondary script in gathered source material. The
/// answer switches language when the sources are predominantly in it.
pub(crate) fn secondary_language_hint(text: &str) -> Option<&'static str> {
    let mut letters = 0usize;
    let mut devanagari = 0usize;

    for c in text.chars() {
        if c.is_alphabetic() {
            letters += 1;
            if ('\u{0900}'..='\u{097F}').contains(&c) {
                devanagari += 1;
            }
        }
    }

    if letters > 20 && devanagari * 10 >= letters * 3 {
        Some("Hindi")
    } else {
        None
    }
}

/// A configured agent. Holds no per-turn state: every `run` builds its own
/// AgentTurn, so one instance serves concurrent requests without leakage.
pub struct SingleAgent {
    config: AgentConfig,
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
}

impl SingleAgent {
    pub fn new(config: AgentConfig, model: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self { config, model, tools }
    }

    pub fn role(&self) -> &str {
        &self.config.role
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn system_prompt(&self) -> String {
        let mut lines = vec![format!(
            "You are the '{}' agent: you decide which tools answer a request, then fold their results into one reply.",
            self.config.role
        )];
        for instruction in &self.config.instructions {
            lines.push(format!("- {}", instruction));
        }
        lines.join("\n")
    }

    fn planning_prompt(&self, request: &Request, history: Option<&str>, turn: &AgentTurn) -> String {
        let mut sections = Vec::new();

        if let Some(history) = history {
            if !history.is_empty() {
                sections.push(format!("# Prior conversation\n{}", history));
            }
        }

        sections.push(format!("# Request\n{}", request.prompt));

        if !request.params.is_empty() {
            let params: Vec<String> =
                request.params.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
            sections.push(format!("# Parameters\n{}", params.join("\n")));
        }

        let catalog = self.tools.prompt_catalog(&self.config.tools);
        if !catalog.is_empty() {
            sections.push(format!("# Available tools\n{}", catalog));
        }

        if !turn.calls.is_empty() {
            sections.push(format!("# Results so far\n{}", render_results(turn)));
        }

        if let Some(language) = gathered_language_hint(turn) {
            sections.push(format!(
                "# Language\nThe source material is predominantly in {lang}. Answer in {lang}.",
                lang = language
            ));
        }

        sections.push(
            "# Response format\nRespond with JSON only.\n\
             To call tools: {\"calls\": [{\"tool\": \"<name>\", \"args\": <args example>}]}\n\
             To give the final answer: {\"answer\": \"<answer text>\"}"
                .to_string(),
        );

        sections.join("\n\n")
    }

    fn synthesis_prompt(&self, request: &Request, turn: &AgentTurn) -> String {
        let mut sections = vec![
            format!("# Request\n{}", request.prompt),
            format!("# Gathered results\n{}", render_results(turn)),
        ];

        if let Some(language) = gathered_language_hint(turn) {
            sections.push(format!(
                "# Language\nThe source material is predominantly in {lang}. Answer in {lang}.",
                lang = language
            ));
        }

        sections.push(
            "# Task\nFold the results above into one answer. Cite sources where available. \
             Note plainly which data was unavailable; do not invent it."
                .to_string(),
        );

        sections.join("\n\n")
    }

    /// Run one turn. Never fails: every degradation lands in the turn's
    /// answer, `errors` and `incomplete` flag instead.
    pub async fn run(&self, request: &Request, history: Option<&str>) -> AgentTurn {
        let mut turn = AgentTurn::new(request.clone());
        let mut phase = TurnPhase::Idle;
        debug!("agent '{}': {}", self.config.role, phase.as_str());
        let mut draft: Option<String> = None;

        for round in 0..self.config.max_rounds {
            phase = TurnPhase::Planning;
            debug!("agent '{}' round {}: {}", self.config.role, round, phase.as_str());

            let prompt = self.planning_prompt(request, history, &turn);
            let response = match self.model.complete(&self.system_prompt(), &prompt).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("agent '{}' planning failed: {}", self.config.role, e);
                    turn.errors.push(format!("planning failed: {}", e));
                    break;
                }
            };

            match parse_decision(&response) {
                PlannerDecision::Answer(answer) => {
                    draft = Some(answer);
                    break;
                }
                PlannerDecision::Calls(calls) => {
                    phase = TurnPhase::ToolDispatch;
                    debug!(
                        "agent '{}' round {}: {} ({} calls)",
                        self.config.role,
                        round,
                        phase.as_str(),
                        calls.len()
                    );

                    let results = self.tools.dispatch(calls).await;
                    for call in &results {
                        if let ToolOutcome::Failed { detail, timed_out } = &call.outcome {
                            let kind = if *timed_out { "timed out" } else { "failed" };
                            turn.errors.push(format!("tool '{}' {}: {}", call.tool, kind, detail));
                        }
                    }
                    turn.calls.extend(results);
                }
                PlannerDecision::Unusable => {
                    debug!("agent '{}' round {}: no actionable plan", self.config.role, round);
                }
            }
        }

        phase = TurnPhase::Synthesizing;
        debug!("agent '{}': {}", self.config.role, phase.as_str());

        let answer = match draft {
            // The planner reached its stop condition; its answer already
            // folds the gathered results.
            Some(answer) => answer,
            // Round cap hit (or planning died) without a stop condition:
            // best-effort synthesis, explicitly incomplete.
            None => {
                turn.incomplete = true;
                match self.model.complete(&self.system_prompt(), &self.synthesis_prompt(request, &turn)).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("agent '{}' synthesis failed: {}", self.config.role, e);
                        turn.errors.push(format!("synthesis failed: {}", e));
                        fallback_answer(&turn)
                    }
                }
            }
        };

        phase = TurnPhase::Done;
        debug!("agent '{}': {}", self.config.role, phase.as_str());

        turn.answer = answer;
        turn
    }
}

/// Render gathered results for a prompt, failures included. Synthesis
/// must be able to note missing data.
fn render_results(turn: &AgentTurn) -> String {
    let mut lines = Vec::new();
    for call in &turn.calls {
        match &call.outcome {
            ToolOutcome::Success(output) => {
                let citation = output
                    .citation
                    .as_deref()
                    .map(|c| format!(" (source: {})", c))
                    .unwrap_or_default();
                lines.push(format!("[{}]{} {}", call.tool, citation, output.text));
            }
            ToolOutcome::Failed { detail, .. } => {
                lines.push(format!("[{}] UNAVAILABLE: {}", call.tool, detail));
            }
        }
    }
    lines.join("\n")
}

fn gathered_language_hint(turn: &AgentTurn) -> Option<&'static str> {
    let gathered: String = turn
        .successful_outputs()
        .map(|(_, output)| output.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    secondary_language_hint(&gathered)
}

/// Model-free degraded answer: enumerate what was gathered and what was
/// not. Always non-empty.
fn fallback_answer(turn: &AgentTurn) -> String {
    let mut lines = Vec::new();

    for (tool, output) in turn.successful_outputs() {
        match &output.citation {
            Some(citation) => lines.push(format!("{}: {} (source: {})", tool, output.text, citation)),
            None => lines.push(format!("{}: {}", tool, output.text)),
        }
    }

    for call in turn.failed_calls() {
        if let ToolOutcome::Failed { detail, .. } = &call.outcome {
            lines.push(format!("{} data unavailable: {}", call.tool, detail));
        }
    }

    if lines.is_empty() {
        lines.push("I could not complete this request with the available tools.".to_string());
    }

    lines.join("\n")
}
