//! Team Coordinator
//!
//! Executes a fixed [`TeamPlan`]: each stage's agent receives the original
//! request plus every prior stage's output; a sequential pipeline, not a
//! free-for-all. Stage ordering comes from configuration; it is a design
//! contract, never inferred at runtime. A failed stage is surfaced and the
//! remaining stages still run with whatever prior output exists.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::agent::single::SingleAgent;
use crate::agent::types::{AgentTurn, Request};
use crate::config::{PlanEntryConfig, TeamConfig};
use crate::error::AgentError;
use crate::model::ModelProvider;

/// One pipeline stage: which role runs, with what stage instructions.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub role: String,
    pub instructions: String,
}

/// Ordered list of stages. Constructed once, reused across turns.
#[derive(Debug, Clone)]
pub struct TeamPlan {
    entries: Vec<PlanEntry>,
}

impl TeamPlan {
    pub fn new(entries: Vec<PlanEntry>) -> Self {
        Self { entries }
    }

    pub fn from_config(entries: &[PlanEntryConfig]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|e| PlanEntry { role: e.role.clone(), instructions: e.instructions.clone() })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }
}

/// Compose a stage's input from the original request and prior outputs.
/// Prior outputs appear in stage order, each labeled with its role.
pub(crate) fn compose_stage_input(
    prompt: &str,
    stage_instructions: &str,
    prior: &[(String, String)],
) -> String {
    let mut sections = vec![prompt.to_string()];

    if !stage_instructions.is_empty() {
        sections.push(format!("Stage focus: {}", stage_instructions));
    }

    if !prior.is_empty() {
        let mut lines = vec!["Findings from earlier agents:".to_string()];
        for (role, output) in prior {
            lines.push(format!("[{}]\n{}", role, output));
        }
        sections.push(lines.join("\n\n"));
    }

    sections.join("\n\n")
}

/// Composes multiple Single Agents into an ordered pipeline.
pub struct TeamCoordinator {
    plan: TeamPlan,
    agents: HashMap<String, Arc<SingleAgent>>,
    model: Arc<dyn ModelProvider>,
    /// Instructions for the coordinator's own synthesis step.
    instructions: Vec<String>,
}

impl std::fmt::Debug for TeamCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamCoordinator")
            .field("plan", &self.plan)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("instructions", &self.instructions)
            .finish_non_exhaustive()
    }
}

impl TeamCoordinator {
    /// Build a coordinator. Every plan entry must name a known agent role;
    /// a dangling role is a configuration error, caught here rather than
    /// mid-turn.
    pub fn new(
        plan: TeamPlan,
        agents: HashMap<String, Arc<SingleAgent>>,
        model: Arc<dyn ModelProvider>,
        instructions: Vec<String>,
    ) -> Result<Self, AgentError> {
        for entry in plan.entries() {
            if !agents.contains_key(&entry.role) {
                return Err(AgentError::Configuration(format!(
                    "team plan references unknown agent role '{}'",
                    entry.role
                )));
            }
        }

        Ok(Self { plan, agents, model, instructions })
    }

    pub fn from_config(
        config: &TeamConfig,
        agents: HashMap<String, Arc<SingleAgent>>,
        model: Arc<dyn ModelProvider>,
    ) -> Result<Self, AgentError> {
        Self::new(
            TeamPlan::from_config(&config.plan),
            agents,
            model,
            config.instructions.clone(),
        )
    }

    pub fn plan(&self) -> &TeamPlan {
        &self.plan
    }

    fn system_prompt(&self) -> String {
        let mut lines = vec![
            "You coordinate a team of specialized agents and synthesize their findings into one answer."
                .to_string(),
        ];
        for instruction in &self.instructions {
            lines.push(format!("- {}", instruction));
        }
        lines.join("\n")
    }

    /// Run the plan for one request. Stage failures degrade, never abort:
    /// later stages run with whatever prior output exists, and every
    /// failure is surfaced in the turn's `errors`.
    pub async fn run(&self, request: &Request, history: Option<&str>) -> AgentTurn {
        let mut turn = AgentTurn::new(request.clone());
        let mut prior: Vec<(String, String)> = Vec::new();

        for (i, entry) in self.plan.entries().iter().enumerate() {
            // Validated in the constructor.
            let Some(agent) = self.agents.get(&entry.role) else {
                continue;
            };

            debug!("team stage {}: '{}'", i, entry.role);

            let stage_request = Request {
                prompt: compose_stage_input(&request.prompt, &entry.instructions, &prior),
                user_id: request.user_id.clone(),
                params: request.params.clone(),
            };

            let stage_turn = agent.run(&stage_request, history).await;

            // Stage turns are transient: their tool calls move into the
            // coordinator's turn, which is the one that gets persisted.
            turn.calls.extend(stage_turn.calls);
            for error in stage_turn.errors {
                turn.errors.push(format!("[{}] {}", entry.role, error));
            }

            if stage_turn.incomplete {
                turn.incomplete = true;
            }

            if stage_turn.answer.trim().is_empty() {
                warn!("team stage '{}' produced no output", entry.role);
                turn.errors.push(format!("[{}] stage produced no output", entry.role));
                turn.incomplete = true;
                continue;
            }

            prior.push((entry.role.clone(), stage_turn.answer));
        }

        turn.answer = self.synthesize(request, &prior, &turn).await;
        turn
    }

    async fn synthesize(
        &self,
        request: &Request,
        prior: &[(String, String)],
        turn: &AgentTurn,
    ) -> String {
        if prior.is_empty() {
            return format!(
                "No team stage produced a usable result for: {}",
                request.prompt
            );
        }

        let mut sections = vec![format!("# Request\n{}", request.prompt)];
        for (role, output) in prior {
            sections.push(format!("# Findings: {}\n{}", role, output));
        }
        if !turn.errors.is_empty() {
            sections.push(format!("# Degradations\n{}", turn.errors.join("\n")));
        }
        sections.push(
            "# Task\nSynthesize the findings above into one answer. Keep citations. \
             Note plainly any data that was unavailable."
                .to_string(),
        );

        match self.model.complete(&self.system_prompt(), &sections.join("\n\n")).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("team synthesis failed, concatenating stages: {}", e);
                // Labeled concatenation keeps stage order visible.
                prior
                    .iter()
                    .map(|(role, output)| format!("## {}\n{}", role, output))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::ToolRegistry;
    use crate::config::AgentConfig;
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Always answers with a fixed string, recording every prompt it saw.
    struct FixedModel {
        answer: String,
        seen: Mutex<Vec<String>>,
    }

    impl FixedModel {
        fn new(answer: &str) -> Arc<Self> {
            Arc::new(Self { answer: answer.to_string(), seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ModelProvider for FixedModel {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
            self.seen.lock().push(prompt.to_string());
            Ok(format!(r#"{{"answer": "{}"}}"#, self.answer))
        }
    }

    struct PlainModel;

    #[async_trait]
    impl ModelProvider for PlainModel {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
            Ok(format!("synthesis of: {}", prompt.len()))
        }
    }

    fn toolless_agent(role: &str, model: Arc<dyn ModelProvider>) -> Arc<SingleAgent> {
        let registry = Arc::new(ToolRegistry::new(Duration::from_millis(100)));
        Arc::new(SingleAgent::new(AgentConfig::new(role), model, registry))
    }

    fn plan(roles: &[&str]) -> TeamPlan {
        TeamPlan::new(
            roles
                .iter()
                .map(|r| PlanEntry { role: r.to_string(), instructions: String::new() })
                .collect(),
        )
    }

    #[test]
    fn test_compose_stage_input_carries_prior_outputs() {
        let prior = vec![("finance".to_string(), "NVDA at 875.21".to_string())];
        let input = compose_stage_input("Summarize NVDA", "find recent news", &prior);

        assert!(input.contains("Summarize NVDA"));
        assert!(input.contains("find recent news"));
        assert!(input.contains("[finance]"));
        assert!(input.contains("NVDA at 875.21"));
    }

    #[test]
    fn test_unknown_role_rejected_at_construction() {
        let agents = HashMap::new();
        let err = TeamCoordinator::new(plan(&["ghost"]), agents, Arc::new(PlainModel), Vec::new())
            .unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_second_stage_sees_first_stage_output() {
        let finance_model = FixedModel::new("NVDA trades at 875.21");
        let search_model = FixedModel::new("Latest NVDA coverage is positive");

        let mut agents = HashMap::new();
        agents.insert("finance".to_string(), toolless_agent("finance", finance_model.clone()));
        agents.insert("web_search".to_string(), toolless_agent("web_search", search_model.clone()));

        let coordinator = TeamCoordinator::new(
            plan(&["finance", "web_search"]),
            agents,
            Arc::new(PlainModel),
            Vec::new(),
        )
        .unwrap();

        let turn = coordinator.run(&Request::new("Summarize NVDA", "u1"), None).await;

        // B's planning prompt contains A's output; A never saw B's.
        let search_prompts = search_model.seen.lock();
        assert!(search_prompts.iter().any(|p| p.contains("NVDA trades at 875.21")));
        let finance_prompts = finance_model.seen.lock();
        assert!(!finance_prompts.iter().any(|p| p.contains("positive")));

        assert!(!turn.answer.is_empty());
        assert!(!turn.incomplete);
    }

    #[tokio::test]
    async fn test_failed_stage_degrades_but_later_stages_run() {
        let empty_model = FixedModel::new(""); // stage output empty -> failure
        let search_model = FixedModel::new("found news anyway");

        let mut agents = HashMap::new();
        agents.insert("finance".to_string(), toolless_agent("finance", empty_model));
        agents.insert("web_search".to_string(), toolless_agent("web_search", search_model.clone()));

        let coordinator = TeamCoordinator::new(
            plan(&["finance", "web_search"]),
            agents,
            Arc::new(PlainModel),
            Vec::new(),
        )
        .unwrap();

        let turn = coordinator.run(&Request::new("Summarize NVDA", "u1"), None).await;

        assert!(turn.incomplete);
        assert!(turn.errors.iter().any(|e| e.contains("finance")));
        // The later stage still ran.
        assert!(!search_model.seen.lock().is_empty());
        assert!(!turn.answer.is_empty());
    }
}
