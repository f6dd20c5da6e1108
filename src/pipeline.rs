//! Pipeline
//!
//! The front-end boundary: `run(Request) -> AgentTurn`. Wires a Single
//! Agent or a Team Coordinator to the session store and the output
//! formatter, and owns startup: tool registration, knowledge ingestion,
//! degraded-mode decisions. Each request is an independent unit of work:
//! the pipeline takes `&self` and keeps no per-turn state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::single::SingleAgent;
use crate::agent::team::TeamCoordinator;
use crate::agent::tools::{ToolAdapter, ToolRegistry};
use crate::agent::types::{AgentTurn, Request};
use crate::config::{AgentConfig, PipelineConfig, Settings};
use crate::embeddings::{EmbeddingConfig, HttpEmbedder};
use crate::error::AgentError;
use crate::format::{self, Delivery, OutputStyle};
use crate::knowledge::{HttpFetcher, KnowledgeRetriever};
use crate::model::{ModelClient, ModelProvider};
use crate::session::SessionStore;
use crate::tools::{FinanceTool, KnowledgeTool, MessagingTool, WebSearchTool};

/// Prior turns injected as context.
const HISTORY_LIMIT: usize = 10;

/// Chunk size for streaming delivery, chars.
const STREAM_CHUNK_CHARS: usize = 200;

/// Cancellation flag for an in-flight turn. In-flight tool calls run to
/// completion, but a cancelled turn's results are discarded and never
/// persisted.
#[derive(Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

enum Driver {
    Single(Arc<SingleAgent>),
    Team(TeamCoordinator),
}

/// The assembled query pipeline.
pub struct Pipeline {
    driver: Driver,
    session: Option<Arc<SessionStore>>,
    max_output_chars: usize,
    style: OutputStyle,
    /// Messaging adapter handle for the report scheduler.
    messenger: Option<Arc<dyn ToolAdapter>>,
}

impl Pipeline {
    /// Pipeline around one agent.
    pub fn single(agent: Arc<SingleAgent>) -> Self {
        let config = agent.config();
        let max_output_chars = config.max_output_chars;
        let style = OutputStyle { markup: config.markup, delivery: config.delivery };
        Self {
            driver: Driver::Single(agent),
            session: None,
            max_output_chars,
            style,
            messenger: None,
        }
    }

    /// Pipeline around a team. Output limits follow the given agent config
    /// (by convention, the first plan stage's agent).
    pub fn team(coordinator: TeamCoordinator, output_config: &AgentConfig) -> Self {
        Self {
            driver: Driver::Team(coordinator),
            session: None,
            max_output_chars: output_config.max_output_chars,
            style: OutputStyle { markup: output_config.markup, delivery: output_config.delivery },
            messenger: None,
        }
    }

    pub fn with_session(mut self, session: Arc<SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn ToolAdapter>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    /// Assemble the full pipeline from configuration: model client, tool
    /// adapters, knowledge ingestion, agents, optional team, session store.
    ///
    /// Knowledge ingestion failures are isolated: a failed source is
    /// logged and skipped; if every source fails, retrieval-augmented
    /// answers are disabled for the session and the pipeline still starts.
    pub async fn from_config(
        settings: &Settings,
        config: &PipelineConfig,
    ) -> Result<Self, AgentError> {
        let model: Arc<dyn ModelProvider> = Arc::new(ModelClient::from_settings(settings));

        let mut registry = ToolRegistry::new(settings.tool_timeout);
        registry.register(Arc::new(WebSearchTool::new(&settings.search_url, settings.tool_timeout)));
        registry.register(Arc::new(FinanceTool::new(&settings.finance_url, settings.tool_timeout)));

        let messenger: Option<Arc<dyn ToolAdapter>> = settings.webhook_url.as_deref().map(|url| {
            Arc::new(MessagingTool::new(url, settings.tool_timeout)) as Arc<dyn ToolAdapter>
        });
        if let Some(messenger) = &messenger {
            registry.register(messenger.clone());
        }

        // Knowledge: ingest every configured source once, shared across
        // agents. Partial failure keeps the surviving sources queryable.
        let sources: Vec<String> = config
            .agents
            .iter()
            .flat_map(|a| a.knowledge_sources.iter().cloned())
            .collect();

        if !sources.is_empty() {
            let embedder = Arc::new(HttpEmbedder::new(EmbeddingConfig::new(
                &settings.embedding_url,
                &settings.embedding_model,
            )));
            embedder.check_availability().await;

            let retriever = Arc::new(
                KnowledgeRetriever::new(Arc::new(HttpFetcher::default()), embedder)
                    .with_query_timeout(settings.tool_timeout),
            );

            let results = retriever.ingest_all(&sources).await;
            let succeeded = results.iter().filter(|(_, r)| r.is_ok()).count();

            if succeeded == 0 {
                warn!("all {} knowledge sources failed; retrieval disabled for this session", sources.len());
            } else {
                info!("knowledge ready: {}/{} sources ingested", succeeded, sources.len());
                registry.register(Arc::new(KnowledgeTool::new(retriever)));
            }
        }

        let registry = Arc::new(registry);

        let mut agents: HashMap<String, Arc<SingleAgent>> = HashMap::new();
        for agent_config in &config.agents {
            let agent = Arc::new(SingleAgent::new(
                agent_config.clone(),
                model.clone(),
                registry.clone(),
            ));
            agents.insert(agent_config.role.clone(), agent);
        }

        let session = Arc::new(SessionStore::open(&settings.db_path)?);

        let mut pipeline = match &config.team {
            Some(team_config) => {
                let coordinator =
                    TeamCoordinator::from_config(team_config, agents, model.clone())?;
                let first_role = &team_config.plan[0].role;
                let output_config = config
                    .agents
                    .iter()
                    .find(|a| &a.role == first_role)
                    .ok_or_else(|| {
                        AgentError::Configuration(format!(
                            "team stage references unknown agent role '{}'",
                            first_role
                        ))
                    })?;
                Pipeline::team(coordinator, output_config)
            }
            None => {
                let first = &config.agents[0];
                let agent = agents.get(&first.role).cloned().ok_or_else(|| {
                    AgentError::Configuration(format!("agent role '{}' not constructed", first.role))
                })?;
                Pipeline::single(agent)
            }
        };

        pipeline = pipeline.with_session(session);
        if let Some(messenger) = messenger {
            pipeline = pipeline.with_messenger(messenger);
        }
        Ok(pipeline)
    }

    pub fn style(&self) -> &OutputStyle {
        &self.style
    }

    pub fn messenger(&self) -> Option<&Arc<dyn ToolAdapter>> {
        self.messenger.as_ref()
    }

    async fn execute(&self, request: &Request) -> AgentTurn {
        let history = match &self.session {
            Some(session) => match session.history_as_context(&request.user_id, HISTORY_LIMIT) {
                Ok(context) if !context.is_empty() => Some(context),
                Ok(_) => None,
                Err(e) => {
                    warn!("history unavailable for {}: {}", request.user_id, e);
                    None
                }
            },
            None => None,
        };

        let mut turn = match &self.driver {
            Driver::Single(agent) => agent.run(request, history.as_deref()).await,
            Driver::Team(coordinator) => coordinator.run(request, history.as_deref()).await,
        };

        // The answer is always bounded before it leaves the pipeline.
        turn.answer = format::format(&turn.answer, self.max_output_chars, &self.style);
        turn
    }

    fn persist(&self, turn: &AgentTurn) {
        if let Some(session) = &self.session {
            if let Err(e) = session.append(&turn.request.user_id, turn) {
                warn!("failed to persist turn for {}: {}", turn.request.user_id, e);
            }
        }
    }

    /// Run one turn: history in, agent loop, formatting, persistence.
    pub async fn run(&self, request: Request) -> AgentTurn {
        let turn = self.execute(&request).await;
        self.persist(&turn);
        turn
    }

    /// Run one turn under a cancellation handle. If the handle is
    /// cancelled by the time the turn completes, its results are discarded:
    /// nothing is persisted and `None` is returned.
    pub async fn run_cancellable(
        &self,
        request: Request,
        cancel: &CancelHandle,
    ) -> Option<AgentTurn> {
        let turn = self.execute(&request).await;

        if cancel.is_cancelled() {
            debug!("turn for {} abandoned; discarding results", turn.request.user_id);
            return None;
        }

        self.persist(&turn);
        Some(turn)
    }

    /// Split an answer into streaming chunks. Only meaningful when the
    /// style's delivery is [`Delivery::Streaming`]; concatenation equals
    /// the batch answer either way.
    pub fn answer_chunks(&self, turn: &AgentTurn) -> Vec<String> {
        match self.style.delivery {
            Delivery::Streaming => format::into_chunks(&turn.answer, STREAM_CHUNK_CHARS),
            Delivery::Batch => vec![turn.answer.clone()],
        }
    }
}
