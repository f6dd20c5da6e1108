//! Agent core
//!
//! The orchestration layer between a request and the external services:
//! - Tagged-variant tool framework with pre-dispatch argument checks
//! - Single Agent: a bounded Planning → ToolDispatch → Synthesizing loop
//! - Team Coordinator: specialized agents in a fixed sequential plan
//! - Recurring report task, decoupled from interactive requests

pub mod scheduler;
pub mod single;
pub mod team;
pub mod tools;
pub mod types;

pub use scheduler::ReportTask;
pub use single::SingleAgent;
pub use team::{PlanEntry, TeamCoordinator, TeamPlan};
pub use tools::{ArgKind, FinanceFacet, PlannedCall, ToolAdapter, ToolArgs, ToolOutput, ToolRegistry};
pub use types::{AgentTurn, Request, ToolCall, ToolOutcome, TurnPhase};
