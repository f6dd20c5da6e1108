//! Recurring report task
//!
//! Timer-driven: re-runs a configured prompt through the pipeline and
//! pushes the answer through the messaging adapter. Decoupled from
//! per-request handling: the task owns its own pipeline handle and holds
//! no lock an interactive request waits on. A failed run is logged and the
//! next tick proceeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent::tools::{ToolAdapter, ToolArgs};
use crate::agent::types::Request;
use crate::config::ReportConfig;
use crate::pipeline::Pipeline;

/// Timeout for delivering one report message.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// A recurring report bound to a pipeline and a messaging adapter.
pub struct ReportTask {
    config: ReportConfig,
}

impl ReportTask {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    /// Interval between runs.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.config.every_hours.max(1) * 3600)
    }

    /// Run the report once: one pipeline turn, one delivery.
    pub async fn run_once(
        config: &ReportConfig,
        pipeline: &Pipeline,
        messenger: &Arc<dyn ToolAdapter>,
    ) -> Result<(), String> {
        let request = Request::new(&config.prompt, &format!("report:{}", config.channel_id));
        let turn = pipeline.run(request).await;

        if turn.answer.trim().is_empty() {
            return Err("report turn produced no answer".to_string());
        }

        let args = ToolArgs::Message {
            channel_id: config.channel_id.clone(),
            text: turn.answer,
        };

        match tokio::time::timeout(DELIVERY_TIMEOUT, messenger.invoke(args)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(format!("delivery failed: {}", e)),
            Err(_) => Err("delivery timed out".to_string()),
        }
    }

    /// Spawn the recurring task. The first run fires immediately, then once
    /// per interval.
    pub fn spawn(self, pipeline: Arc<Pipeline>, messenger: Arc<dyn ToolAdapter>) -> JoinHandle<()> {
        let interval = self.interval();
        let config = self.config;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                info!("running scheduled report for channel {}", config.channel_id);
                if let Err(e) = Self::run_once(&config, &pipeline, &messenger).await {
                    warn!("scheduled report failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_hours() {
        let task = ReportTask::new(ReportConfig {
            prompt: "Generate daily health trends report".to_string(),
            channel_id: "c1".to_string(),
            every_hours: 24,
        });
        assert_eq!(task.interval(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_interval_floors_at_one_hour() {
        let task = ReportTask::new(ReportConfig {
            prompt: "p".to_string(),
            channel_id: "c1".to_string(),
            every_hours: 0,
        });
        assert_eq!(task.interval(), Duration::from_secs(3600));
    }
}
