//! agentpipe - Entry Point
//!
//! Thin driver around the pipeline:
//! - Default: interactive prompt loop over stdin
//! - --once "<prompt>": run a single request and exit
//! - --config <path>: TOML pipeline configuration (default: agentpipe.toml)

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use agentpipe::{Delivery, Pipeline, PipelineConfig, ReportTask, Request, Settings};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse args
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("agentpipe v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: agentpipe [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Pipeline config TOML (default: agentpipe.toml)");
        println!("  --once <prompt>   Run one request and exit");
        println!("  --help, -h        Show this help");
        println!();
        println!("Environment variables:");
        println!("  MODEL_API_KEY        Model endpoint key (required)");
        println!("  MODEL_URL            Chat completions base URL");
        println!("  MODEL_NAME           Model identifier");
        println!("  EMBEDDING_URL        Embedding provider base URL");
        println!("  EMBEDDING_MODEL      Embedding model name");
        println!("  SEARCH_API_URL       Web search provider base URL");
        println!("  FINANCE_API_URL      Financial data provider base URL");
        println!("  MESSAGE_WEBHOOK_URL  Outbound message webhook");
        println!("  AGENTPIPE_DB_PATH    Session store path");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("agentpipe.toml"));

    let once_prompt = args
        .iter()
        .position(|a| a == "--once")
        .and_then(|i| args.get(i + 1))
        .cloned();

    // Configuration errors are the only fatal ones.
    let settings = Settings::from_env()?;

    let config = if config_path.exists() {
        PipelineConfig::load(&config_path)?
    } else {
        info!("no config file at {}; using the default single agent", config_path.display());
        PipelineConfig::default_single()
    };

    let report_config = config.report.clone();
    let pipeline = Arc::new(Pipeline::from_config(&settings, &config).await?);
    info!("agentpipe v{} ready", env!("CARGO_PKG_VERSION"));

    // Recurring report runs decoupled from the interactive loop.
    if let Some(report_config) = report_config {
        match pipeline.messenger() {
            Some(messenger) => {
                ReportTask::new(report_config).spawn(pipeline.clone(), messenger.clone());
            }
            None => warn!("report configured but MESSAGE_WEBHOOK_URL is not set; skipping"),
        }
    }

    if let Some(prompt) = once_prompt {
        run_and_print(&pipeline, &prompt, "cli").await;
        return Ok(());
    }

    // Interactive loop.
    println!("agentpipe ready. Type a request, or 'exit' to quit.");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt.eq_ignore_ascii_case("exit") {
            break;
        }

        run_and_print(&pipeline, prompt, "cli").await;
    }

    Ok(())
}

async fn run_and_print(pipeline: &Pipeline, prompt: &str, user_id: &str) {
    let turn = pipeline.run(Request::new(prompt, user_id)).await;

    match pipeline.style().delivery {
        Delivery::Streaming => {
            for chunk in pipeline.answer_chunks(&turn) {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            }
            println!();
        }
        Delivery::Batch => println!("{}", turn.answer),
    }

    if turn.incomplete {
        println!("(incomplete: round cap reached or data unavailable)");
    }
    for error in &turn.errors {
        warn!("{}", error);
    }
}
