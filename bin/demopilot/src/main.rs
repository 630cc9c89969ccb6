use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use demopilot_actions::ActionRegistry;
use demopilot_agent::{MockRunner, Orchestrator, TaskConfig};
use demopilot_browser::BrowserSession;
use demopilot_core::protocol::StdoutSink;
use demopilot_core::{Config, Error};
use demopilot_providers::create_provider;

#[derive(Parser)]
#[command(name = "demopilot")]
#[command(about = "Books a product demo on a website with an LLM-driven browser agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Caller profile as a JSON object literal, e.g. '{"email": "a@b.com"}'
    profile: String,

    /// Absolute URL of the website to book a demo on
    website_url: String,

    /// Run the deterministic mock instead of the real browser/model path
    #[arg(long)]
    mock: bool,

    /// Delay between mock progress lines, in milliseconds
    #[arg(long, default_value_t = 1000)]
    mock_delay_ms: u64,

    /// Launch the browser without a visible window
    #[arg(long)]
    headless: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_profile(raw: &str) -> Result<Map<String, Value>, Error> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::Config(format!("profile is not valid JSON: {}", e)))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Config("profile must be a JSON object".to_string())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Diagnostics go to stderr; stdout carries protocol lines and progress
    // output only.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let profile = parse_profile(&cli.profile)?;

    if cli.mock {
        let runner = MockRunner::new(5, Duration::from_millis(cli.mock_delay_ms));
        runner.run(&profile, &cli.website_url, &StdoutSink).await?;
        return Ok(());
    }

    // Pre-flight: configuration must resolve before any browser work begins.
    let mut config = Config::from_env()?;
    config.browser.headless = cli.headless;

    println!("Booking demo for {} on {}", cli.profile, cli.website_url);

    let provider = create_provider(&config);
    let registry = ActionRegistry::with_builtins();
    let task = TaskConfig::demo_booking(profile, &cli.website_url);

    let session = Arc::new(BrowserSession::launch(&config.browser).await?);
    let orchestrator = Orchestrator::new(provider, registry, config.limits.clone());

    let terminal = orchestrator
        .run_task(&task, session, Arc::new(StdoutSink))
        .await?;

    // Termination is communicated through the event stream; the exit code
    // stays 0 either way.
    match terminal {
        Some(event) => info!(?event, "Task finished with terminal event"),
        None => warn!("Task finished without a terminal event"),
    }

    Ok(())
}
