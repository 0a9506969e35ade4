use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use browser_agent::hands::{BrowserSession, SessionOptions};
use browser_agent::{Agent, AgentConfig, AgentEvent, AgentState, ChatModel, ModelConfig, OpenAiClient, Page};
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Drive a browser with an LLM. Tasks are read one per line from stdin.
#[derive(Debug, Parser)]
#[command(name = "agent", version)]
struct Args {
    /// Run Chrome without a window.
    #[arg(long, env = "AGENT_HEADLESS")]
    headless: bool,

    /// DevTools endpoint of a running Chrome to attach to instead of launching one.
    #[arg(long, value_name = "URL")]
    attach: Option<String>,

    /// Chrome profile directory. Logins persist across runs.
    #[arg(long, value_name = "DIR")]
    profile_dir: Option<PathBuf>,

    /// Model id, overriding AGENT_MODEL and the provider default.
    #[arg(long)]
    model: Option<String>,

    /// History ceiling, overriding AGENT_MAX_MESSAGES.
    #[arg(long)]
    max_messages: Option<usize>,

    /// Log as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// First task to run before reading stdin.
    task: Option<String>,
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = AgentConfig::from_env();
    if let Some(max) = args.max_messages {
        config.history.max_messages = max;
    }
    let mut model_config = ModelConfig::from_env();
    if let Some(model) = args.model.clone() {
        model_config.model = model;
    }
    info!(model = %model_config.model, endpoint = %model_config.base_url, "model configured");
    let model: Arc<dyn ChatModel> = Arc::new(OpenAiClient::new(&model_config));

    let options = SessionOptions {
        headless: args.headless,
        attach: args.attach.clone(),
        profile_dir: args.profile_dir.clone(),
    };
    let mut session = tokio::task::spawn_blocking(move || BrowserSession::open(&options))
        .await
        .map_err(|e| anyhow!("browser launch panicked: {e}"))??;
    info!("browser ready");

    let (task_tx, mut task_rx) = mpsc::channel::<String>(16);
    if let Some(task) = args.task {
        task_tx.send(task).await?;
    }
    tokio::spawn(read_tasks(task_tx));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; stopping after the current step");
            on_signal.cancel();
        }
    });

    let (event_tx, event_rx) = broadcast::channel(64);
    tokio::spawn(log_events(event_rx));

    let mut page = session.page().with_element_timeout(config.action_timeout);
    loop {
        let agent_page: Arc<dyn Page> = Arc::new(page);
        let mut agent = Agent::new(model.clone(), agent_page, config.clone()).with_events(event_tx.clone());
        let report = agent.run(&mut task_rx, cancel.clone()).await;
        info!(state = ?report.state, steps = report.steps, task = ?report.task, "agent stopped");

        if cancel.is_cancelled() || !report.state.is_terminal() {
            break;
        }
        // Each finished agent hands over to a fresh one in a new tab.
        page = tokio::task::block_in_place(|| session.new_page())?.with_element_timeout(config.action_timeout);
    }
    Ok(())
}

async fn read_tasks(tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if tx.send(line.to_string()).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "could not read stdin");
                break;
            }
        }
    }
}

async fn log_events(rx: broadcast::Receiver<AgentEvent>) {
    let mut events = BroadcastStream::new(rx);
    while let Some(event) = events.next().await {
        match event {
            Ok(AgentEvent::Thinking) => info!("thinking"),
            Ok(AgentEvent::Step { number, tool, arguments }) => info!(number, %tool, %arguments, "step"),
            Ok(AgentEvent::StepError { kind, message }) => warn!(?kind, %message, "step error"),
            Ok(AgentEvent::AwaitingInput { message }) => println!("agent: {message}"),
            Ok(AgentEvent::TaskComplete { summary }) => println!("done: {summary}"),
            Ok(AgentEvent::TaskFailed { reason }) => println!("failed: {reason}"),
            Ok(AgentEvent::Fatal { task, message }) => {
                error!(?task, %message, "agent lost its page");
                println!("error: {message}");
            }
            Err(e) => warn!(error = %e, "event log lagged"),
        }
    }
}
