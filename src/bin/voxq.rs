//! voxq CLI: run the dispatcher as a line-protocol daemon or one-shot.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;
use voxq::cache::{CommandVoiceLoader, VoiceCache, VoiceLibrary};
use voxq::config::Config;
use voxq::dispatch::Dispatcher;
use voxq::handler::{CompletionHandler, HandlerRegistry, SynthesisHandler};
use voxq::model::{WorkId, WorkKind, WorkRequest};
use voxq::poll::{PollOutcome, PollPolicy, await_result};
use voxq::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};

#[derive(Parser)]
#[command(name = "voxq", about = "Priority dispatch for voice synthesis and chat work")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher, reading JSON requests line by line from stdin
    Serve,
    /// Submit one request and wait for its result
    Run {
        /// Work kind: voice/synthesis or chat/completion
        kind: String,
        /// JSON payload
        #[arg(long)]
        params: String,
        /// Submitting principal
        #[arg(long, default_value = "cli")]
        owner: String,
        /// Seconds to wait before giving up
        #[arg(long, default_value_t = 30)]
        timeout: u32,
    },
}

/// One stdin line in `serve` mode.
#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Line {
    Submit {
        owner_id: String,
        kind: String,
        payload: serde_json::Value,
    },
    Status {
        id: Uuid,
    },
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = start_telemetry(&config)?;
    let cache = VoiceCache::new(
        CommandVoiceLoader::new(&config.voice_command),
        VoiceLibrary::new(&config.models_dir),
        config.cache_idle_timeout,
    );
    let registry = HandlerRegistry::empty()
        .with(
            WorkKind::Synthesis,
            SynthesisHandler::new(cache.clone(), &config.output_dir)
                .keep_last(config.output_keep),
        )
        .with(
            WorkKind::Completion,
            CompletionHandler::new(&config.completions_url, config.completions_api_key.clone()),
        );
    let dispatcher = Dispatcher::new(config.dispatch(), registry);
    let loop_handle = dispatcher.spawn();

    let result = match cli.command {
        Command::Serve => cmd_serve(&dispatcher, &cache).await,
        Command::Run {
            kind,
            params,
            owner,
            timeout,
        } => cmd_run(&dispatcher, kind, params, owner, timeout).await,
    };

    dispatcher.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), loop_handle).await;
    let cleared = cache.clear().await;
    info!(cleared, "voice cache cleared");
    result
}

fn start_telemetry(config: &Config) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "voxq".to_string(),
        log_level: config.log_level.clone(),
    })?)
}

async fn cmd_serve(
    dispatcher: &Dispatcher,
    cache: &VoiceCache<CommandVoiceLoader>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    info!("serving; one JSON request per line on stdin");

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Line>(&line) {
            Ok(parsed) => handle_line(dispatcher, cache, parsed),
            Err(e) => {
                warn!(error = %e, "bad request line");
                json!({ "error": format!("bad request: {e}") })
            }
        };
        stdout.write_all(format!("{reply}\n").as_bytes()).await?;
        stdout.flush().await?;
    }
}

fn handle_line(
    dispatcher: &Dispatcher,
    cache: &VoiceCache<CommandVoiceLoader>,
    line: Line,
) -> serde_json::Value {
    match line {
        Line::Submit {
            owner_id,
            kind,
            payload,
        } => {
            let submitted = kind
                .parse::<WorkKind>()
                .and_then(|kind| WorkRequest::from_json(kind, payload))
                .and_then(|request| dispatcher.submit(owner_id, request));
            match submitted {
                Ok(id) => json!({ "id": id.0 }),
                Err(e) => json!({ "error": e.to_string() }),
            }
        }
        Line::Status { id } => match dispatcher.status(WorkId(id)) {
            Some(snapshot) => to_json(&snapshot),
            None => json!({ "error": "request not found" }),
        },
        Line::Stats => to_json(&cache.stats()),
    }
}

fn to_json(value: &impl serde::Serialize) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

async fn cmd_run(
    dispatcher: &Dispatcher,
    kind: String,
    params: String,
    owner: String,
    timeout: u32,
) -> anyhow::Result<()> {
    let kind: WorkKind = kind.parse()?;
    let request = WorkRequest::from_json(kind, serde_json::from_str(&params)?)?;
    let id = dispatcher.submit(owner, request)?;

    let policy = PollPolicy {
        attempts: timeout,
        interval: Duration::from_secs(1),
        defer_beyond_position: None,
    };
    match await_result(dispatcher, id, &policy).await {
        PollOutcome::Finished(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            match snapshot.error() {
                Some(err) => anyhow::bail!("{err}"),
                None => Ok(()),
            }
        }
        PollOutcome::TimedOut(_) => anyhow::bail!("request timeout"),
        PollOutcome::NotFound => anyhow::bail!("request not found"),
        PollOutcome::Deferred { position } => anyhow::bail!("still queued at position {position}"),
    }
}
