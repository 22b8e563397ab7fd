use anyhow::Context;
use cdc_bridge::checkpoint::CheckpointManager;
use cdc_bridge::engine::ReplayEngine;
use cdc_bridge::{Config, StreamSupplier};
use clap::Parser;
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "cdc-bridge")]
#[command(about = "Stream a change-data-capture log through the CDC bridge", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, value_name = "FILE", help = "JSON-lines change log to replay")]
    input: PathBuf,

    #[arg(short, long, help = "Keep waiting for appended changes at end of file")]
    follow: bool,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting cdc-bridge");

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Config::from_file(path)
                .with_context(|| format!("failed to load configuration from {:?}", path))?
        }
        None => Config::default(),
    };

    info!(
        engine = %config.engine.name,
        flattening = config.flattening.enabled,
        drop_tombstones = config.tombstones.drop,
        include_offset = config.stream.include_offset,
        propagate_headers = config.stream.propagate_headers,
        buffer_policy = ?config.buffer.policy,
        "Configuration summary"
    );

    let mut engine = ReplayEngine::new(&args.input, config.engine.batch_size).follow(args.follow);
    if let Some(offset_file) = &config.engine.offset_file {
        engine = engine.with_checkpoints(CheckpointManager::new(offset_file));
    }

    let stream = StreamSupplier::new(engine, config)?
        .activate()
        .await
        .context("change stream failed to activate")?;

    let mut states = stream.runner().state_changes();
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            info!(?state, "Engine state");
        }
    });

    let mut stream = stream;
    let mut delivered: u64 = 0;
    let stdout = std::io::stdout();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupt received, stopping engine");
                let outcome = stream.close().await;
                info!(?outcome, delivered, "Stopped");
                return Ok(());
            }
            next = stream.next() => match next {
                Some(Ok(envelope)) => {
                    let mut out = stdout.lock();
                    serde_json::to_writer(&mut out, &envelope.to_json())?;
                    out.write_all(b"\n")?;
                    delivered += 1;
                }
                Some(Err(e)) => {
                    error!(error = %e, delivered, "Change stream failed");
                    return Err(e.into());
                }
                None => {
                    info!(delivered, "Change stream completed");
                    return Ok(());
                }
            }
        }
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("cdc_bridge=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cdc_bridge=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
