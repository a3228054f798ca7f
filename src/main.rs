// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fabstir_image_pipeline::{
    api::{self, AppState},
    telemetry, Pipeline, PipelineConfig,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Paid image-generation pipeline
#[derive(Parser, Debug)]
#[command(name = "fabstir-image-pipeline")]
#[command(version)]
#[command(about = "Image generation job pipeline", long_about = None)]
struct Cli {
    /// TOML config file (overrides PIPELINE_CONFIG)
    #[arg(long, env = "PIPELINE_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// HTTP API plus queue worker in one process (default).
    ///
    /// Job records live in this process, so the worker cannot run apart from
    /// the API that accepted the jobs.
    Serve,

    /// Print the effective configuration with secrets redacted
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    telemetry::init_tracing();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::PrintConfig => print_config(config),
    }
}

fn load_config(path: Option<&str>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return PipelineConfig::load().context("loading pipeline config");
    };
    let mut config = PipelineConfig::from_file(path)?;
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

async fn serve(config: PipelineConfig) -> Result<()> {
    let pipeline = Pipeline::build(&config).await?;
    let shutdown = shutdown_token();
    let maintenance = pipeline.spawn_maintenance(shutdown.clone());

    let worker = pipeline
        .worker
        .as_ref()
        .map(|worker| tokio::spawn(Arc::clone(worker).run(shutdown.clone())));

    let state = AppState {
        orchestrator: Arc::clone(&pipeline.orchestrator),
        metrics: Arc::clone(&pipeline.metrics),
    };
    let media_root = config
        .api
        .serve_media
        .then(|| config.artifacts.public_root.clone());
    let app = api::router(state, media_root);

    let served = api::serve(&config.api.bind, app, shutdown.clone()).await;
    // stop the worker even when the listener failed
    shutdown.cancel();
    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            error!("Worker task panicked: {}", e);
        }
    }
    let _ = maintenance.await;
    served
}

fn print_config(mut config: PipelineConfig) -> Result<()> {
    if config.provider.api_key.is_some() {
        config.provider.api_key = Some("<redacted>".to_string());
    }
    let rendered = toml::to_string_pretty(&config).context("rendering config")?;
    println!("{}", rendered);
    Ok(())
}

/// Cancelled on Ctrl-C
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        trigger.cancel();
    });
    token
}
