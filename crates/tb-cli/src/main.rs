// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The `tool-backplane` binary: load config, load (or embed) a Registry
//! catalog, run one Planner request, print the resulting
//! [`tb_cli::response::PlannerResponse`] as JSON.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tb_cli::wiring;
use tb_cli::{run, RunRequest};
use tb_config::{load_config, validate_config};
use tb_core::{PlannerLimits, PlannerMode};
use tb_worker::WorkerConfig;
use tracing_subscriber::EnvFilter;

/// Exit code used when the Planner run did not complete cleanly.
const EXIT_RUN_FAILED: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "tool-backplane", version, about = "Contract-first tool execution Planner")]
struct Cli {
    /// Natural-language message to plan against.
    message: String,

    /// Which Planner mode to run.
    #[arg(long, value_enum, default_value_t = ModeArg::Answer)]
    mode: ModeArg,

    /// Opaque JSON context passed to the rule base's field extractors.
    #[arg(long, default_value = "null")]
    context: String,

    /// Opaque conversation identifier to stamp onto the run.
    #[arg(long)]
    conversation_id: Option<String>,

    /// Maximum number of tool calls a single plan may contain.
    #[arg(long)]
    max_tool_calls: Option<usize>,

    /// Wall-clock deadline for `enqueue-and-wait`, in milliseconds.
    #[arg(long)]
    wait_timeout_ms: Option<u64>,

    /// Path to a Registry catalog file. Falls back to the embedded
    /// three-tool catalog when omitted.
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Path to a `BackplaneConfig` TOML file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start an in-process Executor Worker so enqueued calls actually run.
    #[arg(long)]
    with_worker: bool,

    /// Print the resolved configuration and exit without planning.
    #[arg(long)]
    health: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Answer,
    Plan,
    Enqueue,
    EnqueueAndWait,
}

impl From<ModeArg> for PlannerMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Answer => PlannerMode::Answer,
            ModeArg::Plan => PlannerMode::Plan,
            ModeArg::Enqueue => PlannerMode::Enqueue,
            ModeArg::EnqueueAndWait => PlannerMode::EnqueueAndWait,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_RUN_FAILED);
        }
    };
    let warnings = match validate_config(&config) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_RUN_FAILED);
        }
    };

    let log_level = config.log_level.as_deref().unwrap_or("info");
    let filter = EnvFilter::new(format!("tool_backplane={log_level},tb={log_level}"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    for w in &warnings {
        tracing::warn!("config: {w}");
    }

    if cli.health {
        match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("error: {e}"),
        }
        return;
    }

    if let Err(e) = run_cli(cli, config).await {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUN_FAILED);
    }
}

async fn run_cli(cli: Cli, config: tb_config::BackplaneConfig) -> Result<()> {
    let context: serde_json::Value =
        serde_json::from_str(&cli.context).with_context(|| format!("parse --context as JSON: {}", cli.context))?;

    let registry_path = cli.registry.or_else(|| config.registry_path.as_ref().map(PathBuf::from));
    let registry = Arc::new(match registry_path {
        Some(path) => wiring::load_registry_file(&path)?,
        None => wiring::embedded_registry(),
    });
    let rules = wiring::default_rules();

    let mut limits = PlannerLimits::default();
    if let Some(max) = cli.max_tool_calls {
        limits.max_tool_calls = max;
    }
    limits.wait_timeout_ms = cli.wait_timeout_ms.unwrap_or(config.wait_timeout_ms);

    let worker_config = WorkerConfig {
        max_concurrent: config.worker_max_concurrent,
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        ..WorkerConfig::default()
    };

    let response = run(
        registry,
        rules,
        RunRequest {
            message: cli.message,
            mode: cli.mode.into(),
            context,
            conversation_id: cli.conversation_id,
            limits,
            with_worker: cli.with_worker,
            worker_config,
        },
    )
    .await;

    let ok = response.ok;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !ok {
        std::process::exit(EXIT_RUN_FAILED);
    }
    Ok(())
}
