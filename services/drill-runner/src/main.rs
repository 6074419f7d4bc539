use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use drill_core::{DrillConfig, DrillResult, TracingSink};
use drill_engine::DrillEngine;
use drill_store::{InMemoryStore, InMemoryStoreFactory, SimulatedStoreConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

use cli::{Cli, Commands, LogFormat, Overrides, RunArgs};

const CONFIG_TEMPLATE: &str = r#"# Drill configuration
# Every key can also be set as DRILL__<SECTION>__<KEY>, e.g. DRILL__WORKLOAD__THREADS=8

account:
  host: https://drill-account.documents.example:443/
  master_key: ""            # or DRILL_MASTER_KEY
  preferred_regions: []     # discovered from the account when empty
  # drill_id: defaults to today's date (dd-mm-yyyy)

store:
  database: db01
  container: ct01
  partition_key_path: /id
  container_ttl_secs: 604800
  provisioned_throughput: 10000
  shared_throughput: false
  physical_partition_count: 1
  connection_mode: direct   # direct or gateway
  thin_client: false        # gateway only
  log_diagnostics_for_success: false

workload:
  mode: continuous          # continuous or stop-on-first-failure
  running_time: 30m         # humantime or ISO-8601 (PT30M)
  threads: 2
  sleep_time_ms: 2000
  read_workload: true
  query_workload: true
  session_token_on_reads: false

timeouts:
  write_e2e_enabled: false
  write_e2e: 3s
  read_e2e: 3s
  shutdown_grace: 30s

fault_injection:
  enabled: false
  windows: 2
  first_window_offset: 11m
  window_spacing: 30m
  window_duration: 20m
  response_delay: 11s
  region: East US
  suppress_service_requests: true
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_logging(cli.log_format);

    match cli.command {
        Commands::Run(args) => run(args).await?,

        Commands::ShowConfig { config, overrides } => {
            let config = resolve_config(config.as_deref(), &overrides)?;
            println!("{config}");
        }

        Commands::GenerateConfig { output } => {
            std::fs::write(&output, CONFIG_TEMPLATE)?;
            println!("Configuration template written to: {}", output.display());
            println!("\nEdit the file and use it with:");
            println!("  drill-runner run --config {}", output.display());
        }
    }

    Ok(())
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .init(),
    }
}

fn resolve_config(path: Option<&Path>, overrides: &Overrides) -> DrillResult<DrillConfig> {
    let mut config = match path {
        Some(path) => DrillConfig::from_file_unvalidated(path)?,
        None => DrillConfig::load_unvalidated()?,
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

async fn run(args: RunArgs) -> DrillResult<()> {
    let config = resolve_config(args.config.as_deref(), &args.overrides)?;
    tracing::info!("\n{config}");

    let store = Arc::new(InMemoryStore::new_with_config(SimulatedStoreConfig {
        latency: Duration::from_millis(args.simulated_latency_ms),
        regions: args.simulated_regions,
        track_history: false,
    }));
    let factory = Arc::new(InMemoryStoreFactory::new(Arc::clone(&store)));
    let engine = DrillEngine::new(factory, store, Arc::new(TracingSink));

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let report = engine
        .run_until(&config, config.workload.mode, shutdown)
        .await?;

    println!("{report}");

    if let Some(path) = args.report_json {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)?;
        tracing::info!(path = %path.display(), "report written");
    }

    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("received Ctrl+C, stopping drill"),
        _ = terminate => tracing::warn!("received SIGTERM, stopping drill"),
    }

    shutdown.cancel();
}
