use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use drill_core::config::parse_duration;
use drill_core::{ConnectionMode, DrillConfig, DrillMode};

#[derive(Parser, Debug)]
#[command(name = "drill-runner")]
#[command(about = "Timed resilience drills against a document store", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one drill until its running time elapses or Ctrl+C
    Run(RunArgs),

    /// Print the resolved configuration
    ShowConfig {
        /// Configuration file layered over the defaults
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Write a configuration template
    GenerateConfig {
        /// Output configuration file path
        #[arg(long, default_value = "drill.yaml")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file layered over the defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    /// Latency of every simulated store call, in milliseconds
    #[arg(long, default_value_t = 5)]
    pub simulated_latency_ms: u64,

    /// Regions the simulated store advertises, in service order
    #[arg(long, value_delimiter = ',', default_value = "East US,West US")]
    pub simulated_regions: Vec<String>,

    /// Write the final report as JSON to this path
    #[arg(long)]
    pub report_json: Option<PathBuf>,
}

/// Command-line values that win over every configuration source.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Account endpoint URL
    #[arg(long)]
    pub host: Option<String>,

    /// Account master key
    #[arg(long, env = "DRILL_MASTER_KEY", hide_env_values = true)]
    pub master_key: Option<String>,

    /// Identifier stamped on every record
    #[arg(long)]
    pub drill_id: Option<String>,

    /// continuous or stop-on-first-failure
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<DrillMode>,

    /// Total run length (e.g. "30m", "PT1H")
    #[arg(long, value_parser = parse_duration)]
    pub running_time: Option<Duration>,

    /// Each thread owns two loop slots
    #[arg(long)]
    pub threads: Option<usize>,

    /// Pause after every attempt, in milliseconds
    #[arg(long)]
    pub sleep_time_ms: Option<u64>,

    /// direct or gateway
    #[arg(long, value_parser = parse_connection_mode)]
    pub connection_mode: Option<ConnectionMode>,

    #[arg(long)]
    pub thin_client: Option<bool>,

    #[arg(long)]
    pub read_workload: Option<bool>,

    #[arg(long)]
    pub query_workload: Option<bool>,

    #[arg(long)]
    pub session_token_on_reads: Option<bool>,

    /// Register response-delay fault windows (continuous drills only)
    #[arg(long)]
    pub fault_injection: Option<bool>,
}

impl Overrides {
    pub fn apply(&self, config: &mut DrillConfig) {
        if let Some(host) = &self.host {
            config.account.host = host.clone();
        }
        if let Some(master_key) = &self.master_key {
            config.account.master_key = master_key.clone();
        }
        if let Some(drill_id) = &self.drill_id {
            config.account.drill_id = drill_id.clone();
        }
        if let Some(mode) = self.mode {
            config.workload.mode = mode;
        }
        if let Some(running_time) = self.running_time {
            config.workload.running_time = running_time;
        }
        if let Some(threads) = self.threads {
            config.workload.threads = threads;
        }
        if let Some(sleep_time_ms) = self.sleep_time_ms {
            config.workload.sleep_time_ms = sleep_time_ms;
        }
        if let Some(connection_mode) = self.connection_mode {
            config.store.connection_mode = connection_mode;
        }
        if let Some(thin_client) = self.thin_client {
            config.store.thin_client = thin_client;
        }
        if let Some(read_workload) = self.read_workload {
            config.workload.read_workload = read_workload;
        }
        if let Some(query_workload) = self.query_workload {
            config.workload.query_workload = query_workload;
        }
        if let Some(session_token_on_reads) = self.session_token_on_reads {
            config.workload.session_token_on_reads = session_token_on_reads;
        }
        if let Some(enabled) = self.fault_injection {
            config.fault_injection.enabled = enabled;
        }
    }
}

fn parse_mode(raw: &str) -> Result<DrillMode, String> {
    raw.parse().map_err(|err: drill_core::DrillError| err.to_string())
}

fn parse_connection_mode(raw: &str) -> Result<ConnectionMode, String> {
    match raw.parse::<ConnectionMode>() {
        Ok(mode) => Ok(mode),
        Err(never) => match never {},
    }
}
