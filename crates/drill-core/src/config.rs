//! Configuration management for drills
//!
//! Sources, lowest precedence first:
//! - Hardcoded defaults
//! - `./config/drill.{yaml,toml,json}`
//! - `/etc/drill/drill.{yaml,toml,json}`
//! - File named by `DRILL_CONFIG`
//! - Environment variables (`DRILL__WORKLOAD__THREADS=8`)
//!
//! Durations accept humantime (`30m`, `1h 15m`) or ISO-8601 (`PT30M`) forms.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DrillError, DrillResult};

/// Root configuration structure for a drill run
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DrillConfig {
    #[serde(default)]
    pub account: AccountConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub workload: WorkloadConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub fault_injection: FaultInjectionConfig,
}

impl DrillConfig {
    /// Load configuration from every source and validate it.
    pub fn load() -> DrillResult<Self> {
        let config = Self::load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from every source without validating it.
    ///
    /// Callers that layer further overrides on top must call
    /// [`DrillConfig::validate`] once they are done.
    pub fn load_unvalidated() -> DrillResult<Self> {
        let mut builder = Self::set_defaults(Config::builder())?;

        builder = builder
            .add_source(File::with_name("./config/drill").required(false))
            .add_source(File::with_name("/etc/drill/drill").required(false));

        if let Ok(config_path) = std::env::var("DRILL_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        // Example: DRILL__WORKLOAD__THREADS=8
        builder = builder.add_source(
            Environment::with_prefix("DRILL")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("account.preferred_regions")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Load configuration from a specific file on top of the defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> DrillResult<Self> {
        let config = Self::from_file_unvalidated(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Same as [`DrillConfig::from_file`] but leaves validation to the caller.
    pub fn from_file_unvalidated<P: AsRef<Path>>(path: P) -> DrillResult<Self> {
        Ok(Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Account
            .set_default("account.host", "")?
            .set_default("account.master_key", "")?
            .set_default("account.preferred_regions", Vec::<String>::new())?
            .set_default("account.drill_id", default_drill_id())?
            // Store
            .set_default("store.database", "db01")?
            .set_default("store.container", "ct01")?
            .set_default("store.partition_key_path", "/id")?
            .set_default("store.container_ttl_secs", 604_800)?
            .set_default("store.provisioned_throughput", 10_000)?
            .set_default("store.shared_throughput", false)?
            .set_default("store.physical_partition_count", 1)?
            .set_default("store.connection_mode", "direct")?
            .set_default("store.thin_client", false)?
            .set_default("store.log_diagnostics_for_success", false)?
            // Workload
            .set_default("workload.mode", "continuous")?
            .set_default("workload.running_time", "30m")?
            .set_default("workload.threads", 2)?
            .set_default("workload.sleep_time_ms", 2000)?
            .set_default("workload.read_workload", true)?
            .set_default("workload.query_workload", true)?
            .set_default("workload.session_token_on_reads", false)?
            // Timeouts
            .set_default("timeouts.write_e2e_enabled", false)?
            .set_default("timeouts.write_e2e", "3s")?
            .set_default("timeouts.read_e2e", "3s")?
            .set_default("timeouts.shutdown_grace", "30s")?
            // Fault injection
            .set_default("fault_injection.enabled", false)?
            .set_default("fault_injection.windows", 2)?
            .set_default("fault_injection.first_window_offset", "11m")?
            .set_default("fault_injection.window_spacing", "30m")?
            .set_default("fault_injection.window_duration", "20m")?
            .set_default("fault_injection.response_delay", "11s")?
            .set_default("fault_injection.region", "East US")?
            .set_default("fault_injection.suppress_service_requests", true)
    }

    /// Validate configuration values
    pub fn validate(&self) -> DrillResult<()> {
        if self.workload.threads == 0 {
            return Err(DrillError::invalid_config("workload.threads must be > 0"));
        }

        if self.workload.running_time.is_zero() {
            return Err(DrillError::invalid_config(
                "workload.running_time must be > 0",
            ));
        }

        if self.store.database.trim().is_empty() {
            return Err(DrillError::invalid_config("store.database must not be empty"));
        }

        if self.store.container.trim().is_empty() {
            return Err(DrillError::invalid_config(
                "store.container must not be empty",
            ));
        }

        if !self.store.partition_key_path.starts_with('/') {
            return Err(DrillError::invalid_config(format!(
                "store.partition_key_path must start with '/', got {:?}",
                self.store.partition_key_path
            )));
        }

        if self.store.physical_partition_count == 0 {
            return Err(DrillError::invalid_config(
                "store.physical_partition_count must be > 0",
            ));
        }

        if self.store.thin_client && self.store.connection_mode == ConnectionMode::Direct {
            return Err(DrillError::invalid_config(
                "store.thin_client requires store.connection_mode = gateway",
            ));
        }

        if self.fault_injection.enabled {
            if self.fault_injection.windows == 0 {
                return Err(DrillError::invalid_config(
                    "fault_injection.windows must be > 0 when injection is enabled",
                ));
            }
            if self.fault_injection.window_duration.is_zero() {
                return Err(DrillError::invalid_config(
                    "fault_injection.window_duration must be > 0 when injection is enabled",
                ));
            }
        }

        Ok(())
    }

    /// Host portion of the account endpoint.
    #[must_use]
    pub fn account_host(&self) -> &str {
        let host = self.account.host.as_str();
        let host = host
            .strip_prefix("https://")
            .or_else(|| host.strip_prefix("http://"))
            .unwrap_or(host);
        host.split(['/', ':']).next().unwrap_or(host)
    }
}

impl fmt::Display for DrillConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Drill configuration {{")?;
        writeln!(f, "  Account:")?;
        writeln!(f, "  - Host: {}", self.account.host)?;
        writeln!(f, "  - Master Key: {}", mask_secret(&self.account.master_key))?;
        writeln!(
            f,
            "  - Preferred Regions: [{}]",
            self.account.preferred_regions.join(", ")
        )?;
        writeln!(f, "  - Drill Id: {}", self.account.drill_id)?;
        writeln!(f, "  Store:")?;
        writeln!(f, "  - Database: {}", self.store.database)?;
        writeln!(f, "  - Container: {}", self.store.container)?;
        writeln!(f, "  - Partition Key Path: {}", self.store.partition_key_path)?;
        writeln!(f, "  - Container TTL: {} seconds", self.store.container_ttl_secs)?;
        writeln!(
            f,
            "  - Provisioned Throughput: {} RU/s",
            self.store.provisioned_throughput
        )?;
        writeln!(f, "  - Shared Throughput: {}", self.store.shared_throughput)?;
        writeln!(
            f,
            "  - Physical Partitions: {}",
            self.store.physical_partition_count
        )?;
        writeln!(f, "  - Connection Mode: {}", self.store.connection_mode)?;
        writeln!(f, "  - Thin Client: {}", self.store.thin_client)?;
        writeln!(
            f,
            "  - Diagnostics For Success: {}",
            self.store.log_diagnostics_for_success
        )?;
        writeln!(f, "  Workload:")?;
        writeln!(f, "  - Mode: {}", self.workload.mode)?;
        writeln!(
            f,
            "  - Running Time: {}",
            humantime::format_duration(self.workload.running_time)
        )?;
        writeln!(f, "  - Threads: {}", self.workload.threads)?;
        writeln!(f, "  - Sleep Time: {} ms", self.workload.sleep_time_ms)?;
        writeln!(f, "  - Read Workload: {}", self.workload.read_workload)?;
        writeln!(f, "  - Query Workload: {}", self.workload.query_workload)?;
        writeln!(
            f,
            "  - Session Token On Reads: {}",
            self.workload.session_token_on_reads
        )?;
        writeln!(f, "  Timeouts:")?;
        writeln!(
            f,
            "  - Write E2E: {} (enabled: {})",
            humantime::format_duration(self.timeouts.write_e2e),
            self.timeouts.write_e2e_enabled
        )?;
        writeln!(
            f,
            "  - Read E2E: {}",
            humantime::format_duration(self.timeouts.read_e2e)
        )?;
        writeln!(
            f,
            "  - Shutdown Grace: {}",
            humantime::format_duration(self.timeouts.shutdown_grace)
        )?;
        writeln!(f, "  Fault Injection:")?;
        writeln!(f, "  - Enabled: {}", self.fault_injection.enabled)?;
        writeln!(f, "  - Windows: {}", self.fault_injection.windows)?;
        writeln!(
            f,
            "  - First Window Offset: {}",
            humantime::format_duration(self.fault_injection.first_window_offset)
        )?;
        writeln!(
            f,
            "  - Window Spacing: {}",
            humantime::format_duration(self.fault_injection.window_spacing)
        )?;
        writeln!(
            f,
            "  - Window Duration: {}",
            humantime::format_duration(self.fault_injection.window_duration)
        )?;
        writeln!(
            f,
            "  - Response Delay: {}",
            humantime::format_duration(self.fault_injection.response_delay)
        )?;
        writeln!(f, "  - Region: {}", self.fault_injection.region)?;
        write!(f, "}}")
    }
}

/// Keeps the first four characters of a secret.
fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "<unset>".to_string();
    }
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}****")
}

/// Current UTC date as `dd-MM-yyyy`.
#[must_use]
pub fn default_drill_id() -> String {
    Utc::now().format("%d-%m-%Y").to_string()
}

/// Account and client identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    /// Account endpoint URL
    pub host: String,

    /// Account master key
    pub master_key: String,

    /// Preferred read regions; discovered from the account when empty
    #[serde(default)]
    pub preferred_regions: Vec<String>,

    /// Identifier tying every record of a drill together
    pub drill_id: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            master_key: String::new(),
            preferred_regions: Vec::new(),
            drill_id: default_drill_id(),
        }
    }
}

/// Target database and client connectivity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    pub database: String,
    pub container: String,
    pub partition_key_path: String,
    pub container_ttl_secs: u32,

    /// Manual throughput for the database (shared) or container (dedicated)
    pub provisioned_throughput: u32,

    /// Put throughput on the database instead of the container
    pub shared_throughput: bool,

    /// Physical partitions to provision for session-consistency drills
    pub physical_partition_count: u32,

    pub connection_mode: ConnectionMode,

    /// Thin client over HTTP/2; gateway mode only
    pub thin_client: bool,

    /// Attach diagnostics to success records as well as failures
    pub log_diagnostics_for_success: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: "db01".to_string(),
            container: "ct01".to_string(),
            partition_key_path: "/id".to_string(),
            container_ttl_secs: 604_800,
            provisioned_throughput: 10_000,
            shared_throughput: false,
            physical_partition_count: 1,
            connection_mode: ConnectionMode::Direct,
            thin_client: false,
            log_diagnostics_for_success: false,
        }
    }
}

/// Workload shape
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkloadConfig {
    pub mode: DrillMode,

    /// Total run length
    #[serde(with = "duration_serde")]
    pub running_time: Duration,

    /// Parallelism; each thread owns two loop slots
    pub threads: usize,

    /// Pause after every attempt in milliseconds
    pub sleep_time_ms: u64,

    pub read_workload: bool,
    pub query_workload: bool,

    /// Attach the latest write's session token to designated reads
    pub session_token_on_reads: bool,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            mode: DrillMode::Continuous,
            running_time: Duration::from_secs(30 * 60),
            threads: 2,
            sleep_time_ms: 2000,
            read_workload: true,
            query_workload: true,
            session_token_on_reads: false,
        }
    }
}

impl WorkloadConfig {
    /// Pause after every attempt
    pub fn sleep_time(&self) -> Duration {
        Duration::from_millis(self.sleep_time_ms)
    }
}

/// End-to-end operation timeouts and shutdown budget
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Bound continuous-mode writes by `write_e2e`
    pub write_e2e_enabled: bool,

    #[serde(with = "duration_serde")]
    pub write_e2e: Duration,

    #[serde(with = "duration_serde")]
    pub read_e2e: Duration,

    /// How long loops may take to wind down after the deadline
    #[serde(with = "duration_serde")]
    pub shutdown_grace: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            write_e2e_enabled: false,
            write_e2e: Duration::from_secs(3),
            read_e2e: Duration::from_secs(3),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Response-delay fault schedule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FaultInjectionConfig {
    pub enabled: bool,

    /// Number of delay windows
    pub windows: u32,

    /// Start of the first window, relative to run start
    #[serde(with = "duration_serde")]
    pub first_window_offset: Duration,

    /// Offset between consecutive window starts
    #[serde(with = "duration_serde")]
    pub window_spacing: Duration,

    #[serde(with = "duration_serde")]
    pub window_duration: Duration,

    /// Delay added to every matching response
    #[serde(with = "duration_serde")]
    pub response_delay: Duration,

    pub region: String,
    pub suppress_service_requests: bool,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            windows: 2,
            first_window_offset: Duration::from_secs(11 * 60),
            window_spacing: Duration::from_secs(30 * 60),
            window_duration: Duration::from_secs(20 * 60),
            response_delay: Duration::from_secs(11),
            region: "East US".to_string(),
            suppress_service_requests: true,
        }
    }
}

/// Transport used by the store client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionMode {
    #[default]
    Direct,
    Gateway,
}

impl ConnectionMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "DIRECT",
            Self::Gateway => "GATEWAY",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = std::convert::Infallible;

    /// Anything other than `gateway` (case and spaces ignored) means direct.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        if normalized == "gateway" {
            Ok(Self::Gateway)
        } else {
            Ok(Self::Direct)
        }
    }
}

impl Serialize for ConnectionMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str().to_ascii_lowercase())
    }
}

impl<'de> Deserialize<'de> for ConnectionMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.parse() {
            Ok(mode) => Ok(mode),
            Err(never) => match never {},
        }
    }
}

/// Drill variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrillMode {
    /// Create/read/query traffic for the whole run, optionally under injected
    /// response delays.
    #[default]
    Continuous,
    /// Writes into one partition until the first availability failure while
    /// a designated reader keeps reading with the latest session token.
    StopOnFirstFailure,
}

impl DrillMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::StopOnFirstFailure => "stop-on-first-failure",
        }
    }
}

impl fmt::Display for DrillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrillMode {
    type Err = DrillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "" | "continuous" | "ppafdrill" | "ppafdrillworkload" => Ok(Self::Continuous),
            "stoponfirstfailure"
            | "sessionconsistency"
            | "ppafforsessionconsistency"
            | "ppafforsessionconsistencyworkload" => Ok(Self::StopOnFirstFailure),
            _ => Err(DrillError::invalid_config(format!(
                "unknown drill mode {s:?} (expected continuous or stop-on-first-failure)"
            ))),
        }
    }
}

impl Serialize for DrillMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DrillMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses a humantime (`90s`, `1h 15m`) or ISO-8601 (`PT1H15M`) duration.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if trimmed.starts_with(['P', 'p']) {
        return parse_iso8601_duration(trimmed);
    }
    humantime::parse_duration(trimmed).map_err(|e| format!("invalid duration {raw:?}: {e}"))
}

/// `P[nD][T[nH][nM][n[.f]S]]`; years, months and weeks are rejected.
fn parse_iso8601_duration(raw: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid ISO-8601 duration {raw:?}");
    let upper = raw.to_ascii_uppercase();
    let body = upper.strip_prefix('P').ok_or_else(invalid)?;
    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) if !time.is_empty() => (date, Some(time)),
        Some(_) => return Err(invalid()),
        None => (body, None),
    };
    if date_part.is_empty() && time_part.is_none() {
        return Err(invalid());
    }

    let mut total = 0f64;
    let mut number = String::new();

    for c in date_part.chars() {
        match c {
            '0'..='9' | '.' => number.push(c),
            'D' => {
                total += take_number(&mut number).ok_or_else(invalid)? * 86_400.0;
            }
            _ => return Err(invalid()),
        }
    }
    if !number.is_empty() {
        return Err(invalid());
    }

    if let Some(time) = time_part {
        for c in time.chars() {
            match c {
                '0'..='9' | '.' => number.push(c),
                'H' => total += take_number(&mut number).ok_or_else(invalid)? * 3600.0,
                'M' => total += take_number(&mut number).ok_or_else(invalid)? * 60.0,
                'S' => total += take_number(&mut number).ok_or_else(invalid)?,
                _ => return Err(invalid()),
            }
        }
        if !number.is_empty() {
            return Err(invalid());
        }
    }

    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}

fn take_number(buffer: &mut String) -> Option<f64> {
    let value = buffer.parse::<f64>().ok();
    buffer.clear();
    value
}

/// Serde adapter for durations written as strings (or whole seconds).
pub mod duration_serde {
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a duration such as \"30m\", \"PT30M\" or a number of seconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                super::parse_duration(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("duration must not be negative"))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}
