//! Process-wide client tuning.
//!
//! Some store client knobs are global to the process rather than per client.
//! They are modelled as an explicit [`ClientTuning`] value that is handed to
//! the client factory and published in a [`TuningRegistry`] for the length of
//! a run. [`TuningRegistry::apply`] returns a [`TuningScope`] that clears the
//! registry when dropped, so teardown happens on every exit path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// How consecutive failures open a partition-level circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerType {
    ConsecutiveExceptionCountBased,
}

/// Partition-level circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionCircuitBreakerConfig {
    pub is_partition_level_circuit_breaker_enabled: bool,
    pub circuit_breaker_type: CircuitBreakerType,
    pub consecutive_exception_count_tolerated_for_reads: u32,
    pub consecutive_exception_count_tolerated_for_writes: u32,
}

impl Default for PartitionCircuitBreakerConfig {
    fn default() -> Self {
        Self {
            is_partition_level_circuit_breaker_enabled: true,
            circuit_breaker_type: CircuitBreakerType::ConsecutiveExceptionCountBased,
            consecutive_exception_count_tolerated_for_reads: 100,
            consecutive_exception_count_tolerated_for_writes: 50,
        }
    }
}

/// Fixed set of process-wide client knobs a drill sets before connecting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientTuning {
    pub per_partition_automatic_failover: bool,
    pub session_token_false_progress_merge: bool,
    pub e2e_timeout_error_hit_threshold: u32,
    pub e2e_timeout_error_hit_window: Duration,
    pub stale_partition_unavailability_refresh_interval: Duration,
    pub allowed_partition_unavailability_duration: Duration,
    pub partition_circuit_breaker: Option<PartitionCircuitBreakerConfig>,
    pub thin_client: bool,
    pub http2: bool,
}

impl ClientTuning {
    /// Preset for continuous drills.
    #[must_use]
    pub fn continuous(thin_client: bool) -> Self {
        Self {
            per_partition_automatic_failover: false,
            session_token_false_progress_merge: true,
            e2e_timeout_error_hit_threshold: 5,
            e2e_timeout_error_hit_window: Duration::from_secs(120),
            stale_partition_unavailability_refresh_interval: Duration::from_secs(60),
            allowed_partition_unavailability_duration: Duration::from_secs(30),
            partition_circuit_breaker: None,
            thin_client,
            http2: thin_client,
        }
    }

    /// Preset for stop-on-first-failure (session consistency) drills.
    #[must_use]
    pub fn session_consistency() -> Self {
        Self {
            per_partition_automatic_failover: true,
            session_token_false_progress_merge: true,
            e2e_timeout_error_hit_threshold: 5,
            e2e_timeout_error_hit_window: Duration::from_secs(120),
            stale_partition_unavailability_refresh_interval: Duration::from_secs(300),
            allowed_partition_unavailability_duration: Duration::from_secs(300),
            partition_circuit_breaker: Some(PartitionCircuitBreakerConfig::default()),
            thin_client: false,
            http2: false,
        }
    }

    /// Flattened `name -> value` view, as a client would read system properties.
    #[must_use]
    pub fn as_properties(&self) -> BTreeMap<&'static str, String> {
        let mut props = BTreeMap::new();
        if self.per_partition_automatic_failover {
            props.insert("per_partition_automatic_failover_enabled", "true".to_string());
        }
        props.insert(
            "session_token_false_progress_merge_enabled",
            self.session_token_false_progress_merge.to_string(),
        );
        props.insert(
            "e2e_timeout_error_hit_threshold",
            self.e2e_timeout_error_hit_threshold.to_string(),
        );
        props.insert(
            "e2e_timeout_error_hit_window_secs",
            self.e2e_timeout_error_hit_window.as_secs().to_string(),
        );
        props.insert(
            "stale_partition_unavailability_refresh_interval_secs",
            self.stale_partition_unavailability_refresh_interval
                .as_secs()
                .to_string(),
        );
        props.insert(
            "allowed_partition_unavailability_duration_secs",
            self.allowed_partition_unavailability_duration
                .as_secs()
                .to_string(),
        );
        if let Some(breaker) = &self.partition_circuit_breaker {
            if let Ok(json) = serde_json::to_string(breaker) {
                props.insert("partition_level_circuit_breaker_config", json);
            }
        }
        if self.thin_client {
            props.insert("thin_client_enabled", "true".to_string());
        }
        if self.http2 {
            props.insert("http2_enabled", "true".to_string());
        }
        props
    }
}

/// Which region a session-token retry should prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionSwitchHint {
    LocalRegionPreferred,
    RemoteRegionPreferred,
}

/// Retry policy for reads that miss the requested session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRetryPolicy {
    pub max_retries_per_region: Option<u32>,
    pub min_timeout_per_region: Option<Duration>,
    pub region_switch_hint: RegionSwitchHint,
}

impl SessionRetryPolicy {
    /// Retry twice per region, at least 10 s each, then go remote.
    #[must_use]
    pub fn remote_region_preferred() -> Self {
        Self {
            max_retries_per_region: Some(2),
            min_timeout_per_region: Some(Duration::from_secs(10)),
            region_switch_hint: RegionSwitchHint::RemoteRegionPreferred,
        }
    }

    /// Client defaults, staying local.
    #[must_use]
    pub fn local_region_preferred() -> Self {
        Self {
            max_retries_per_region: None,
            min_timeout_per_region: None,
            region_switch_hint: RegionSwitchHint::LocalRegionPreferred,
        }
    }
}

impl Default for SessionRetryPolicy {
    fn default() -> Self {
        Self::local_region_preferred()
    }
}

/// Holder of the tuning currently in effect for the process.
#[derive(Debug, Clone, Default)]
pub struct TuningRegistry {
    current: Arc<RwLock<Option<ClientTuning>>>,
}

impl TuningRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `tuning` until the returned scope is dropped.
    ///
    /// A previously applied tuning is replaced.
    #[must_use = "dropping the scope clears the tuning immediately"]
    pub fn apply(&self, tuning: ClientTuning) -> TuningScope {
        let previous = self.current.write().replace(tuning);
        if previous.is_some() {
            tracing::warn!("replacing client tuning that was never cleared");
        }
        tracing::debug!("client tuning applied");
        TuningScope {
            registry: self.clone(),
        }
    }

    /// Tuning currently in effect, if any.
    #[must_use]
    pub fn current(&self) -> Option<ClientTuning> {
        self.current.read().clone()
    }

    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.current.read().is_some()
    }

    fn clear(&self) {
        if self.current.write().take().is_some() {
            tracing::debug!("client tuning cleared");
        }
    }
}

/// Clears the registry on drop.
#[derive(Debug)]
pub struct TuningScope {
    registry: TuningRegistry,
}

impl TuningScope {
    /// Tuning held by this scope.
    #[must_use]
    pub fn tuning(&self) -> Option<ClientTuning> {
        self.registry.current()
    }
}

impl Drop for TuningScope {
    fn drop(&mut self) {
        self.registry.clear();
    }
}
