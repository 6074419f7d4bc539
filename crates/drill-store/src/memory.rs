//! In-memory simulated store
//!
//! Implements [`StoreClient`] and [`FaultInjector`] without a remote backend so
//! drills can run end to end in tests and dry runs.
//!
//! # Features
//!
//! - **Scripted Failures**: per-operation queues of failures, consumed in order
//! - **Always-Fail Mode**: a failure returned for every call of one operation
//! - **Latency Simulation**: fixed delay per call, bounded by end-to-end timeouts
//! - **Session Tokens**: a monotonically increasing LSN rendered as `0:1#<lsn>`
//! - **Fault Windows**: registered response-delay rules applied while active
//! - **Call History**: every call with its status for assertions
//!
//! # Examples
//!
//! ```rust
//! use drill_core::store::status;
//! use drill_core::{ContainerRef, DrillItem, ItemRequestOptions, StoreClient};
//! use drill_store::{InMemoryStore, ScriptedFailure, StoreOperation};
//!
//! # async fn example() {
//! let store = InMemoryStore::new();
//! let target = ContainerRef::new("db01", "ct01");
//! store.ensure_container(&target, "/id");
//!
//! store.fail_next(StoreOperation::CreateItem, [ScriptedFailure::Unavailable]);
//!
//! let item = DrillItem::random();
//! let options = ItemRequestOptions::unbounded();
//! let first = store.create_item(&target, &item, &options).await;
//! assert_eq!(first.unwrap_err().status_code, status::SERVICE_UNAVAILABLE);
//!
//! let second = store.create_item(&target, &item, &options).await;
//! assert_eq!(second.unwrap().status_code, status::CREATED);
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use drill_core::store::status;
use drill_core::{
    ClientSettings, ConnectionMode, ContainerRef, ContainerSpec, DatabaseSpec, DrillError,
    DrillItem, DrillResult, FaultEffect, FaultInjector, FaultOperationType, FaultRule,
    ItemRequestOptions, QuerySpec, StoreClient, StoreClientFactory, StoreFailure, StoreResponse,
    StoreResult,
};

const SUB_STATUS_READ_SESSION_NOT_AVAILABLE: u32 = 1002;
const SUB_STATUS_THROTTLED: u32 = 3200;

/// Store call kinds, used to script failures and filter history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    CreateDatabase,
    CreateContainer,
    UpsertItem,
    CreateItem,
    ReadItem,
    QueryItems,
}

impl StoreOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDatabase => "create_database",
            Self::CreateContainer => "create_container",
            Self::UpsertItem => "upsert_item",
            Self::CreateItem => "create_item",
            Self::ReadItem => "read_item",
            Self::QueryItems => "query_items",
        }
    }

    fn fault_operation(self) -> Option<FaultOperationType> {
        match self {
            Self::ReadItem => Some(FaultOperationType::ReadItem),
            Self::CreateItem => Some(FaultOperationType::CreateItem),
            Self::UpsertItem => Some(FaultOperationType::UpsertItem),
            Self::QueryItems => Some(FaultOperationType::QueryItems),
            Self::CreateDatabase | Self::CreateContainer => None,
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scripted store failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// 503, the partition or region is unreachable.
    Unavailable,

    /// 408 with the end-to-end timeout sub-status.
    Timeout,

    /// 429, request rate too large.
    Throttled,

    /// Any other status.
    Status {
        status_code: u16,
        sub_status_code: u32,
        message: &'static str,
    },

    /// No failure.
    Ok,
}

impl ScriptedFailure {
    fn to_failure(&self) -> Option<StoreFailure> {
        match self {
            Self::Unavailable => Some(StoreFailure::new(
                status::SERVICE_UNAVAILABLE,
                0,
                "Service is currently unavailable",
            )),
            Self::Timeout => Some(StoreFailure::new(
                status::REQUEST_TIMEOUT,
                status::SUB_STATUS_E2E_TIMEOUT,
                "Request timed out",
            )),
            Self::Throttled => Some(StoreFailure::new(
                status::TOO_MANY_REQUESTS,
                SUB_STATUS_THROTTLED,
                "Request rate is large",
            )),
            Self::Status {
                status_code,
                sub_status_code,
                message,
            } => Some(StoreFailure::new(*status_code, *sub_status_code, *message)),
            Self::Ok => None,
        }
    }
}

/// Simulated store configuration.
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Delay added to every call.
    pub latency: Duration,

    /// Regions in service order; the first one serves every request.
    pub regions: Vec<String>,

    /// Enable call history tracking.
    pub track_history: bool,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(5),
            regions: vec!["East US".to_string(), "West US".to_string()],
            track_history: true,
        }
    }
}

/// One served call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub operation: StoreOperation,

    /// Item id, query parameter or resource name.
    pub key: String,

    pub status_code: u16,

    /// Session token attached to the request.
    pub request_session_token: Option<String>,

    pub timestamp: Instant,
}

impl CallRecord {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status_code < 400
    }
}

#[derive(Debug)]
struct RegisteredRule {
    target: ContainerRef,
    rule: FaultRule,
    registered_at: Instant,
}

#[derive(Debug, Default)]
struct ContainerState {
    partition_key_path: String,
    dedicated_throughput: Option<u32>,
    items: HashMap<(String, String), DrillItem>,
}

/// In-memory store with scripted failures and fault windows.
pub struct InMemoryStore {
    databases: RwLock<HashMap<String, Option<u32>>>,
    containers: RwLock<HashMap<ContainerRef, ContainerState>>,
    failure_queues: RwLock<HashMap<StoreOperation, VecDeque<ScriptedFailure>>>,
    persistent_failures: RwLock<HashMap<StoreOperation, ScriptedFailure>>,
    config: SimulatedStoreConfig,
    serving_regions: RwLock<Vec<String>>,
    connection_mode: RwLock<ConnectionMode>,
    lsn: AtomicU64,
    rules: RwLock<Vec<RegisteredRule>>,
    rule_batches: AtomicUsize,
    rule_rejection: RwLock<Option<String>>,
    call_history: RwLock<Vec<CallRecord>>,
    close_count: AtomicUsize,
}

impl InMemoryStore {
    /// Store with default config and no failures.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_config(SimulatedStoreConfig::default())
    }

    #[must_use]
    pub fn new_with_config(config: SimulatedStoreConfig) -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            containers: RwLock::new(HashMap::new()),
            failure_queues: RwLock::new(HashMap::new()),
            persistent_failures: RwLock::new(HashMap::new()),
            serving_regions: RwLock::new(config.regions.clone()),
            config,
            connection_mode: RwLock::new(ConnectionMode::Direct),
            lsn: AtomicU64::new(0),
            rules: RwLock::new(Vec::new()),
            rule_batches: AtomicUsize::new(0),
            rule_rejection: RwLock::new(None),
            call_history: RwLock::new(Vec::new()),
            close_count: AtomicUsize::new(0),
        }
    }

    /// Queues failures for the next calls of `operation`, consumed in order.
    /// Once the queue is empty calls succeed again.
    pub fn fail_next(
        &self,
        operation: StoreOperation,
        failures: impl IntoIterator<Item = ScriptedFailure>,
    ) {
        self.failure_queues
            .write()
            .entry(operation)
            .or_default()
            .extend(failures);
    }

    /// Every call of `operation` fails with `failure` until cleared.
    pub fn fail_always(&self, operation: StoreOperation, failure: ScriptedFailure) {
        self.persistent_failures.write().insert(operation, failure);
    }

    /// Queues `calls` random outcomes for `operation`, failing with
    /// probability `failure_rate` (0.0-1.0).
    pub fn fail_randomly(&self, operation: StoreOperation, failure_rate: f64, calls: usize) {
        use rand::Rng;

        let pattern: Vec<ScriptedFailure> = {
            let mut rng = rand::thread_rng();
            (0..calls)
                .map(|_| {
                    if rng.gen::<f64>() < failure_rate {
                        ScriptedFailure::Unavailable
                    } else {
                        ScriptedFailure::Ok
                    }
                })
                .collect()
        };

        self.fail_next(operation, pattern);
    }

    /// Drops queued and persistent failures of `operation`.
    pub fn clear_failures(&self, operation: StoreOperation) {
        self.failure_queues.write().remove(&operation);
        self.persistent_failures.write().remove(&operation);
    }

    /// Makes `configure_rules` fail with `message`.
    pub fn reject_fault_rules(&self, message: impl Into<String>) {
        *self.rule_rejection.write() = Some(message.into());
    }

    /// Creates the database and container directly, bypassing failures.
    pub fn ensure_container(&self, target: &ContainerRef, partition_key_path: &str) {
        self.databases
            .write()
            .entry(target.database.clone())
            .or_insert(None);
        self.containers
            .write()
            .entry(target.clone())
            .or_insert_with(|| ContainerState {
                partition_key_path: partition_key_path.to_string(),
                ..ContainerState::default()
            });
    }

    /// Applies the parts of client settings a simulated store can honour.
    pub fn apply_settings(&self, settings: &ClientSettings) {
        *self.connection_mode.write() = settings.connection_mode;
        if !settings.preferred_regions.is_empty() {
            *self.serving_regions.write() = settings.preferred_regions.clone();
        }
    }

    #[must_use]
    pub fn connection_mode(&self) -> ConnectionMode {
        *self.connection_mode.read()
    }

    /// Regions in service order.
    #[must_use]
    pub fn serving_regions(&self) -> Vec<String> {
        self.serving_regions.read().clone()
    }

    /// Regions the simulated store advertises for discovery.
    #[must_use]
    pub fn account_regions(&self) -> Vec<String> {
        self.config.regions.clone()
    }

    /// Get call history for assertions.
    #[must_use]
    pub fn call_history(&self) -> Vec<CallRecord> {
        self.call_history.read().clone()
    }

    /// Calls of `operation` in call order.
    #[must_use]
    pub fn calls(&self, operation: StoreOperation) -> Vec<CallRecord> {
        self.call_history
            .read()
            .iter()
            .filter(|record| record.operation == operation)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn successful(&self, operation: StoreOperation) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|record| record.operation == operation && record.succeeded())
            .count()
    }

    #[must_use]
    pub fn failed(&self, operation: StoreOperation) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|record| record.operation == operation && !record.succeeded())
            .count()
    }

    /// Number of items stored in `target`.
    #[must_use]
    pub fn item_count(&self, target: &ContainerRef) -> usize {
        self.containers
            .read()
            .get(target)
            .map_or(0, |container| container.items.len())
    }

    #[must_use]
    pub fn contains_item(&self, target: &ContainerRef, id: &str, partition_key: &str) -> bool {
        self.containers.read().get(target).is_some_and(|container| {
            container
                .items
                .contains_key(&(partition_key.to_string(), id.to_string()))
        })
    }

    #[must_use]
    pub fn has_database(&self, name: &str) -> bool {
        self.databases.read().contains_key(name)
    }

    /// Throughput provisioned on a database, if any.
    #[must_use]
    pub fn database_throughput(&self, name: &str) -> Option<u32> {
        self.databases.read().get(name).copied().flatten()
    }

    /// Throughput provisioned on a container, if any.
    #[must_use]
    pub fn container_throughput(&self, target: &ContainerRef) -> Option<u32> {
        self.containers
            .read()
            .get(target)
            .and_then(|container| container.dedicated_throughput)
    }

    /// Partition key path of a provisioned container.
    #[must_use]
    pub fn partition_key_path(&self, target: &ContainerRef) -> Option<String> {
        self.containers
            .read()
            .get(target)
            .map(|container| container.partition_key_path.clone())
    }

    /// Rules registered for `target`, in registration order.
    #[must_use]
    pub fn fault_rules(&self, target: &ContainerRef) -> Vec<FaultRule> {
        self.rules
            .read()
            .iter()
            .filter(|registered| &registered.target == target)
            .map(|registered| registered.rule.clone())
            .collect()
    }

    /// Number of `configure_rules` calls accepted.
    #[must_use]
    pub fn rule_batches(&self) -> usize {
        self.rule_batches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Latest session token handed out.
    #[must_use]
    pub fn current_session_token(&self) -> String {
        format_session_token(self.lsn.load(Ordering::SeqCst))
    }

    /// Reset data, failures, rules and history.
    pub fn reset(&self) {
        self.databases.write().clear();
        self.containers.write().clear();
        self.failure_queues.write().clear();
        self.persistent_failures.write().clear();
        self.rules.write().clear();
        self.call_history.write().clear();
        *self.rule_rejection.write() = None;
        self.lsn.store(0, Ordering::SeqCst);
        self.rule_batches.store(0, Ordering::SeqCst);
        self.close_count.store(0, Ordering::SeqCst);
    }

    fn check_failure(&self, operation: StoreOperation) -> Option<StoreFailure> {
        let queued = self
            .failure_queues
            .write()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(failure) => failure.to_failure(),
            None => self
                .persistent_failures
                .read()
                .get(&operation)
                .and_then(ScriptedFailure::to_failure),
        }
    }

    fn record_call(
        &self,
        operation: StoreOperation,
        key: &str,
        status_code: u16,
        request_session_token: Option<&str>,
    ) {
        if self.config.track_history {
            self.call_history.write().push(CallRecord {
                operation,
                key: key.to_string(),
                status_code,
                request_session_token: request_session_token.map(str::to_string),
                timestamp: Instant::now(),
            });
        }
    }

    fn primary_region(&self) -> Vec<String> {
        self.serving_regions
            .read()
            .first()
            .cloned()
            .into_iter()
            .collect()
    }

    /// Response delay of the first active rule matching this call.
    fn active_fault(
        &self,
        operation: StoreOperation,
        target: &ContainerRef,
        region: Option<&str>,
    ) -> Option<(String, Duration, bool)> {
        let fault_operation = operation.fault_operation()?;
        let region = region?;
        let connection = self.connection_mode();
        let now = Instant::now();

        self.rules.read().iter().find_map(|registered| {
            let elapsed = now.saturating_duration_since(registered.registered_at);
            let applies = &registered.target == target
                && registered.rule.is_active_at(elapsed)
                && registered.rule.matches(fault_operation, connection, region);
            if !applies {
                return None;
            }
            match &registered.rule.effect {
                FaultEffect::ResponseDelay {
                    delay,
                    suppress_service_requests,
                } => Some((
                    registered.rule.id.clone(),
                    *delay,
                    *suppress_service_requests,
                )),
            }
        })
    }

    /// Latency, fault windows, timeouts and scripted failures for one call.
    /// Returns the contacted regions on success.
    async fn simulate(
        &self,
        operation: StoreOperation,
        target: Option<&ContainerRef>,
        options: &ItemRequestOptions,
    ) -> Result<Vec<String>, StoreFailure> {
        let regions = self.primary_region();
        let fault = target.and_then(|target| {
            self.active_fault(operation, target, regions.first().map(String::as_str))
        });

        let fault_delay = fault.as_ref().map_or(Duration::ZERO, |(_, delay, _)| *delay);
        let total = self.config.latency + fault_delay;

        if let Some(timeout) = options.end_to_end_timeout {
            if total > timeout {
                tokio::time::sleep(timeout).await;
                let failure = StoreFailure::new(
                    status::REQUEST_TIMEOUT,
                    status::SUB_STATUS_E2E_TIMEOUT,
                    format!(
                        "end-to-end timeout of {}ms exceeded",
                        timeout.as_millis()
                    ),
                )
                .with_regions(regions.clone())
                .with_diagnostics(self.diagnostics(operation, &regions, fault.as_ref()));
                return Err(failure);
            }
        }

        tokio::time::sleep(total).await;

        if let Some((rule_id, _, true)) = &fault {
            let failure = StoreFailure::new(
                status::REQUEST_TIMEOUT,
                0,
                format!("request suppressed by fault rule {rule_id}"),
            )
            .with_regions(regions.clone())
            .with_diagnostics(self.diagnostics(operation, &regions, fault.as_ref()));
            return Err(failure);
        }

        if let Some(failure) = self.check_failure(operation) {
            let diagnostics = self.diagnostics(operation, &regions, fault.as_ref());
            return Err(failure
                .with_regions(regions)
                .with_diagnostics(diagnostics));
        }

        Ok(regions)
    }

    fn diagnostics(
        &self,
        operation: StoreOperation,
        regions: &[String],
        fault: Option<&(String, Duration, bool)>,
    ) -> String {
        serde_json::json!({
            "operation": operation.as_str(),
            "connectionMode": self.connection_mode().as_str(),
            "contactedRegions": regions,
            "simulatedLatencyMs": self.config.latency.as_millis() as u64,
            "faultRule": fault.map(|(id, _, _)| id.as_str()),
        })
        .to_string()
    }

    fn response(
        &self,
        operation: StoreOperation,
        status_code: u16,
        regions: Vec<String>,
        session_token: Option<String>,
        item_count: usize,
    ) -> StoreResponse {
        StoreResponse {
            status_code,
            session_token,
            diagnostics: self.diagnostics(operation, &regions, None),
            contacted_regions: regions,
            item_count,
        }
    }

    fn fail(
        &self,
        operation: StoreOperation,
        key: &str,
        request_token: Option<&str>,
        failure: StoreFailure,
    ) -> StoreResult {
        self.record_call(operation, key, failure.status_code, request_token);
        tracing::debug!(
            operation = %operation,
            key,
            status_code = failure.status_code,
            "simulated store call failed"
        );
        Err(failure)
    }

    fn missing_container(target: &ContainerRef, regions: Vec<String>) -> StoreFailure {
        StoreFailure::new(
            status::NOT_FOUND,
            0,
            format!("container {target} does not exist"),
        )
        .with_regions(regions)
    }

    fn next_session_token(&self) -> String {
        format_session_token(self.lsn.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn write_item(
        &self,
        target: &ContainerRef,
        item: &DrillItem,
        overwrite: bool,
        regions: &[String],
    ) -> Result<u16, StoreFailure> {
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(target)
            .ok_or_else(|| Self::missing_container(target, regions.to_vec()))?;
        let partition = item.partition_value(&container.partition_key_path).to_string();
        let key = (partition, item.id.clone());

        if container.items.contains_key(&key) {
            if !overwrite {
                return Err(StoreFailure::new(
                    status::CONFLICT,
                    0,
                    format!("item {} already exists", item.id),
                )
                .with_regions(regions.to_vec()));
            }
            container.items.insert(key, item.clone());
            Ok(status::OK)
        } else {
            container.items.insert(key, item.clone());
            Ok(status::CREATED)
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn format_session_token(lsn: u64) -> String {
    format!("0:1#{lsn}")
}

fn parse_session_lsn(token: &str) -> Option<u64> {
    token.rsplit_once('#').and_then(|(_, lsn)| lsn.parse().ok())
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn create_database_if_not_exists(&self, database: &DatabaseSpec) -> StoreResult {
        let operation = StoreOperation::CreateDatabase;
        let regions = match self
            .simulate(operation, None, &ItemRequestOptions::unbounded())
            .await
        {
            Ok(regions) => regions,
            Err(failure) => return self.fail(operation, &database.name, None, failure),
        };

        let created = {
            let mut databases = self.databases.write();
            if databases.contains_key(&database.name) {
                false
            } else {
                databases.insert(database.name.clone(), database.shared_throughput);
                true
            }
        };

        let status_code = if created { status::CREATED } else { status::OK };
        self.record_call(operation, &database.name, status_code, None);
        Ok(self.response(operation, status_code, regions, None, 0))
    }

    async fn create_container_if_not_exists(
        &self,
        database: &str,
        container: &ContainerSpec,
    ) -> StoreResult {
        let operation = StoreOperation::CreateContainer;
        let regions = match self
            .simulate(operation, None, &ItemRequestOptions::unbounded())
            .await
        {
            Ok(regions) => regions,
            Err(failure) => return self.fail(operation, &container.name, None, failure),
        };

        if !self.has_database(database) {
            let failure = StoreFailure::new(
                status::NOT_FOUND,
                0,
                format!("database {database} does not exist"),
            )
            .with_regions(regions);
            return self.fail(operation, &container.name, None, failure);
        }

        let target = ContainerRef::new(database, container.name.clone());
        let created = {
            let mut containers = self.containers.write();
            if containers.contains_key(&target) {
                false
            } else {
                containers.insert(
                    target,
                    ContainerState {
                        partition_key_path: container.partition_key_path.clone(),
                        dedicated_throughput: container.dedicated_throughput,
                        items: HashMap::new(),
                    },
                );
                true
            }
        };

        let status_code = if created { status::CREATED } else { status::OK };
        self.record_call(operation, &container.name, status_code, None);
        Ok(self.response(operation, status_code, regions, None, 0))
    }

    async fn upsert_item(
        &self,
        target: &ContainerRef,
        item: &DrillItem,
        options: &ItemRequestOptions,
    ) -> StoreResult {
        let operation = StoreOperation::UpsertItem;
        let regions = match self.simulate(operation, Some(target), options).await {
            Ok(regions) => regions,
            Err(failure) => return self.fail(operation, &item.id, None, failure),
        };

        match self.write_item(target, item, true, &regions) {
            Ok(status_code) => {
                let token = self.next_session_token();
                self.record_call(operation, &item.id, status_code, None);
                Ok(self.response(operation, status_code, regions, Some(token), 1))
            }
            Err(failure) => self.fail(operation, &item.id, None, failure),
        }
    }

    async fn create_item(
        &self,
        target: &ContainerRef,
        item: &DrillItem,
        options: &ItemRequestOptions,
    ) -> StoreResult {
        let operation = StoreOperation::CreateItem;
        let regions = match self.simulate(operation, Some(target), options).await {
            Ok(regions) => regions,
            Err(failure) => return self.fail(operation, &item.id, None, failure),
        };

        match self.write_item(target, item, false, &regions) {
            Ok(status_code) => {
                let token = self.next_session_token();
                self.record_call(operation, &item.id, status_code, None);
                Ok(self.response(operation, status_code, regions, Some(token), 1))
            }
            Err(failure) => self.fail(operation, &item.id, None, failure),
        }
    }

    async fn read_item(
        &self,
        target: &ContainerRef,
        id: &str,
        partition_key: &str,
        options: &ItemRequestOptions,
    ) -> StoreResult {
        let operation = StoreOperation::ReadItem;
        let request_token = options.session_token.as_deref();
        let regions = match self.simulate(operation, Some(target), options).await {
            Ok(regions) => regions,
            Err(failure) => return self.fail(operation, id, request_token, failure),
        };

        let current_lsn = self.lsn.load(Ordering::SeqCst);
        if let Some(requested) = request_token.and_then(parse_session_lsn) {
            if requested > current_lsn {
                let failure = StoreFailure::new(
                    status::NOT_FOUND,
                    SUB_STATUS_READ_SESSION_NOT_AVAILABLE,
                    format!("read session {requested} not available, replica at {current_lsn}"),
                )
                .with_regions(regions);
                return self.fail(operation, id, request_token, failure);
            }
        }

        let found = {
            let containers = self.containers.read();
            match containers.get(target) {
                Some(container) => Ok(container
                    .items
                    .contains_key(&(partition_key.to_string(), id.to_string()))),
                None => Err(()),
            }
        };

        match found {
            Ok(true) => {
                self.record_call(operation, id, status::OK, request_token);
                Ok(self.response(
                    operation,
                    status::OK,
                    regions,
                    Some(format_session_token(current_lsn)),
                    1,
                ))
            }
            Ok(false) => {
                let failure =
                    StoreFailure::new(status::NOT_FOUND, 0, format!("item {id} not found"))
                        .with_regions(regions);
                self.fail(operation, id, request_token, failure)
            }
            Err(()) => {
                let failure = Self::missing_container(target, regions);
                self.fail(operation, id, request_token, failure)
            }
        }
    }

    async fn query_items(
        &self,
        target: &ContainerRef,
        query: &QuerySpec,
        options: &ItemRequestOptions,
    ) -> StoreResult {
        let operation = StoreOperation::QueryItems;
        let key = query.parameter("@id").unwrap_or(&query.text).to_string();
        let regions = match self.simulate(operation, Some(target), options).await {
            Ok(regions) => regions,
            Err(failure) => return self.fail(operation, &key, None, failure),
        };

        let matched = {
            let containers = self.containers.read();
            containers.get(target).map(|container| match query.parameter("@id") {
                Some(id) => container.items.values().filter(|item| item.id == id).count(),
                None => container.items.len(),
            })
        };

        match matched {
            Some(item_count) => {
                self.record_call(operation, &key, status::OK, None);
                let token = format_session_token(self.lsn.load(Ordering::SeqCst));
                Ok(self.response(operation, status::OK, regions, Some(token), item_count))
            }
            None => {
                let failure = Self::missing_container(target, regions);
                self.fail(operation, &key, None, failure)
            }
        }
    }

    async fn close(&self) {
        let previous = self.close_count.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            tracing::warn!(closes = previous + 1, "simulated store closed more than once");
        }
    }
}

#[async_trait]
impl FaultInjector for InMemoryStore {
    async fn configure_rules(&self, target: &ContainerRef, rules: Vec<FaultRule>) -> DrillResult<()> {
        if let Some(message) = self.rule_rejection.read().clone() {
            return Err(DrillError::setup("fault injection", message));
        }

        let registered_at = Instant::now();
        let count = rules.len();
        self.rules
            .write()
            .extend(rules.into_iter().map(|rule| RegisteredRule {
                target: target.clone(),
                rule,
                registered_at,
            }));
        self.rule_batches.fetch_add(1, Ordering::SeqCst);

        tracing::info!(%target, rules = count, "fault rules registered");
        Ok(())
    }
}

/// Hands out one shared [`InMemoryStore`] per factory.
pub struct InMemoryStoreFactory {
    store: Arc<InMemoryStore>,
    discovered_regions: RwLock<Option<Vec<String>>>,
    connect_failure: RwLock<Option<String>>,
    connections: RwLock<Vec<ClientSettings>>,
}

impl InMemoryStoreFactory {
    #[must_use]
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        let discovered = store.account_regions();
        Self {
            store,
            discovered_regions: RwLock::new(Some(discovered)),
            connect_failure: RwLock::new(None),
            connections: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<InMemoryStore> {
        Arc::clone(&self.store)
    }

    /// Makes region discovery fail.
    pub fn fail_discovery(&self) {
        *self.discovered_regions.write() = None;
    }

    /// Makes `connect` fail with `message`.
    pub fn fail_connect(&self, message: impl Into<String>) {
        *self.connect_failure.write() = Some(message.into());
    }

    /// Settings of every successful `connect` call.
    #[must_use]
    pub fn connections(&self) -> Vec<ClientSettings> {
        self.connections.read().clone()
    }
}

#[async_trait]
impl StoreClientFactory for InMemoryStoreFactory {
    async fn discover_regions(&self, endpoint: &str, _master_key: &str) -> DrillResult<Vec<String>> {
        self.discovered_regions.read().clone().ok_or_else(|| {
            DrillError::setup(
                "region discovery",
                format!("account metadata unavailable for {endpoint}"),
            )
        })
    }

    async fn connect(&self, settings: &ClientSettings) -> DrillResult<Arc<dyn StoreClient>> {
        if let Some(message) = self.connect_failure.read().clone() {
            return Err(DrillError::setup("connect", message));
        }

        self.store.apply_settings(settings);
        self.connections.write().push(settings.clone());
        tracing::info!(
            endpoint = %settings.endpoint,
            connection_mode = %settings.connection_mode,
            regions = ?settings.preferred_regions,
            user_agent_suffix = %settings.user_agent_suffix,
            "connected to simulated store"
        );

        let client: Arc<dyn StoreClient> = self.store.clone();
        Ok(client)
    }
}
