//! End-to-end drills against the simulated store.

use std::sync::Arc;
use std::time::Duration;

use drill_core::store::status;
use drill_core::{
    ClientTuning, ConnectionMode, ContainerRef, DrillConfig, DrillMode, MemorySink,
    OperationKind, TuningRegistry,
};
use drill_engine::{DrillEngine, DrillReport};
use drill_store::{
    InMemoryStore, InMemoryStoreFactory, ScriptedFailure, SimulatedStoreConfig, StoreOperation,
};
use tokio_util::sync::CancellationToken;

struct Harness {
    store: Arc<InMemoryStore>,
    factory: Arc<InMemoryStoreFactory>,
    sink: Arc<MemorySink>,
    tuning: TuningRegistry,
    engine: DrillEngine,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(InMemoryStore::new())
    }

    fn with_store(store: InMemoryStore) -> Self {
        let store = Arc::new(store);
        let factory = Arc::new(InMemoryStoreFactory::new(Arc::clone(&store)));
        let sink = Arc::new(MemorySink::new());
        let tuning = TuningRegistry::new();
        let engine = DrillEngine::new(factory.clone(), store.clone(), sink.clone())
            .with_tuning_registry(tuning.clone());
        Self {
            store,
            factory,
            sink,
            tuning,
            engine,
        }
    }

    async fn run(&self, config: &DrillConfig, mode: DrillMode) -> DrillReport {
        self.engine.run(config, mode).await.expect("drill runs")
    }
}

fn config(mode: DrillMode, running_time: Duration, threads: usize) -> DrillConfig {
    let mut config = DrillConfig::default();
    config.account.host = "https://drill.documents.example:443/".to_string();
    config.account.master_key = "c2VjcmV0".to_string();
    config.account.drill_id = "drill-test".to_string();
    config.workload.mode = mode;
    config.workload.running_time = running_time;
    config.workload.threads = threads;
    config.workload.sleep_time_ms = 200;
    config
}

fn target() -> ContainerRef {
    ContainerRef::new("db01", "ct01")
}

#[tokio::test(start_paused = true)]
async fn test_continuous_drill_all_success() {
    let harness = Harness::new();
    let config = config(DrillMode::Continuous, Duration::from_secs(2), 1);

    let report = harness.run(&config, DrillMode::Continuous).await;

    let creates = harness.sink.of_kind(OperationKind::Create);
    assert!(!creates.is_empty());
    assert!(creates.iter().any(|outcome| outcome.success_count >= 1));
    assert!(report.cache_size <= 10);
    assert!(report.cache_size >= 1);
    assert!(harness.sink.failures().is_empty());
    assert_eq!(report.total_failures(), 0);

    // one thread: a create slot and a read slot
    assert_eq!(report.loops_launched, 2);
    assert!(report.reads.successes > 0);
    assert_eq!(report.queries.successes, 0);
    assert!(!report.cancelled_early);
    assert!(!report.stop_condition_tripped);

    assert_eq!(harness.store.close_count(), 1);
    assert!(!harness.tuning.is_applied());

    let outcome = &creates[0];
    assert_eq!(outcome.drill_id, "drill-test");
    assert_eq!(outcome.account_host, "drill.documents.example");
    assert_eq!(outcome.connection_mode, "DIRECT");
    assert!(outcome.possibly_cold_start);
    assert_eq!(outcome.sub_status_code, 0);
    assert!(outcome.error_message.is_empty());
    assert!(outcome.diagnostics.is_none());
    assert_eq!(outcome.contacted_regions, "East US");
    assert!(outcome.latest_session_token.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_continuous_drill_provisions_dedicated_throughput() {
    let harness = Harness::new();
    let config = config(DrillMode::Continuous, Duration::from_secs(1), 1);

    harness.run(&config, DrillMode::Continuous).await;

    assert!(harness.store.has_database("db01"));
    assert_eq!(harness.store.database_throughput("db01"), None);
    assert_eq!(harness.store.container_throughput(&target()), Some(10_000));
    assert_eq!(harness.store.partition_key_path(&target()).as_deref(), Some("/id"));
}

#[tokio::test(start_paused = true)]
async fn test_continuous_drill_shared_throughput() {
    let harness = Harness::new();
    let mut config = config(DrillMode::Continuous, Duration::from_secs(1), 1);
    config.store.shared_throughput = true;
    config.store.provisioned_throughput = 4_000;

    harness.run(&config, DrillMode::Continuous).await;

    assert_eq!(harness.store.database_throughput("db01"), Some(4_000));
    assert_eq!(harness.store.container_throughput(&target()), None);
}

#[tokio::test(start_paused = true)]
async fn test_existing_container_is_reused() {
    let harness = Harness::new();
    harness.store.ensure_container(&target(), "/id");
    let config = config(DrillMode::Continuous, Duration::from_secs(1), 1);

    let report = harness.run(&config, DrillMode::Continuous).await;

    assert!(report.creates.successes > 0);
    let container_calls = harness.store.calls(StoreOperation::CreateContainer);
    assert_eq!(container_calls.len(), 1);
    assert_eq!(container_calls[0].status_code, status::OK);
}

#[tokio::test(start_paused = true)]
async fn test_stop_on_first_failure_trips_on_503() {
    let harness = Harness::new();
    harness
        .store
        .fail_next(StoreOperation::CreateItem, [ScriptedFailure::Unavailable]);
    let config = config(DrillMode::StopOnFirstFailure, Duration::from_secs(2), 1);

    let report = harness.run(&config, DrillMode::StopOnFirstFailure).await;

    assert!(report.stop_condition_tripped);
    let creates = harness.sink.of_kind(OperationKind::Create);
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].status_code, status::SERVICE_UNAVAILABLE);
    assert_eq!(creates[0].failure_count, 1);
    assert_eq!(harness.store.calls(StoreOperation::CreateItem).len(), 1);

    // reads keep going until the deadline
    let reads = harness.sink.of_kind(OperationKind::Read);
    assert!(reads.len() >= 5);
    assert!(reads.iter().all(|outcome| outcome.is_success()));
    let recorded = harness.sink.outcomes();
    let failed_at = recorded
        .iter()
        .position(|outcome| outcome.operation == OperationKind::Create)
        .unwrap();
    assert!(recorded[failed_at + 1..]
        .iter()
        .any(|outcome| outcome.operation == OperationKind::Read));

    // designated item upserted once, container sized per physical partition
    assert_eq!(harness.store.calls(StoreOperation::UpsertItem).len(), 1);
    assert!(harness.store.contains_item(&target(), "1", "1"));
    assert_eq!(harness.store.container_throughput(&target()), Some(10_000));
    assert_eq!(harness.store.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_on_first_failure_ignores_non_availability_failures() {
    let harness = Harness::new();
    harness.store.fail_next(
        StoreOperation::CreateItem,
        [
            ScriptedFailure::Throttled,
            ScriptedFailure::Ok,
            ScriptedFailure::Timeout,
        ],
    );
    let config = config(DrillMode::StopOnFirstFailure, Duration::from_secs(5), 1);

    let report = harness.run(&config, DrillMode::StopOnFirstFailure).await;

    assert!(report.stop_condition_tripped);
    assert_eq!(report.creates.successes, 1);
    assert_eq!(report.creates.failures, 2);

    let creates = harness.sink.of_kind(OperationKind::Create);
    assert_eq!(creates.len(), 3);
    assert_eq!(creates[0].status_code, status::TOO_MANY_REQUESTS);
    assert_eq!(creates[2].status_code, status::REQUEST_TIMEOUT);
    assert_eq!(creates[2].sub_status_code, status::SUB_STATUS_E2E_TIMEOUT);
    assert!(!creates[2].error_message.is_empty());
    // the successful write's token rides along on later records
    assert_eq!(creates[2].latest_session_token.as_deref(), Some("0:1#2"));
}

#[tokio::test(start_paused = true)]
async fn test_session_reads_attach_latest_write_token() {
    let harness = Harness::new();
    let mut config = config(DrillMode::StopOnFirstFailure, Duration::from_secs(3), 1);
    config.workload.session_token_on_reads = true;

    let report = harness.run(&config, DrillMode::StopOnFirstFailure).await;

    assert!(!report.stop_condition_tripped);
    assert!(report.creates.successes > 1);
    assert!(harness.sink.failures().is_empty());

    let reads = harness.store.calls(StoreOperation::ReadItem);
    assert!(!reads.is_empty());
    assert!(reads.iter().all(|call| call.key == "1"));
    // the first reads race the first write and go out without a token
    assert!(reads
        .iter()
        .any(|call| call.request_session_token.as_deref().is_some_and(|t| t.starts_with("0:1#"))));

    let tuning = &harness.factory.connections()[0].tuning;
    assert_eq!(tuning, &ClientTuning::session_consistency());
}

#[tokio::test(start_paused = true)]
async fn test_fault_injection_disabled_submits_nothing() {
    let harness = Harness::new();
    let config = config(DrillMode::Continuous, Duration::from_secs(1), 1);

    let report = harness.run(&config, DrillMode::Continuous).await;

    assert_eq!(report.fault_rules_submitted, 0);
    assert_eq!(harness.store.rule_batches(), 0);
    assert!(harness.store.fault_rules(&target()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fault_injection_enabled_submits_windows_once() {
    let harness = Harness::new();
    let mut config = config(DrillMode::Continuous, Duration::from_secs(1), 1);
    config.fault_injection.enabled = true;

    let report = harness.run(&config, DrillMode::Continuous).await;

    assert_eq!(report.fault_rules_submitted, 2);
    assert_eq!(harness.store.rule_batches(), 1);
    let rules = harness.store.fault_rules(&target());
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].start_delay, Duration::from_secs(11 * 60));
    assert_eq!(rules[1].start_delay, Duration::from_secs(41 * 60));
    assert!(rules
        .iter()
        .all(|rule| rule.condition.connection == ConnectionMode::Direct));
}

#[tokio::test(start_paused = true)]
async fn test_fault_injection_skipped_for_stop_mode() {
    let harness = Harness::new();
    let mut config = config(DrillMode::StopOnFirstFailure, Duration::from_secs(1), 1);
    config.fault_injection.enabled = true;

    let report = harness.run(&config, DrillMode::StopOnFirstFailure).await;

    assert_eq!(report.fault_rules_submitted, 0);
    assert_eq!(harness.store.rule_batches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_active_fault_window_times_out_reads() {
    let harness = Harness::new();
    let mut config = config(DrillMode::Continuous, Duration::from_secs(10), 1);
    config.workload.sleep_time_ms = 100;
    config.fault_injection.enabled = true;
    config.fault_injection.windows = 1;
    config.fault_injection.first_window_offset = Duration::ZERO;
    config.fault_injection.window_duration = Duration::from_secs(3600);

    let report = harness.run(&config, DrillMode::Continuous).await;

    assert_eq!(report.creates.failures, 0);
    assert!(report.reads.failures > 0);
    assert_eq!(report.reads.successes, 0);

    let reads = harness.sink.of_kind(OperationKind::Read);
    assert!(reads
        .iter()
        .all(|outcome| outcome.status_code == status::REQUEST_TIMEOUT));
    assert!(reads
        .iter()
        .all(|outcome| outcome.diagnostics.as_deref().is_some_and(|d| d.contains("response-delay-"))));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_fault_rules_abort_before_loops() {
    let harness = Harness::new();
    harness.store.reject_fault_rules("fault injection not enabled on account");
    let mut config = config(DrillMode::Continuous, Duration::from_secs(1), 1);
    config.fault_injection.enabled = true;

    let err = harness
        .engine
        .run(&config, DrillMode::Continuous)
        .await
        .expect_err("setup fails");

    assert!(err.to_string().contains("fault injection"));
    assert!(harness.sink.is_empty());
    assert_eq!(harness.store.calls(StoreOperation::CreateItem).len(), 0);
    assert_eq!(harness.store.close_count(), 1);
    assert!(!harness.tuning.is_applied());
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_propagates_without_close() {
    let harness = Harness::new();
    harness.factory.fail_connect("invalid master key");
    let config = config(DrillMode::Continuous, Duration::from_secs(1), 1);

    let err = harness
        .engine
        .run(&config, DrillMode::Continuous)
        .await
        .expect_err("connect fails");

    assert!(err.to_string().contains("invalid master key"));
    assert_eq!(harness.store.close_count(), 0);
    assert!(!harness.tuning.is_applied());
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_failure_closes_client() {
    let harness = Harness::new();
    harness.store.fail_next(
        StoreOperation::CreateContainer,
        [ScriptedFailure::Status {
            status_code: status::INTERNAL_SERVER_ERROR,
            sub_status_code: 0,
            message: "container create failed",
        }],
    );
    let config = config(DrillMode::Continuous, Duration::from_secs(1), 1);

    let err = harness
        .engine
        .run(&config, DrillMode::Continuous)
        .await
        .expect_err("provisioning fails");

    assert!(err.is_store_failure());
    assert!(harness.sink.is_empty());
    assert_eq!(harness.store.close_count(), 1);
    assert!(!harness.tuning.is_applied());
}

#[tokio::test(start_paused = true)]
async fn test_designated_upsert_failure_aborts_stop_drill() {
    let harness = Harness::new();
    harness
        .store
        .fail_next(StoreOperation::UpsertItem, [ScriptedFailure::Unavailable]);
    let config = config(DrillMode::StopOnFirstFailure, Duration::from_secs(1), 1);

    let err = harness
        .engine
        .run(&config, DrillMode::StopOnFirstFailure)
        .await
        .expect_err("upsert fails");

    assert!(err.is_store_failure());
    assert_eq!(harness.store.calls(StoreOperation::CreateItem).len(), 0);
    assert_eq!(harness.store.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_rejected_before_connect() {
    let harness = Harness::new();
    let config = config(DrillMode::Continuous, Duration::ZERO, 1);

    let err = harness
        .engine
        .run(&config, DrillMode::Continuous)
        .await
        .expect_err("invalid config");

    assert!(err.to_string().contains("running_time"));
    assert!(harness.factory.connections().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_ends_drill_early() {
    let harness = Harness::new();
    let config = config(DrillMode::Continuous, Duration::from_secs(3600), 2);
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let report = harness
        .engine
        .run_until(&config, DrillMode::Continuous, shutdown)
        .await
        .expect("drill runs");

    assert!(report.cancelled_early);
    assert!(report.elapsed < Duration::from_secs(2));
    assert_eq!(report.loops_launched, 4);
    assert_eq!(report.loops_aborted, 0);
    assert_eq!(report.loop_errors, 0);
    assert_eq!(harness.store.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_loops_aborted_after_grace() {
    let harness = Harness::with_store(InMemoryStore::new_with_config(SimulatedStoreConfig {
        latency: Duration::from_secs(120),
        ..SimulatedStoreConfig::default()
    }));
    let mut config = config(DrillMode::Continuous, Duration::from_secs(2), 1);
    config.timeouts.shutdown_grace = Duration::from_secs(1);

    let report = harness.run(&config, DrillMode::Continuous).await;

    // the unbounded create is still in flight, the idle reader winds down
    assert_eq!(report.loops_launched, 2);
    assert_eq!(report.loops_aborted, 1);
    assert_eq!(report.loop_errors, 0);
    assert_eq!(report.creates.total(), 0);
    assert_eq!(harness.store.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_continuous_writes_time_out() {
    let harness = Harness::with_store(InMemoryStore::new_with_config(SimulatedStoreConfig {
        latency: Duration::from_secs(5),
        ..SimulatedStoreConfig::default()
    }));
    let mut config = config(DrillMode::Continuous, Duration::from_secs(10), 1);
    config.timeouts.write_e2e_enabled = true;
    config.timeouts.write_e2e = Duration::from_secs(1);

    let report = harness.run(&config, DrillMode::Continuous).await;

    assert!(report.creates.failures > 0);
    assert_eq!(report.creates.successes, 0);
    assert_eq!(report.cache_size, 0);
    // continuous writers never stop on availability failures
    assert!(!report.stop_condition_tripped);
    assert!(report.creates.failures > 3);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_workloads_leave_slots_idle() {
    let harness = Harness::new();
    let mut config = config(DrillMode::Continuous, Duration::from_secs(1), 2);
    config.workload.read_workload = false;
    config.workload.query_workload = false;

    let report = harness.run(&config, DrillMode::Continuous).await;

    assert_eq!(report.loops_launched, 2);
    assert_eq!(report.idle_slots, 2);
    assert!(harness.store.calls(StoreOperation::ReadItem).is_empty());
    assert!(harness.store.calls(StoreOperation::QueryItems).is_empty());
    assert!(report.creates.successes > 0);
}

#[tokio::test(start_paused = true)]
async fn test_query_loops_run_with_enough_threads() {
    let harness = Harness::new();
    let config = config(DrillMode::Continuous, Duration::from_secs(2), 2);

    let report = harness.run(&config, DrillMode::Continuous).await;

    assert_eq!(report.loops_launched, 4);
    assert!(report.queries.successes > 0);
    assert_eq!(report.queries.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_uses_fallback_regions() {
    let harness = Harness::new();
    harness.factory.fail_discovery();
    let mut config = config(DrillMode::Continuous, Duration::from_secs(1), 1);
    config.account.host = "https://drill-test.documents.example:443/".to_string();

    harness.run(&config, DrillMode::Continuous).await;

    let settings = &harness.factory.connections()[0];
    assert_eq!(
        settings.preferred_regions,
        vec!["North Central US", "West US", "East Asia"]
    );
    assert_eq!(harness.store.serving_regions()[0], "North Central US");
}

#[tokio::test(start_paused = true)]
async fn test_configured_regions_skip_discovery() {
    let harness = Harness::new();
    harness.factory.fail_discovery();
    let mut config = config(DrillMode::Continuous, Duration::from_secs(1), 1);
    config.account.preferred_regions = vec!["West US".to_string(), "East US".to_string()];

    harness.run(&config, DrillMode::Continuous).await;

    let settings = &harness.factory.connections()[0];
    assert_eq!(settings.preferred_regions, vec!["West US", "East US"]);
    assert_eq!(settings.user_agent_suffix, "drill-test");
}

#[tokio::test(start_paused = true)]
async fn test_thin_client_connects_through_gateway() {
    let harness = Harness::new();
    let mut config = config(DrillMode::Continuous, Duration::from_secs(1), 1);
    config.store.connection_mode = ConnectionMode::Gateway;
    config.store.thin_client = true;

    harness.run(&config, DrillMode::Continuous).await;

    let settings = &harness.factory.connections()[0];
    assert_eq!(settings.connection_mode, ConnectionMode::Gateway);
    assert_eq!(settings.tuning, ClientTuning::continuous(true));
    assert!(harness
        .sink
        .outcomes()
        .iter()
        .all(|outcome| outcome.connection_mode == "GATEWAY"));
}
