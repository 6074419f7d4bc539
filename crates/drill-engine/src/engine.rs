//! Drill engine: owns one run from setup to teardown.

use std::sync::Arc;
use std::time::Duration;

use drill_core::store::status;
use drill_core::{
    ClientSettings, ClientTuning, ConnectionMode, ContainerRef, ContainerSpec, DatabaseSpec,
    DrillConfig, DrillError, DrillItem, DrillMode, DrillResult, FaultInjector,
    ItemRequestOptions, OutcomeContext, OutcomeSink, SessionRetryPolicy, StoreClient,
    StoreClientFactory, StoreResult, TuningRegistry, WorkloadConfig,
};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::TargetCache;
use crate::context::{LoopContext, RunContext};
use crate::coordination::{SessionHandoff, StopCondition};
use crate::counters::OperationCounters;
use crate::faults::{build_fault_rules, submit_fault_rules};
use crate::loops::{run_loop, LoopRole, LoopStats};
use crate::report::DrillReport;

/// Delay before each loop issues its first request.
pub const LOOP_START_DELAY: Duration = Duration::from_millis(10);

/// Runs shorter than this may still be exercising a cold client.
const COLD_START_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Throughput provisioned per physical partition for session drills.
const THROUGHPUT_PER_PHYSICAL_PARTITION: u32 = 10_000;

/// Role of worker slot `slot`, or `None` when its workload is disabled.
///
/// Continuous drills rotate create/read/query; stop-on-first-failure drills
/// alternate create/session-read.
#[must_use]
pub fn slot_role(mode: DrillMode, slot: usize, workload: &WorkloadConfig) -> Option<LoopRole> {
    match mode {
        DrillMode::Continuous => match slot % 3 {
            0 => Some(LoopRole::Create),
            1 => workload.read_workload.then_some(LoopRole::Read),
            _ => workload.query_workload.then_some(LoopRole::Query),
        },
        DrillMode::StopOnFirstFailure => match slot % 2 {
            0 => Some(LoopRole::CreateUntilFailure),
            _ => workload.read_workload.then_some(LoopRole::SessionRead),
        },
    }
}

/// Regions to use when discovery fails.
#[must_use]
pub fn fallback_regions(host: &str) -> Vec<String> {
    let regions: &[&str] = if host.contains("test") {
        &["North Central US", "West US", "East Asia"]
    } else {
        &["West US 2", "East US 2", "North Central US"]
    };
    regions.iter().map(|region| (*region).to_string()).collect()
}

#[derive(Debug, Default)]
struct LoopTally {
    finished: usize,
    aborted: usize,
    errors: usize,
}

/// Drives drills against a store.
pub struct DrillEngine {
    factory: Arc<dyn StoreClientFactory>,
    injector: Arc<dyn FaultInjector>,
    sink: Arc<dyn OutcomeSink>,
    tuning: TuningRegistry,
}

impl DrillEngine {
    pub fn new(
        factory: Arc<dyn StoreClientFactory>,
        injector: Arc<dyn FaultInjector>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        Self {
            factory,
            injector,
            sink,
            tuning: TuningRegistry::new(),
        }
    }

    /// Publish client tuning through `registry` instead of a private one.
    #[must_use]
    pub fn with_tuning_registry(mut self, registry: TuningRegistry) -> Self {
        self.tuning = registry;
        self
    }

    pub fn tuning_registry(&self) -> &TuningRegistry {
        &self.tuning
    }

    /// Runs one drill until the configured running time elapses.
    pub async fn run(&self, config: &DrillConfig, mode: DrillMode) -> DrillResult<DrillReport> {
        self.run_until(config, mode, CancellationToken::new()).await
    }

    /// Runs one drill until the running time elapses or `shutdown` fires.
    ///
    /// Setup failures are returned before any loop starts. Whatever happens,
    /// the client is closed once and the client tuning is cleared.
    pub async fn run_until(
        &self,
        config: &DrillConfig,
        mode: DrillMode,
        shutdown: CancellationToken,
    ) -> DrillResult<DrillReport> {
        config.validate()?;

        let connection_mode = if config.store.thin_client {
            ConnectionMode::Gateway
        } else {
            config.store.connection_mode
        };
        let (tuning, session_retry) = match mode {
            DrillMode::Continuous => (
                ClientTuning::continuous(config.store.thin_client),
                SessionRetryPolicy::remote_region_preferred(),
            ),
            DrillMode::StopOnFirstFailure => (
                ClientTuning::session_consistency(),
                SessionRetryPolicy::local_region_preferred(),
            ),
        };

        tracing::info!(
            drill_id = %config.account.drill_id,
            %mode,
            threads = config.workload.threads,
            running_time = %humantime::format_duration(config.workload.running_time),
            %connection_mode,
            "starting drill"
        );

        let _tuning_scope = self.tuning.apply(tuning.clone());
        tracing::info!(properties = ?tuning.as_properties(), "client tuning applied");

        let preferred_regions = self.resolve_regions(config).await;
        let settings = ClientSettings {
            endpoint: config.account.host.clone(),
            master_key: config.account.master_key.clone(),
            preferred_regions,
            connection_mode,
            user_agent_suffix: config.account.drill_id.clone(),
            session_retry,
            tuning,
        };

        let client = self.factory.connect(&settings).await?;
        let result = self
            .drive(config, mode, connection_mode, Arc::clone(&client), shutdown)
            .await;

        client.close().await;
        tracing::info!("store client closed");

        result
    }

    async fn resolve_regions(&self, config: &DrillConfig) -> Vec<String> {
        if !config.account.preferred_regions.is_empty() {
            return config.account.preferred_regions.clone();
        }

        match self
            .factory
            .discover_regions(&config.account.host, &config.account.master_key)
            .await
        {
            Ok(regions) if !regions.is_empty() => {
                tracing::info!(?regions, "discovered preferred regions");
                regions
            }
            Ok(_) => {
                let regions = fallback_regions(&config.account.host);
                tracing::warn!(?regions, "account reported no regions, using fallback");
                regions
            }
            Err(err) => {
                let regions = fallback_regions(&config.account.host);
                tracing::warn!(error = %err, ?regions, "region discovery failed, using fallback");
                regions
            }
        }
    }

    async fn drive(
        &self,
        config: &DrillConfig,
        mode: DrillMode,
        connection_mode: ConnectionMode,
        client: Arc<dyn StoreClient>,
        shutdown: CancellationToken,
    ) -> DrillResult<DrillReport> {
        let target = ContainerRef::new(&config.store.database, &config.store.container);

        provision(client.as_ref(), config, mode).await?;

        if mode == DrillMode::StopOnFirstFailure {
            let designated = DrillItem::designated();
            client
                .upsert_item(&target, &designated, &ItemRequestOptions::unbounded())
                .await?;
            tracing::info!(%target, id = %designated.id, "designated item upserted");
        }

        let started_at = Instant::now();

        let rules = match mode {
            DrillMode::Continuous => build_fault_rules(&config.fault_injection, connection_mode),
            DrillMode::StopOnFirstFailure => {
                if config.fault_injection.enabled {
                    tracing::warn!("fault injection only applies to continuous drills, ignoring");
                }
                Vec::new()
            }
        };
        let fault_rules_submitted =
            submit_fault_rules(self.injector.as_ref(), &target, rules).await?;

        let timeouts = &config.timeouts;
        let run = RunContext {
            started_at,
            duration: config.workload.running_time,
            drill_id: config.account.drill_id.clone(),
            connection_mode,
            threads: config.workload.threads,
            sleep_time: config.workload.sleep_time(),
            write_options: if timeouts.write_e2e_enabled {
                ItemRequestOptions::with_timeout(timeouts.write_e2e)
            } else {
                ItemRequestOptions::unbounded()
            },
            bounded_write_options: ItemRequestOptions::with_timeout(timeouts.write_e2e),
            read_options: ItemRequestOptions::with_timeout(timeouts.read_e2e),
            session_token_on_reads: config.workload.session_token_on_reads,
        };
        let outcomes = OutcomeContext {
            drill_id: config.account.drill_id.clone(),
            connection_mode,
            database: config.store.database.clone(),
            container: config.store.container.clone(),
            account_host: config.account_host().to_string(),
            possibly_cold_start: config.workload.running_time < COLD_START_THRESHOLD,
            log_diagnostics_for_success: config.store.log_diagnostics_for_success,
        };

        let ctx = Arc::new(LoopContext {
            run,
            client,
            sink: Arc::clone(&self.sink),
            outcomes,
            target,
            cache: TargetCache::default(),
            handoff: SessionHandoff::new(),
            stop: StopCondition::new(),
            counters: OperationCounters::new(),
            cancel: shutdown.child_token(),
        });

        let mut loops = JoinSet::new();
        let mut idle_slots = 0;
        for slot in 0..config.workload.threads * 2 {
            let Some(role) = slot_role(mode, slot, &config.workload) else {
                tracing::debug!(slot, "workload disabled, slot left idle");
                idle_slots += 1;
                continue;
            };

            let ctx = Arc::clone(&ctx);
            loops.spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(LOOP_START_DELAY) => {}
                    _ = ctx.cancel.cancelled() => {}
                }
                run_loop(role, ctx, slot).await
            });
        }
        let loops_launched = loops.len();
        tracing::info!(loops_launched, idle_slots, "operation loops launched");

        let cancelled_early = tokio::select! {
            _ = tokio::time::sleep_until(ctx.run.deadline()) => {
                tracing::info!("run deadline reached");
                false
            }
            _ = shutdown.cancelled() => {
                tracing::warn!("drill cancelled before its deadline");
                true
            }
        };
        ctx.cancel.cancel();

        let mut tally = LoopTally::default();
        let grace = timeouts.shutdown_grace;
        if tokio::time::timeout(grace, drain(&mut loops, &mut tally))
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = loops.len(),
                grace = %humantime::format_duration(grace),
                "loops still running after grace period, aborting"
            );
            loops.abort_all();
            drain(&mut loops, &mut tally).await;
        }
        tracing::info!(
            finished = tally.finished,
            aborted = tally.aborted,
            errors = tally.errors,
            "operation loops stopped"
        );

        let [creates, reads, queries] = DrillReport::counts_from(&ctx.counters);
        let report = DrillReport {
            drill_id: ctx.run.drill_id.clone(),
            mode,
            creates,
            reads,
            queries,
            cache_size: ctx.cache.len(),
            stop_condition_tripped: ctx.stop.is_tripped(),
            fault_rules_submitted,
            loops_launched,
            idle_slots,
            loops_aborted: tally.aborted,
            loop_errors: tally.errors,
            cancelled_early,
            elapsed: started_at.elapsed(),
        };
        Ok(report)
    }
}

/// Collects finished loops. Aborted loops are counted, panics are logged.
async fn drain(loops: &mut JoinSet<LoopStats>, tally: &mut LoopTally) {
    while let Some(joined) = loops.join_next().await {
        match joined {
            Ok(_) => tally.finished += 1,
            Err(err) if err.is_cancelled() => tally.aborted += 1,
            Err(err) => {
                let err = DrillError::Scheduling(err.to_string());
                tracing::error!(error = %err, "operation loop failed");
                tally.errors += 1;
            }
        }
    }
}

/// Creates the database and container; both may already exist.
async fn provision(client: &dyn StoreClient, config: &DrillConfig, mode: DrillMode) -> DrillResult<()> {
    let store = &config.store;
    let (database_throughput, container_throughput) = match mode {
        DrillMode::StopOnFirstFailure => (
            None,
            Some(
                store
                    .physical_partition_count
                    .saturating_mul(THROUGHPUT_PER_PHYSICAL_PARTITION),
            ),
        ),
        DrillMode::Continuous if store.shared_throughput => {
            (Some(store.provisioned_throughput), None)
        }
        DrillMode::Continuous => (None, Some(store.provisioned_throughput)),
    };

    let database = DatabaseSpec {
        name: store.database.clone(),
        shared_throughput: database_throughput,
    };
    accept_existing("database", client.create_database_if_not_exists(&database).await)?;

    let container = ContainerSpec {
        name: store.container.clone(),
        partition_key_path: store.partition_key_path.clone(),
        default_ttl_secs: Some(store.container_ttl_secs),
        dedicated_throughput: container_throughput,
    };
    accept_existing(
        "container",
        client
            .create_container_if_not_exists(&store.database, &container)
            .await,
    )?;

    tracing::info!(
        database = %store.database,
        container = %store.container,
        ?database_throughput,
        ?container_throughput,
        "provisioned drill target"
    );
    Ok(())
}

fn accept_existing(resource: &'static str, result: StoreResult) -> DrillResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(failure) if failure.status_code == status::CONFLICT => {
            tracing::debug!(resource, "already exists");
            Ok(())
        }
        Err(failure) => {
            tracing::error!(resource, error = %failure, "provisioning failed");
            Err(DrillError::from(failure))
        }
    }
}
