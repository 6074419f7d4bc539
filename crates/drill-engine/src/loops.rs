//! Operation loops.
//!
//! Each loop runs in its own task until the run deadline or cancellation,
//! performing a batch of attempts per iteration and pausing after every
//! attempt. Store calls that are already in flight are always awaited.

use std::fmt;
use std::sync::Arc;

use drill_core::{DrillItem, OperationKind, QuerySpec, DESIGNATED_ITEM_ID};
use serde::Serialize;

use crate::context::LoopContext;

/// Attempts per iteration of the continuous create loop.
pub const CREATE_BATCH: usize = 10;
/// Attempts per iteration of the stop-on-first-failure create loop.
pub const CREATE_UNTIL_FAILURE_BATCH: usize = 1;
pub const READ_BATCH: usize = 10;
pub const SESSION_READ_BATCH: usize = 10;
pub const QUERY_BATCH: usize = 10;

/// What a worker slot does for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopRole {
    Create,
    CreateUntilFailure,
    Read,
    SessionRead,
    Query,
}

impl fmt::Display for LoopRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::CreateUntilFailure => "create-until-failure",
            Self::Read => "read",
            Self::SessionRead => "session-read",
            Self::Query => "query",
        };
        f.write_str(name)
    }
}

/// How a loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub role: LoopRole,
    pub worker_id: usize,
    pub attempts: u64,
    /// Iterations skipped because there was nothing to target.
    pub skipped: u64,
}

impl LoopStats {
    fn new(role: LoopRole, worker_id: usize) -> Self {
        Self {
            role,
            worker_id,
            attempts: 0,
            skipped: 0,
        }
    }
}

/// Runs the loop for `role` to completion.
pub async fn run_loop(role: LoopRole, ctx: Arc<LoopContext>, worker_id: usize) -> LoopStats {
    tracing::debug!(worker_id, %role, "loop started");
    let stats = match role {
        LoopRole::Create => create_loop(&ctx, worker_id).await,
        LoopRole::CreateUntilFailure => create_until_failure_loop(&ctx, worker_id).await,
        LoopRole::Read => read_loop(&ctx, worker_id).await,
        LoopRole::SessionRead => session_read_loop(&ctx, worker_id).await,
        LoopRole::Query => query_loop(&ctx, worker_id).await,
    };
    tracing::debug!(
        worker_id,
        %role,
        attempts = stats.attempts,
        skipped = stats.skipped,
        "loop finished"
    );
    stats
}

/// Writes fresh items; successes feed the target cache.
pub async fn create_loop(ctx: &LoopContext, worker_id: usize) -> LoopStats {
    let mut stats = LoopStats::new(LoopRole::Create, worker_id);

    while ctx.should_continue() {
        for _ in 0..CREATE_BATCH {
            if !ctx.should_continue() {
                break;
            }

            let item = DrillItem::random();
            let result = ctx
                .client
                .create_item(&ctx.target, &item, &ctx.run.write_options)
                .await;
            if result.is_ok() {
                ctx.cache.add(item.id);
            }
            ctx.record(OperationKind::Create, worker_id, &result, None);
            stats.attempts += 1;

            ctx.pause().await;
        }
    }

    stats
}

/// Writes into the designated partition until the first availability failure.
///
/// Successful writes publish their session token; a 503 or 408 trips the stop
/// condition, which ends every writer after its current attempt.
pub async fn create_until_failure_loop(ctx: &LoopContext, worker_id: usize) -> LoopStats {
    let mut stats = LoopStats::new(LoopRole::CreateUntilFailure, worker_id);

    while ctx.should_continue_writing() {
        for _ in 0..CREATE_UNTIL_FAILURE_BATCH {
            if !ctx.should_continue_writing() {
                break;
            }

            let item = DrillItem::random_in_partition(DESIGNATED_ITEM_ID);
            let result = ctx
                .client
                .create_item(&ctx.target, &item, &ctx.run.bounded_write_options)
                .await;

            match &result {
                Ok(response) => {
                    if let Some(token) = &response.session_token {
                        ctx.handoff.publish(token.clone());
                    }
                }
                Err(failure) if failure.is_availability_related() => {
                    if ctx.stop.trip() {
                        tracing::warn!(
                            worker_id,
                            status_code = failure.status_code,
                            sub_status_code = failure.sub_status_code,
                            "availability failure on write, stopping writers"
                        );
                    }
                }
                Err(_) => {}
            }

            ctx.record(
                OperationKind::Create,
                worker_id,
                &result,
                Some(ctx.handoff.latest()),
            );
            stats.attempts += 1;

            ctx.pause().await;
        }
    }

    stats
}

/// Reads a random cached id ten times per iteration.
pub async fn read_loop(ctx: &LoopContext, worker_id: usize) -> LoopStats {
    let mut stats = LoopStats::new(LoopRole::Read, worker_id);

    while ctx.should_continue() {
        let Some(id) = ctx.cache.pick_random() else {
            stats.skipped += 1;
            ctx.pause().await;
            continue;
        };

        for _ in 0..READ_BATCH {
            if !ctx.should_continue() {
                break;
            }

            let result = ctx
                .client
                .read_item(&ctx.target, &id, &id, &ctx.run.read_options)
                .await;
            ctx.record(OperationKind::Read, worker_id, &result, None);
            stats.attempts += 1;

            ctx.pause().await;
        }
    }

    stats
}

/// Reads the designated item, optionally with the latest handed-off token.
pub async fn session_read_loop(ctx: &LoopContext, worker_id: usize) -> LoopStats {
    let mut stats = LoopStats::new(LoopRole::SessionRead, worker_id);

    while ctx.should_continue() {
        for _ in 0..SESSION_READ_BATCH {
            if !ctx.should_continue() {
                break;
            }

            let token = ctx.handoff.latest();
            let mut options = ctx.run.read_options.clone();
            if ctx.run.session_token_on_reads && !token.is_empty() {
                options.session_token = Some(token.clone());
            }

            let result = ctx
                .client
                .read_item(&ctx.target, DESIGNATED_ITEM_ID, DESIGNATED_ITEM_ID, &options)
                .await;
            ctx.record(OperationKind::Read, worker_id, &result, Some(token));
            stats.attempts += 1;

            ctx.pause().await;
        }
    }

    stats
}

/// Point-queries a random cached id ten times per iteration.
pub async fn query_loop(ctx: &LoopContext, worker_id: usize) -> LoopStats {
    let mut stats = LoopStats::new(LoopRole::Query, worker_id);

    while ctx.should_continue() {
        let Some(id) = ctx.cache.pick_random() else {
            stats.skipped += 1;
            ctx.pause().await;
            continue;
        };
        let query = QuerySpec::point_lookup(id);

        for _ in 0..QUERY_BATCH {
            if !ctx.should_continue() {
                break;
            }

            let result = ctx
                .client
                .query_items(&ctx.target, &query, &ctx.run.read_options)
                .await;
            ctx.record(OperationKind::Query, worker_id, &result, None);
            stats.attempts += 1;

            ctx.pause().await;
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TargetCache;
    use crate::context::RunContext;
    use crate::coordination::{SessionHandoff, StopCondition};
    use crate::counters::OperationCounters;
    use async_trait::async_trait;
    use drill_core::store::status;
    use drill_core::{
        ConnectionMode, ContainerRef, ContainerSpec, DatabaseSpec, ItemRequestOptions,
        MemorySink, OutcomeContext, StoreClient, StoreFailure, StoreResponse, StoreResult,
    };
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    /// Returns queued create results, then 201s; reads always succeed.
    #[derive(Default)]
    struct ScriptedClient {
        creates: Mutex<VecDeque<StoreResult>>,
        read_tokens: Mutex<Vec<Option<String>>>,
        lsn: Mutex<u64>,
    }

    #[async_trait]
    impl StoreClient for ScriptedClient {
        async fn create_database_if_not_exists(&self, _database: &DatabaseSpec) -> StoreResult {
            Ok(StoreResponse::new(status::CREATED))
        }

        async fn create_container_if_not_exists(
            &self,
            _database: &str,
            _container: &ContainerSpec,
        ) -> StoreResult {
            Ok(StoreResponse::new(status::CREATED))
        }

        async fn upsert_item(
            &self,
            _target: &ContainerRef,
            _item: &DrillItem,
            _options: &ItemRequestOptions,
        ) -> StoreResult {
            Ok(StoreResponse::new(status::OK))
        }

        async fn create_item(
            &self,
            _target: &ContainerRef,
            _item: &DrillItem,
            _options: &ItemRequestOptions,
        ) -> StoreResult {
            let scripted = self.creates.lock().pop_front();
            scripted.unwrap_or_else(|| {
                let mut lsn = self.lsn.lock();
                *lsn += 1;
                Ok(StoreResponse {
                    session_token: Some(format!("0:1#{}", *lsn)),
                    ..StoreResponse::new(status::CREATED)
                })
            })
        }

        async fn read_item(
            &self,
            _target: &ContainerRef,
            _id: &str,
            _partition_key: &str,
            options: &ItemRequestOptions,
        ) -> StoreResult {
            self.read_tokens.lock().push(options.session_token.clone());
            Ok(StoreResponse::new(status::OK))
        }

        async fn query_items(
            &self,
            _target: &ContainerRef,
            _query: &QuerySpec,
            _options: &ItemRequestOptions,
        ) -> StoreResult {
            Ok(StoreResponse::new(status::OK))
        }

        async fn close(&self) {}
    }

    fn context(
        client: Arc<ScriptedClient>,
        sink: Arc<MemorySink>,
        duration: Duration,
        session_token_on_reads: bool,
    ) -> LoopContext {
        LoopContext {
            run: RunContext {
                started_at: Instant::now(),
                duration,
                drill_id: "loop-test".to_string(),
                connection_mode: ConnectionMode::Direct,
                threads: 1,
                sleep_time: Duration::from_millis(100),
                write_options: ItemRequestOptions::unbounded(),
                bounded_write_options: ItemRequestOptions::with_timeout(Duration::from_secs(3)),
                read_options: ItemRequestOptions::with_timeout(Duration::from_secs(3)),
                session_token_on_reads,
            },
            client,
            sink,
            outcomes: OutcomeContext {
                drill_id: "loop-test".to_string(),
                connection_mode: ConnectionMode::Direct,
                database: "db01".to_string(),
                container: "ct01".to_string(),
                account_host: "localhost".to_string(),
                possibly_cold_start: true,
                log_diagnostics_for_success: false,
            },
            target: ContainerRef::new("db01", "ct01"),
            cache: TargetCache::default(),
            handoff: SessionHandoff::new(),
            stop: StopCondition::new(),
            counters: OperationCounters::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_loop_skips_empty_cache() {
        let client = Arc::new(ScriptedClient::default());
        let sink = Arc::new(MemorySink::new());
        let ctx = context(client.clone(), sink.clone(), Duration::from_secs(1), false);

        let stats = read_loop(&ctx, 1).await;

        assert_eq!(stats.attempts, 0);
        assert!(stats.skipped >= 9);
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_loop_fills_cache() {
        let client = Arc::new(ScriptedClient::default());
        client
            .creates
            .lock()
            .push_back(Err(StoreFailure::new(status::SERVICE_UNAVAILABLE, 0, "down")));
        let sink = Arc::new(MemorySink::new());
        let ctx = context(client.clone(), sink.clone(), Duration::from_millis(550), false);

        let stats = create_loop(&ctx, 0).await;

        assert_eq!(stats.attempts, 6);
        assert_eq!(ctx.cache.len(), 5);
        assert_eq!(sink.failures().len(), 1);
        // continuous writers never trip the stop condition
        assert!(!ctx.stop.is_tripped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_until_failure_stops_on_timeout() {
        let client = Arc::new(ScriptedClient::default());
        {
            let mut creates = client.creates.lock();
            creates.push_back(Ok(StoreResponse {
                session_token: Some("0:1#7".to_string()),
                ..StoreResponse::new(status::CREATED)
            }));
            creates.push_back(Err(StoreFailure::new(status::TOO_MANY_REQUESTS, 3200, "busy")));
            creates.push_back(Err(StoreFailure::new(status::REQUEST_TIMEOUT, 20008, "timeout")));
        }
        let sink = Arc::new(MemorySink::new());
        let ctx = context(client.clone(), sink.clone(), Duration::from_secs(10), false);

        let stats = create_until_failure_loop(&ctx, 0).await;

        assert_eq!(stats.attempts, 3);
        assert!(ctx.stop.is_tripped());
        assert_eq!(ctx.handoff.latest(), "0:1#7");

        let outcomes = sink.outcomes();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|outcome| outcome.latest_session_token.as_deref() == Some("0:1#7")));
        assert_eq!(outcomes[2].status_code, status::REQUEST_TIMEOUT);
        assert_eq!(outcomes[2].sub_status_code, 20008);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_read_attaches_latest_token() {
        let client = Arc::new(ScriptedClient::default());
        let sink = Arc::new(MemorySink::new());
        let ctx = context(client.clone(), sink.clone(), Duration::from_millis(250), true);
        ctx.handoff.publish("0:1#3");

        let stats = session_read_loop(&ctx, 1).await;

        assert_eq!(stats.attempts, 3);
        let tokens = client.read_tokens.lock().clone();
        assert!(tokens.iter().all(|token| token.as_deref() == Some("0:1#3")));
        assert!(sink
            .outcomes()
            .iter()
            .all(|outcome| outcome.latest_session_token.as_deref() == Some("0:1#3")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_read_without_token_option() {
        let client = Arc::new(ScriptedClient::default());
        let sink = Arc::new(MemorySink::new());
        let ctx = context(client.clone(), sink.clone(), Duration::from_millis(150), false);
        ctx.handoff.publish("0:1#3");

        session_read_loop(&ctx, 1).await;

        assert!(client.read_tokens.lock().iter().all(Option::is_none));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_loop() {
        let client = Arc::new(ScriptedClient::default());
        let sink = Arc::new(MemorySink::new());
        let ctx = Arc::new(context(client, sink, Duration::from_secs(3600), false));
        ctx.cache.add("seed");

        let handle = tokio::spawn(run_loop(LoopRole::Query, Arc::clone(&ctx), 2));
        tokio::time::sleep(Duration::from_millis(350)).await;
        ctx.cancel.cancel();

        let stats = handle.await.unwrap();
        assert_eq!(stats.role, LoopRole::Query);
        assert!(stats.attempts >= 3 && stats.attempts <= 5);
    }
}
