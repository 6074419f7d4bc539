//! Store client contract.
//!
//! The drill never talks to a concrete database directly. Everything it needs
//! from the remote store goes through [`StoreClient`], and clients are built by
//! a [`StoreClientFactory`] from [`ClientSettings`]. Every call returns either
//! a [`StoreResponse`] or a typed [`StoreFailure`]; both carry the status code
//! and the regions the client contacted so the drill can record them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConnectionMode;
use crate::error::DrillResult;
use crate::item::DrillItem;
use crate::tuning::{ClientTuning, SessionRetryPolicy};

/// Status codes the drill cares about.
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const CONFLICT: u16 = 409;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;

    /// Sub-status reported when the client gave up on the end-to-end timeout.
    pub const SUB_STATUS_E2E_TIMEOUT: u32 = 20008;
}

/// Returns true when a status code means the target was unreachable or timed
/// out, as opposed to a data-level error.
#[must_use]
pub fn is_availability_related(status_code: u16) -> bool {
    status_code == status::SERVICE_UNAVAILABLE || status_code == status::REQUEST_TIMEOUT
}

/// Successful store response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreResponse {
    /// Status code returned by the store (e.g. 200, 201).
    pub status_code: u16,

    /// Consistency token of the partition after this request.
    pub session_token: Option<String>,

    /// Regions contacted while serving the request, in contact order.
    pub contacted_regions: Vec<String>,

    /// Opaque client diagnostics.
    pub diagnostics: String,

    /// Number of items returned (queries and reads).
    pub item_count: usize,
}

impl StoreResponse {
    /// Creates a response with the given status and nothing else.
    #[must_use]
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }

    /// Comma-joined list of contacted regions.
    #[must_use]
    pub fn contacted_regions_csv(&self) -> String {
        self.contacted_regions.join(",")
    }
}

/// Typed store failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("store request failed with status {status_code}/{sub_status_code}: {message}")]
pub struct StoreFailure {
    /// Status code reported by the store.
    pub status_code: u16,

    /// Store-specific sub-status code.
    pub sub_status_code: u32,

    /// Error message.
    pub message: String,

    /// Regions contacted before the request failed.
    pub contacted_regions: Vec<String>,

    /// Opaque client diagnostics.
    pub diagnostics: String,
}

impl StoreFailure {
    #[must_use]
    pub fn new(status_code: u16, sub_status_code: u32, message: impl Into<String>) -> Self {
        Self {
            status_code,
            sub_status_code,
            message: message.into(),
            contacted_regions: Vec::new(),
            diagnostics: String::new(),
        }
    }

    #[must_use]
    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.contacted_regions = regions;
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = diagnostics.into();
        self
    }

    /// See [`is_availability_related`].
    #[must_use]
    pub fn is_availability_related(&self) -> bool {
        is_availability_related(self.status_code)
    }

    /// Comma-joined list of contacted regions.
    #[must_use]
    pub fn contacted_regions_csv(&self) -> String {
        self.contacted_regions.join(",")
    }
}

/// Result of a single store call.
pub type StoreResult = Result<StoreResponse, StoreFailure>;

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemRequestOptions {
    /// Bound on the whole operation, including client retries.
    pub end_to_end_timeout: Option<Duration>,

    /// Consistency token to attach to the request.
    pub session_token: Option<String>,
}

impl ItemRequestOptions {
    /// Options with no timeout and no token.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Options bounded by an end-to-end timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            end_to_end_timeout: Some(timeout),
            session_token: None,
        }
    }

    #[must_use]
    pub fn session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

/// Database + container pair the drill targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRef {
    pub database: String,
    pub container: String,
}

impl ContainerRef {
    #[must_use]
    pub fn new(database: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.container)
    }
}

/// Database provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSpec {
    pub name: String,
    /// Manual throughput shared by every container of the database.
    pub shared_throughput: Option<u32>,
}

/// Container provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub partition_key_path: String,
    pub default_ttl_secs: Option<u32>,
    /// Manual throughput dedicated to this container.
    pub dedicated_throughput: Option<u32>,
}

/// Parameterized query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub text: String,
    pub parameters: Vec<(String, String)>,
}

impl QuerySpec {
    /// `SELECT * FROM c WHERE c.id = @id`
    #[must_use]
    pub fn point_lookup(id: impl Into<String>) -> Self {
        Self {
            text: "SELECT * FROM c WHERE c.id = @id".to_string(),
            parameters: vec![("@id".to_string(), id.into())],
        }
    }

    /// Looks up a parameter value by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Everything a factory needs to build a client for one run.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint: String,
    pub master_key: String,
    pub preferred_regions: Vec<String>,
    pub connection_mode: ConnectionMode,
    /// Appended to the user agent so server-side logs can be tied to a drill.
    pub user_agent_suffix: String,
    pub session_retry: SessionRetryPolicy,
    pub tuning: ClientTuning,
}

/// Client for the remote partitioned store.
///
/// Implementations must be safe to share between every operation loop of a
/// run. Calls are awaited to completion; the drill never abandons an
/// in-flight call.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Creates the database unless it already exists.
    async fn create_database_if_not_exists(&self, database: &DatabaseSpec) -> StoreResult;

    /// Creates the container unless it already exists.
    async fn create_container_if_not_exists(
        &self,
        database: &str,
        container: &ContainerSpec,
    ) -> StoreResult;

    /// Inserts or replaces an item.
    async fn upsert_item(
        &self,
        target: &ContainerRef,
        item: &DrillItem,
        options: &ItemRequestOptions,
    ) -> StoreResult;

    /// Inserts an item; fails with 409 when the id already exists.
    async fn create_item(
        &self,
        target: &ContainerRef,
        item: &DrillItem,
        options: &ItemRequestOptions,
    ) -> StoreResult;

    /// Point read by id and partition key.
    async fn read_item(
        &self,
        target: &ContainerRef,
        id: &str,
        partition_key: &str,
        options: &ItemRequestOptions,
    ) -> StoreResult;

    /// Runs a query and drains every page.
    async fn query_items(
        &self,
        target: &ContainerRef,
        query: &QuerySpec,
        options: &ItemRequestOptions,
    ) -> StoreResult;

    /// Releases connections. Called exactly once per run.
    async fn close(&self);
}

/// Builds store clients.
#[async_trait]
pub trait StoreClientFactory: Send + Sync {
    /// Returns the account's readable regions in service order.
    async fn discover_regions(&self, endpoint: &str, master_key: &str) -> DrillResult<Vec<String>>;

    /// Builds a client for one drill run.
    async fn connect(&self, settings: &ClientSettings) -> DrillResult<Arc<dyn StoreClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_classification() {
        let cases = [
            (status::OK, false),
            (status::CREATED, false),
            (status::NOT_FOUND, false),
            (status::CONFLICT, false),
            (status::TOO_MANY_REQUESTS, false),
            (status::INTERNAL_SERVER_ERROR, false),
            (status::SERVICE_UNAVAILABLE, true),
            (status::REQUEST_TIMEOUT, true),
        ];

        for (code, expected) in cases {
            assert_eq!(is_availability_related(code), expected, "status {code}");
        }
    }

    #[test]
    fn test_failure_regions_csv() {
        let failure = StoreFailure::new(status::REQUEST_TIMEOUT, 20008, "timed out")
            .with_regions(vec!["East US".to_string(), "West US".to_string()]);
        assert_eq!(failure.contacted_regions_csv(), "East US,West US");
        assert!(failure.is_availability_related());
    }

    #[test]
    fn test_point_lookup_query() {
        let query = QuerySpec::point_lookup("abc");
        assert_eq!(query.parameter("@id"), Some("abc"));
        assert_eq!(query.parameter("@pk"), None);
    }
}
