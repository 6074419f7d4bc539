//! Core types and contracts for resilience drills.

pub mod config;
pub mod error;
pub mod fault;
pub mod item;
pub mod outcome;
pub mod store;
pub mod tuning;

pub use config::{
    AccountConfig, ConnectionMode, DrillConfig, DrillMode, FaultInjectionConfig, StoreConfig,
    TimeoutConfig, WorkloadConfig,
};
pub use error::{DrillError, DrillResult};
pub use fault::{FaultCondition, FaultEffect, FaultInjector, FaultOperationType, FaultRule};
pub use item::{DrillItem, DESIGNATED_ITEM_ID};
pub use outcome::{Attempt, MemorySink, OperationKind, Outcome, OutcomeContext, OutcomeSink, TracingSink};
pub use store::{
    is_availability_related, ClientSettings, ContainerRef, ContainerSpec, DatabaseSpec,
    ItemRequestOptions, QuerySpec, StoreClient, StoreClientFactory, StoreFailure, StoreResponse,
    StoreResult,
};
pub use tuning::{
    ClientTuning, PartitionCircuitBreakerConfig, RegionSwitchHint, SessionRetryPolicy,
    TuningRegistry, TuningScope,
};
