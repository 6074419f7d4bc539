//! Simulated store backend for resilience drills.
//!
//! [`InMemoryStore`] implements both the store client and the fault-injection
//! contracts from `drill-core`; [`InMemoryStoreFactory`] hands it out as a
//! client factory.

pub mod memory;

pub use memory::{
    CallRecord, InMemoryStore, InMemoryStoreFactory, ScriptedFailure, SimulatedStoreConfig,
    StoreOperation,
};
