//! Drill workload engine.
//!
//! Runs a fixed pool of operation loops against a store for a bounded time:
//!
//! - **Continuous** drills rotate create, read and query loops and may
//!   register response-delay fault windows up front.
//! - **Stop-on-first-failure** drills write into one designated partition
//!   until the first availability failure, while session reads keep going.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use drill_core::{DrillConfig, TracingSink};
//! use drill_engine::DrillEngine;
//! use drill_store::{InMemoryStore, InMemoryStoreFactory};
//!
//! # async fn example() -> drill_core::DrillResult<()> {
//! let store = Arc::new(InMemoryStore::new());
//! let engine = DrillEngine::new(
//!     Arc::new(InMemoryStoreFactory::new(Arc::clone(&store))),
//!     store,
//!     Arc::new(TracingSink),
//! );
//!
//! let config = DrillConfig::load()?;
//! let report = engine.run(&config, config.workload.mode).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod context;
pub mod coordination;
pub mod counters;
pub mod engine;
pub mod faults;
pub mod loops;
pub mod report;

pub use cache::{TargetCache, DEFAULT_CAPACITY};
pub use context::{LoopContext, RunContext};
pub use coordination::{SessionHandoff, StopCondition};
pub use counters::{CountSnapshot, OperationCounters};
pub use engine::{fallback_regions, slot_role, DrillEngine, LOOP_START_DELAY};
pub use faults::{build_fault_rules, submit_fault_rules};
pub use loops::{run_loop, LoopRole, LoopStats};
pub use report::DrillReport;
