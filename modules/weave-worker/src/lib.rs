//! Worker runtime: the process entrypoint that polls
//! an activity queue, runs sync jobs through the orchestrator, and
//! exposes a health/drain/metrics/status HTTP surface. Everything above
//! C14 in the component table is wired together here; this crate owns no
//! sync-execution logic of its own beyond scheduling and process
//! lifecycle.

pub mod config;
pub mod control;
pub mod metrics;
pub mod queue;
pub mod runtime;

pub use config::WorkerConfig;
pub use queue::{Activity, ActivityQueue, InProcessActivityQueue};
pub use runtime::WorkerRuntime;
