//! Process configuration loaded from the environment, following a
//! `Config::*_from_env()` pattern: one explicit struct-building function
//! per binary rather than a generic config crate.

use std::env;
use std::time::Duration;

/// Default concurrent workflow polls per worker.
const DEFAULT_WORKFLOW_POLL_CAPACITY: usize = 8;
/// Default concurrent activity polls per worker.
const DEFAULT_ACTIVITY_POLL_CAPACITY: usize = 16;
const DEFAULT_METRICS_PORT: u16 = 9090;
const DEFAULT_GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stable per-process identifier, used only as a metrics label (spec
    /// §4.15/§9: never `sync_id`/`sync_job_id`).
    pub worker_id: String,
    pub workflow_poll_capacity: usize,
    pub activity_poll_capacity: usize,
    /// Internal control port (`/health`, `/drain`, `/metrics`, `/status`);
    /// `0` disables the HTTP surface entirely.
    pub metrics_port: u16,
    /// How long a drain waits for in-flight activities before the process
    /// exits regardless (`TEMPORAL_GRACEFUL_SHUTDOWN_TIMEOUT`).
    pub graceful_shutdown_timeout: Duration,
    /// `TEMPORAL_DISABLE_SANDBOX` — read and honored even though the
    /// activity queue backing this worker is in-process rather than a
    /// literal Temporal connection.
    pub temporal_disable_sandbox: bool,
    /// Interval between stuck-job cleanup sweeps.
    pub stuck_job_sweep_interval: Duration,
    pub worker_concurrency: usize,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            worker_id: env::var("WORKER_ID").unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::new_v4())),
            workflow_poll_capacity: env_usize("WORKER_WORKFLOW_POLL_CAPACITY", DEFAULT_WORKFLOW_POLL_CAPACITY),
            activity_poll_capacity: env_usize("WORKER_ACTIVITY_POLL_CAPACITY", DEFAULT_ACTIVITY_POLL_CAPACITY),
            metrics_port: env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_METRICS_PORT),
            graceful_shutdown_timeout: env::var("TEMPORAL_GRACEFUL_SHUTDOWN_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN),
            temporal_disable_sandbox: env::var("TEMPORAL_DISABLE_SANDBOX")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            stuck_job_sweep_interval: Duration::from_secs(60),
            worker_concurrency: env_usize("WORKER_ENTITY_CONCURRENCY", 20),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_when_env_is_unset() {
        let cfg = WorkerConfig {
            worker_id: "w1".to_string(),
            workflow_poll_capacity: DEFAULT_WORKFLOW_POLL_CAPACITY,
            activity_poll_capacity: DEFAULT_ACTIVITY_POLL_CAPACITY,
            metrics_port: DEFAULT_METRICS_PORT,
            graceful_shutdown_timeout: DEFAULT_GRACEFUL_SHUTDOWN,
            temporal_disable_sandbox: false,
            stuck_job_sweep_interval: Duration::from_secs(60),
            worker_concurrency: 20,
        };
        assert_eq!(cfg.workflow_poll_capacity, 8);
        assert_eq!(cfg.activity_poll_capacity, 16);
    }
}
