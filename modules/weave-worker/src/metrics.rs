//! Prometheus metrics: "never label
//! metrics with `sync_id` or `sync_job_id`; aggregate by `connector_type`
//! and `worker_id`." Grounded on the `prometheus` crate's standard
//! registry/encoder pattern, the same one used for metrics elsewhere in
//! the retrieval pack (`estuary-flow/crates/metrics`).

use std::sync::Arc;
use std::time::Instant;

use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

pub struct WorkerMetrics {
    registry: Registry,
    started_at: Instant,
    /// 1 = running, 2 = draining, 0 = not running. A single gauge, not a
    /// string label, keeps cardinality flat.
    status: IntGauge,
    active_activities: IntGauge,
    active_sync_jobs: IntGauge,
    /// Active syncs per connector type (labeled `connector_type` only).
    active_syncs_by_connector: IntGaugeVec,
    /// Workers currently waiting for capacity, per connector type.
    pending_by_connector: IntGaugeVec,
    workflow_pool_size: IntGauge,
    activity_pool_size: IntGauge,
}

pub const STATUS_NOT_RUNNING: i64 = 0;
pub const STATUS_RUNNING: i64 = 1;
pub const STATUS_DRAINING: i64 = 2;

impl WorkerMetrics {
    pub fn new(worker_id: &str) -> Arc<Self> {
        let registry = Registry::new();

        let status = IntGauge::with_opts(
            Opts::new("weave_worker_status", "0=not_running 1=running 2=draining").const_label("worker_id", worker_id),
        )
        .expect("static metric opts");
        let active_activities = IntGauge::with_opts(
            Opts::new("weave_worker_active_activities", "currently executing activities").const_label("worker_id", worker_id),
        )
        .expect("static metric opts");
        let active_sync_jobs = IntGauge::with_opts(
            Opts::new("weave_worker_active_sync_jobs", "currently running sync jobs").const_label("worker_id", worker_id),
        )
        .expect("static metric opts");
        let active_syncs_by_connector = IntGaugeVec::new(
            Opts::new("weave_worker_active_syncs_by_connector", "active syncs per connector type").const_label("worker_id", worker_id),
            &["connector_type"],
        )
        .expect("static metric opts");
        let pending_by_connector = IntGaugeVec::new(
            Opts::new("weave_worker_pending_by_connector", "workers waiting for poll capacity per connector type")
                .const_label("worker_id", worker_id),
            &["connector_type"],
        )
        .expect("static metric opts");
        let workflow_pool_size = IntGauge::with_opts(
            Opts::new("weave_worker_workflow_pool_size", "configured workflow poll capacity").const_label("worker_id", worker_id),
        )
        .expect("static metric opts");
        let activity_pool_size = IntGauge::with_opts(
            Opts::new("weave_worker_activity_pool_size", "configured activity poll capacity").const_label("worker_id", worker_id),
        )
        .expect("static metric opts");

        registry.register(Box::new(status.clone())).expect("register once");
        registry.register(Box::new(active_activities.clone())).expect("register once");
        registry.register(Box::new(active_sync_jobs.clone())).expect("register once");
        registry.register(Box::new(active_syncs_by_connector.clone())).expect("register once");
        registry.register(Box::new(pending_by_connector.clone())).expect("register once");
        registry.register(Box::new(workflow_pool_size.clone())).expect("register once");
        registry.register(Box::new(activity_pool_size.clone())).expect("register once");

        Arc::new(Self {
            registry,
            started_at: Instant::now(),
            status,
            active_activities,
            active_sync_jobs,
            active_syncs_by_connector,
            pending_by_connector,
            workflow_pool_size,
            activity_pool_size,
        })
    }

    pub fn set_status(&self, status: i64) {
        self.status.set(status);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn inc_active_activities(&self) {
        self.active_activities.inc();
    }

    pub fn dec_active_activities(&self) {
        self.active_activities.dec();
    }

    pub fn set_active_sync_jobs(&self, n: i64) {
        self.active_sync_jobs.set(n);
    }

    pub fn inc_active_syncs(&self, connector_type: &str) {
        self.active_syncs_by_connector.with_label_values(&[connector_type]).inc();
    }

    pub fn dec_active_syncs(&self, connector_type: &str) {
        self.active_syncs_by_connector.with_label_values(&[connector_type]).dec();
    }

    pub fn inc_pending(&self, connector_type: &str) {
        self.pending_by_connector.with_label_values(&[connector_type]).inc();
    }

    pub fn dec_pending(&self, connector_type: &str) {
        self.pending_by_connector.with_label_values(&[connector_type]).dec();
    }

    pub fn set_pool_sizes(&self, workflow_capacity: usize, activity_capacity: usize) {
        self.workflow_pool_size.set(workflow_capacity as i64);
        self.activity_pool_size.set(activity_capacity as i64);
    }

    /// Renders the registry as Prometheus text exposition format 0.0.4.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("text encoder never fails on valid metric families");
        String::from_utf8(buf).expect("prometheus text encoder emits valid utf8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_output_carries_worker_id_but_no_sync_labels() {
        let metrics = WorkerMetrics::new("worker-1");
        metrics.inc_active_syncs("asana");
        let text = metrics.encode();
        assert!(text.contains("worker_id=\"worker-1\""));
        assert!(text.contains("connector_type=\"asana\""));
        assert!(!text.contains("sync_id"));
        assert!(!text.contains("sync_job_id"));
    }
}
