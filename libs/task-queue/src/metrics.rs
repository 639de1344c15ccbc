use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct TaskQueueMetrics {
    pub pending: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub completed: IntCounter,
    pub failed: IntCounter,
}

impl TaskQueueMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let pending = IntGauge::with_opts(
            Opts::new(
                "task_queue_pending_count",
                "Number of incomplete tasks currently pending",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for task_queue_pending_count");

        let oldest_pending_age_seconds = IntGauge::with_opts(
            Opts::new(
                "task_queue_oldest_pending_age_seconds",
                "Age in seconds of the oldest pending task",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for task_queue_oldest_pending_age_seconds");

        let completed = IntCounter::with_opts(
            Opts::new(
                "task_queue_completed_total",
                "Total number of tasks completed successfully",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for task_queue_completed_total");

        let failed = IntCounter::with_opts(
            Opts::new(
                "task_queue_failed_total",
                "Total number of task executions that failed",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for task_queue_failed_total");

        for metric in [
            Box::new(pending.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(oldest_pending_age_seconds.clone()),
            Box::new(completed.clone()),
            Box::new(failed.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register task queue metric: {}", e);
            }
        }

        Self {
            pending,
            oldest_pending_age_seconds,
            completed,
            failed,
        }
    }
}
