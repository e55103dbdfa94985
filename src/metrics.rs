use prometheus::{histogram_opts, opts, Histogram, IntCounterVec, IntGauge, Registry};
use tokio::time::Instant;

use crate::events::ResourceKind;

#[derive(Clone)]
pub struct Metrics {
    pub sync_enqueues: IntCounterVec,
    pub dropped_events: IntCounterVec,
    pub weight_updates: IntCounterVec,
    pub namespace_reconcile_duration: Histogram,
    pub watcher_groups: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        let sync_enqueues = IntCounterVec::new(
            opts!(
                "ingress_conductor_sync_enqueues_total",
                "resources enqueued for a full configuration sync"
            ),
            &["kind"],
        )
        .unwrap();
        let dropped_events = IntCounterVec::new(
            opts!(
                "ingress_conductor_dropped_events_total",
                "watch events dropped before classification"
            ),
            &["kind"],
        )
        .unwrap();
        let weight_updates = IntCounterVec::new(
            opts!(
                "ingress_conductor_weight_updates_total",
                "canary split weight changes applied without a full sync"
            ),
            &["kind"],
        )
        .unwrap();
        let namespace_reconcile_duration = Histogram::with_opts(
            histogram_opts!(
                "ingress_conductor_namespace_reconcile_duration_seconds",
                "The duration of a namespace watcher reconciliation in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
        )
        .unwrap();
        let watcher_groups = IntGauge::new(
            "ingress_conductor_watcher_groups",
            "namespace-scoped watcher groups currently active",
        )
        .unwrap();
        Metrics {
            sync_enqueues,
            dropped_events,
            weight_updates,
            namespace_reconcile_duration,
            watcher_groups,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.sync_enqueues.clone()))?;
        registry.register(Box::new(self.dropped_events.clone()))?;
        registry.register(Box::new(self.weight_updates.clone()))?;
        registry.register(Box::new(self.namespace_reconcile_duration.clone()))?;
        registry.register(Box::new(self.watcher_groups.clone()))?;
        Ok(self)
    }

    pub fn count_enqueue(&self, kind: ResourceKind) {
        self.sync_enqueues.with_label_values(&[kind.as_str()]).inc()
    }

    pub fn count_dropped(&self, kind: ResourceKind) {
        self.dropped_events
            .with_label_values(&[kind.as_str()])
            .inc()
    }

    pub fn count_weight_update(&self, kind: ResourceKind) {
        self.weight_updates
            .with_label_values(&[kind.as_str()])
            .inc()
    }

    pub fn measure_namespace_reconcile(&self) -> ReconcileMeasurer {
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.namespace_reconcile_duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.observe(duration);
    }
}
