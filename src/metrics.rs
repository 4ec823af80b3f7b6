//! Prometheus metrics of the reconcile loop

use crate::error::{Error, ReconcileOutcome, Result};
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Reconcile counters and timings
#[derive(Clone)]
pub struct Metrics {
    reconciliations: IntCounterVec,
    duration: Histogram,
}

impl Metrics {
    /// Create the metrics and register them with `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let reconciliations = IntCounterVec::new(
            Opts::new("noobaa_reconcile_total", "Reconcile passes by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "noobaa_reconcile_duration_seconds",
                "Duration of reconcile passes",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(reconciliations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            reconciliations,
            duration,
        })
    }

    /// Record one finished pass
    pub fn observe(&self, outcome: ReconcileOutcome, elapsed: Duration) {
        self.reconciliations
            .with_label_values(&[outcome_label(outcome)])
            .inc();
        self.duration.observe(elapsed.as_secs_f64());
    }

    /// Record a pass that failed before producing an outcome
    pub fn observe_error(&self) {
        self.reconciliations.with_label_values(&["error"]).inc();
    }
}

fn outcome_label(outcome: ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Done => "done",
        ReconcileOutcome::RequeueAfter(_) => "requeue",
        ReconcileOutcome::AwaitChange => "await_change",
    }
}

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics registration failed: {}", err))
}
