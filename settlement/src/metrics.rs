//! Metrics collection for observability
//!
//! Each executor owns its own Prometheus registry so several engines can live
//! in one process.
//!
//! # Metrics
//!
//! - `settlement_calls_total{entry}` - Committed calls per entry point
//! - `settlement_rejections_total{entry,category}` - Aborted calls by error category
//! - `settlement_reimbursements_total{outcome}` - Reimbursement attempts
//! - `settlement_gas_reimbursed_total` - Gas units recovered from payers
//! - `settlement_events_dropped_total` - Undrained events evicted from the log

use crate::error::ErrorCategory;
use crate::types::EntryPoint;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed calls
    pub calls_total: IntCounterVec,

    /// Aborted calls
    pub rejections_total: IntCounterVec,

    /// Reimbursement outcomes
    pub reimbursements_total: IntCounterVec,

    /// Gas recovered
    pub gas_reimbursed: IntCounter,

    /// Events evicted before being drained
    pub events_dropped: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("gas_reimbursed", &self.gas_reimbursed.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let calls_total = IntCounterVec::new(
            Opts::new("settlement_calls_total", "Committed calls per entry point"),
            &["entry"],
        )?;
        registry.register(Box::new(calls_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("settlement_rejections_total", "Aborted calls by error category"),
            &["entry", "category"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let reimbursements_total = IntCounterVec::new(
            Opts::new("settlement_reimbursements_total", "Reimbursement attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(reimbursements_total.clone()))?;

        let gas_reimbursed = IntCounter::new(
            "settlement_gas_reimbursed_total",
            "Gas units recovered from payers",
        )?;
        registry.register(Box::new(gas_reimbursed.clone()))?;

        let events_dropped = IntCounter::new(
            "settlement_events_dropped_total",
            "Undrained events evicted from the log",
        )?;
        registry.register(Box::new(events_dropped.clone()))?;

        Ok(Self {
            calls_total,
            rejections_total,
            reimbursements_total,
            gas_reimbursed,
            events_dropped,
            registry,
        })
    }

    /// Record a committed call
    pub fn record_call(&self, entry: EntryPoint) {
        self.calls_total.with_label_values(&[entry.as_str()]).inc();
    }

    /// Record an aborted call
    pub fn record_rejection(&self, entry: EntryPoint, category: ErrorCategory) {
        self.rejections_total
            .with_label_values(&[entry.as_str(), category.as_str()])
            .inc();
    }

    /// Record a reimbursement attempt
    pub fn record_reimbursement(&self, success: bool, gas: u64) {
        let outcome = if success { "success" } else { "failure" };
        self.reimbursements_total.with_label_values(&[outcome]).inc();
        if success {
            self.gas_reimbursed.inc_by(gas);
        }
    }

    /// Record events evicted from a full log
    pub fn record_events_dropped(&self, count: usize) {
        self.events_dropped.inc_by(count as u64);
    }

    /// Get Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
