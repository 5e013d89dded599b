//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_deposits_total` - Deposits applied
//! - `ledger_withdrawals_total` - Withdrawals submitted
//! - `ledger_conversions_total` - Conversions executed
//! - `ledger_duplicate_events_total` - Replayed provider events
//! - `ledger_insufficient_funds_total` - Mutations rejected for funds
//! - `ledger_commit_duration_seconds` - Balance commit latencies
//! - `ledger_pending_transactions` - Stale PENDING transactions
//! - `ledger_parked_events` - Events awaiting operator review

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Deposits applied
    pub deposits_total: IntCounter,

    /// Withdrawals submitted
    pub withdrawals_total: IntCounter,

    /// Conversions executed
    pub conversions_total: IntCounter,

    /// Replayed provider events resolved idempotently
    pub duplicate_events_total: IntCounter,

    /// Mutations rejected for insufficient funds
    pub insufficient_funds_total: IntCounter,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Stale PENDING transactions awaiting reconciliation
    pub pending_transactions: IntGauge,

    /// Parked events awaiting operator review
    pub parked_events: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let deposits_total = IntCounter::with_opts(Opts::new(
            "ledger_deposits_total",
            "Total deposits applied",
        ))?;
        registry.register(Box::new(deposits_total.clone()))?;

        let withdrawals_total = IntCounter::with_opts(Opts::new(
            "ledger_withdrawals_total",
            "Total withdrawals submitted",
        ))?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let conversions_total = IntCounter::with_opts(Opts::new(
            "ledger_conversions_total",
            "Total conversions executed",
        ))?;
        registry.register(Box::new(conversions_total.clone()))?;

        let duplicate_events_total = IntCounter::with_opts(Opts::new(
            "ledger_duplicate_events_total",
            "Total replayed provider events",
        ))?;
        registry.register(Box::new(duplicate_events_total.clone()))?;

        let insufficient_funds_total = IntCounter::with_opts(Opts::new(
            "ledger_insufficient_funds_total",
            "Total mutations rejected for insufficient funds",
        ))?;
        registry.register(Box::new(insufficient_funds_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_commit_duration_seconds",
                "Histogram of balance commit latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let pending_transactions = IntGauge::with_opts(Opts::new(
            "ledger_pending_transactions",
            "Stale PENDING transactions awaiting reconciliation",
        ))?;
        registry.register(Box::new(pending_transactions.clone()))?;

        let parked_events = IntGauge::with_opts(Opts::new(
            "ledger_parked_events",
            "Parked events awaiting operator review",
        ))?;
        registry.register(Box::new(parked_events.clone()))?;

        Ok(Self {
            deposits_total,
            withdrawals_total,
            conversions_total,
            duplicate_events_total,
            insufficient_funds_total,
            commit_duration,
            pending_transactions,
            parked_events,
            registry,
        })
    }

    /// Record an applied deposit
    pub fn record_deposit(&self) {
        self.deposits_total.inc();
    }

    /// Record a submitted withdrawal
    pub fn record_withdrawal(&self) {
        self.withdrawals_total.inc();
    }

    /// Record an executed conversion
    pub fn record_conversion(&self) {
        self.conversions_total.inc();
    }

    /// Record a replayed provider event
    pub fn record_duplicate_event(&self) {
        self.duplicate_events_total.inc();
    }

    /// Record a mutation rejected for insufficient funds
    pub fn record_insufficient_funds(&self) {
        self.insufficient_funds_total.inc();
    }

    /// Record a commit duration
    pub fn record_commit_duration(&self, duration_seconds: f64) {
        self.commit_duration.observe(duration_seconds);
    }

    /// Update the stale-pending gauge
    pub fn update_pending_transactions(&self, count: i64) {
        self.pending_transactions.set(count);
    }

    /// Update the parked-events gauge
    pub fn update_parked_events(&self, count: i64) {
        self.parked_events.set(count);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.deposits_total.get(), 0);
        assert_eq!(metrics.withdrawals_total.get(), 0);
        assert_eq!(metrics.conversions_total.get(), 0);
    }

    #[test]
    fn test_record_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_deposit();
        metrics.record_deposit();
        metrics.record_withdrawal();
        metrics.record_duplicate_event();
        metrics.record_insufficient_funds();
        assert_eq!(metrics.deposits_total.get(), 2);
        assert_eq!(metrics.withdrawals_total.get(), 1);
        assert_eq!(metrics.duplicate_events_total.get(), 1);
        assert_eq!(metrics.insufficient_funds_total.get(), 1);
    }

    #[test]
    fn test_update_gauges() {
        let metrics = Metrics::new().unwrap();
        metrics.update_pending_transactions(3);
        metrics.update_parked_events(1);
        assert_eq!(metrics.pending_transactions.get(), 3);
        assert_eq!(metrics.parked_events.get(), 1);
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_deposit();
        assert_eq!(a.deposits_total.get(), 1);
        assert_eq!(b.deposits_total.get(), 0);
    }
}
