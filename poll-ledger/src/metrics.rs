//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `poll_votes_committed_total` - Votes written to a ledger
//! - `poll_votes_rejected_total{reason}` - Votes refused (already_voted, invalid_candidate, ...)
//! - `poll_commit_conflicts_total` - Index collisions caught at commit
//! - `poll_integrity_failures_total` - Damaged ledgers detected (verification or tally recount);
//!   votes refused on an already-quarantined poll count as `votes_rejected{reason="integrity"}`
//! - `poll_cast_duration_seconds` - Histogram of end-to-end `cast_vote` latencies
//!
//! Collectors live in a private registry so several coordinators can coexist
//! in one process.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Votes committed
    pub votes_committed: IntCounter,

    /// Votes rejected, by reason
    pub votes_rejected: IntCounterVec,

    /// Commit index conflicts
    pub commit_conflicts: IntCounter,

    /// Integrity failures
    pub integrity_failures: IntCounter,

    /// Cast duration histogram
    pub cast_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("votes_committed", &self.votes_committed.get())
            .field("commit_conflicts", &self.commit_conflicts.get())
            .field("integrity_failures", &self.integrity_failures.get())
            .field("cast_samples", &self.cast_duration.get_sample_count())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let votes_committed = IntCounter::new(
            "poll_votes_committed_total",
            "Total number of votes committed to a ledger",
        )?;
        registry.register(Box::new(votes_committed.clone()))?;

        let votes_rejected = IntCounterVec::new(
            Opts::new("poll_votes_rejected_total", "Total number of rejected votes"),
            &["reason"],
        )?;
        registry.register(Box::new(votes_rejected.clone()))?;

        let commit_conflicts = IntCounter::new(
            "poll_commit_conflicts_total",
            "Block index collisions caught at commit",
        )?;
        registry.register(Box::new(commit_conflicts.clone()))?;

        let integrity_failures = IntCounter::new(
            "poll_integrity_failures_total",
            "Ledger verifications or tally recounts that failed",
        )?;
        registry.register(Box::new(integrity_failures.clone()))?;

        let cast_duration = Histogram::with_opts(
            HistogramOpts::new("poll_cast_duration_seconds", "Histogram of cast latencies")
                .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(cast_duration.clone()))?;

        Ok(Self {
            votes_committed,
            votes_rejected,
            commit_conflicts,
            integrity_failures,
            cast_duration,
            registry,
        })
    }

    /// Record committed vote
    pub fn record_committed(&self) {
        self.votes_committed.inc();
    }

    /// Record rejected vote
    pub fn record_rejected(&self, reason: &str) {
        self.votes_rejected.with_label_values(&[reason]).inc();
    }

    /// Record commit conflict
    pub fn record_conflict(&self) {
        self.commit_conflicts.inc();
    }

    /// Record integrity failure
    pub fn record_integrity_failure(&self) {
        self.integrity_failures.inc();
    }

    /// Record cast duration
    pub fn record_cast_duration(&self, duration_seconds: f64) {
        self.cast_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
