//! Consensus metrics using the native Prometheus client.
//!
//! Metrics are write-only, cheap side effects; nothing in the driver reads
//! them back and a recording failure never affects consensus.

use prometheus::{
    register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram,
};
use std::sync::OnceLock;
use std::time::Duration;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Domain-specific consensus metrics.
pub struct Metrics {
    /// Time from round start to our proposal being broadcast.
    pub proposal_sent_latency: Histogram,
    /// Time from round start to receiving the round proposal.
    pub proposal_received_latency: Histogram,
    /// Wall time spent in backend proposal verification.
    pub proposal_verify_latency: Histogram,

    /// Total blocks committed by this node.
    pub blocks_committed: Counter,
    /// Current consensus height.
    pub height: Gauge,
    /// Current round within the height.
    pub round: Gauge,

    /// Proposals parked for a future round or height.
    pub proposals_backlogged: Counter,
    /// Distinct second proposals or votes observed for one (round, step).
    pub equivocations_detected: Counter,
}

impl Metrics {
    fn new() -> Self {
        let latency_buckets = vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ];

        Self {
            proposal_sent_latency: register_histogram!(
                "tendermill_proposal_sent_latency_seconds",
                "Time from round start to proposal broadcast",
                latency_buckets.clone()
            )
            .unwrap(),

            proposal_received_latency: register_histogram!(
                "tendermill_proposal_received_latency_seconds",
                "Time from round start to proposal reception",
                latency_buckets.clone()
            )
            .unwrap(),

            proposal_verify_latency: register_histogram!(
                "tendermill_proposal_verify_latency_seconds",
                "Time spent verifying a received proposal",
                latency_buckets
            )
            .unwrap(),

            blocks_committed: register_counter!(
                "tendermill_blocks_committed_total",
                "Total blocks committed"
            )
            .unwrap(),

            height: register_gauge!("tendermill_consensus_height", "Current consensus height")
                .unwrap(),

            round: register_gauge!(
                "tendermill_consensus_round",
                "Current round within the height"
            )
            .unwrap(),

            proposals_backlogged: register_counter!(
                "tendermill_proposals_backlogged_total",
                "Proposals deferred to the backlog"
            )
            .unwrap(),

            equivocations_detected: register_counter!(
                "tendermill_equivocations_detected_total",
                "Conflicting proposals or votes observed"
            )
            .unwrap(),
        }
    }
}

/// Global metrics handle, registered on first use.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Observe a duration into a histogram, in seconds.
pub fn observe(histogram: &Histogram, elapsed: Duration) {
    histogram.observe(elapsed.as_secs_f64());
}
