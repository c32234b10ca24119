//! Prometheus metrics for vote admission.
//!
//! [`AdmissionMetrics`] owns a dedicated [`Registry`] that the HTTP
//! `/metrics` endpoint encodes into the text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Encoder, Histogram, HistogramOpts, IntCounter,
    IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct AdmissionMetrics {
    pub registry: Registry,

    /// Votes recorded for the first time.
    pub votes_created: IntCounter,
    /// Requests answered with an existing vote.
    pub votes_idempotent: IntCounter,
    /// Rejections, labelled by `reason` code.
    pub rejections: IntCounterVec,
    /// Extra durable-write attempts after a transient failure.
    pub write_retries: IntCounter,
    /// Polls spent waiting on another caller's reservation.
    pub reservation_waits: IntCounter,
    /// End-to-end `cast_vote` latency in milliseconds.
    pub cast_latency_ms: Histogram,
}

impl AdmissionMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let votes_created = register_int_counter_with_registry!(
            Opts::new("provote_votes_created_total", "Votes recorded for the first time"),
            registry
        )
        .expect("failed to register votes_created counter");

        let votes_idempotent = register_int_counter_with_registry!(
            Opts::new(
                "provote_votes_idempotent_total",
                "Cast requests answered with an existing vote"
            ),
            registry
        )
        .expect("failed to register votes_idempotent counter");

        let rejections = register_int_counter_vec_with_registry!(
            Opts::new("provote_rejections_total", "Rejected cast requests by reason"),
            &["reason"],
            registry
        )
        .expect("failed to register rejections counter");

        let write_retries = register_int_counter_with_registry!(
            Opts::new(
                "provote_write_retries_total",
                "Durable-write retries after transient storage errors"
            ),
            registry
        )
        .expect("failed to register write_retries counter");

        let reservation_waits = register_int_counter_with_registry!(
            Opts::new(
                "provote_reservation_waits_total",
                "Polls spent waiting on an in-flight idempotency key"
            ),
            registry
        )
        .expect("failed to register reservation_waits counter");

        // 0.5 ms → ~8 s
        let cast_latency_ms = register_histogram_with_registry!(
            HistogramOpts::new("provote_cast_latency_ms", "cast_vote latency in milliseconds")
                .buckets(prometheus::exponential_buckets(0.5, 2.0, 15).unwrap()),
            registry
        )
        .expect("failed to register cast_latency_ms histogram");

        Self {
            registry,
            votes_created,
            votes_idempotent,
            rejections,
            write_retries,
            reservation_waits,
            cast_latency_ms,
        }
    }

    pub fn record_rejection(&self, code: &str) {
        self.rejections.with_label_values(&[code]).inc();
    }

    /// Encode every metric in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
