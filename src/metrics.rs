//! Prometheus metrics for group membership.
//!
//! Metrics cover:
//! - Heartbeats (count and round-trip latency per kind and outcome)
//! - Rejoins after failed sessions, by error category
//! - Protocol fallbacks to the legacy group protocol
//! - Assignment changes and unresolved topic ids
//! - Current member epoch and assigned partition count per group
//!
//! # Safety
//!
//! All metrics are registered to a custom registry with the "groupbeat" prefix to avoid
//! name collisions with other libraries using the default Prometheus registry.
//! Registration errors are handled gracefully - if a metric fails to register,
//! an unregistered fallback is used instead of panicking.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry,
    TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for group membership metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("groupbeat".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

/// Declare an IntGaugeVec metric with labels.
macro_rules! define_gauge_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntGaugeVec> = Lazy::new(|| {
            register_int_gauge_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare an IntCounter metric (no labels).
macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

/// Declare a HistogramVec metric with labels and buckets.
macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Heartbeat metrics
// =============================================================================

define_counter_vec!(
    HEARTBEATS,
    "heartbeats_total",
    "Total number of consumer group heartbeats sent",
    ["kind", "status"]
);
define_histogram_vec!(
    HEARTBEAT_DURATION,
    "heartbeat_duration_seconds",
    "Heartbeat round-trip duration in seconds",
    ["kind"],
    [
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0
    ]
);

// =============================================================================
// Membership metrics
// =============================================================================

define_counter_vec!(
    REJOINS,
    "rejoins_total",
    "Total number of rejoins after a failed membership session",
    ["reason"]
);
define_counter!(
    PROTOCOL_FALLBACKS,
    "protocol_fallbacks_total",
    "Total number of fallbacks to the legacy group protocol"
);
define_gauge_vec!(
    MEMBER_EPOCH,
    "member_epoch",
    "Current member epoch per group",
    ["group"]
);

// =============================================================================
// Assignment metrics
// =============================================================================

define_counter!(
    ASSIGNMENT_CHANGES,
    "assignment_changes_total",
    "Total number of assignment changes received from the coordinator"
);
define_counter!(
    UNRESOLVED_TOPIC_IDS,
    "unresolved_topic_ids_total",
    "Total number of assigned topic ids missing from client metadata"
);
define_gauge_vec!(
    ASSIGNED_PARTITIONS,
    "assigned_partitions",
    "Number of partitions currently applied per group",
    ["group"]
);

// =============================================================================
// Safe registration helpers
// =============================================================================

fn register_int_gauge_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntGaugeVec {
    let gauge = IntGaugeVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGaugeVec metric, using unregistered fallback");
            gauge
        }
    }
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounter metric, using unregistered fallback");
            counter
        }
    }
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Register every metric up front so scrapes show zero values before the
/// first event.
///
/// Idempotent.
pub fn init_metrics() {
    let _ = &*HEARTBEATS;
    let _ = &*HEARTBEAT_DURATION;
    let _ = &*REJOINS;
    let _ = &*PROTOCOL_FALLBACKS;
    let _ = &*MEMBER_EPOCH;
    let _ = &*ASSIGNMENT_CHANGES;
    let _ = &*UNRESOLVED_TOPIC_IDS;
    let _ = &*ASSIGNED_PARTITIONS;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// =============================================================================
// Recording helpers
// =============================================================================

/// Record a heartbeat round trip. `kind` is "join", "heartbeat" or "leave".
pub fn record_heartbeat(kind: &str, status: &str, duration_secs: f64) {
    HEARTBEATS.with_label_values(&[kind, status]).inc();
    HEARTBEAT_DURATION
        .with_label_values(&[kind])
        .observe(duration_secs);
}

pub fn record_rejoin(reason: &str) {
    REJOINS.with_label_values(&[reason]).inc();
}

pub fn record_protocol_fallback() {
    PROTOCOL_FALLBACKS.inc();
}

pub fn record_assignment_change() {
    ASSIGNMENT_CHANGES.inc();
}

pub fn record_unresolved_topic_id() {
    UNRESOLVED_TOPIC_IDS.inc();
}

pub fn set_member_epoch(group: &str, epoch: i32) {
    MEMBER_EPOCH.with_label_values(&[group]).set(i64::from(epoch));
}

pub fn set_assigned_partitions(group: &str, count: usize) {
    ASSIGNED_PARTITIONS
        .with_label_values(&[group])
        .set(i64::try_from(count).unwrap_or(i64::MAX));
}
