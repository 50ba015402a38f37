//! Metric instrument factories for membersync.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"membersync"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for membersync instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("membersync")
}

/// Counter: outbound calls to the access-control system.
/// Labels: `operation`, `result` ("ok" | "auth_expired" | "conflict" | "error").
pub fn outbound_calls() -> Counter<u64> {
    meter()
        .u64_counter("membersync.access.calls")
        .with_description("Number of outbound access-control calls")
        .build()
}

/// Histogram: outbound call duration in milliseconds, gate wait excluded.
/// Labels: `operation`.
pub fn call_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("membersync.access.call_duration_ms")
        .with_description("Outbound access-control call duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: token refresh exchanges.
/// Labels: `result` ("ok" | "error").
pub fn token_refreshes() -> Counter<u64> {
    meter()
        .u64_counter("membersync.token.refreshes")
        .with_description("Number of access token refresh exchanges")
        .build()
}

/// Counter: work items pushed into the requeue buffer.
/// Labels: `job`.
pub fn requeues() -> Counter<u64> {
    meter()
        .u64_counter("membersync.work.requeues")
        .with_description("Work items deferred behind a token refresh")
        .build()
}

/// Counter: terminal outcomes.
/// Labels: `job`, `status` ("success" | "failed").
pub fn entity_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("membersync.work.outcomes")
        .with_description("Work items retired into the outcome ledger")
        .build()
}

/// Counter: entities dropped by the identifier validity predicate.
/// Labels: `driver`.
pub fn entities_filtered() -> Counter<u64> {
    meter()
        .u64_counter("membersync.work.filtered")
        .with_description("Entities rejected before entering the pipeline")
        .build()
}

/// Counter: inbound webhook events.
/// Labels: `event`, `result` ("accepted" | "ignored" | "rejected").
pub fn webhook_events() -> Counter<u64> {
    meter()
        .u64_counter("membersync.webhook.events")
        .with_description("Number of webhook events received")
        .build()
}
