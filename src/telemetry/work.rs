//! Entity pipeline span helpers.
//!
//! Provides span creation and step-transition recording for work items
//! flowing through the orchestrator.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one pipeline invocation.
///
/// The `sync.step` field is declared empty and is updated by
/// [`record_step_transition`].
pub fn start_entity_span(run_id: &Uuid, job: &str, key: &str) -> Span {
    tracing::info_span!(
        "sync.entity",
        "sync.run" = %run_id,
        "sync.job" = job,
        "sync.key" = key,
        "sync.step" = tracing::field::Empty,
    )
}

/// Record a step transition on `span`.
///
/// Updates `sync.step` and emits a `debug` event scoped to the span.
pub fn record_step_transition(span: &Span, from: &str, to: &str) {
    span.record("sync.step", to);
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "step_transition");
    });
}
