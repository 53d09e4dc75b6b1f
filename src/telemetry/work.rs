//! Work execution span helpers.

use crate::model::{State, WorkId, WorkKind};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use tracing::Span;

/// Start a span for one dispatched work item.
pub fn start_work_span(kind: WorkKind, id: WorkId) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.kind" = kind.as_str(),
        "work.id" = %id.0,
        "work.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and in the transitions counter.
pub fn record_state_transition(span: &Span, from: State, to: State) {
    span.record("work.state", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
    metrics::work_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}
