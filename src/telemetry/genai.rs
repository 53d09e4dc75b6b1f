//! GenAI span helpers for forwarded chat completions.
//!
//! Field names follow the OpenTelemetry GenAI conventions so completion
//! spans line up with other LLM traffic in the same backend.

use crate::model::CompletionRequest;
use tracing::Span;

/// Provider name reported for the completions backend.
pub const PROVIDER: &str = "openai-compatible";

/// Open a `gen_ai.chat` span for one forwarded request.
///
/// The requested model comes from the pass-through `model` field, if any.
/// Response fields start empty; see [`record_completion_response`].
pub fn start_completion_span(request: &CompletionRequest, url: &str) -> Span {
    let model = request
        .extra
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or("default");
    tracing::info_span!(
        "gen_ai.chat",
        "gen_ai.operation.name" = "chat",
        "gen_ai.provider.name" = PROVIDER,
        "gen_ai.request.model" = model,
        "gen_ai.request.messages" = request.messages.len(),
        "server.address" = url,
        "gen_ai.response.model" = tracing::field::Empty,
        "gen_ai.usage.input_tokens" = tracing::field::Empty,
        "gen_ai.usage.output_tokens" = tracing::field::Empty,
    )
}

/// Copy the served model and token usage from a backend reply onto `span`.
///
/// Missing fields are left unrecorded.
pub fn record_completion_response(span: &Span, body: &serde_json::Value) {
    if let Some(model) = body.get("model").and_then(|m| m.as_str()) {
        span.record("gen_ai.response.model", model);
    }
    let Some(usage) = body.get("usage") else {
        return;
    };
    if let Some(input) = usage.get("prompt_tokens").and_then(|v| v.as_u64()) {
        span.record("gen_ai.usage.input_tokens", input);
    }
    if let Some(output) = usage.get("completion_tokens").and_then(|v| v.as_u64()) {
        span.record("gen_ai.usage.output_tokens", output);
    }
}
