//! Chat completions forwarded to an OpenAI-compatible backend.

use super::{HandlerFuture, WorkHandler};
use crate::error::{Error, Result};
use crate::model::{CompletionRequest, WorkRequest};
use crate::telemetry::genai::{record_completion_response, start_completion_span};
use secrecy::{ExposeSecret, SecretString};
use tracing::{Instrument, warn};

/// Default local completions endpoint.
pub const DEFAULT_COMPLETIONS_URL: &str = "http://127.0.0.1:5000/v1/chat/completions";

pub struct CompletionHandler {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
}

impl CompletionHandler {
    pub fn new(url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the request and return the backend's JSON body.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<serde_json::Value> {
        let span = start_completion_span(request, &self.url);

        async {
            let mut builder = self.client.post(&self.url).json(request);
            if let Some(ref key) = self.api_key {
                builder = builder.bearer_auth(key.expose_secret());
            }

            let response = builder.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(%status, body = %body, "completions backend error");
                return Err(Error::Handler(format!(
                    "completions backend returned {status}"
                )));
            }

            let body: serde_json::Value = response.json().await?;
            record_completion_response(&span, &body);
            Ok(body)
        }
        .instrument(span.clone())
        .await
    }
}

impl WorkHandler for CompletionHandler {
    fn handle(&self, request: WorkRequest) -> HandlerFuture<'_> {
        Box::pin(async move {
            match request {
                WorkRequest::Completion(req) => self.complete(&req).await,
                other => Err(Error::InvalidRequest(format!(
                    "completion handler cannot run {} work",
                    other.kind()
                ))),
            }
        })
    }
}
