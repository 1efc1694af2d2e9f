use std::time::Duration;

use async_trait::async_trait;
use nestlog_core::api::{PromptHandler, PromptResponder, StructuredMessage, TunnelClient};

/// Relays a child's prompt to the parent tunnel and its answer back down.
///
/// Used when this process is itself a tunneled child: the question travels up the
/// tree until a process with a terminal or a remote viewer answers it.
pub struct ForwardingPromptHandler {
    upstream: TunnelClient,
    fallback_timeout: Option<Duration>,
}

impl ForwardingPromptHandler {
    pub fn new(upstream: TunnelClient, fallback_timeout: Option<Duration>) -> Self {
        Self {
            upstream,
            fallback_timeout,
        }
    }
}

#[async_trait]
impl PromptHandler for ForwardingPromptHandler {
    async fn handle_prompt(&self, request: StructuredMessage, responder: PromptResponder) {
        let timeout = request
            .get("timeoutMs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .or(self.fallback_timeout);

        let outcome = tokio::select! {
            outcome = self.upstream.send_prompt_request(request, timeout) => outcome,
            _ = responder.closed() => {
                tracing::debug!(
                    target: "nestlog.prompt",
                    request_id = responder.request_id().unwrap_or("<none>"),
                    "requester went away; dropping upstream prompt"
                );
                return;
            }
        };
        if let Err(e) = &outcome {
            tracing::debug!(
                target: "nestlog.prompt",
                request_id = responder.request_id().unwrap_or("<none>"),
                error = %e,
                "upstream prompt failed"
            );
        }
        responder.respond_outcome(outcome);
    }
}
