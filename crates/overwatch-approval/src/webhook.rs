//! Webhook approver: POST, sign, retry with backoff, fail closed.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ApprovalError, ApprovalResult};
use crate::handler::{ApprovalHandler, ApprovalRequest, ApprovalResponse, SessionDuration};
use crate::signature::{SIGNATURE_HEADER, signature_header};

/// Exponential backoff parameters: delay is
/// `min(base * 2^attempt, max_delay)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First retry delay.
    pub base: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Total attempts, including the first.
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// The delay before the retry following `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max_delay)
    }
}

/// Response shape the webhook must return; `approved` is mandatory.
#[derive(serde::Deserialize)]
struct WireResponse {
    approved: Option<bool>,
    session_duration: Option<SessionDuration>,
    reason: Option<String>,
}

/// Approval handler that POSTs requests to an HTTP endpoint.
///
/// The body is the serialized [`ApprovalRequest`]; when a secret is
/// configured the exact body bytes are signed with HMAC-SHA256 and the
/// hex digest travels in `X-Overwatch-Signature: sha256=<hex>`. Any
/// error - transport, non-2xx, unparseable payload, missing `approved`,
/// or the overall timeout - resolves to a denial whose reason is
/// prefixed with `Webhook error:`. Never fails open.
pub struct WebhookApprover {
    url: String,
    secret: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl WebhookApprover {
    /// Create an approver for `url` with the default timeout and retry
    /// policy.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }

    /// Sign request bodies with this secret.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Override the overall timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post_once(&self, body: &str) -> ApprovalResult<ApprovalResponse> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body.to_string());
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, signature_header(body, secret));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApprovalError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApprovalError::BadResponse(format!(
                "webhook returned HTTP {status}"
            )));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ApprovalError::BadResponse(format!("unparseable payload: {e}")))?;
        let approved = wire
            .approved
            .ok_or_else(|| ApprovalError::BadResponse("payload missing 'approved'".to_string()))?;

        Ok(ApprovalResponse {
            approved,
            session_duration: wire.session_duration,
            reason: wire.reason,
        })
    }

    /// Retry loop without the overall deadline; cancellation happens by
    /// dropping this future when the deadline fires.
    async fn post_with_retries(&self, body: &str) -> ApprovalResult<ApprovalResponse> {
        let mut last_error = ApprovalError::Transport("no attempts made".to_string());
        for attempt in 0..self.retry.attempts.max(1) {
            match self.post_once(body).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!(attempt, error = %e, "webhook attempt failed");
                    last_error = e;
                },
            }
            if attempt.saturating_add(1) < self.retry.attempts {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl ApprovalHandler for WebhookApprover {
    async fn request_approval(&self, request: &ApprovalRequest) -> ApprovalResult<ApprovalResponse> {
        let body = serde_json::to_string(request)
            .map_err(|e| ApprovalError::Serialization(e.to_string()))?;

        let outcome = tokio::time::timeout(self.timeout, self.post_with_retries(&body)).await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                warn!(tool = %request.tool, error = %e, "webhook approval failed closed");
                Ok(ApprovalResponse::denied(format!("Webhook error: {e}")))
            },
            Err(_) => {
                warn!(tool = %request.tool, timeout = ?self.timeout, "webhook approval timed out");
                Ok(ApprovalResponse::denied(format!(
                    "Webhook error: {}",
                    ApprovalError::Timeout(self.timeout)
                )))
            },
        }
    }

    async fn close(&self) {}
}

impl std::fmt::Debug for WebhookApprover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookApprover")
            .field("url", &self.url)
            .field("signed", &self.secret.is_some())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::verify_signature;
    use overwatch_core::RiskLevel;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server: answers the first connection with
    /// `response` and reports the captured request (headers + body)
    /// back once the declared Content-Length has arrived.
    async fn serve_once(response: &'static str) -> (String, tokio::sync::oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut data = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);
                if request_complete(&data) {
                    break;
                }
            }
            let captured = String::from_utf8_lossy(&data).into_owned();
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            let _ = tx.send(captured);
        });
        (format!("http://{addr}/approve"), rx)
    }

    fn request_complete(data: &[u8]) -> bool {
        let text = String::from_utf8_lossy(data);
        let Some((headers, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let content_length = headers
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.trim()
                    .eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        body.len() >= content_length
    }

    fn ok_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn test_approved_response() {
        let response = ok_response(r#"{"approved":true,"session_duration":"5min"}"#);
        let leaked: &'static str = Box::leak(response.into_boxed_str());
        let (url, _captured) = serve_once(leaked).await;

        let approver = WebhookApprover::new(url);
        let request = ApprovalRequest::new("write_file", RiskLevel::Write);
        let decision = approver.request_approval(&request).await.unwrap();
        assert!(decision.approved);
        assert_eq!(decision.session_duration, Some(SessionDuration::FiveMin));
    }

    #[tokio::test]
    async fn test_body_is_signed_when_secret_configured() {
        let response = ok_response(r#"{"approved":false,"reason":"nope"}"#);
        let leaked: &'static str = Box::leak(response.into_boxed_str());
        let (url, captured) = serve_once(leaked).await;

        let approver = WebhookApprover::new(url).with_secret("test-secret");
        let request = ApprovalRequest::new("write_file", RiskLevel::Write).server("fs");
        let decision = approver.request_approval(&request).await.unwrap();
        assert!(!decision.approved);
        assert_eq!(decision.reason.as_deref(), Some("nope"));

        let raw = captured.await.unwrap();
        let header_line = raw
            .lines()
            .find(|l| l.to_ascii_lowercase().starts_with("x-overwatch-signature:"))
            .expect("signature header missing");
        let signature = header_line
            .split_once(':')
            .map(|(_, v)| v.trim().to_string())
            .unwrap();
        let body = raw
            .split_once("\r\n\r\n")
            .map(|(_, b)| b.to_string())
            .unwrap();
        assert!(verify_signature(&body, Some(&signature), Some("test-secret")));
    }

    #[tokio::test]
    async fn test_non_2xx_fails_closed() {
        let (url, _captured) =
            serve_once("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;

        let approver = WebhookApprover::new(url).with_retry(RetryPolicy {
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempts: 1,
        });
        let request = ApprovalRequest::new("x", RiskLevel::Write);
        let decision = approver.request_approval(&request).await.unwrap();
        assert!(!decision.approved);
        assert!(decision.reason.unwrap().starts_with("Webhook error:"));
    }

    #[tokio::test]
    async fn test_missing_approved_field_fails_closed() {
        let response = ok_response(r#"{"reason":"shrug"}"#);
        let leaked: &'static str = Box::leak(response.into_boxed_str());
        let (url, _captured) = serve_once(leaked).await;

        let approver = WebhookApprover::new(url).with_retry(RetryPolicy {
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempts: 1,
        });
        let request = ApprovalRequest::new("x", RiskLevel::Write);
        let decision = approver.request_approval(&request).await.unwrap();
        assert!(!decision.approved);
        assert!(decision.reason.unwrap().starts_with("Webhook error:"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_closed() {
        // Nothing listens on this port.
        let approver = WebhookApprover::new("http://127.0.0.1:1/approve")
            .with_timeout(Duration::from_secs(5))
            .with_retry(RetryPolicy {
                base: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                attempts: 2,
            });
        let request = ApprovalRequest::new("x", RiskLevel::Write);
        let decision = approver.request_approval(&request).await.unwrap();
        assert!(!decision.approved);
        assert!(decision.reason.unwrap().starts_with("Webhook error:"));
    }

    #[test]
    fn test_backoff_schedule() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_for(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for(2), Duration::from_secs(4));
        assert_eq!(retry.delay_for(10), Duration::from_secs(30));
    }
}
