//! reqwest-backed transport with bounded retry on server errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::context::{CallContext, ContextError};

/// Production [`HttpTransport`].
///
/// A single attempt is made unless `max_attempts` is raised; retries apply to
/// 5xx responses and to failures to connect. Timeouts and errors raised after
/// the request may have reached the server are returned as-is. The
/// per-request timeout is the smaller of the client timeout and the context's
/// remaining budget.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    max_attempts: usize,
    base_backoff: Duration,
}

impl ReqwestTransport {
    /// Start building a transport.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Transport with default settings.
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    fn backoff_delay(&self, retry_number: usize) -> Duration {
        let shift = retry_number.saturating_sub(1).min(8) as u32;
        self.base_backoff.saturating_mul(1u32 << shift)
    }

    async fn sleep_with_backoff(&self, retry_number: usize) {
        let delay = self.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        ctx: &CallContext,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        let attempts = self.max_attempts.max(1);

        for attempt in 0..attempts {
            if ctx.is_cancelled() {
                return Err(ContextError::Cancelled.into());
            }

            let mut builder = self
                .client
                .request(request.method.clone(), request.url.as_str());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone());
            }
            if let Some(remaining) = ctx.remaining() {
                if remaining.is_zero() {
                    return Err(ContextError::DeadlineExceeded.into());
                }
                builder = builder.timeout(remaining);
            }

            debug!(attempt = attempt + 1, method = %request.method, url = %request.url, "sending downstream request");

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt = attempt + 1, url = %request.url, %status, "received downstream response");

                    if status.is_server_error() && attempt + 1 < attempts {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }

                    let body = response.bytes().await?;
                    return Ok(HttpResponse::new(status.as_u16(), body.to_vec()));
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, url = %request.url, error = %err, "downstream request failed");

                    if attempt + 1 < attempts && should_retry_error(&err) {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }

                    return Err(TransportError::Http(err));
                }
            }
        }

        Err(TransportError::Other(
            "transport exhausted retries without producing a result".into(),
        ))
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    timeout: Duration,
    max_attempts: usize,
    base_backoff: Duration,
    user_agent: Option<String>,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 1,
            base_backoff: Duration::from_millis(100),
            user_agent: None,
        }
    }
}

impl ReqwestTransportBuilder {
    /// Upper bound for any single request, independent of step timeouts.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total attempts (initial try + retries).
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<ReqwestTransport, TransportError> {
        let mut builder = Client::builder().timeout(self.timeout).no_proxy();
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        Ok(ReqwestTransport {
            client: builder.build()?,
            max_attempts: self.max_attempts.max(1),
            base_backoff: self.base_backoff,
        })
    }
}

/// Only a failed connect guarantees the request never left the client.
fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_connect()
}
