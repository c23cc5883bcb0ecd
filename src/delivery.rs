use crate::error::{DeliveryError, Retryable};
use crate::record::{LockedTokensRecord, RelayRequest};
use crate::retry::{execute_with_retry, RetryConfig, RetryFailure};
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use url::Url;

/// Statuses that indicate an overloaded or restarting upstream.
const TRANSIENT_STATUSES: [StatusCode; 3] = [
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

/// Acknowledgement returned by the relayer API.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub status: u16,
    pub body: Value,
    pub attempts: u32,
}

/// Posts decoded records to the downstream relayer API.
#[derive(Clone)]
pub struct DeliveryClient {
    client: Client,
    endpoint: Url,
    retry: RetryConfig,
}

impl DeliveryClient {
    pub fn new(endpoint: Url, settings: DeliverySettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(settings.request_timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            retry: settings.retry,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn send(&self, record: &LockedTokensRecord) -> Result<Ack, DeliveryError> {
        let request = record.to_request();
        let tx_hash = request.transaction_hash.clone();

        tracing::info!(tx_hash = %tx_hash, endpoint = %self.endpoint, "📤 Relaying event");

        let attempts = AtomicU32::new(0);
        let result = execute_with_retry(
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.try_send(&request)
            },
            &self.retry,
            "relay delivery",
        )
        .await;

        match result {
            Ok((status, body)) => {
                tracing::info!(
                    tx_hash = %tx_hash,
                    status,
                    response = %body,
                    "✅ Relayed transaction"
                );
                Ok(Ack {
                    status,
                    body,
                    attempts: attempts.load(Ordering::Relaxed),
                })
            }
            Err(RetryFailure { attempts, error }) => {
                let error = error.into_delivery_error(attempts);
                tracing::error!(
                    tx_hash = %tx_hash,
                    error = %error,
                    "❌ Failed to relay transaction"
                );
                Err(error)
            }
        }
    }

    async fn try_send(&self, body: &RelayRequest) -> Result<(u16, Value), AttemptError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Status {
                status,
                retry_after,
                body,
            });
        }

        let bytes = response.bytes().await.map_err(AttemptError::Transport)?;
        let body = serde_json::from_slice(&bytes).map_err(|e| AttemptError::Malformed {
            status,
            reason: e.to_string(),
        })?;
        Ok((status.as_u16(), body))
    }
}

/// Outcome of a single POST that did not produce an acknowledgement.
#[derive(Debug)]
enum AttemptError {
    Status {
        status: StatusCode,
        retry_after: Option<Duration>,
        body: String,
    },
    Transport(reqwest::Error),
    Malformed {
        status: StatusCode,
        reason: String,
    },
}

impl AttemptError {
    fn into_delivery_error(self, attempts: u32) -> DeliveryError {
        match self {
            Self::Status { status, body, .. } => DeliveryError::Status {
                status: status.as_u16(),
                attempts,
                body,
            },
            Self::Transport(source) => DeliveryError::Transport { attempts, source },
            Self::Malformed { status, reason } => DeliveryError::MalformedResponse {
                status: status.as_u16(),
                attempts,
                reason,
            },
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status, .. } => write!(f, "HTTP {status}"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Malformed { status, reason } => {
                write!(f, "HTTP {status} with bad body: {reason}")
            }
        }
    }
}

impl Retryable for AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => TRANSIENT_STATUSES.contains(status),
            // Only failures before the request reached the server; a timed
            // out request may already have been processed.
            Self::Transport(e) => e.is_connect(),
            Self::Malformed { .. } => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// `Retry-After` in its delta-seconds form; HTTP dates are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
