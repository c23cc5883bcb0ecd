//! Error taxonomy for the relay pipeline.
//!
//! Only [`ConfigError`] is fatal. Every other error is handled by the
//! component that can react to it: decode and delivery failures drop a
//! single entry, connection and validation failures send the relay loop
//! into its reconnect cooldown.

use std::time::Duration;

/// Startup configuration is missing or malformed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid {key} '{value}': {reason}")]
    InvalidUrl {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to merge config: {0}")]
    TomlMerge(#[from] toml::ser::Error),
}

/// The chain node is unreachable or stopped answering.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to connect to {url}: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("liveness check against {url} failed: {reason}")]
    Liveness { url: String, reason: String },
    #[error("not connected to the chain node")]
    NotConnected,
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// A configured chain value failed validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid contract address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// A raw log does not match the event schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("expected {expected} topics, got {actual}")]
    TopicCount { expected: usize, actual: usize },
    #[error("topic0 {actual} does not match event selector {expected}")]
    SignatureMismatch { expected: String, actual: String },
    #[error("expected {expected} bytes of event data, got {actual}")]
    DataLength { expected: usize, actual: usize },
    #[error("log is missing its {0}")]
    MissingMetadata(&'static str),
    #[error("field {field} does not fit: {reason}")]
    Overflow { field: &'static str, reason: String },
    #[error("abi decoding failed: {0}")]
    Abi(String),
}

/// A record could not be delivered to the relayer API.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("relayer responded with HTTP {status} after {attempts} attempt(s): {body}")]
    Status {
        status: u16,
        attempts: u32,
        body: String,
    },
    #[error("request to relayer failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("relayer returned HTTP {status} with an unparseable body: {reason}")]
    MalformedResponse {
        status: u16,
        attempts: u32,
        reason: String,
    },
}

impl DeliveryError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Status { attempts, .. }
            | Self::Transport { attempts, .. }
            | Self::MalformedResponse { attempts, .. } => *attempts,
        }
    }
}

/// Errors that end one pass of the relay loop and trigger a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Classifies a failed attempt for the retry loop.
pub trait Retryable {
    /// Whether another attempt may succeed without client-side changes.
    fn is_transient(&self) -> bool;

    /// Minimum delay the remote side asked for before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}
