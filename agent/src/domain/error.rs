//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::application`,
//! `tokio`, `std::fs`, or `std::net`. Binaries wrap these in `anyhow::Error`
//! via the `?` operator.

use std::time::Duration;

use fleet_common::CodecError;
use thiserror::Error;

// ── Exchange errors ───────────────────────────────────────────────────────────

/// Network and HTTP-layer failures. Always safe to retry with backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("cannot connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("exchange timed out")]
    Timeout,

    #[error("server answered with HTTP status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),
}

/// Failure of one exchange round trip. Nothing is considered delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server did not present the pinned certificate. Retrying without
    /// operator intervention would keep talking to an unverified endpoint.
    #[error("server certificate verification failed: {0}")]
    CertificateVerification(String),

    #[error("cannot encode or decode the exchange payload: {0}")]
    Codec(#[from] CodecError),
}

impl ExchangeError {
    /// Whether the supervisor may retry with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExchangeError::CertificateVerification(_))
    }
}

// ── Dispatch errors ───────────────────────────────────────────────────────────

/// Registry configuration and operation-tracking errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("a handler is already registered for message type '{0}'")]
    DuplicateHandler(String),

    #[error("no handler registered for message type '{0}'")]
    NoSuchHandler(String),

    #[error("message has no type")]
    MissingType,

    #[error("operation {0} is already in flight")]
    DuplicateOperation(i64),

    #[error("operation {0} is not tracked")]
    UnknownOperation(i64),

    #[error("operation {0} already has a result")]
    OperationAlreadyCompleted(i64),
}

// ── Privileged channel errors ─────────────────────────────────────────────────

/// Failures of the local privileged-RPC channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("method '{0}' is not exposed by the privileged helper")]
    UnknownMethod(String),

    /// The connection dropped mid-call; the helper may or may not have
    /// performed the operation.
    #[error("connection to the privileged helper was lost: {0}")]
    ChannelClosed(String),

    #[error("privileged call did not finish within {0:?}")]
    Timeout(Duration),

    #[error("{class}: {message}")]
    Remote { class: String, message: String },

    /// The helper could not be reached; the call was never sent.
    #[error("privileged helper unavailable: {0}")]
    Unavailable(String),

    #[error("malformed reply from the privileged helper: {0}")]
    Protocol(String),

    #[error("the privileged channel has been shut down")]
    Shutdown,
}

impl RpcError {
    /// Whether the remote side may have executed the call.
    #[must_use]
    pub fn outcome_unknown(&self) -> bool {
        matches!(
            self,
            RpcError::ChannelClosed(_) | RpcError::Timeout(_) | RpcError::Protocol(_)
        )
    }
}

// ── Account errors ────────────────────────────────────────────────────────────

/// Failures of the account-management backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("account command failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Channel(#[from] RpcError),
}

impl AccountError {
    /// Stable class name used on the RPC wire and in result messages.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            AccountError::NotFound(_) => "NotFound",
            AccountError::AlreadyExists(_) => "AlreadyExists",
            AccountError::PermissionDenied(_) => "PermissionDenied",
            AccountError::InvalidArgument(_) => "InvalidArgument",
            AccountError::Failed(_) => "Failed",
            AccountError::Channel(_) => "ChannelError",
        }
    }

    /// The message without the class prefix.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            AccountError::NotFound(m)
            | AccountError::AlreadyExists(m)
            | AccountError::PermissionDenied(m)
            | AccountError::InvalidArgument(m)
            | AccountError::Failed(m) => m.clone(),
            AccountError::Channel(e) => e.to_string(),
        }
    }

    /// Rebuild a backend error from its wire class, if the class is one of
    /// the backend's own kinds.
    #[must_use]
    pub fn from_class(class: &str, message: String) -> Option<Self> {
        match class {
            "NotFound" => Some(AccountError::NotFound(message)),
            "AlreadyExists" => Some(AccountError::AlreadyExists(message)),
            "PermissionDenied" => Some(AccountError::PermissionDenied(message)),
            "InvalidArgument" => Some(AccountError::InvalidArgument(message)),
            "Failed" => Some(AccountError::Failed(message)),
            _ => None,
        }
    }
}

// ── Plugin errors ─────────────────────────────────────────────────────────────

/// Failures raised while a plugin handles one message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("invalid {message_type} message: {reason}")]
    InvalidMessage {
        message_type: String,
        reason: String,
    },

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("change detection failed: {0}")]
    Detection(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl PluginError {
    /// Short kind reported upstream in the `error-kind` field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            PluginError::InvalidMessage { .. } => "InvalidArgument",
            PluginError::Account(e) => e.class(),
            PluginError::Detection(_) => "DetectionFailed",
            PluginError::Panicked(_) => "HandlerPanicked",
        }
    }

    /// Whether a privileged mutation may have happened despite the error.
    #[must_use]
    pub fn outcome_unknown(&self) -> bool {
        match self {
            PluginError::Account(AccountError::Channel(e)) => e.outcome_unknown(),
            PluginError::Panicked(_) => true,
            _ => false,
        }
    }
}

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors related to agent configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}
