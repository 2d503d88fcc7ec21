//! Domain layer: pure types and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::application`,
//! `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod accounts;
pub mod backoff;
pub mod config;
pub mod error;
pub mod operation;
pub mod snapshot;

pub use backoff::Backoff;
pub use config::{AccountsBackend, AgentConfig};
pub use error::{
    AccountError, ConfigError, DispatchError, ExchangeError, PluginError, RpcError,
    TransportError,
};
pub use operation::{CompletionState, OperationRecord, result_message};
pub use snapshot::{Delta, Snapshot};
