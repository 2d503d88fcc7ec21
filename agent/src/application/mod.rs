//! Application layer: port trait definitions and use-case orchestration.
//!
//! This module depends only on `crate::domain` and `fleet_common`, never on
//! `crate::infra`.

pub mod ports;
pub mod services;

pub use ports::{
    AccountManagement, ChangeDetector, CommandRunner, MessageTransport, Plugin, RpcService,
};
pub use services::registry::{DispatchOutcome, DispatchRegistry, RegistryBuilder};
pub use services::tracker::OperationTracker;
