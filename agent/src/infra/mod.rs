//! Infrastructure layer: I/O implementations of the application ports.

pub mod accounts_detector;
pub mod command_runner;
pub mod config;
pub mod pinning;
pub mod remote_accounts;
pub mod rpc;
pub mod shadow_utils;
pub mod transport;
