//! Application services: use-case orchestration.
//!
//! Services import only from `crate::domain` and `crate::application::ports`,
//! never from `crate::infra`.

pub mod account_service;
pub mod exchange;
pub mod registry;
pub mod tracker;
pub mod user_manager;
