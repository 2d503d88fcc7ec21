//! Unit tests for the fleet agent
//!
//! These tests drive the application services through fakes and mocks and
//! run without network or privileged I/O.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "../common/fake_accounts.rs"]
mod fake_accounts;

mod account_service;
mod architecture;
mod helpers;
