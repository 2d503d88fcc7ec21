//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and `fleet_common`, never
//! from `crate::infra`.

use std::process::Output;

use async_trait::async_trait;
use fleet_common::{Batch, Message, RemoteFailure, RpcRequest, Value};

use crate::domain::accounts::{NewUser, UserDetails};
use crate::domain::{AccountError, ExchangeError, PluginError, Snapshot};

// ── Account Management Port ───────────────────────────────────────────────────

/// Privileged account operations.
///
/// Every mutation returns a short human-readable result text. Implemented by
/// the shadow-utils backend (privileged process) and by the RPC stub that
/// forwards to it.
#[async_trait]
pub trait AccountManagement: Send + Sync {
    async fn add_user(&self, user: &NewUser) -> Result<String, AccountError>;
    async fn set_user_details(
        &self,
        username: &str,
        details: &UserDetails,
    ) -> Result<String, AccountError>;
    async fn lock_user(&self, username: &str) -> Result<String, AccountError>;
    async fn unlock_user(&self, username: &str) -> Result<String, AccountError>;
    async fn remove_user(&self, username: &str, delete_home: bool)
    -> Result<String, AccountError>;
    async fn add_group(&self, groupname: &str) -> Result<String, AccountError>;
    async fn set_group_details(
        &self,
        groupname: &str,
        new_name: &str,
    ) -> Result<String, AccountError>;
    async fn remove_group(&self, groupname: &str) -> Result<String, AccountError>;
    async fn add_group_member(
        &self,
        username: &str,
        groupname: &str,
    ) -> Result<String, AccountError>;
    async fn remove_group_member(
        &self,
        username: &str,
        groupname: &str,
    ) -> Result<String, AccountError>;
    /// Names of users whose password is locked.
    async fn get_locked_usernames(&self) -> Result<Vec<String>, AccountError>;
}

// ── Change Detection Port ─────────────────────────────────────────────────────

/// Source of point-in-time snapshots for a plugin's state.
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Capture current state. `operation_id` is set for the snapshot taken
    /// after an operation was applied.
    async fn detect_changes(&self, operation_id: Option<i64>) -> anyhow::Result<Snapshot>;
}

// ── Plugin Port ───────────────────────────────────────────────────────────────

/// A component owning one or more message types.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable name; the registry keys its phase lock by it.
    fn name(&self) -> &'static str;

    /// Message types this plugin handles.
    fn message_types(&self) -> &'static [&'static str];

    /// Snapshot the plugin-managed state.
    async fn snapshot(&self, operation_id: Option<i64>) -> Result<Snapshot, PluginError>;

    /// Perform the message's action and return its result text.
    async fn apply(&self, message: &Message) -> Result<String, PluginError>;
}

// ── Exchange Port ─────────────────────────────────────────────────────────────

/// One round trip with the management server.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn exchange(
        &self,
        batch: &[Message],
        computer_id: Option<&str>,
        message_api: &str,
    ) -> Result<Batch, ExchangeError>;

    fn url(&self) -> &str;
}

// ── Privileged RPC Port ───────────────────────────────────────────────────────

/// A service exposed over the privileged RPC channel.
#[async_trait]
pub trait RpcService: Send + Sync {
    /// Methods callers may invoke. Anything else is refused before
    /// [`invoke`](Self::invoke) runs.
    fn exposed_methods(&self) -> &'static [&'static str];

    async fn invoke(&self, request: &RpcRequest) -> Result<Value, RemoteFailure>;
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Runs external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds the
    /// runner's deadline. On timeout the child is killed.
    async fn run(&self, program: &str, args: &[&str]) -> anyhow::Result<Output>;

    /// Run a program with stdin piped from `stdin`.
    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
    ) -> anyhow::Result<Output>;
}
