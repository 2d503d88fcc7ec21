//! Shared test helpers: mockall ports, a scripted transport and registry
//! wiring.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fleet_agent::application::ports::{AccountManagement, ChangeDetector, MessageTransport};
use fleet_agent::application::services::user_manager::UserManager;
use fleet_agent::application::{DispatchRegistry, OperationTracker, RegistryBuilder};
use fleet_agent::domain::accounts::{NewUser, UserDetails};
use fleet_agent::domain::{AccountError, ExchangeError, Snapshot};
use fleet_common::{Batch, Message};
use mockall::mock;

use crate::fake_accounts::FakeAccounts;

// ── mockall ports ────────────────────────────────────────────────────────────

mock! {
    pub Accounts {}

    #[async_trait]
    impl AccountManagement for Accounts {
        async fn add_user(&self, user: &NewUser) -> Result<String, AccountError>;
        async fn set_user_details(
            &self,
            username: &str,
            details: &UserDetails,
        ) -> Result<String, AccountError>;
        async fn lock_user(&self, username: &str) -> Result<String, AccountError>;
        async fn unlock_user(&self, username: &str) -> Result<String, AccountError>;
        async fn remove_user(&self, username: &str, delete_home: bool) -> Result<String, AccountError>;
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
        async fn get_locked_usernames(&self) -> Result<Vec<String>, AccountError>;
    }
}

mock! {
    pub Detector {}

    #[async_trait]
    impl ChangeDetector for Detector {
        async fn detect_changes(&self, operation_id: Option<i64>) -> anyhow::Result<Snapshot>;
    }
}

// ── Scripted transport ───────────────────────────────────────────────────────

/// One recorded exchange call.
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub messages: Vec<Message>,
    pub computer_id: Option<String>,
    pub message_api: String,
}

/// Answers exchanges from a script; an exhausted script answers with an
/// empty batch.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<Batch, ExchangeError>>>,
    sent: Mutex<Vec<SentBatch>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Result<Batch, ExchangeError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            sent: Mutex::default(),
        }
    }

    pub fn sent(&self) -> Vec<SentBatch> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    async fn exchange(
        &self,
        batch: &[Message],
        computer_id: Option<&str>,
        message_api: &str,
    ) -> Result<Batch, ExchangeError> {
        self.sent.lock().unwrap().push(SentBatch {
            messages: batch.to_vec(),
            computer_id: computer_id.map(str::to_string),
            message_api: message_api.to_string(),
        });
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn url(&self) -> &str {
        "https://fleet.test/message-system"
    }
}

// ── Registry wiring ──────────────────────────────────────────────────────────

/// A registry with the user manager over `accounts`, which also serves as
/// its change detector.
pub fn user_registry(accounts: &Arc<FakeAccounts>) -> (Arc<DispatchRegistry>, Arc<OperationTracker>) {
    let tracker = Arc::new(OperationTracker::new());
    let plugin = UserManager::new(accounts.clone(), accounts.clone());
    let mut builder = RegistryBuilder::new();
    builder.register_plugin(Arc::new(plugin)).unwrap();
    (Arc::new(builder.build(Arc::clone(&tracker))), tracker)
}

pub fn add_user(operation_id: i64, username: &str) -> Message {
    Message::new("add-user")
        .with("operation-id", operation_id)
        .with("username", username)
}

pub fn add_group(operation_id: i64, groupname: &str) -> Message {
    Message::new("add-group")
        .with("operation-id", operation_id)
        .with("groupname", groupname)
}
