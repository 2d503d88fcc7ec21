//! The user-manager plugin: account and group management messages.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_common::Message;
use serde::de::DeserializeOwned;

use crate::application::ports::{AccountManagement, ChangeDetector, Plugin};
use crate::domain::accounts::{
    EditGroup, EditUser, GroupMember, GroupTarget, NewUser, RemoveUser, UserTarget,
};
use crate::domain::{PluginError, Snapshot};

pub const ADD_USER: &str = "add-user";
pub const EDIT_USER: &str = "edit-user";
pub const LOCK_USER: &str = "lock-user";
pub const UNLOCK_USER: &str = "unlock-user";
pub const REMOVE_USER: &str = "remove-user";
pub const ADD_GROUP: &str = "add-group";
pub const EDIT_GROUP: &str = "edit-group";
pub const REMOVE_GROUP: &str = "remove-group";
pub const ADD_GROUP_MEMBER: &str = "add-group-member";
pub const REMOVE_GROUP_MEMBER: &str = "remove-group-member";

const MESSAGE_TYPES: &[&str] = &[
    ADD_USER,
    EDIT_USER,
    LOCK_USER,
    UNLOCK_USER,
    REMOVE_USER,
    ADD_GROUP,
    EDIT_GROUP,
    REMOVE_GROUP,
    ADD_GROUP_MEMBER,
    REMOVE_GROUP_MEMBER,
];

/// Applies account messages through an [`AccountManagement`] backend and
/// snapshots account state through a [`ChangeDetector`].
pub struct UserManager {
    accounts: Arc<dyn AccountManagement>,
    detector: Arc<dyn ChangeDetector>,
}

impl UserManager {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountManagement>, detector: Arc<dyn ChangeDetector>) -> Self {
        Self { accounts, detector }
    }
}

fn body<T: DeserializeOwned>(message: &Message) -> Result<T, PluginError> {
    message.parse().map_err(|e| PluginError::InvalidMessage {
        message_type: message.message_type().to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Plugin for UserManager {
    fn name(&self) -> &'static str {
        "user-manager"
    }

    fn message_types(&self) -> &'static [&'static str] {
        MESSAGE_TYPES
    }

    async fn snapshot(&self, operation_id: Option<i64>) -> Result<Snapshot, PluginError> {
        self.detector
            .detect_changes(operation_id)
            .await
            .map_err(|e| PluginError::Detection(format!("{e:#}")))
    }

    async fn apply(&self, message: &Message) -> Result<String, PluginError> {
        let accounts = self.accounts.as_ref();
        let text = match message.message_type() {
            ADD_USER => accounts.add_user(&body::<NewUser>(message)?).await?,
            EDIT_USER => {
                let edit: EditUser = body(message)?;
                accounts.set_user_details(&edit.username, &edit.details).await?
            }
            LOCK_USER => accounts.lock_user(&body::<UserTarget>(message)?.username).await?,
            UNLOCK_USER => {
                accounts
                    .unlock_user(&body::<UserTarget>(message)?.username)
                    .await?
            }
            REMOVE_USER => {
                let remove: RemoveUser = body(message)?;
                accounts
                    .remove_user(&remove.username, remove.delete_home)
                    .await?
            }
            ADD_GROUP => accounts.add_group(&body::<GroupTarget>(message)?.groupname).await?,
            EDIT_GROUP => {
                let edit: EditGroup = body(message)?;
                accounts
                    .set_group_details(&edit.groupname, &edit.new_name)
                    .await?
            }
            REMOVE_GROUP => {
                accounts
                    .remove_group(&body::<GroupTarget>(message)?.groupname)
                    .await?
            }
            ADD_GROUP_MEMBER => {
                let member: GroupMember = body(message)?;
                accounts
                    .add_group_member(&member.username, &member.groupname)
                    .await?
            }
            REMOVE_GROUP_MEMBER => {
                let member: GroupMember = body(message)?;
                accounts
                    .remove_group_member(&member.username, &member.groupname)
                    .await?
            }
            other => {
                return Err(PluginError::InvalidMessage {
                    message_type: other.to_string(),
                    reason: "not handled by the user manager".to_string(),
                });
            }
        };
        Ok(text)
    }
}
