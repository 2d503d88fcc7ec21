//! [`AccountManagement`] stub that forwards every call to the privileged
//! helper over the RPC channel.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_common::{RpcRequest, Value};

use crate::application::ports::AccountManagement;
use crate::domain::accounts::{NewUser, UserDetails};
use crate::domain::{AccountError, RpcError};
use crate::infra::rpc::RpcClient;

pub struct RemoteAccountManagement {
    client: Arc<RpcClient>,
}

impl RemoteAccountManagement {
    #[must_use]
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }

    async fn call(&self, request: RpcRequest) -> Result<Value, AccountError> {
        self.client.call(request).await.map_err(|err| match err {
            RpcError::Remote { class, message } => {
                AccountError::from_class(&class, message.clone())
                    .unwrap_or(AccountError::Channel(RpcError::Remote { class, message }))
            }
            other => AccountError::Channel(other),
        })
    }

    async fn call_text(&self, request: RpcRequest) -> Result<String, AccountError> {
        let method = request.method.clone();
        match self.call(request).await? {
            Value::Str(text) => Ok(text),
            Value::None => Ok(String::new()),
            other => Err(AccountError::Channel(RpcError::Protocol(format!(
                "{method} returned a {}, expected a string",
                other.type_name()
            )))),
        }
    }
}

#[async_trait]
impl AccountManagement for RemoteAccountManagement {
    async fn add_user(&self, user: &NewUser) -> Result<String, AccountError> {
        self.call_text(
            RpcRequest::new("add_user")
                .kwarg("username", user.username.as_str())
                .kwarg("full_name", user.full_name.clone())
                .kwarg("password", user.password.clone())
                .kwarg("require_reset", user.require_reset)
                .kwarg("primary_group", user.primary_group.clone())
                .kwarg("location", user.location.clone())
                .kwarg("work_phone", user.work_phone.clone())
                .kwarg("home_phone", user.home_phone.clone()),
        )
        .await
    }

    async fn set_user_details(
        &self,
        username: &str,
        details: &UserDetails,
    ) -> Result<String, AccountError> {
        self.call_text(
            RpcRequest::new("set_user_details")
                .kwarg("username", username)
                .kwarg("password", details.password.clone())
                .kwarg("full_name", details.full_name.clone())
                .kwarg("location", details.location.clone())
                .kwarg("work_phone", details.work_phone.clone())
                .kwarg("home_phone", details.home_phone.clone())
                .kwarg("primary_group", details.primary_group.clone()),
        )
        .await
    }

    async fn lock_user(&self, username: &str) -> Result<String, AccountError> {
        self.call_text(RpcRequest::new("lock_user").kwarg("username", username))
            .await
    }

    async fn unlock_user(&self, username: &str) -> Result<String, AccountError> {
        self.call_text(RpcRequest::new("unlock_user").kwarg("username", username))
            .await
    }

    async fn remove_user(&self, username: &str, delete_home: bool) -> Result<String, AccountError> {
        self.call_text(
            RpcRequest::new("remove_user")
                .kwarg("username", username)
                .kwarg("delete_home", delete_home),
        )
        .await
    }

    async fn add_group(&self, groupname: &str) -> Result<String, AccountError> {
        self.call_text(RpcRequest::new("add_group").kwarg("groupname", groupname))
            .await
    }

    async fn set_group_details(
        &self,
        groupname: &str,
        new_name: &str,
    ) -> Result<String, AccountError> {
        self.call_text(
            RpcRequest::new("set_group_details")
                .kwarg("groupname", groupname)
                .kwarg("new_name", new_name),
        )
        .await
    }

    async fn remove_group(&self, groupname: &str) -> Result<String, AccountError> {
        self.call_text(RpcRequest::new("remove_group").kwarg("groupname", groupname))
            .await
    }

    async fn add_group_member(
        &self,
        username: &str,
        groupname: &str,
    ) -> Result<String, AccountError> {
        self.call_text(
            RpcRequest::new("add_group_member")
                .kwarg("username", username)
                .kwarg("groupname", groupname),
        )
        .await
    }

    async fn remove_group_member(
        &self,
        username: &str,
        groupname: &str,
    ) -> Result<String, AccountError> {
        self.call_text(
            RpcRequest::new("remove_group_member")
                .kwarg("username", username)
                .kwarg("groupname", groupname),
        )
        .await
    }

    async fn get_locked_usernames(&self) -> Result<Vec<String>, AccountError> {
        match self.call(RpcRequest::new("get_locked_usernames")).await? {
            Value::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Str(name) => Ok(name),
                    other => Err(AccountError::Channel(RpcError::Protocol(format!(
                        "locked username is a {}",
                        other.type_name()
                    )))),
                })
                .collect(),
            other => Err(AccountError::Channel(RpcError::Protocol(format!(
                "get_locked_usernames returned a {}",
                other.type_name()
            )))),
        }
    }
}
