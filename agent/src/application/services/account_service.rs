//! Privileged side of the account channel: exposes an account backend as an
//! [`RpcService`] with a fixed allow-list of methods.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_common::rpc::BAD_REQUEST_ERROR;
use fleet_common::{RemoteFailure, RpcRequest, Value};

use crate::application::ports::{AccountManagement, RpcService};
use crate::domain::AccountError;
use crate::domain::accounts::{NewUser, UserDetails};

/// Every method the privileged helper answers.
pub const ACCOUNT_METHODS: &[&str] = &[
    "add_user",
    "set_user_details",
    "lock_user",
    "unlock_user",
    "remove_user",
    "add_group",
    "set_group_details",
    "remove_group",
    "add_group_member",
    "remove_group_member",
    "get_locked_usernames",
];

pub struct AccountService {
    backend: Arc<dyn AccountManagement>,
}

impl AccountService {
    #[must_use]
    pub fn new(backend: Arc<dyn AccountManagement>) -> Self {
        Self { backend }
    }
}

fn invalid(reason: String) -> RemoteFailure {
    RemoteFailure {
        class: "InvalidArgument".to_string(),
        message: reason,
    }
}

fn failure(err: &AccountError) -> RemoteFailure {
    RemoteFailure {
        class: err.class().to_string(),
        message: err.detail(),
    }
}

fn required_str(request: &RpcRequest, index: usize, name: &str) -> Result<String, RemoteFailure> {
    match request.argument(index, name) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Err(invalid(format!(
            "{}: {name} must be a string, got {}",
            request.method,
            other.type_name()
        ))),
        None => Err(invalid(format!("{}: missing argument {name}", request.method))),
    }
}

fn optional_str(
    request: &RpcRequest,
    index: usize,
    name: &str,
) -> Result<Option<String>, RemoteFailure> {
    match request.argument(index, name) {
        None => Ok(None),
        Some(_) => required_str(request, index, name).map(Some),
    }
}

fn flag(request: &RpcRequest, index: usize, name: &str) -> Result<bool, RemoteFailure> {
    match request.argument(index, name) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(invalid(format!(
            "{}: {name} must be a boolean, got {}",
            request.method,
            other.type_name()
        ))),
    }
}

impl AccountService {
    async fn call(&self, request: &RpcRequest) -> Result<Value, RemoteFailure> {
        let backend = self.backend.as_ref();
        let text = match request.method.as_str() {
            "add_user" => {
                let user = NewUser {
                    username: required_str(request, 0, "username")?,
                    full_name: optional_str(request, 1, "full_name")?,
                    password: optional_str(request, 2, "password")?,
                    require_reset: flag(request, 3, "require_reset")?,
                    primary_group: optional_str(request, 4, "primary_group")?,
                    location: optional_str(request, 5, "location")?,
                    work_phone: optional_str(request, 6, "work_phone")?,
                    home_phone: optional_str(request, 7, "home_phone")?,
                };
                backend.add_user(&user).await
            }
            "set_user_details" => {
                let username = required_str(request, 0, "username")?;
                let details = UserDetails {
                    password: optional_str(request, 1, "password")?,
                    full_name: optional_str(request, 2, "full_name")?,
                    location: optional_str(request, 3, "location")?,
                    work_phone: optional_str(request, 4, "work_phone")?,
                    home_phone: optional_str(request, 5, "home_phone")?,
                    primary_group: optional_str(request, 6, "primary_group")?,
                };
                backend.set_user_details(&username, &details).await
            }
            "lock_user" => backend.lock_user(&required_str(request, 0, "username")?).await,
            "unlock_user" => backend.unlock_user(&required_str(request, 0, "username")?).await,
            "remove_user" => {
                let username = required_str(request, 0, "username")?;
                backend
                    .remove_user(&username, flag(request, 1, "delete_home")?)
                    .await
            }
            "add_group" => backend.add_group(&required_str(request, 0, "groupname")?).await,
            "set_group_details" => {
                let groupname = required_str(request, 0, "groupname")?;
                let new_name = required_str(request, 1, "new_name")?;
                backend.set_group_details(&groupname, &new_name).await
            }
            "remove_group" => backend.remove_group(&required_str(request, 0, "groupname")?).await,
            "add_group_member" => {
                let username = required_str(request, 0, "username")?;
                let groupname = required_str(request, 1, "groupname")?;
                backend.add_group_member(&username, &groupname).await
            }
            "remove_group_member" => {
                let username = required_str(request, 0, "username")?;
                let groupname = required_str(request, 1, "groupname")?;
                backend.remove_group_member(&username, &groupname).await
            }
            "get_locked_usernames" => {
                let names = backend
                    .get_locked_usernames()
                    .await
                    .map_err(|e| failure(&e))?;
                return Ok(Value::List(names.into_iter().map(Value::Str).collect()));
            }
            other => {
                return Err(RemoteFailure {
                    class: BAD_REQUEST_ERROR.to_string(),
                    message: format!("no implementation for {other}"),
                });
            }
        };
        text.map(Value::Str).map_err(|e| failure(&e))
    }
}

#[async_trait]
impl RpcService for AccountService {
    fn exposed_methods(&self) -> &'static [&'static str] {
        ACCOUNT_METHODS
    }

    async fn invoke(&self, request: &RpcRequest) -> Result<Value, RemoteFailure> {
        let result = self.call(request).await;
        match &result {
            Ok(_) => tracing::info!(method = %request.method, "privileged call succeeded"),
            Err(f) => tracing::warn!(
                method = %request.method,
                class = %f.class,
                error = %f.message,
                "privileged call failed"
            ),
        }
        result
    }
}
