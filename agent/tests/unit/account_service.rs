//! Privileged account service: argument handling and error classes.

use std::sync::Arc;

use fleet_agent::application::ports::RpcService;
use fleet_agent::application::services::account_service::{ACCOUNT_METHODS, AccountService};
use fleet_common::{RpcRequest, Value};

use crate::fake_accounts::FakeAccounts;

fn service(accounts: &Arc<FakeAccounts>) -> AccountService {
    AccountService::new(accounts.clone())
}

#[test]
fn exposes_the_account_methods_only() {
    let service = service(&Arc::new(FakeAccounts::default()));
    assert_eq!(service.exposed_methods(), ACCOUNT_METHODS);
    assert_eq!(ACCOUNT_METHODS.len(), 11);
    assert!(!ACCOUNT_METHODS.contains(&"run_command"));
}

#[tokio::test]
async fn keyword_arguments_reach_the_backend() {
    let accounts = Arc::new(FakeAccounts::default().with_group("staff"));
    let request = RpcRequest::new("add_user")
        .kwarg("username", "jdoe")
        .kwarg("full_name", "John Doe")
        .kwarg("primary_group", "staff")
        .kwarg("password", Value::None);

    let value = service(&accounts).invoke(&request).await.unwrap();

    assert_eq!(value, Value::from("added user jdoe"));
    let user = accounts.user("jdoe").unwrap();
    assert_eq!(user.full_name, "John Doe");
    assert_eq!(user.primary_group.as_deref(), Some("staff"));
    assert_eq!(user.password, None);
}

#[tokio::test]
async fn positional_arguments_are_accepted() {
    let accounts = Arc::new(FakeAccounts::default().with_user("jdoe").with_group("devs"));
    let request = RpcRequest::new("add_group_member").arg("jdoe").arg("devs");
    service(&accounts).invoke(&request).await.unwrap();
    assert_eq!(accounts.members("devs"), vec!["jdoe"]);
}

#[tokio::test]
async fn missing_or_mistyped_arguments_are_invalid() {
    let accounts = Arc::new(FakeAccounts::default());
    let service = service(&accounts);

    let missing = service.invoke(&RpcRequest::new("lock_user")).await.unwrap_err();
    assert_eq!(missing.class, "InvalidArgument");
    assert!(missing.message.contains("username"));

    let mistyped = service
        .invoke(&RpcRequest::new("remove_user").kwarg("username", "jdoe").kwarg("delete_home", "yes"))
        .await
        .unwrap_err();
    assert_eq!(mistyped.class, "InvalidArgument");
    assert!(accounts.calls().is_empty());
}

#[tokio::test]
async fn backend_errors_keep_their_class() {
    let service = service(&Arc::new(FakeAccounts::default()));
    let failure = service
        .invoke(&RpcRequest::new("unlock_user").kwarg("username", "ghost"))
        .await
        .unwrap_err();
    assert_eq!(failure.class, "NotFound");
    assert_eq!(failure.message, "user ghost");
}

#[tokio::test]
async fn locked_usernames_come_back_as_a_list() {
    let accounts = Arc::new(FakeAccounts::default().with_user("alice").with_user("bob"));
    let service = service(&accounts);
    service
        .invoke(&RpcRequest::new("lock_user").kwarg("username", "bob"))
        .await
        .unwrap();

    let value = service
        .invoke(&RpcRequest::new("get_locked_usernames"))
        .await
        .unwrap();
    assert_eq!(value, Value::List(vec![Value::from("bob")]));
}
