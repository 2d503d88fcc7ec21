//! Privileged channel over a real Unix socket: allow-list, error mapping,
//! reconnection and shutdown.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleet_agent::application::ports::{AccountManagement, RpcService};
use fleet_agent::application::services::account_service::AccountService;
use fleet_agent::application::services::user_manager::UserManager;
use fleet_agent::application::{DispatchOutcome, OperationTracker, RegistryBuilder};
use fleet_agent::domain::{AccountError, CompletionState, RpcError};
use fleet_agent::infra::remote_accounts::RemoteAccountManagement;
use fleet_agent::infra::rpc::{ChannelState, RpcClient, RpcServer};
use fleet_common::rpc::read_frame;
use fleet_common::{Message, RemoteFailure, RpcRequest, Value};
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::fake_accounts::FakeAccounts;

/// A running privileged helper serving `accounts`.
struct Helper {
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Helper {
    fn start(path: &Path, accounts: &Arc<FakeAccounts>) -> Self {
        let service = AccountService::new(accounts.clone());
        let server = RpcServer::bind(path, Arc::new(service)).unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(async move {
            let _ = stopped.await;
        }));
        Self { stop, task }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("run").join("user-manager.sock")
}

fn client(path: &Path) -> RpcClient {
    RpcClient::new(path, Duration::from_secs(5)).with_connect_timeout(Duration::from_secs(1))
}

// ── Calls ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn call_runs_on_the_helper_and_returns_its_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let accounts = Arc::new(FakeAccounts::default().with_user("jdoe"));
    let helper = Helper::start(&path, &accounts);
    let client = client(&path);
    assert_eq!(client.state(), ChannelState::Disconnected);

    let value = client
        .call(RpcRequest::new("lock_user").kwarg("username", "jdoe"))
        .await
        .unwrap();

    assert_eq!(value, Value::from("locked user jdoe"));
    assert!(accounts.user("jdoe").unwrap().locked);
    assert_eq!(*client.subscribe().borrow(), ChannelState::Ready);
    helper.stop().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn socket_is_private_to_its_owner() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let helper = Helper::start(&path, &Arc::new(FakeAccounts::default()));

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    helper.stop().await;
}

#[tokio::test]
async fn unexposed_method_is_refused_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let accounts = Arc::new(FakeAccounts::default().with_user("jdoe"));
    let helper = Helper::start(&path, &accounts);
    let client = client(&path);

    let err = client
        .call(RpcRequest::new("run_command").arg("rm -rf /"))
        .await
        .unwrap_err();

    assert_eq!(err, RpcError::UnknownMethod("run_command".into()));
    assert!(accounts.calls().is_empty());
    // The connection survives a refused call.
    assert_eq!(client.state(), ChannelState::Ready);
    client
        .call(RpcRequest::new("unlock_user").kwarg("username", "jdoe"))
        .await
        .unwrap();
    helper.stop().await;
}

#[tokio::test]
async fn remote_failures_become_account_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let accounts = Arc::new(FakeAccounts::default().with_group("devs"));
    let helper = Helper::start(&path, &accounts);
    let remote = RemoteAccountManagement::new(Arc::new(client(&path)));

    assert_eq!(
        remote.lock_user("ghost").await,
        Err(AccountError::NotFound("user ghost".into()))
    );
    assert_eq!(
        remote.add_group("devs").await,
        Err(AccountError::AlreadyExists("group devs".into()))
    );
    assert_eq!(remote.get_locked_usernames().await, Ok(Vec::new()));
    helper.stop().await;
}

// ── Connection lifecycle ─────────────────────────────────────────────────────

#[tokio::test]
async fn missing_helper_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(&socket_in(&dir));

    let err = client.call(RpcRequest::new("get_locked_usernames")).await.unwrap_err();

    assert!(matches!(err, RpcError::Unavailable(_)), "got {err:?}");
    assert!(!err.outcome_unknown());
    assert_eq!(client.state(), ChannelState::Disconnected);
}

#[tokio::test]
async fn client_reconnects_after_the_helper_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let accounts = Arc::new(FakeAccounts::default().with_user("jdoe"));
    let client = client(&path);

    let helper = Helper::start(&path, &accounts);
    client
        .call(RpcRequest::new("lock_user").kwarg("username", "jdoe"))
        .await
        .unwrap();
    helper.stop().await;

    let helper = Helper::start(&path, &accounts);
    client
        .call(RpcRequest::new("unlock_user").kwarg("username", "jdoe"))
        .await
        .unwrap();
    assert!(!accounts.user("jdoe").unwrap().locked);
    helper.stop().await;

    let err = client
        .call(RpcRequest::new("lock_user").kwarg("username", "jdoe"))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Unavailable(_)), "got {err:?}");
    assert!(!accounts.user("jdoe").unwrap().locked);
}

#[tokio::test]
async fn shutdown_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let helper = Helper::start(&path, &Arc::new(FakeAccounts::default()));
    let client = client(&path);
    client.call(RpcRequest::new("get_locked_usernames")).await.unwrap();

    client.shutdown().await;

    assert_eq!(client.state(), ChannelState::Shutdown);
    assert_eq!(
        client.call(RpcRequest::new("get_locked_usernames")).await,
        Err(RpcError::Shutdown)
    );
    helper.stop().await;
}

#[tokio::test]
async fn unanswered_call_times_out_with_unknown_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("silent.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let silent = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    });
    let client = RpcClient::new(&path, Duration::from_millis(100));

    let err = client.call(RpcRequest::new("get_locked_usernames")).await.unwrap_err();

    assert_eq!(err, RpcError::Timeout(Duration::from_millis(100)));
    assert!(err.outcome_unknown());
    assert_eq!(client.state(), ChannelState::Disconnected);
    silent.abort();
}

#[tokio::test]
async fn connection_lost_mid_call_is_channel_closed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flaky.sock");
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_frame(&mut stream).await;
    });
    let client = client(&path);

    let err = client
        .call(RpcRequest::new("lock_user").kwarg("username", "jdoe"))
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::ChannelClosed(_)), "got {err:?}");
    assert!(err.outcome_unknown());
}

#[tokio::test]
async fn existing_non_socket_file_is_never_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("user-manager.sock");
    std::fs::write(&path, "keep me").unwrap();

    let err = RpcServer::bind(&path, Arc::new(AccountService::new(Arc::new(FakeAccounts::default()))))
        .err()
        .expect("bind over a regular file must fail");

    assert!(err.to_string().contains("not a socket"), "{err:#}");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
}

#[tokio::test]
async fn stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    drop(UnixListener::bind(&path).unwrap());
    assert!(path.exists());

    let helper = Helper::start(&path, &Arc::new(FakeAccounts::default()));
    client(&path).call(RpcRequest::new("get_locked_usernames")).await.unwrap();
    helper.stop().await;
}

/// Takes a while to apply and records that it finished.
struct SlowService {
    applied: AtomicBool,
}

#[async_trait]
impl RpcService for SlowService {
    fn exposed_methods(&self) -> &'static [&'static str] {
        &["slow_write"]
    }

    async fn invoke(&self, _request: &RpcRequest) -> Result<Value, RemoteFailure> {
        tokio::time::sleep(Duration::from_millis(400)).await;
        self.applied.store(true, Ordering::SeqCst);
        Ok(Value::from("written"))
    }
}

#[tokio::test]
async fn shutdown_lets_a_call_in_progress_finish() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let service = Arc::new(SlowService { applied: AtomicBool::new(false) });
    let server = RpcServer::bind(&path, service.clone()).unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.serve(async move {
        let _ = stopped.await;
    }));

    let client = Arc::new(client(&path));
    let caller = Arc::clone(&client);
    let call = tokio::spawn(async move { caller.call(RpcRequest::new("slow_write")).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.send(()).unwrap();

    assert_eq!(call.await.unwrap(), Ok(Value::from("written")));
    assert!(service.applied.load(Ordering::SeqCst));
    task.await.unwrap().unwrap();
    assert!(!path.exists());
    // The drained connection is closed once its call is answered.
    let err = client.call(RpcRequest::new("slow_write")).await.unwrap_err();
    assert!(matches!(err, RpcError::Unavailable(_)), "got {err:?}");
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn account_message_runs_through_the_privileged_helper() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let system = Arc::new(FakeAccounts::default());
    let helper = Helper::start(&path, &system);

    let remote: Arc<dyn AccountManagement> =
        Arc::new(RemoteAccountManagement::new(Arc::new(client(&path))));
    let tracker = Arc::new(OperationTracker::new());
    let mut builder = RegistryBuilder::new();
    builder
        .register_plugin(Arc::new(UserManager::new(remote, system.clone())))
        .unwrap();
    let registry = builder.build(Arc::clone(&tracker));

    let message = Message::new("add-user")
        .with("operation-id", 9)
        .with("username", "jdoe")
        .with("name", "John Doe");
    let outcome = registry.dispatch(&message).await.unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Reported { operation_id: 9, state: CompletionState::Succeeded }
    );
    assert_eq!(system.user("jdoe").unwrap().full_name, "John Doe");
    let result = tracker.drain().await.remove(0);
    assert_eq!(result.get("result-text"), Some(&Value::from("added user jdoe")));
    let delta = result.get("delta").and_then(Value::as_map).unwrap();
    assert!(delta["created"].as_map().unwrap().contains_key("user:jdoe"));
    helper.stop().await;
}
