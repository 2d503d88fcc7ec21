//! CLI argument parsing with clap derive, and process wiring.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};

use crate::application::ports::{AccountManagement, ChangeDetector, MessageTransport};
use crate::application::services::account_service::AccountService;
use crate::application::services::exchange::{ExchangeSettings, MessageExchange};
use crate::application::services::user_manager::UserManager;
use crate::application::{OperationTracker, RegistryBuilder};
use crate::domain::{AccountsBackend, AgentConfig, Backoff};
use crate::infra::accounts_detector::SystemAccountsDetector;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config::load_config;
use crate::infra::pinning::PinnedCertificate;
use crate::infra::remote_accounts::RemoteAccountManagement;
use crate::infra::rpc::{RpcClient, RpcServer};
use crate::infra::shadow_utils::ShadowUtilsManagement;
use crate::infra::transport::{HttpTransport, TransportOptions};

/// Fleet-management agent
#[derive(Parser)]
#[command(
    name = "fleet-agent",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Exchange messages with the management server
    Run {
        /// Perform a single exchange (plus one to deliver its results) and exit
        #[arg(long)]
        once: bool,
    },

    /// Serve account operations on the privileged socket (run as root)
    UserManager,

    /// Print the users whose password is locked
    LockedUsers,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid or the command fails.
    pub async fn run(self) -> Result<()> {
        let config = load_config()?;
        match self.command {
            Command::Run { once } => run_agent(&config, once).await,
            Command::UserManager => run_user_manager(&config).await,
            Command::LockedUsers => {
                for name in shadow_utils(&config).get_locked_usernames().await? {
                    println!("{name}");
                }
                Ok(())
            }
        }
    }
}

fn shadow_utils(config: &AgentConfig) -> ShadowUtilsManagement<TokioCommandRunner> {
    ShadowUtilsManagement::new(
        TokioCommandRunner::default(),
        &config.passwd_file,
        &config.shadow_file,
    )
}

fn pinned_certificate(config: &AgentConfig) -> Result<Option<PinnedCertificate>> {
    match (&config.ssl_public_key, &config.ssl_fingerprint) {
        (Some(path), _) => Ok(Some(PinnedCertificate::from_pem_file(path)?)),
        (None, Some(fingerprint)) => Ok(Some(
            PinnedCertificate::from_fingerprint(fingerprint).context("FLEET_SSL_FINGERPRINT")?,
        )),
        (None, None) => Ok(None),
    }
}

/// The unprivileged agent: exchange loop plus dispatch.
async fn run_agent(config: &AgentConfig, once: bool) -> Result<()> {
    let url = config
        .url
        .clone()
        .context("FLEET_URL is required to run the agent")?;
    let transport = HttpTransport::new(
        url,
        pinned_certificate(config)?,
        TransportOptions {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.exchange_timeout(),
            use_env_proxy: true,
        },
    )?;

    let rpc_client = match config.accounts_backend {
        AccountsBackend::Rpc => Some(Arc::new(RpcClient::new(
            &config.user_manager_socket,
            config.rpc_timeout(),
        ))),
        AccountsBackend::Direct => None,
    };
    let accounts: Arc<dyn AccountManagement> = match &rpc_client {
        Some(client) => Arc::new(RemoteAccountManagement::new(Arc::clone(client))),
        None => Arc::new(shadow_utils(config)),
    };
    let detector: Arc<dyn ChangeDetector> = Arc::new(SystemAccountsDetector::new(
        &config.passwd_file,
        &config.group_file,
        Arc::clone(&accounts),
    ));

    let tracker = Arc::new(OperationTracker::new());
    let mut builder = RegistryBuilder::new();
    builder.register_plugin(Arc::new(UserManager::new(accounts, detector)))?;
    let registry = Arc::new(builder.build(Arc::clone(&tracker)));

    let transport: Arc<dyn MessageTransport> = Arc::new(transport);
    tracing::info!(
        url = %transport.url(),
        computer_id = ?config.computer_id,
        backend = ?config.accounts_backend,
        pinned = config.ssl_public_key.is_some() || config.ssl_fingerprint.is_some(),
        "fleet-agent starting"
    );
    let exchange = MessageExchange::new(
        transport,
        registry,
        ExchangeSettings {
            computer_id: config.computer_id.clone(),
            message_api: config.message_api.clone(),
            interval: config.exchange_interval(),
            urgent_interval: config.urgent_exchange_interval(),
            backoff: Backoff::default(),
        },
    );

    let result = if once {
        exchange.exchange_once().await.map(|_| ())
    } else {
        exchange.run(shutdown_signal()).await
    };
    let result = match result {
        Ok(()) if once && tracker.queued_count().await > 0 => {
            exchange.exchange_once().await.map(|_| ())
        }
        other => other,
    };

    if let Some(client) = rpc_client {
        client.shutdown().await;
    }
    result.context("exchange failed")
}

/// The privileged helper: answers account calls on the local socket.
async fn run_user_manager(config: &AgentConfig) -> Result<()> {
    let service = AccountService::new(Arc::new(shadow_utils(config)));
    let server = RpcServer::bind(&config.user_manager_socket, Arc::new(service))?;
    server.serve(shutdown_signal()).await
}

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("received shutdown signal");
}
