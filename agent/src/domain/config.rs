//! Agent configuration values.
//!
//! Loaded from `FLEET_*` environment variables by `infra::config`; this
//! module only holds the shape, the defaults and the validation rules.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::error::ConfigError;

/// Which [`AccountManagement`](crate::application::ports::AccountManagement)
/// implementation the dispatch process uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountsBackend {
    /// Forward account calls to the privileged helper over its socket.
    #[default]
    Rpc,
    /// Run the shadow-utils commands in this process.
    Direct,
}

/// Agent configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Message-system URL of the management server. Required by `run`.
    #[serde(default)]
    pub url: Option<String>,

    /// PEM file holding the certificate(s) the server must present.
    #[serde(default)]
    pub ssl_public_key: Option<PathBuf>,

    /// SHA-256 fingerprint of the server's certificate, hex.
    #[serde(default)]
    pub ssl_fingerprint: Option<String>,

    /// Identifier the server assigned to this host.
    #[serde(default)]
    pub computer_id: Option<String>,

    /// Message API version sent in `x-message-api` (default: 3.3)
    #[serde(default = "default_message_api")]
    pub message_api: String,

    #[serde(default = "default_exchange_interval_secs")]
    pub exchange_interval_secs: u64,

    /// Interval used while results are waiting to be delivered.
    #[serde(default = "default_urgent_exchange_interval_secs")]
    pub urgent_exchange_interval_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,

    /// Deadline for one privileged call (default: 300)
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    #[serde(default)]
    pub accounts_backend: AccountsBackend,

    /// Socket of the privileged account helper.
    #[serde(default = "default_user_manager_socket")]
    pub user_manager_socket: PathBuf,

    #[serde(default = "default_passwd_file")]
    pub passwd_file: PathBuf,

    #[serde(default = "default_group_file")]
    pub group_file: PathBuf,

    #[serde(default = "default_shadow_file")]
    pub shadow_file: PathBuf,
}

fn default_message_api() -> String {
    "3.3".to_string()
}

fn default_exchange_interval_secs() -> u64 {
    900
}

fn default_urgent_exchange_interval_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_exchange_timeout_secs() -> u64 {
    60
}

fn default_rpc_timeout_secs() -> u64 {
    300
}

fn default_user_manager_socket() -> PathBuf {
    PathBuf::from("/run/fleet-agent/user-manager.sock")
}

fn default_passwd_file() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_group_file() -> PathBuf {
    PathBuf::from("/etc/group")
}

fn default_shadow_file() -> PathBuf {
    PathBuf::from("/etc/shadow")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: None,
            ssl_public_key: None,
            ssl_fingerprint: None,
            computer_id: None,
            message_api: default_message_api(),
            exchange_interval_secs: default_exchange_interval_secs(),
            urgent_exchange_interval_secs: default_urgent_exchange_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            exchange_timeout_secs: default_exchange_timeout_secs(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            accounts_backend: AccountsBackend::default(),
            user_manager_socket: default_user_manager_socket(),
            passwd_file: default_passwd_file(),
            group_file: default_group_file(),
            shadow_file: default_shadow_file(),
        }
    }
}

impl AgentConfig {
    /// Reject values the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("FLEET_EXCHANGE_INTERVAL_SECS", self.exchange_interval_secs),
            (
                "FLEET_URGENT_EXCHANGE_INTERVAL_SECS",
                self.urgent_exchange_interval_secs,
            ),
            ("FLEET_CONNECT_TIMEOUT_SECS", self.connect_timeout_secs),
            ("FLEET_EXCHANGE_TIMEOUT_SECS", self.exchange_timeout_secs),
            ("FLEET_RPC_TIMEOUT_SECS", self.rpc_timeout_secs),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.ssl_public_key.is_some() && self.ssl_fingerprint.is_some() {
            return Err(ConfigError::InvalidValue {
                key: "FLEET_SSL_FINGERPRINT",
                reason: "cannot be combined with FLEET_SSL_PUBLIC_KEY".to_string(),
            });
        }
        if let Some(url) = &self.url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(ConfigError::InvalidValue {
                    key: "FLEET_URL",
                    reason: format!("'{url}' is not an http(s) URL"),
                });
            }
            if !url.starts_with("https://") {
                let pinned = if self.ssl_public_key.is_some() {
                    Some("FLEET_SSL_PUBLIC_KEY")
                } else if self.ssl_fingerprint.is_some() {
                    Some("FLEET_SSL_FINGERPRINT")
                } else {
                    None
                };
                if let Some(key) = pinned {
                    return Err(ConfigError::InvalidValue {
                        key,
                        reason: format!("requires an https URL, got '{url}'"),
                    });
                }
            }
        }
        if self.message_api.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "FLEET_MESSAGE_API",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn exchange_interval(&self) -> Duration {
        Duration::from_secs(self.exchange_interval_secs)
    }

    #[must_use]
    pub fn urgent_exchange_interval(&self) -> Duration {
        Duration::from_secs(self.urgent_exchange_interval_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}
