//! Change detection for the user manager: snapshots the passwd and group
//! databases, with each user's locked state from the account backend.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fleet_common::Value;

use crate::application::ports::{AccountManagement, ChangeDetector};
use crate::domain::Snapshot;
use crate::domain::accounts::{GroupEntry, PasswdEntry, parse_group, parse_passwd};

pub struct SystemAccountsDetector {
    passwd_path: PathBuf,
    group_path: PathBuf,
    accounts: Arc<dyn AccountManagement>,
}

impl SystemAccountsDetector {
    pub fn new(
        passwd_path: impl Into<PathBuf>,
        group_path: impl Into<PathBuf>,
        accounts: Arc<dyn AccountManagement>,
    ) -> Self {
        Self {
            passwd_path: passwd_path.into(),
            group_path: group_path.into(),
            accounts,
        }
    }
}

fn user_value(entry: PasswdEntry, locked: bool) -> Value {
    Value::Map(BTreeMap::from([
        ("uid".to_string(), Value::from(entry.uid)),
        ("gid".to_string(), Value::from(entry.gid)),
        ("name".to_string(), Value::Str(entry.gecos.full_name)),
        ("location".to_string(), Value::Str(entry.gecos.location)),
        ("work-number".to_string(), Value::Str(entry.gecos.work_phone)),
        ("home-number".to_string(), Value::Str(entry.gecos.home_phone)),
        ("home-directory".to_string(), Value::Str(entry.home)),
        ("shell".to_string(), Value::Str(entry.shell)),
        ("locked".to_string(), Value::Bool(locked)),
    ]))
}

fn group_value(entry: GroupEntry) -> Value {
    Value::Map(BTreeMap::from([
        ("gid".to_string(), Value::from(entry.gid)),
        (
            "members".to_string(),
            Value::List(entry.members.into_iter().map(Value::Str).collect()),
        ),
    ]))
}

#[async_trait]
impl ChangeDetector for SystemAccountsDetector {
    async fn detect_changes(&self, operation_id: Option<i64>) -> Result<Snapshot> {
        let passwd = tokio::fs::read_to_string(&self.passwd_path)
            .await
            .with_context(|| format!("cannot read {}", self.passwd_path.display()))?;
        let group = tokio::fs::read_to_string(&self.group_path)
            .await
            .with_context(|| format!("cannot read {}", self.group_path.display()))?;
        let locked = self
            .accounts
            .get_locked_usernames()
            .await
            .context("cannot read locked users")?;

        let mut snapshot = Snapshot::default();
        for entry in parse_passwd(&passwd) {
            let is_locked = locked.contains(&entry.username);
            snapshot.insert(format!("user:{}", entry.username), user_value(entry, is_locked));
        }
        for entry in parse_group(&group) {
            snapshot.insert(format!("group:{}", entry.name), group_value(entry));
        }
        tracing::debug!(?operation_id, entries = snapshot.len(), "account snapshot taken");
        Ok(snapshot)
    }
}
