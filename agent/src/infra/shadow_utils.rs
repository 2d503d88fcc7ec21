//! [`AccountManagement`] backend driving the shadow-utils programs.
//!
//! Runs inside the privileged helper (or in-process with the `direct`
//! backend). Every name is validated before it reaches a command line.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;

use crate::application::ports::{AccountManagement, CommandRunner};
use crate::domain::AccountError;
use crate::domain::accounts::{
    Gecos, NewUser, UserDetails, locked_usernames, parse_passwd, validate_account_name,
};

pub struct ShadowUtilsManagement<R: CommandRunner> {
    runner: R,
    passwd_path: PathBuf,
    shadow_path: PathBuf,
}

impl<R: CommandRunner> ShadowUtilsManagement<R> {
    pub fn new(runner: R, passwd_path: impl Into<PathBuf>, shadow_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            passwd_path: passwd_path.into(),
            shadow_path: shadow_path.into(),
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<(), AccountError> {
        let output = self
            .runner
            .run(program, args)
            .await
            .map_err(|e| AccountError::Failed(format!("{e:#}")))?;
        check(program, &output)
    }

    async fn set_password(&self, username: &str, password: &str) -> Result<(), AccountError> {
        if password.contains(['\n', '\r']) {
            return Err(AccountError::InvalidArgument(
                "password may not contain line breaks".to_string(),
            ));
        }
        let line = format!("{username}:{password}\n");
        let output = self
            .runner
            .run_with_stdin("chpasswd", &[], line.as_bytes())
            .await
            .map_err(|e| AccountError::Failed(format!("{e:#}")))?;
        check("chpasswd", &output)
    }

    async fn current_gecos(&self, username: &str) -> Result<Gecos, AccountError> {
        let content = tokio::fs::read_to_string(&self.passwd_path)
            .await
            .map_err(|e| {
                AccountError::Failed(format!("cannot read {}: {e}", self.passwd_path.display()))
            })?;
        parse_passwd(&content)
            .into_iter()
            .find(|entry| entry.username == username)
            .map(|entry| entry.gecos)
            .ok_or_else(|| AccountError::NotFound(format!("user {username}")))
    }

    async fn finish_new_user(&self, user: &NewUser) -> Result<(), AccountError> {
        if let Some(password) = &user.password {
            self.set_password(&user.username, password).await?;
        }
        if user.require_reset {
            self.run("chage", &["-d", "0", user.username.as_str()]).await?;
        }
        Ok(())
    }
}

/// Map a finished command to a result. Stderr wording wins over exit codes,
/// which differ between the shadow-utils programs.
fn check(program: &str, output: &Output) -> Result<(), AccountError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let code = output.status.code();
    let detail = match code {
        Some(code) => format!("{program} exited with status {code}: {stderr}"),
        None => format!("{program} was killed: {stderr}"),
    };
    let lower = stderr.to_lowercase();
    let err = if lower.contains("does not exist") || lower.contains("not found") {
        AccountError::NotFound(detail)
    } else if lower.contains("already exists") || lower.contains("is not unique") {
        AccountError::AlreadyExists(detail)
    } else if lower.contains("permission denied") {
        AccountError::PermissionDenied(detail)
    } else {
        match code {
            Some(1) => AccountError::PermissionDenied(detail),
            Some(2 | 3) => AccountError::InvalidArgument(detail),
            Some(4 | 9) => AccountError::AlreadyExists(detail),
            Some(6) => AccountError::NotFound(detail),
            _ => AccountError::Failed(detail),
        }
    };
    Err(err)
}

#[async_trait]
impl<R: CommandRunner> AccountManagement for ShadowUtilsManagement<R> {
    async fn add_user(&self, user: &NewUser) -> Result<String, AccountError> {
        validate_account_name("user", &user.username)?;
        if let Some(group) = &user.primary_group {
            validate_account_name("group", group)?;
        }
        let gecos = Gecos::from_new_user(user).render()?;

        let mut args = vec!["-m", "-c", gecos.as_str()];
        if let Some(group) = &user.primary_group {
            args.extend(["-g", group.as_str()]);
        }
        args.push(user.username.as_str());
        self.run("useradd", &args).await?;

        // Do not leave a half-configured account behind.
        if let Err(e) = self.finish_new_user(user).await {
            tracing::warn!(username = %user.username, error = %e, "rolling back new user");
            if let Err(rollback) = self.run("userdel", &["-r", user.username.as_str()]).await {
                tracing::error!(username = %user.username, error = %rollback, "rollback failed");
            }
            return Err(e);
        }
        Ok(format!("added user {}", user.username))
    }

    async fn set_user_details(
        &self,
        username: &str,
        details: &UserDetails,
    ) -> Result<String, AccountError> {
        validate_account_name("user", username)?;
        let changes_gecos = details.full_name.is_some()
            || details.location.is_some()
            || details.work_phone.is_some()
            || details.home_phone.is_some();
        if changes_gecos {
            let gecos = self.current_gecos(username).await?.merged(details).render()?;
            self.run("usermod", &["-c", gecos.as_str(), username]).await?;
        }
        if let Some(group) = &details.primary_group {
            validate_account_name("group", group)?;
            self.run("usermod", &["-g", group.as_str(), username]).await?;
        }
        if let Some(password) = &details.password {
            self.set_password(username, password).await?;
        }
        Ok(format!("updated user {username}"))
    }

    async fn lock_user(&self, username: &str) -> Result<String, AccountError> {
        validate_account_name("user", username)?;
        self.run("passwd", &["-l", username]).await?;
        Ok(format!("locked user {username}"))
    }

    async fn unlock_user(&self, username: &str) -> Result<String, AccountError> {
        validate_account_name("user", username)?;
        self.run("passwd", &["-u", username]).await?;
        Ok(format!("unlocked user {username}"))
    }

    async fn remove_user(&self, username: &str, delete_home: bool) -> Result<String, AccountError> {
        validate_account_name("user", username)?;
        if delete_home {
            self.run("userdel", &["-r", username]).await?;
        } else {
            self.run("userdel", &[username]).await?;
        }
        Ok(format!("removed user {username}"))
    }

    async fn add_group(&self, groupname: &str) -> Result<String, AccountError> {
        validate_account_name("group", groupname)?;
        self.run("groupadd", &[groupname]).await?;
        Ok(format!("added group {groupname}"))
    }

    async fn set_group_details(
        &self,
        groupname: &str,
        new_name: &str,
    ) -> Result<String, AccountError> {
        validate_account_name("group", groupname)?;
        validate_account_name("group", new_name)?;
        self.run("groupmod", &["-n", new_name, groupname]).await?;
        Ok(format!("renamed group {groupname} to {new_name}"))
    }

    async fn remove_group(&self, groupname: &str) -> Result<String, AccountError> {
        validate_account_name("group", groupname)?;
        self.run("groupdel", &[groupname]).await?;
        Ok(format!("removed group {groupname}"))
    }

    async fn add_group_member(
        &self,
        username: &str,
        groupname: &str,
    ) -> Result<String, AccountError> {
        validate_account_name("user", username)?;
        validate_account_name("group", groupname)?;
        self.run("gpasswd", &["-a", username, groupname]).await?;
        Ok(format!("added {username} to {groupname}"))
    }

    async fn remove_group_member(
        &self,
        username: &str,
        groupname: &str,
    ) -> Result<String, AccountError> {
        validate_account_name("user", username)?;
        validate_account_name("group", groupname)?;
        self.run("gpasswd", &["-d", username, groupname]).await?;
        Ok(format!("removed {username} from {groupname}"))
    }

    async fn get_locked_usernames(&self) -> Result<Vec<String>, AccountError> {
        match tokio::fs::read_to_string(&self.shadow_path).await {
            Ok(content) => Ok(locked_usernames(&content)),
            Err(e) => {
                tracing::error!(
                    path = %self.shadow_path.display(),
                    error = %e,
                    "cannot read shadow file; reporting no locked users"
                );
                Ok(Vec::new())
            }
        }
    }
}
