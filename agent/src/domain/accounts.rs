//! Account request types and pure parsers for the system account databases.
//!
//! No I/O here: callers read `/etc/passwd`, `/etc/group` and `/etc/shadow`
//! and hand the contents in.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::domain::error::AccountError;

/// Account and group names accepted by the backend. A leading `-` is never
/// allowed so a name cannot be read as a command-line option.
pub static ACCOUNT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Constant pattern; cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]{0,31}\$?$").expect("valid regex")
});

/// Validate a user or group name before it reaches a privileged command.
pub fn validate_account_name(what: &str, name: &str) -> Result<(), AccountError> {
    if ACCOUNT_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(AccountError::InvalidArgument(format!("invalid {what} name {name:?}")))
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// An `add-user` request.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub username: String,
    #[serde(rename = "name", default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(rename = "require-password-reset", default)]
    pub require_reset: bool,
    #[serde(rename = "primary-group-name", default)]
    pub primary_group: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "work-number", default)]
    pub work_phone: Option<String>,
    #[serde(rename = "home-number", default)]
    pub home_phone: Option<String>,
}

/// Fields an `edit-user` request may change. `None` leaves a field as is.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserDetails {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(rename = "name", default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "work-number", default)]
    pub work_phone: Option<String>,
    #[serde(rename = "home-number", default)]
    pub home_phone: Option<String>,
    #[serde(rename = "primary-group-name", default)]
    pub primary_group: Option<String>,
}

/// An `edit-user` request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EditUser {
    pub username: String,
    #[serde(flatten)]
    pub details: UserDetails,
}

/// `lock-user` / `unlock-user`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserTarget {
    pub username: String,
}

/// `remove-user`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoveUser {
    pub username: String,
    #[serde(default)]
    pub delete_home: bool,
}

/// `add-group` / `remove-group`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupTarget {
    pub groupname: String,
}

/// `edit-group`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EditGroup {
    pub groupname: String,
    pub new_name: String,
}

/// `add-group-member` / `remove-group-member`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupMember {
    pub username: String,
    pub groupname: String,
}

// Passwords never reach logs.
impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("full_name", &self.full_name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("require_reset", &self.require_reset)
            .field("primary_group", &self.primary_group)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for UserDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDetails")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("full_name", &self.full_name)
            .field("primary_group", &self.primary_group)
            .finish_non_exhaustive()
    }
}

// ── GECOS ─────────────────────────────────────────────────────────────────────

/// The comma-separated comment field of a passwd entry:
/// `full name,location,work phone,home phone`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gecos {
    pub full_name: String,
    pub location: String,
    pub work_phone: String,
    pub home_phone: String,
}

impl Gecos {
    #[must_use]
    pub fn parse(field: &str) -> Self {
        let mut parts = field.splitn(5, ',');
        let mut next = || parts.next().unwrap_or_default().to_string();
        Self {
            full_name: next(),
            location: next(),
            work_phone: next(),
            home_phone: next(),
        }
    }

    #[must_use]
    pub fn from_new_user(user: &NewUser) -> Self {
        Self {
            full_name: user.full_name.clone().unwrap_or_default(),
            location: user.location.clone().unwrap_or_default(),
            work_phone: user.work_phone.clone().unwrap_or_default(),
            home_phone: user.home_phone.clone().unwrap_or_default(),
        }
    }

    /// Overlay the fields present in `details`.
    #[must_use]
    pub fn merged(mut self, details: &UserDetails) -> Self {
        if let Some(v) = &details.full_name {
            self.full_name.clone_from(v);
        }
        if let Some(v) = &details.location {
            self.location.clone_from(v);
        }
        if let Some(v) = &details.work_phone {
            self.work_phone.clone_from(v);
        }
        if let Some(v) = &details.home_phone {
            self.home_phone.clone_from(v);
        }
        self
    }

    /// Render the field, rejecting characters that would corrupt it.
    pub fn render(&self) -> Result<String, AccountError> {
        let fields = [
            ("name", &self.full_name),
            ("location", &self.location),
            ("work-number", &self.work_phone),
            ("home-number", &self.home_phone),
        ];
        for (key, value) in fields {
            if value.contains([',', ':', '=', '\n']) {
                return Err(AccountError::InvalidArgument(format!(
                    "{key} may not contain ',', ':', '=' or newlines"
                )));
            }
        }
        let rendered = format!(
            "{},{},{},{}",
            self.full_name, self.location, self.work_phone, self.home_phone
        );
        Ok(rendered.trim_end_matches(',').to_string())
    }
}

// ── Account databases ─────────────────────────────────────────────────────────

/// One line of `/etc/passwd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: Gecos,
    pub home: String,
    pub shell: String,
}

/// One line of `/etc/group`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

fn content_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Parse passwd content. Malformed lines are skipped.
#[must_use]
pub fn parse_passwd(content: &str) -> Vec<PasswdEntry> {
    content_lines(content)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() != 7 {
                return None;
            }
            Some(PasswdEntry {
                username: parts[0].to_string(),
                uid: parts[2].parse().ok()?,
                gid: parts[3].parse().ok()?,
                gecos: Gecos::parse(parts[4]),
                home: parts[5].to_string(),
                shell: parts[6].to_string(),
            })
        })
        .collect()
}

/// Parse group content. Malformed lines are skipped.
#[must_use]
pub fn parse_group(content: &str) -> Vec<GroupEntry> {
    content_lines(content)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() != 4 {
                return None;
            }
            Some(GroupEntry {
                name: parts[0].to_string(),
                gid: parts[2].parse().ok()?,
                members: parts[3]
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
        })
        .collect()
}

/// Users whose shadow password field starts with `!`.
#[must_use]
pub fn locked_usernames(shadow: &str) -> Vec<String> {
    shadow
        .lines()
        .filter_map(|line| {
            let mut parts = line.split(':');
            let name = parts.next()?;
            let password = parts.next()?;
            password.starts_with('!').then(|| name.trim().to_string())
        })
        .collect()
}
