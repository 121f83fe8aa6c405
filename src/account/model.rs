use std::fmt;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

/// Store-assigned account identifier (always >= 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<i64>() {
            Ok(id) if id >= 1 => Ok(Self(id)),
            _ => Err(StoreError::validation(format!(
                "'{}' is not a valid account id",
                s.trim()
            ))),
        }
    }
}

/// Account password. Kept out of `Debug` output and logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: Password,
    /// Unix timestamp of the last successful login
    pub last_login: Option<i64>,
}

/// Render a `last_login` stamp in local time.
pub fn format_login(last_login: Option<i64>) -> String {
    last_login
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|at| {
            at.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "never".to_string())
}

impl Account {
    /// Short label for logs and notification titles
    pub fn label(&self) -> String {
        format!("{} ({})", self.username, self.server)
    }
}

/// One line of `AccountStore::list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub id: AccountId,
    pub username: String,
    pub server: String,
    pub port: u16,
    pub last_login: Option<i64>,
}

/// Validated input for a new account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: Password,
}

impl NewAccount {
    pub fn new(server: &str, port: u16, username: &str, password: &str) -> StoreResult<Self> {
        Ok(Self {
            server: validate_server(server)?,
            port: validate_port(i64::from(port))?,
            username: validate_non_empty("username", username)?,
            password: Password::new(validate_non_empty("password", password)?),
        })
    }

    /// Build from the textual "server, port" form used by prompts and CLI arguments.
    pub fn parse(server_port: &str, username: &str, password: &str) -> StoreResult<Self> {
        let (server, port) = parse_server_port(server_port)?;
        Self::new(&server, port, username, password)
    }
}

/// A single-field edit of an existing account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountUpdate {
    ServerPort { server: String, port: u16 },
    Username(String),
    Password(Password),
}

impl AccountUpdate {
    pub fn server_port(input: &str) -> StoreResult<Self> {
        let (server, port) = parse_server_port(input)?;
        Ok(Self::ServerPort { server, port })
    }

    pub fn username(username: &str) -> StoreResult<Self> {
        Ok(Self::Username(validate_non_empty("username", username)?))
    }

    pub fn password(password: &str) -> StoreResult<Self> {
        Ok(Self::Password(Password::new(validate_non_empty(
            "password", password,
        )?)))
    }

    /// Re-check the payload; variants can also be built directly.
    pub(crate) fn validated(self) -> StoreResult<Self> {
        match self {
            Self::ServerPort { server, port } => Ok(Self::ServerPort {
                server: validate_server(&server)?,
                port: validate_port(i64::from(port))?,
            }),
            Self::Username(name) => Self::username(&name),
            Self::Password(password) => Self::password(password.expose()),
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            Self::ServerPort { .. } => "server_port",
            Self::Username(_) => "username",
            Self::Password(_) => "password",
        }
    }
}

/// Parse `"imap.example.com, 993"` (spaces around the comma optional).
pub fn parse_server_port(input: &str) -> StoreResult<(String, u16)> {
    let (server, port) = input.split_once(',').ok_or_else(|| {
        StoreError::validation(format!(
            "expected 'server, port' but got '{}'",
            input.trim()
        ))
    })?;

    let port = port.trim();
    let port = port
        .parse::<i64>()
        .map_err(|_| StoreError::validation(format!("'{}' is not a port number", port)))?;

    Ok((validate_server(server)?, validate_port(port)?))
}

fn validate_server(server: &str) -> StoreResult<String> {
    let server = server.trim();
    if server.is_empty() {
        return Err(StoreError::validation("server must not be empty"));
    }
    if server.chars().any(char::is_whitespace) {
        return Err(StoreError::validation(format!(
            "server '{}' contains whitespace",
            server
        )));
    }
    Ok(server.to_string())
}

fn validate_port(port: i64) -> StoreResult<u16> {
    match u16::try_from(port) {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(StoreError::validation(format!(
            "port {} is outside 1-65535",
            port
        ))),
    }
}

fn validate_non_empty(field: &str, value: &str) -> StoreResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(StoreError::validation(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}
