use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    CONNECT_RETRIES, DEFAULT_MAILBOX, LOGOUT_CHECK_SECS, MAX_CONSECUTIVE_FAILURES,
    MIN_NOTIFY_INTERVAL_SECS, NOTIFICATION_BUDGET, OP_TIMEOUT_SECS, POLL_INTERVAL_SECS,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub poll: PollConfig,
    /// Desktop notification settings
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// The user's own mail client
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Minimum gap between two pop-ups announcing the same unread count
    #[serde(default = "default_min_notify_interval_secs")]
    pub min_notify_interval_secs: u64,
    /// Timeout applied to every single IMAP operation
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    /// Mark unseen messages as seen while counting them. When disabled the
    /// mailbox is examined read-only and counting has no side effects.
    #[serde(default = "default_true")]
    pub mark_seen: bool,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_logout_check_secs")]
    pub logout_check_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            min_notify_interval_secs: default_min_notify_interval_secs(),
            op_timeout_secs: default_op_timeout_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
            connect_retries: default_connect_retries(),
            mark_seen: true,
            mailbox: default_mailbox(),
            logout_check_secs: default_logout_check_secs(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs.max(1))
    }

    pub fn min_notify_interval(&self) -> Duration {
        Duration::from_secs(self.min_notify_interval_secs)
    }

    pub fn logout_check_interval(&self) -> Duration {
        Duration::from_secs(self.logout_check_secs.max(1))
    }
}

/// How notifications are keyed for acknowledgement lookups
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyScope {
    /// Never acknowledged, always re-notify
    None,
    /// One key per account: dismissing silences the account until cleared
    Account,
    /// One key per account and message text: a new unread count is a new notice
    #[default]
    Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Enable desktop notifications for new mail
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Notifications a worker may emit before it stops polling
    #[serde(default = "default_budget")]
    pub budget: i32,
    #[serde(default)]
    pub key_scope: KeyScope,
    /// Acknowledgements older than this no longer suppress notifications
    /// (None = they stay valid until cleared)
    #[serde(default)]
    pub ack_ttl_secs: Option<u64>,
    /// Pop-up timeout in milliseconds (None = notification server default)
    #[serde(default)]
    pub timeout_ms: Option<u32>,
    /// Plain alert command used when the rich notifier is unavailable
    #[serde(default = "default_fallback_command")]
    pub fallback_command: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: default_app_name(),
            budget: default_budget(),
            key_scope: KeyScope::default(),
            ack_ttl_secs: None,
            timeout_ms: None,
            fallback_command: default_fallback_command(),
        }
    }
}

impl NotificationConfig {
    pub fn ack_ttl(&self) -> Option<Duration> {
        self.ack_ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Process name looked up to decide whether the mail client is running
    #[serde(default = "default_peer_process")]
    pub process_name: String,
    /// Command started by the "Open mail client" action. Empty means the
    /// system's default `mailto:` handler.
    #[serde(default = "default_peer_process")]
    pub launch_command: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            process_name: default_peer_process(),
            launch_command: default_peer_process(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file (default: `<data dir>/popper/popper.db`)
    #[serde(default)]
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log file; logs go to stderr when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    POLL_INTERVAL_SECS
}

fn default_min_notify_interval_secs() -> u64 {
    MIN_NOTIFY_INTERVAL_SECS
}

fn default_op_timeout_secs() -> u64 {
    OP_TIMEOUT_SECS
}

fn default_max_consecutive_failures() -> u32 {
    MAX_CONSECUTIVE_FAILURES
}

fn default_connect_retries() -> u32 {
    CONNECT_RETRIES
}

fn default_mailbox() -> String {
    DEFAULT_MAILBOX.to_string()
}

fn default_logout_check_secs() -> u64 {
    LOGOUT_CHECK_SECS
}

fn default_app_name() -> String {
    "Popper".to_string()
}

fn default_budget() -> i32 {
    NOTIFICATION_BUDGET
}

fn default_fallback_command() -> String {
    "notify-send".to_string()
}

fn default_peer_process() -> String {
    "thunderbird".to_string()
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("popper");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let dir = dirs::data_local_dir()
            .context("Could not find data directory")?
            .join("popper");
        Ok(dir)
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.database {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("popper.db")),
        }
    }

    /// Load the configuration file, falling back to defaults when it does
    /// not exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let db_path = self.database_path()?;
        if let Some(dir) = db_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.poll.interval_secs, POLL_INTERVAL_SECS);
        assert_eq!(config.poll.mailbox, "INBOX");
        assert!(config.poll.mark_seen);
        assert!(config.notifications.enabled);
        assert_eq!(config.notifications.budget, NOTIFICATION_BUDGET);
        assert_eq!(config.notifications.key_scope, KeyScope::Message);
        assert_eq!(config.peer.process_name, "thunderbird");
        assert!(config.storage.database.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [poll]
            interval_secs = 30
            mark_seen = false
            mailbox = "Work"

            [notifications]
            app_name = "Mail"
            budget = 3
            key_scope = "account"
            ack_ttl_secs = 3600

            [peer]
            process_name = "evolution"
            launch_command = ""

            [storage]
            database = "/tmp/popper-test.db"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.poll.interval_secs, 30);
        assert!(!config.poll.mark_seen);
        assert_eq!(config.poll.mailbox, "Work");
        // Untouched keys keep their defaults
        assert_eq!(config.poll.op_timeout_secs, OP_TIMEOUT_SECS);
        assert_eq!(config.notifications.app_name, "Mail");
        assert_eq!(config.notifications.budget, 3);
        assert_eq!(config.notifications.key_scope, KeyScope::Account);
        assert_eq!(
            config.notifications.ack_ttl(),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(config.peer.process_name, "evolution");
        assert!(config.peer.launch_command.is_empty());
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/popper-test.db")
        );
    }

    #[test]
    fn test_key_scope_none_parses() {
        let config: Config = toml::from_str("[notifications]\nkey_scope = \"none\"").unwrap();
        assert_eq!(config.notifications.key_scope, KeyScope::None);
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let poll = PollConfig {
            interval_secs: 0,
            op_timeout_secs: 0,
            ..PollConfig::default()
        };
        assert_eq!(poll.interval(), Duration::from_secs(1));
        assert_eq!(poll.op_timeout(), Duration::from_secs(1));
    }
}
