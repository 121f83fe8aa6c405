//! Desktop notifications: sinks, throttling and acknowledgements.

mod ack;
mod announce;
mod command;
mod desktop;
mod peer;
mod sink;
pub mod throttle;

use std::sync::Arc;

use crate::account::AccountId;
use crate::config::{KeyScope, NotificationConfig};

pub use ack::AckStore;
pub use announce::{AnnounceOptions, AnnounceOutcome, announce};
pub use command::CommandSink;
pub use desktop::DesktopSink;
pub use peer::{PeerProbe, ProcessProbe, launch_client};
pub use sink::{LogSink, NotificationSink, SinkChain};
pub use throttle::{Throttle, ThrottlePolicy, TickOutcome};

#[cfg(test)]
pub(crate) use sink::testing;

/// How the user reacted to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    OpenedClient,
    Dismissed,
    /// Closed or expired without choosing an action
    Closed,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenedClient => "opened",
            Self::Dismissed => "dismissed",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opened" => Some(Self::OpenedClient),
            "dismissed" => Some(Self::Dismissed),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Identity under which acknowledgements are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKey {
    /// Never acknowledged, always re-notified.
    Unkeyed,
    Keyed(String),
}

impl NotificationKey {
    pub fn for_account(scope: KeyScope, id: AccountId, body: &str) -> Self {
        match scope {
            KeyScope::None => Self::Unkeyed,
            KeyScope::Account => Self::Keyed(format!("account:{}", id)),
            KeyScope::Message => Self::Keyed(format!("account:{}:{}", id, body)),
        }
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Unkeyed => None,
            Self::Keyed(key) => Some(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
    pub key: NotificationKey,
    /// Expiry hint for the notification daemon
    pub timeout_ms: Option<u32>,
}

pub fn unread_body(count: usize) -> String {
    format!("You have {} unread email(s)!", count)
}

/// Desktop pop-ups with the configured command as fallback, or the log when
/// notifications are disabled.
pub fn build_sink(config: &NotificationConfig) -> Arc<dyn NotificationSink> {
    if !config.enabled {
        return Arc::new(LogSink);
    }

    Arc::new(SinkChain::new(vec![
        Box::new(DesktopSink::new(&config.app_name)),
        Box::new(CommandSink::new(&config.fallback_command, &config.app_name)),
    ]))
}

/// Record the user's reaction and open the mail client if they asked for it.
pub async fn settle_action(
    acks: &AckStore,
    key: &NotificationKey,
    action: UserAction,
    launch_command: &str,
) {
    if let Some(key) = key.as_key() {
        if let Err(e) = acks.record(key, action).await {
            tracing::warn!("Failed to record acknowledgement for {}: {}", key, e);
        }
    }

    if action == UserAction::OpenedClient {
        if let Err(e) = launch_client(launch_command).await {
            tracing::warn!("Failed to launch mail client: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn test_key_scopes() {
        let body = unread_body(3);
        assert_eq!(body, "You have 3 unread email(s)!");

        assert_eq!(
            NotificationKey::for_account(KeyScope::None, AccountId(2), &body),
            NotificationKey::Unkeyed
        );
        assert_eq!(
            NotificationKey::for_account(KeyScope::Account, AccountId(2), &body).as_key(),
            Some("account:2")
        );
        assert_eq!(
            NotificationKey::for_account(KeyScope::Message, AccountId(2), &body).as_key(),
            Some("account:2:You have 3 unread email(s)!")
        );
    }

    #[test]
    fn test_action_names() {
        for action in [
            UserAction::OpenedClient,
            UserAction::Dismissed,
            UserAction::Closed,
        ] {
            assert_eq!(UserAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(UserAction::parse("snoozed"), None);
    }

    #[tokio::test]
    async fn test_disabled_notifications_go_to_the_log() {
        let config = NotificationConfig {
            enabled: false,
            ..NotificationConfig::default()
        };
        let sink = build_sink(&config);
        assert_eq!(sink.name(), "log");

        let notice = Notice {
            title: "Popper: me".to_string(),
            body: unread_body(1),
            key: NotificationKey::Unkeyed,
            timeout_ms: None,
        };
        assert!(sink.deliver(&notice).await.unwrap().action.is_none());
        assert_eq!(build_sink(&NotificationConfig::default()).name(), "chain");
    }

    #[tokio::test]
    async fn test_settle_records_keyed_dismissal() {
        let db = Db::open_in_memory().await.unwrap();
        let acks = db.acks();

        let key = NotificationKey::Keyed("account:1".to_string());
        settle_action(&acks, &key, UserAction::Dismissed, "true").await;
        assert!(acks.is_acknowledged("account:1", None).await.unwrap());

        settle_action(&acks, &NotificationKey::Unkeyed, UserAction::Dismissed, "true").await;
        assert_eq!(acks.clear_all().await.unwrap(), 1);
    }
}
