//! Freedesktop notifications with "open" / "dismiss" actions.

use async_trait::async_trait;

use super::sink::{Delivery, NotificationSink, SinkError};
use super::Notice;

#[cfg(all(feature = "notifications", unix, not(target_os = "macos")))]
use super::UserAction;

#[cfg(all(feature = "notifications", unix, not(target_os = "macos")))]
const ACTION_OPEN: &str = "open";
#[cfg(all(feature = "notifications", unix, not(target_os = "macos")))]
const ACTION_DISMISS: &str = "dismiss";

pub struct DesktopSink {
    #[cfg_attr(
        not(all(feature = "notifications", unix, not(target_os = "macos"))),
        allow(dead_code)
    )]
    app_name: String,
}

impl DesktopSink {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

#[cfg(all(feature = "notifications", unix, not(target_os = "macos")))]
fn action_from_id(id: &str) -> UserAction {
    match id {
        ACTION_OPEN => UserAction::OpenedClient,
        ACTION_DISMISS => UserAction::Dismissed,
        // "__closed" and anything the daemon invents
        _ => UserAction::Closed,
    }
}

#[cfg(all(feature = "notifications", unix, not(target_os = "macos")))]
#[async_trait]
impl NotificationSink for DesktopSink {
    fn name(&self) -> &'static str {
        "desktop"
    }

    async fn deliver(&self, notice: &Notice) -> Result<Delivery, SinkError> {
        use notify_rust::{Hint, Notification, Timeout};
        use tokio::sync::oneshot;

        let mut notification = Notification::new();
        notification
            .summary(&notice.title)
            .body(&notice.body)
            .appname(&self.app_name)
            .icon("mail-unread")
            .action(ACTION_OPEN, "Open mail client")
            .action(ACTION_DISMISS, "Dismiss")
            .hint(Hint::Category("email.arrived".to_string()));

        if let Some(ms) = notice.timeout_ms {
            notification.timeout(Timeout::Milliseconds(ms));
        }

        let (shown_tx, shown_rx) = oneshot::channel();
        let (action_tx, action_rx) = oneshot::channel();

        // show() and wait_for_action() both block on D-Bus; the waiting thread
        // lives until the notification is answered or closed.
        std::thread::Builder::new()
            .name("notification".to_string())
            .spawn(move || match notification.show() {
                Ok(handle) => {
                    let _ = shown_tx.send(Ok(()));
                    handle.wait_for_action(|id| {
                        let _ = action_tx.send(action_from_id(id));
                    });
                }
                Err(e) => {
                    let _ = shown_tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| SinkError::Delivery(e.to_string()))?;

        match shown_rx.await {
            Ok(Ok(())) => Ok(Delivery {
                action: Some(action_rx),
            }),
            Ok(Err(e)) => Err(SinkError::Unavailable(format!("notification daemon ({})", e))),
            Err(_) => Err(SinkError::Delivery("notification thread exited".to_string())),
        }
    }
}

#[cfg(not(all(feature = "notifications", unix, not(target_os = "macos"))))]
#[async_trait]
impl NotificationSink for DesktopSink {
    fn name(&self) -> &'static str {
        "desktop"
    }

    async fn deliver(&self, _notice: &Notice) -> Result<Delivery, SinkError> {
        Err(SinkError::Unavailable("desktop notifications".to_string()))
    }
}

#[cfg(all(test, feature = "notifications", unix, not(target_os = "macos")))]
mod tests {
    use super::*;

    #[test]
    fn test_action_mapping() {
        assert_eq!(action_from_id("open"), UserAction::OpenedClient);
        assert_eq!(action_from_id("dismiss"), UserAction::Dismissed);
        assert_eq!(action_from_id("__closed"), UserAction::Closed);
        assert_eq!(action_from_id("default"), UserAction::Closed);
    }
}
