use async_trait::async_trait;
use std::io::ErrorKind;
use tokio::process::Command;

use super::sink::{Delivery, NotificationSink, SinkError};
use super::Notice;

/// Shells out to a `notify-send` compatible command. Can't report actions.
pub struct CommandSink {
    program: String,
    app_name: String,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            app_name: app_name.into(),
        }
    }

    fn command(&self, notice: &Notice) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--app-name").arg(&self.app_name);
        if let Some(ms) = notice.timeout_ms {
            cmd.arg("--expire-time").arg(ms.to_string());
        }
        cmd.arg(&notice.title).arg(&notice.body);
        cmd
    }
}

#[async_trait]
impl NotificationSink for CommandSink {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn deliver(&self, notice: &Notice) -> Result<Delivery, SinkError> {
        if self.program.trim().is_empty() {
            return Err(SinkError::Unavailable("fallback command".to_string()));
        }

        let status = self.command(notice).status().await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SinkError::Unavailable(self.program.clone())
            } else {
                SinkError::Delivery(format!("{}: {}", self.program, e))
            }
        })?;

        if !status.success() {
            return Err(SinkError::Delivery(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(Delivery::fire_and_forget())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::notify::NotificationKey;

    fn notice() -> Notice {
        Notice {
            title: "Popper: me".to_string(),
            body: "You have 2 unread email(s)!".to_string(),
            key: NotificationKey::Unkeyed,
            timeout_ms: Some(5000),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let sink = CommandSink::new("popper-no-such-notifier", "Popper");
        assert!(matches!(
            sink.deliver(&notice()).await,
            Err(SinkError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_exit_status_is_checked() {
        // `true` and `false` ignore their arguments
        let ok = CommandSink::new("true", "Popper");
        assert!(ok.deliver(&notice()).await.unwrap().action.is_none());

        let failing = CommandSink::new("false", "Popper");
        assert!(matches!(
            failing.deliver(&notice()).await,
            Err(SinkError::Delivery(_))
        ));
    }
}
