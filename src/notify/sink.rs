use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use super::{Notice, UserAction};

#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink can't run here (no notification daemon, missing binary).
    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// A shown notification.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Resolves once the user reacts. `None` when the sink can't report back.
    pub action: Option<oneshot::Receiver<UserAction>>,
}

impl Delivery {
    pub fn fire_and_forget() -> Self {
        Self { action: None }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, notice: &Notice) -> Result<Delivery, SinkError>;
}

/// Tries each sink in order, falling back on any error.
pub struct SinkChain {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl SinkChain {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for SinkChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn deliver(&self, notice: &Notice) -> Result<Delivery, SinkError> {
        let mut last_err = SinkError::Unavailable("notification sink".to_string());

        for sink in &self.sinks {
            match sink.deliver(notice).await {
                Ok(delivery) => return Ok(delivery),
                Err(e) => {
                    tracing::debug!("{} sink failed, trying next: {}", sink.name(), e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}

/// Writes notices to the log. Used when desktop notifications are disabled.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, notice: &Notice) -> Result<Delivery, SinkError> {
        tracing::info!("{}: {}", notice.title, notice.body);
        Ok(Delivery::fire_and_forget())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::notify::NotificationKey;
    use std::sync::Arc;

    fn notice() -> Notice {
        Notice {
            title: "Popper: me".to_string(),
            body: "You have 1 unread email(s)!".to_string(),
            key: NotificationKey::Unkeyed,
            timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn test_chain_falls_back() {
        let primary = Arc::new(RecordingSink::default());
        primary.set_failing(true);
        let fallback = Arc::new(RecordingSink::default());

        let chain = SinkChain::new(vec![Box::new(primary.clone()), Box::new(fallback.clone())]);
        chain.deliver(&notice()).await.unwrap();

        assert_eq!(primary.count(), 0);
        assert_eq!(fallback.count(), 1);
    }

    #[tokio::test]
    async fn test_chain_reports_last_error() {
        let only = Arc::new(RecordingSink::default());
        only.set_failing(true);

        let chain = SinkChain::new(vec![Box::new(only)]);
        let err = chain.deliver(&notice()).await.unwrap_err();
        assert!(matches!(err, SinkError::Delivery(_)));

        let empty = SinkChain::new(Vec::new());
        assert!(matches!(
            empty.deliver(&notice()).await,
            Err(SinkError::Unavailable(_))
        ));
    }
}
