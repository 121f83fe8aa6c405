//! Stand-alone notification used by `popper notify`.
//!
//! The notice goes through a [`Throttle`] like unread-mail notices do, with
//! a constant count of one: it is re-shown every `interval` until the budget
//! runs out, and shown only once while the mail client is running.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::KeyScope;

use super::sink::{NotificationSink, SinkError};
use super::throttle::{Throttle, ThrottlePolicy, Tick, TickOutcome};
use super::{AckStore, Notice, PeerProbe, UserAction, settle_action};

#[derive(Debug, Clone)]
pub struct AnnounceOptions {
    /// Same meaning as `notifications.budget`: up to `budget + 1` showings
    pub budget: i32,
    /// Gap between two showings while nobody reacts
    pub interval: Duration,
    pub ack_ttl: Option<Duration>,
    pub launch_command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    AlreadyAcknowledged,
    Answered(UserAction),
    /// Shown, but the user never reacted.
    Unanswered { shown: u32 },
}

/// Show `notice` until the user reacts, the budget is used up, or the mail
/// client turns out to be running (then it is shown just once).
pub async fn announce(
    sink: Arc<dyn NotificationSink>,
    acks: &AckStore,
    peer: &dyn PeerProbe,
    notice: &Notice,
    options: &AnnounceOptions,
) -> Result<AnnounceOutcome, SinkError> {
    let policy = ThrottlePolicy {
        min_interval: Duration::ZERO,
        budget: options.budget,
        key_scope: KeyScope::Message,
        ack_ttl: options.ack_ttl,
        app_name: notice.title.clone(),
        timeout_ms: notice.timeout_ms,
    };
    let mut throttle = Throttle::for_message(notice.clone(), policy, sink, acks.clone());
    let mut shown = 0;

    loop {
        let tick = Tick {
            unread: Some(1),
            peer_open: peer.is_running().await,
            now: Instant::now(),
        };

        match throttle.on_tick(tick).await {
            TickOutcome::Dispatched {
                key,
                terminal,
                action,
                ..
            } => {
                shown += 1;
                tracing::debug!("Shown {} time(s): {}", shown, notice.body);

                match action {
                    Some(rx) => {
                        if let Ok(Ok(action)) = tokio::time::timeout(options.interval, rx).await {
                            settle_action(acks, &key, action, &options.launch_command).await;
                            return Ok(AnnounceOutcome::Answered(action));
                        }
                    }
                    None if !terminal => tokio::time::sleep(options.interval).await,
                    None => {}
                }

                if terminal {
                    break;
                }
            }
            TickOutcome::Suppressed if shown == 0 => {
                return Ok(AnnounceOutcome::AlreadyAcknowledged);
            }
            // Another process recorded an answer meanwhile
            TickOutcome::Suppressed => break,
            TickOutcome::Skipped => {
                tracing::debug!("Mail client is running, not repeating");
                break;
            }
            TickOutcome::SinkFailed(e) => return Err(e),
            TickOutcome::Transient => break,
        }
    }

    Ok(AnnounceOutcome::Unanswered { shown })
}
