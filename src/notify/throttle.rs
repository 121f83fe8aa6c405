//! Per-account notification throttling.
//!
//! [`decide`] is the pure rule; [`Throttle`] owns the state, checks the
//! acknowledgement store and talks to the sink.
//!
//! A tick only dispatches when there is unread mail. While the user's mail
//! client is open, we notify once per "client seen open" period; while it's
//! closed, we notify when the count changed or `min_interval` has passed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::account::Account;
use crate::account::AccountId;
use crate::config::{KeyScope, NotificationConfig, PollConfig};

use super::sink::{NotificationSink, SinkError};
use super::{AckStore, Notice, NotificationKey, UserAction, unread_body};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationState {
    pub last_count: usize,
    pub last_notify_time: Option<Instant>,
    /// Dispatches left; negative once the last one has gone out.
    pub remaining_budget: i32,
    pub peer_client_open: bool,
    /// Set when we've already notified during the current "client open" period.
    pub peer_seen_once: bool,
}

impl NotificationState {
    pub fn new(budget: i32) -> Self {
        Self {
            last_count: 0,
            last_notify_time: None,
            remaining_budget: budget,
            peer_client_open: false,
            peer_seen_once: false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_budget < 0
    }

    /// Fold in a successful poll observation.
    fn observe(&mut self, count: usize, peer_open: bool) {
        self.last_count = count;
        self.peer_client_open = peer_open;
        if !peer_open {
            self.peer_seen_once = false;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    pub min_interval: Duration,
    pub budget: i32,
    pub key_scope: KeyScope,
    pub ack_ttl: Option<Duration>,
    pub app_name: String,
    pub timeout_ms: Option<u32>,
}

impl ThrottlePolicy {
    pub fn from_config(poll: &PollConfig, notifications: &NotificationConfig) -> Self {
        Self {
            min_interval: poll.min_notify_interval(),
            budget: notifications.budget,
            key_scope: notifications.key_scope,
            ack_ttl: notifications.ack_ttl(),
            app_name: notifications.app_name.clone(),
            timeout_ms: notifications.timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// `None` when the poll failed.
    pub unread: Option<usize>,
    pub peer_open: bool,
    pub now: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Failed poll: leave everything alone.
    Ignore,
    /// Record the observation without notifying.
    Hold,
    Dispatch,
}

pub fn decide(state: &NotificationState, policy: &ThrottlePolicy, tick: &Tick) -> Decision {
    let Some(count) = tick.unread else {
        return Decision::Ignore;
    };
    if count == 0 {
        return Decision::Hold;
    }

    let due = if tick.peer_open {
        !state.peer_seen_once
    } else {
        let elapsed_enough = state
            .last_notify_time
            .is_none_or(|at| tick.now.duration_since(at) > policy.min_interval);
        elapsed_enough || count != state.last_count
    };

    if due { Decision::Dispatch } else { Decision::Hold }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// The poll failed; nothing changed.
    Transient,
    /// Nothing to announce.
    Skipped,
    /// Due, but the user already acknowledged this notification.
    Suppressed,
    Dispatched {
        count: usize,
        key: NotificationKey,
        /// The budget went negative with this dispatch.
        terminal: bool,
        action: Option<oneshot::Receiver<UserAction>>,
    },
    SinkFailed(SinkError),
}

/// What a throttle notifies about.
enum Subject {
    /// Unread mail of one account; the notice follows the count.
    Account { id: AccountId, username: String },
    /// One fixed message, as shown by `popper notify`.
    Message(Notice),
}

pub struct Throttle {
    state: NotificationState,
    policy: ThrottlePolicy,
    subject: Subject,
    sink: Arc<dyn NotificationSink>,
    acks: AckStore,
}

impl Throttle {
    pub fn new(
        account: &Account,
        policy: ThrottlePolicy,
        sink: Arc<dyn NotificationSink>,
        acks: AckStore,
    ) -> Self {
        Self {
            state: NotificationState::new(policy.budget),
            policy,
            subject: Subject::Account {
                id: account.id,
                username: account.username.clone(),
            },
            sink,
            acks,
        }
    }

    /// Throttle a single fixed notice instead of an unread count.
    pub fn for_message(
        notice: Notice,
        policy: ThrottlePolicy,
        sink: Arc<dyn NotificationSink>,
        acks: AckStore,
    ) -> Self {
        Self {
            state: NotificationState::new(policy.budget),
            policy,
            subject: Subject::Message(notice),
            sink,
            acks,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &NotificationState {
        &self.state
    }

    pub fn notice_for(&self, count: usize) -> Notice {
        match &self.subject {
            Subject::Account { id, username } => {
                let body = unread_body(count);
                Notice {
                    title: format!("{}: {}", self.policy.app_name, username),
                    key: NotificationKey::for_account(self.policy.key_scope, *id, &body),
                    body,
                    timeout_ms: self.policy.timeout_ms,
                }
            }
            Subject::Message(notice) => notice.clone(),
        }
    }

    /// The user answered a notification; don't nag again this peer period.
    pub fn note_acknowledged(&mut self) {
        self.state.peer_seen_once = true;
    }

    pub async fn on_tick(&mut self, tick: Tick) -> TickOutcome {
        let decision = decide(&self.state, &self.policy, &tick);
        let Some(count) = tick.unread else {
            return TickOutcome::Transient;
        };

        if decision == Decision::Hold {
            self.state.observe(count, tick.peer_open);
            return TickOutcome::Skipped;
        }

        let notice = self.notice_for(count);

        if let Some(key) = notice.key.as_key() {
            match self.acks.is_acknowledged(key, self.policy.ack_ttl).await {
                Ok(true) => {
                    tracing::debug!("{} already acknowledged, not notifying", key);
                    self.state.observe(count, tick.peer_open);
                    if tick.peer_open {
                        self.state.peer_seen_once = true;
                    }
                    return TickOutcome::Suppressed;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Acknowledgement lookup failed for {}: {}", key, e),
            }
        }

        let delivery = match self.sink.deliver(&notice).await {
            Ok(delivery) => delivery,
            Err(e) => return TickOutcome::SinkFailed(e),
        };

        self.state.remaining_budget -= 1;
        self.state.last_notify_time = Some(tick.now);
        self.state.observe(count, tick.peer_open);
        if tick.peer_open {
            self.state.peer_seen_once = true;
        }

        TickOutcome::Dispatched {
            count,
            key: notice.key,
            terminal: self.state.is_exhausted(),
            action: delivery.action,
        }
    }
}
