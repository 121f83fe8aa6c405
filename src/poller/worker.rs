//! One polling task per account.
//!
//! The worker:
//! 1. Opens a session, retrying connection failures with backoff
//! 2. Polls on a fixed interval
//! 3. Feeds every result through its `Throttle`
//! 4. Stops on cancellation, a fatal session error, or when the
//!    notification budget runs out

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::account::{Account, format_login};
use crate::config::Config;
use crate::constants::ACK_WAIT_SECS;
use crate::mail::{FailureTracker, MailError, PollResult, UnreadSource};
use crate::notify::throttle::Tick;
use crate::notify::{AckStore, NotificationKey, Throttle, TickOutcome, UserAction, settle_action};

use super::PollerDeps;
use super::retry::{RetryConfig, with_retry};

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    BudgetExhausted,
    Failed(MailError),
    /// The task panicked or was aborted.
    Aborted(String),
}

impl WorkerExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Aborted(_))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub interval: Duration,
    pub max_consecutive_failures: u32,
    pub retry: RetryConfig,
    pub launch_command: String,
    /// How often the manager re-reads the last-active set; `None` disables it.
    pub logout_check: Option<Duration>,
    /// How long a stopping worker waits for reactions to notifications that
    /// are still on screen.
    pub ack_wait: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll.interval(),
            max_consecutive_failures: config.poll.max_consecutive_failures,
            retry: RetryConfig::from_poll(&config.poll),
            launch_command: config.peer.launch_command.clone(),
            logout_check: Some(config.poll.logout_check_interval()),
            ack_wait: config
                .notifications
                .timeout_ms
                .map(|ms| Duration::from_millis(u64::from(ms)))
                .unwrap_or(Duration::from_secs(ACK_WAIT_SECS)),
        }
    }
}

pub(super) async fn run_worker(
    account: Account,
    deps: PollerDeps,
    cancel: CancellationToken,
) -> WorkerExit {
    let span = tracing::info_span!("worker", account = %account.id, user = %account.username);
    worker_loop(account, deps, cancel).instrument(span).await
}

async fn worker_loop(account: Account, deps: PollerDeps, cancel: CancellationToken) -> WorkerExit {
    let settings = &deps.settings;

    let connect = with_retry(&settings.retry, MailError::is_retryable_on_connect, || {
        deps.connector.open(&account)
    });
    let mut source = tokio::select! {
        _ = cancel.cancelled() => return WorkerExit::Cancelled,
        opened = connect => match opened {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("Could not open a session with {}: {}", account.server, e);
                return WorkerExit::Failed(e);
            }
        },
    };

    tracing::debug!("Previous login: {}", format_login(account.last_login));
    if let Err(e) = deps.db.accounts().touch_login(account.id).await {
        tracing::warn!("Failed to record login time: {}", e);
    }
    tracing::info!("Polling {} every {:?}", account.label(), settings.interval);

    let mut watchers = JoinSet::new();
    let exit = poll_loop(&account, &deps, &mut *source, &cancel, &mut watchers).await;

    source.close().await;
    settle_pending(&mut watchers, settings.ack_wait, &cancel).await;
    tracing::info!("Worker stopped: {:?}", exit);
    exit
}

/// Give notifications still on screen a bounded chance to be answered, so a
/// reaction to the last one is stored before the database closes.
async fn settle_pending(
    watchers: &mut JoinSet<()>,
    limit: Duration,
    cancel: &CancellationToken,
) {
    if watchers.is_empty() {
        return;
    }
    tracing::debug!(
        "Waiting up to {:?} for {} pending reaction(s)",
        limit,
        watchers.len()
    );

    let drain = async { while watchers.join_next().await.is_some() {} };
    tokio::select! {
        _ = cancel.cancelled() => {}
        drained = tokio::time::timeout(limit, drain) => {
            if drained.is_err() {
                tracing::debug!("No reaction in time");
            }
        }
    }
    watchers.abort_all();
}

async fn poll_loop(
    account: &Account,
    deps: &PollerDeps,
    source: &mut dyn UnreadSource,
    cancel: &CancellationToken,
    watchers: &mut JoinSet<()>,
) -> WorkerExit {
    let settings = &deps.settings;
    let mut throttle = Throttle::new(account, deps.policy.clone(), deps.sink.clone(), deps.db.acks());
    let mut tracker = FailureTracker::new(settings.max_consecutive_failures);
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<UserAction>();

    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return WorkerExit::Cancelled,
            Some(action) = ack_rx.recv() => {
                tracing::debug!("User reacted: {}", action.as_str());
                throttle.note_acknowledged();
                continue;
            }
            _ = ticker.tick() => {}
        }

        // Bounded by the session's op timeout; stop only once it returned
        let polled = source.poll_unread().await;
        if cancel.is_cancelled() {
            return WorkerExit::Cancelled;
        }
        while watchers.try_join_next().is_some() {}

        let unread = match tracker.classify(polled) {
            PollResult::Unread(count) => {
                tracing::debug!("{} unread", count);
                Some(count)
            }
            PollResult::Transient(e) => {
                tracing::warn!(
                    "Poll failed ({} in a row): {}",
                    tracker.consecutive(),
                    e
                );
                None
            }
            PollResult::Fatal(e) => {
                tracing::error!("Giving up on {}: {}", account.server, e);
                return WorkerExit::Failed(e);
            }
        };

        let peer_open = deps.probe.is_running().await;
        let tick = Tick {
            unread,
            peer_open,
            now: Instant::now(),
        };

        match throttle.on_tick(tick).await {
            TickOutcome::Dispatched {
                count,
                key,
                terminal,
                action,
            } => {
                tracing::info!("Notified about {} unread email(s)", count);
                if let Some(rx) = action {
                    spawn_ack_watcher(
                        watchers,
                        rx,
                        key,
                        deps.db.acks(),
                        settings.launch_command.clone(),
                        ack_tx.clone(),
                    );
                }
                if terminal {
                    tracing::info!("Notification budget used up");
                    return WorkerExit::BudgetExhausted;
                }
            }
            TickOutcome::Suppressed => tracing::debug!("Already acknowledged"),
            TickOutcome::SinkFailed(e) => tracing::warn!("Notification failed: {}", e),
            TickOutcome::Skipped | TickOutcome::Transient => {}
        }
    }
}

/// Wait for the user's reaction in the background, persist it, then tell
/// the worker.
fn spawn_ack_watcher(
    watchers: &mut JoinSet<()>,
    rx: oneshot::Receiver<UserAction>,
    key: NotificationKey,
    acks: AckStore,
    launch_command: String,
    worker: mpsc::UnboundedSender<UserAction>,
) {
    watchers.spawn(
        async move {
            // A dropped sender means the notification went away unanswered.
            let Ok(action) = rx.await else { return };
            settle_action(&acks, &key, action, &launch_command).await;
            let _ = worker.send(action);
        }
        .in_current_span(),
    );
}
