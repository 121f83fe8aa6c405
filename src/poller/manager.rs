use std::collections::HashSet;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::account::{Account, AccountId, AccountStore};

use super::worker::run_worker;
use super::{PollerDeps, WorkerExit, WorkerHandle};

/// Runs one polling worker per account
pub struct PollerManager {
    workers: Vec<(WorkerHandle, JoinHandle<WorkerExit>)>,
    /// Parent of every worker token; cancelling it stops everything
    root: CancellationToken,
    logout_watcher: Option<JoinHandle<()>>,
}

impl PollerManager {
    /// Spawn a worker for every account
    pub fn start(accounts: Vec<Account>, deps: PollerDeps) -> Self {
        let root = CancellationToken::new();

        let workers: Vec<_> = accounts
            .into_iter()
            .map(|account| Self::spawn_worker(account, deps.clone(), &root))
            .collect();

        tracing::info!("Started {} worker(s)", workers.len());

        let logout_watcher = deps.settings.logout_check.map(|every| {
            let handles = workers.iter().map(|(handle, _)| handle.clone()).collect();
            tokio::spawn(watch_logouts(deps.db.accounts(), handles, every, root.clone()))
        });

        Self {
            workers,
            root,
            logout_watcher,
        }
    }

    fn spawn_worker(
        account: Account,
        deps: PollerDeps,
        root: &CancellationToken,
    ) -> (WorkerHandle, JoinHandle<WorkerExit>) {
        let cancel = root.child_token();
        let handle = WorkerHandle::new(account.id, account.label(), cancel.clone());
        let task = tokio::spawn(run_worker(account, deps, cancel));
        (handle, task)
    }

    /// The stop switch of one account's worker
    #[cfg(test)]
    fn handle(&self, id: AccountId) -> Option<&WorkerHandle> {
        self.workers
            .iter()
            .map(|(handle, _)| handle)
            .find(|handle| handle.account_id == id)
    }

    #[cfg(test)]
    fn is_finished(&self, id: AccountId) -> bool {
        self.workers
            .iter()
            .any(|(handle, task)| handle.account_id == id && task.is_finished())
    }

    /// A token that stops every worker when cancelled, for signal handlers
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Wait for every worker to finish, in start order. Workers settle
    /// pending notification reactions before they finish.
    pub async fn wait(self) -> Vec<(AccountId, WorkerExit)> {
        let mut exits = Vec::with_capacity(self.workers.len());
        for (handle, task) in self.workers {
            let exit = match task.await {
                Ok(exit) => exit,
                Err(e) => WorkerExit::Aborted(e.to_string()),
            };
            exits.push((handle.account_id, exit));
        }

        self.root.cancel();
        if let Some(watcher) = self.logout_watcher {
            watcher.await.ok();
        }
        exits
    }
}

/// Stop workers whose account left the last-active set (another `popper
/// logout` ran). Ends when `root` is cancelled or every worker is stopped.
async fn watch_logouts(
    store: AccountStore,
    workers: Vec<WorkerHandle>,
    every: Duration,
    root: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = root.cancelled() => return,
            _ = tokio::time::sleep(every) => {}
        }

        let active: HashSet<AccountId> = match store.last_active().await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                tracing::warn!("Could not read logged-in accounts: {}", e);
                continue;
            }
        };

        for handle in &workers {
            if !active.contains(&handle.account_id) && !handle.is_stopped() {
                tracing::info!("Account {} was logged out", handle.account_id);
                handle.stop();
            }
        }

        if workers.iter().all(WorkerHandle::is_stopped) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::NewAccount;
    use crate::config::KeyScope;
    use crate::db::Db;
    use crate::mail::MailError;
    use crate::notify::UserAction;
    use crate::notify::testing::RecordingSink;
    use crate::poller::testing::{Script, StubConnector, deps, test_account};
    use std::sync::Arc;

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_budget_exhaustion_stops_worker() {
        let db = Db::open_in_memory().await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        // Count changes every poll, so every tick dispatches
        let connector = StubConnector::new().script(1, Script::counts(1..));
        let closed = connector.closed_flag(1);

        let manager = PollerManager::start(
            vec![test_account(1)],
            deps(&db, connector, sink.clone(), 2, KeyScope::None),
        );
        let exits = manager.wait().await;

        assert_eq!(exits, vec![(AccountId(1), WorkerExit::BudgetExhausted)]);
        assert_eq!(sink.count(), 3);
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connection_failure_is_isolated() {
        let db = Db::open_in_memory().await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let connector = StubConnector::new()
            .script(1, Script::refuse(MailError::Connection("refused".into())))
            .script(2, Script::counts(1..));
        let attempts = connector.open_attempts(1);

        let manager = PollerManager::start(
            vec![test_account(1), test_account(2)],
            deps(&db, connector, sink.clone(), 1, KeyScope::None),
        );
        let exits = manager.wait().await;

        assert!(matches!(
            exits[0],
            (AccountId(1), WorkerExit::Failed(MailError::Connection(_)))
        ));
        assert_eq!(exits[1], (AccountId(2), WorkerExit::BudgetExhausted));
        // first attempt plus the configured retry
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(
            sink.delivered
                .lock()
                .unwrap()
                .iter()
                .all(|n| n.title.ends_with("user2"))
        );
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let db = Db::open_in_memory().await.unwrap();
        let connector =
            StubConnector::new().script(1, Script::refuse(MailError::Auth("NO".into())));
        let attempts = connector.open_attempts(1);

        let manager = PollerManager::start(
            vec![test_account(1)],
            deps(&db, connector, Arc::new(RecordingSink::default()), 5, KeyScope::None),
        );
        let exits = manager.wait().await;

        assert!(matches!(exits[0].1, WorkerExit::Failed(MailError::Auth(_))));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_one_worker_leaves_others_running() {
        let db = Db::open_in_memory().await.unwrap();
        let connector = StubConnector::new()
            .script(1, Script::counts(std::iter::repeat(0)))
            .script(2, Script::counts(std::iter::repeat(0)));
        let closed = connector.closed_flag(1);
        let polls = connector.poll_count(1);

        let manager = PollerManager::start(
            vec![test_account(1), test_account(2)],
            deps(&db, connector, Arc::new(RecordingSink::default()), 5, KeyScope::None),
        );
        wait_until(|| polls.load(std::sync::atomic::Ordering::SeqCst) > 0).await;

        manager.handle(AccountId(1)).unwrap().stop();
        assert!(manager.handle(AccountId(9)).is_none());
        wait_until(|| manager.is_finished(AccountId(1))).await;

        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!manager.is_finished(AccountId(2)));

        manager.shutdown_token().cancel();
        let exits = manager.wait().await;
        assert_eq!(
            exits,
            vec![
                (AccountId(1), WorkerExit::Cancelled),
                (AccountId(2), WorkerExit::Cancelled),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_lets_running_poll_finish() {
        let db = Db::open_in_memory().await.unwrap();
        let connector = StubConnector::new()
            .script(1, Script::counts(std::iter::repeat(0)).slow(Duration::from_millis(100)));
        let started = connector.poll_count(1);
        let finished = connector.finished_polls(1);
        let closed = connector.closed_flag(1);

        let manager = PollerManager::start(
            vec![test_account(1)],
            deps(&db, connector, Arc::new(RecordingSink::default()), 5, KeyScope::None),
        );
        wait_until(|| started.load(std::sync::atomic::Ordering::SeqCst) == 1).await;

        manager.shutdown_token().cancel();
        let exits = manager.wait().await;

        assert_eq!(exits, vec![(AccountId(1), WorkerExit::Cancelled)]);
        assert_eq!(finished.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(started.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_repeated_protocol_errors_escalate() {
        let db = Db::open_in_memory().await.unwrap();
        let connector = StubConnector::new().script(
            1,
            Script::polls(std::iter::repeat_with(|| {
                Err(MailError::Protocol("BAD".into()))
            })),
        );
        let polls = connector.poll_count(1);

        let manager = PollerManager::start(
            vec![test_account(1)],
            deps(&db, connector, Arc::new(RecordingSink::default()), 5, KeyScope::None),
        );
        let exits = manager.wait().await;

        assert!(matches!(exits[0].1, WorkerExit::Failed(MailError::Protocol(_))));
        assert_eq!(polls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_logout_from_elsewhere_stops_worker() {
        let db = Db::open_in_memory().await.unwrap();
        let store = db.accounts();
        let id = store
            .create(&NewAccount::new("imap.example.com", 993, "user1", "pw").unwrap())
            .await
            .unwrap();
        store.record_last_active(&[id]).await.unwrap();

        let connector = StubConnector::new().script(id.0, Script::counts(std::iter::repeat(0)));
        let mut deps = deps(&db, connector, Arc::new(RecordingSink::default()), 5, KeyScope::None);
        deps.settings.logout_check = Some(Duration::from_millis(10));

        let manager = PollerManager::start(vec![store.get(id).await.unwrap()], deps);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!manager.is_finished(id));

        store.remove_last_active(id).await.unwrap();
        let exits = manager.wait().await;
        assert_eq!(exits, vec![(id, WorkerExit::Cancelled)]);

        // The worker stamped the login time when it connected
        assert!(store.get(id).await.unwrap().last_login.is_some());
    }

    #[tokio::test]
    async fn test_reaction_to_last_notification_is_kept() {
        let db = Db::open_in_memory().await.unwrap();
        let sink = Arc::new(RecordingSink::with_actions());
        let connector = StubConnector::new().script(1, Script::counts(std::iter::repeat(4)));

        // Budget 0: the first notification is also the last one
        let manager = PollerManager::start(
            vec![test_account(1)],
            deps(&db, connector, sink.clone(), 0, KeyScope::Account),
        );
        let waiting = tokio::spawn(manager.wait());

        wait_until(|| sink.count() == 1).await;
        sink.react(UserAction::Dismissed);

        let exits = waiting.await.unwrap();
        assert_eq!(exits, vec![(AccountId(1), WorkerExit::BudgetExhausted)]);

        // Stored by the time `wait` returns, before anyone closes the pool
        let record = db.acks().lookup("account:1").await.unwrap().unwrap();
        assert_eq!(record.action, UserAction::Dismissed);
    }

    #[tokio::test]
    async fn test_unanswered_last_notification_does_not_block_forever() {
        let db = Db::open_in_memory().await.unwrap();
        let sink = Arc::new(RecordingSink::with_actions());
        let connector = StubConnector::new().script(1, Script::counts(std::iter::repeat(4)));
        let mut deps = deps(&db, connector, sink.clone(), 0, KeyScope::Account);
        deps.settings.ack_wait = Duration::from_millis(20);

        let exits = PollerManager::start(vec![test_account(1)], deps).wait().await;

        assert_eq!(exits, vec![(AccountId(1), WorkerExit::BudgetExhausted)]);
        assert_eq!(sink.count(), 1);
        assert!(db.acks().lookup("account:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_reaction_is_recorded() {
        let db = Db::open_in_memory().await.unwrap();
        let sink = Arc::new(RecordingSink::with_actions());
        let connector = StubConnector::new().script(1, Script::counts(std::iter::repeat(4)));

        let manager = PollerManager::start(
            vec![test_account(1)],
            deps(&db, connector, sink.clone(), 50, KeyScope::Account),
        );

        wait_until(|| sink.count() == 1).await;
        sink.react(UserAction::Dismissed);

        let acks = db.acks();
        for _ in 0..500 {
            if acks.is_acknowledged("account:1", None).await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(acks.is_acknowledged("account:1", None).await.unwrap());

        // Later ticks are suppressed by the acknowledgement
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.count(), 1);

        manager.shutdown_token().cancel();
        manager.wait().await;
    }
}
