use tokio_util::sync::CancellationToken;

use crate::account::AccountId;

/// Stop switch for one account's worker. Cheap to clone; the manager keeps
/// the task itself.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub account_id: AccountId,
    /// Username and server, for log lines
    pub label: String,
    cancel: CancellationToken,
}

impl WorkerHandle {
    pub(super) fn new(account_id: AccountId, label: String, cancel: CancellationToken) -> Self {
        Self {
            account_id,
            label,
            cancel,
        }
    }

    /// Ask the worker to exit after its current network call.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Stopping worker for {}", self.label);
            self.cancel.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
