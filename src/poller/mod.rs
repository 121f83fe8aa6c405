//! Polling orchestrator: one worker task per logged-in account.

mod handle;
mod manager;
mod retry;
mod worker;

use std::sync::Arc;

use crate::config::Config;
use crate::db::Db;
use crate::mail::{ImapConnector, MailConnector, SessionOptions};
use crate::notify::{NotificationSink, PeerProbe, ProcessProbe, ThrottlePolicy, build_sink};

pub use handle::WorkerHandle;
pub use manager::PollerManager;
pub use worker::{WorkerExit, WorkerSettings};

/// Everything a worker needs besides its account. Cheap to clone.
#[derive(Clone)]
pub struct PollerDeps {
    pub connector: Arc<dyn MailConnector>,
    pub sink: Arc<dyn NotificationSink>,
    pub probe: Arc<dyn PeerProbe>,
    pub db: Db,
    pub policy: ThrottlePolicy,
    pub settings: WorkerSettings,
}

impl PollerDeps {
    pub fn from_config(config: &Config, db: Db) -> Self {
        Self {
            connector: Arc::new(ImapConnector::new(SessionOptions::from(&config.poll))),
            sink: build_sink(&config.notifications),
            probe: Arc::new(ProcessProbe::new(&config.peer.process_name)),
            db,
            policy: ThrottlePolicy::from_config(&config.poll, &config.notifications),
            settings: WorkerSettings::from_config(config),
        }
    }
}
