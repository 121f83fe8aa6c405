mod error;
mod session;

use async_trait::async_trait;

use crate::account::Account;

pub use error::MailError;
pub use session::{ImapConnector, SessionOptions};

/// An open session that can count unread mail.
#[async_trait]
pub trait UnreadSource: Send {
    async fn poll_unread(&mut self) -> Result<usize, MailError>;

    /// Release the session. Must not fail and may be called more than once.
    async fn close(&mut self);
}

/// Opens an [`UnreadSource`] for an account.
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn open(&self, account: &Account) -> Result<Box<dyn UnreadSource>, MailError>;
}

/// A poll outcome after failure accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Unread(usize),
    /// The tick failed but the session may recover.
    Transient(MailError),
    /// The session is unusable and the account's worker should stop.
    Fatal(MailError),
}

/// Escalates a run of transient poll failures to a fatal one.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive: u32,
    limit: u32,
}

impl FailureTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit: limit.max(1),
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn classify(&mut self, result: Result<usize, MailError>) -> PollResult {
        match result {
            Ok(count) => {
                self.consecutive = 0;
                PollResult::Unread(count)
            }
            Err(e) if e.is_transient() => {
                self.consecutive += 1;
                if self.consecutive >= self.limit {
                    PollResult::Fatal(e)
                } else {
                    PollResult::Transient(e)
                }
            }
            Err(e) => PollResult::Fatal(e),
        }
    }
}
