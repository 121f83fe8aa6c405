//! Application-wide constants for tuning and configuration
//!
//! Centralizes magic numbers to make them discoverable. Most of them are the
//! defaults behind a `config.toml` knob.

/// Seconds between two unread checks of the same mailbox.
pub const POLL_INTERVAL_SECS: u64 = 10;

/// Minimum seconds between two notifications for an unchanged unread count.
pub const MIN_NOTIFY_INTERVAL_SECS: u64 = 5;

/// Upper bound in seconds for a single IMAP round trip (connect, login,
/// select, search, fetch, store).
pub const OP_TIMEOUT_SECS: u64 = 30;

/// Transient poll failures in a row before a session is declared broken.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Connection attempts after the first one before a worker gives up.
pub const CONNECT_RETRIES: u32 = 3;

/// Initial delay before retrying a failed connection, in milliseconds.
pub const CONNECT_RETRY_INITIAL_MS: u64 = 1000;

/// Maximum retry delay in seconds for connection attempts.
pub const MAX_RETRY_DELAY_SECS: u64 = 30;

/// Notifications a worker may emit before it stops polling on its own.
pub const NOTIFICATION_BUDGET: i32 = 5;

/// How often the running poller re-reads the persisted last-active set to
/// notice logouts issued by another invocation.
pub const LOGOUT_CHECK_SECS: u64 = 5;

/// Default mailbox to watch.
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Busy timeout for SQLite writers waiting on another process, in seconds.
pub const DB_BUSY_TIMEOUT_SECS: u64 = 5;

/// Connection pool size. Workers hit the store at login, for the
/// acknowledgement lookup on every due notification and when a reaction
/// arrives. Those are short queries, so a handful of connections is plenty.
pub const DB_POOL_SIZE: u32 = 4;

/// Environment variable consulted for the password of a new account.
pub const ENV_PASSWORD: &str = "POPPER_PASSWORD";

/// Seconds a stopping worker waits for a reaction to a notification that is
/// still shown, when `notifications.timeout_ms` is unset.
pub const ACK_WAIT_SECS: u64 = 30;
