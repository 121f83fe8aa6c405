//! IMAP session: connect, authenticate, select, count unread.
//!
//! The session walks `Connection` -> `Authenticated` -> `MailerSession`; each
//! step consumes the previous one so a session can't poll before it has
//! selected a mailbox. There is no reconnect logic here, the poller owns that.

use async_trait::async_trait;
use futures::TryStreamExt;
use rustls::pki_types::ServerName;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::account::{Account, Password};
use crate::config::PollConfig;

use super::MailError;
use super::{MailConnector, UnreadSource};

pub(crate) type ImapStream = Compat<TlsStream<TcpStream>>;
type ImapClient = async_imap::Client<ImapStream>;
type ImapSession = async_imap::Session<ImapStream>;

/// Run one network operation under the per-operation time limit.
async fn timed<T>(
    limit: Duration,
    operation: &'static str,
    fut: impl Future<Output = T>,
) -> Result<T, MailError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| MailError::Timeout(operation))
}

fn tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

/// Encrypted transport to the server, not yet logged in.
pub struct Connection {
    client: ImapClient,
    server: String,
    op_timeout: Duration,
}

impl Connection {
    pub async fn connect(server: &str, port: u16, op_timeout: Duration) -> Result<Self, MailError> {
        let addr = format!("{}:{}", server, port);

        let tcp = timed(op_timeout, "connect", TcpStream::connect(&addr))
            .await?
            .map_err(|e| MailError::Connection(format!("failed to connect to {}: {}", addr, e)))?;

        let server_name = ServerName::try_from(server.to_string())
            .map_err(|e| MailError::Connection(format!("invalid server name {}: {}", server, e)))?;

        let tls = timed(
            op_timeout,
            "TLS handshake",
            tls_connector().connect(server_name, tcp),
        )
        .await?
        .map_err(|e| MailError::Connection(format!("TLS handshake with {} failed: {}", server, e)))?;

        // async-imap speaks futures-io; bridge the tokio stream
        let client = async_imap::Client::new(tls.compat());
        tracing::debug!("Connected to {}", addr);

        Ok(Self {
            client,
            server: server.to_string(),
            op_timeout,
        })
    }

    pub async fn authenticate(
        self,
        username: &str,
        password: &Password,
    ) -> Result<Authenticated, MailError> {
        let session = timed(
            self.op_timeout,
            "login",
            self.client.login(username, password.expose()),
        )
        .await?
        .map_err(|(e, _client)| match MailError::from(e) {
            MailError::Protocol(msg) => MailError::Auth(msg),
            other => other,
        })?;

        tracing::debug!("Logged in to {} as {}", self.server, username);
        Ok(Authenticated {
            session,
            server: self.server,
            op_timeout: self.op_timeout,
        })
    }
}

/// Logged-in session without a selected mailbox.
pub struct Authenticated {
    session: ImapSession,
    server: String,
    op_timeout: Duration,
}

impl Authenticated {
    /// Select (read-write) or examine (read-only) a mailbox.
    pub async fn select_mailbox(
        mut self,
        mailbox: &str,
        readonly: bool,
    ) -> Result<MailerSession, MailError> {
        let selected = if readonly {
            timed(self.op_timeout, "examine", self.session.examine(mailbox)).await?
        } else {
            timed(self.op_timeout, "select", self.session.select(mailbox)).await?
        };

        match selected {
            Ok(info) => {
                tracing::debug!(
                    "Selected {} on {} (exists={}, readonly={})",
                    mailbox,
                    self.server,
                    info.exists,
                    readonly
                );
            }
            Err(e) => {
                timed(self.op_timeout, "logout", self.session.logout()).await.ok();
                return Err(MailError::from(e));
            }
        }

        Ok(MailerSession {
            session: Some(self.session),
            server: self.server,
            readonly,
            op_timeout: self.op_timeout,
        })
    }
}

/// A session with a selected mailbox, ready to count unread mail.
pub struct MailerSession {
    session: Option<ImapSession>,
    server: String,
    readonly: bool,
    op_timeout: Duration,
}

impl MailerSession {
    fn session(&mut self) -> Result<&mut ImapSession, MailError> {
        self.session
            .as_mut()
            .ok_or_else(|| MailError::Connection("session already closed".to_string()))
    }

    /// Count unseen messages.
    ///
    /// On a read-write session every unseen message is fetched and flagged
    /// `\Seen`, and the count is the number of messages actually fetched. On a
    /// read-only session the count is the search result and nothing changes
    /// on the server.
    pub async fn poll_unread(&mut self) -> Result<usize, MailError> {
        let limit = self.op_timeout;
        let mark_seen = !self.readonly;
        let session = self.session()?;

        let drained = std::iter::from_fn(|| session.unsolicited_responses.try_recv().ok()).count();
        if drained > 0 {
            tracing::trace!("Dropped {} unsolicited responses", drained);
        }

        let uids = timed(limit, "search", session.uid_search("UNSEEN")).await??;
        if uids.is_empty() || !mark_seen {
            return Ok(uids.len());
        }

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        let uid_set = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetched = timed(limit, "fetch", async {
            let fetches: Vec<_> = session
                .uid_fetch(&uid_set, "(UID FLAGS)")
                .await?
                .try_collect()
                .await?;
            Ok::<_, async_imap::error::Error>(fetches.iter().filter(|f| f.uid.is_some()).count())
        })
        .await??;

        timed(limit, "store", async {
            let _: Vec<_> = session
                .uid_store(&uid_set, "+FLAGS (\\Seen)")
                .await?
                .try_collect()
                .await?;
            Ok::<_, async_imap::error::Error>(())
        })
        .await??;

        tracing::debug!(
            "{} unseen on {}, fetched and marked {}",
            uids.len(),
            self.server,
            fetched
        );
        Ok(fetched)
    }

    /// Log out and drop the transport. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            timed(self.op_timeout, "logout", session.logout()).await.ok();
            tracing::debug!("Closed session with {}", self.server);
        }
    }
}

/// Options applied to every session opened by [`ImapConnector`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub mailbox: String,
    pub mark_seen: bool,
    pub op_timeout: Duration,
}

impl From<&PollConfig> for SessionOptions {
    fn from(poll: &PollConfig) -> Self {
        Self {
            mailbox: poll.mailbox.clone(),
            mark_seen: poll.mark_seen,
            op_timeout: poll.op_timeout(),
        }
    }
}

/// Opens real IMAP sessions over TLS.
pub struct ImapConnector {
    options: SessionOptions,
}

impl ImapConnector {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    async fn open(&self, account: &Account) -> Result<Box<dyn UnreadSource>, MailError> {
        let session = Connection::connect(&account.server, account.port, self.options.op_timeout)
            .await?
            .authenticate(&account.username, &account.password)
            .await?
            .select_mailbox(&self.options.mailbox, !self.options.mark_seen)
            .await?;
        Ok(Box::new(session))
    }
}

#[async_trait]
impl UnreadSource for MailerSession {
    async fn poll_unread(&mut self) -> Result<usize, MailError> {
        MailerSession::poll_unread(self).await
    }

    async fn close(&mut self) {
        MailerSession::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_options_follow_poll_config() {
        let poll = PollConfig {
            mailbox: "Lists".to_string(),
            mark_seen: false,
            op_timeout_secs: 7,
            ..PollConfig::default()
        };
        let options = SessionOptions::from(&poll);
        assert_eq!(options.mailbox, "Lists");
        assert!(!options.mark_seen);
        assert_eq!(options.op_timeout, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_timed_reports_operation_name() {
        let result = timed(
            Duration::from_millis(10),
            "search",
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(result, Err(MailError::Timeout("search")));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop a listener to get a local port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Connection::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MailError::Connection(_)), "got {:?}", err);
    }
}
