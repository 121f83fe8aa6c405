use thiserror::Error;

/// Errors from an IMAP session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    /// DNS, TCP or TLS failure, or the connection dropped. Fatal for the session.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server refused the credentials. Fatal for the session.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server answered NO/BAD or something unparsable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A single network operation exceeded its time limit.
    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl MailError {
    /// Whether a poll tick failing with this error may be retried on the
    /// next tick with the same connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Timeout(_))
    }

    /// Whether a fresh connection attempt could get past this error.
    pub fn is_retryable_on_connect(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

impl From<async_imap::error::Error> for MailError {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error;

        match err {
            Error::Io(e) => Self::Connection(e.to_string()),
            Error::ConnectionLost => Self::Connection("connection lost".to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MailError::Protocol("BAD".into()).is_transient());
        assert!(MailError::Timeout("search").is_transient());
        assert!(!MailError::Connection("reset".into()).is_transient());
        assert!(!MailError::Auth("NO".into()).is_transient());
    }

    #[test]
    fn test_connect_retry_classification() {
        assert!(MailError::Connection("refused".into()).is_retryable_on_connect());
        assert!(MailError::Timeout("connect").is_retryable_on_connect());
        assert!(!MailError::Auth("NO".into()).is_retryable_on_connect());
        assert!(!MailError::Protocol("no mailbox".into()).is_retryable_on_connect());
    }

    #[test]
    fn test_from_imap_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            MailError::from(async_imap::error::Error::Io(io)),
            MailError::Connection(_)
        ));
        assert!(matches!(
            MailError::from(async_imap::error::Error::ConnectionLost),
            MailError::Connection(_)
        ));
        assert!(matches!(
            MailError::from(async_imap::error::Error::Bad("nope".into())),
            MailError::Protocol(_)
        ));
    }
}
