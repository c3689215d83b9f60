//! SMTP transport trait for email delivery

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MailError {
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Timeout")]
    Timeout,
    #[error("Temporary SMTP failure: {0}")]
    Transient(String),
    #[error("SMTP rejected message: {0}")]
    Permanent(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Failed to build message: {0}")]
    BuildError(String),
}

impl MailError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            MailError::ConnectionError(_) => true,
            MailError::Timeout => true,
            // 4xx replies: service unavailable, try again later
            MailError::Transient(_) => true,
            MailError::Permanent(_) => false,
            MailError::InvalidAddress(_) => false,
            MailError::BuildError(_) => false,
        }
    }
}

/// A fully addressed plain-text email
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub from: String,
    pub from_name: Option<String>,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Trait for SMTP delivery
///
/// Production: lettre async SMTP transport
/// Testing: Recorded responses
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;

    /// Open a session and issue NOOP
    async fn test_connection(&self) -> Result<(), MailError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(MailError::ConnectionError("connection refused".into()).is_retryable());
        assert!(MailError::Timeout.is_retryable());
        assert!(MailError::Transient("421 service not available".into()).is_retryable());
        assert!(!MailError::Permanent("535 authentication failed".into()).is_retryable());
        assert!(!MailError::InvalidAddress("nobody".into()).is_retryable());
    }
}
