//! Provider capability shared by every notification channel

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::notification::Notification;
use super::{MailError, TelegramApiError};

/// Channel type named by the `type` field of a provider file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Telegram,
    Email,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Telegram => "telegram",
            ProviderKind::Email => "email",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(ProviderKind::Telegram),
            "email" => Ok(ProviderKind::Email),
            other => Err(format!("unsupported provider type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderState {
    Active,
    Error,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Success,
    Failed,
}

/// Point-in-time view of a provider's health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub state: ProviderState,
    pub last_updated: DateTime<Utc>,
    pub error_message: Option<String>,
    /// Channel-specific detail for a healthy provider, e.g. the bot name
    pub detail: Option<String>,
    pub config_checksum: String,
    pub last_test_at: Option<DateTime<Utc>>,
    pub last_test_result: Option<TestResult>,
}

impl ProviderStatus {
    pub fn active(config_checksum: &str) -> Self {
        Self {
            state: ProviderState::Active,
            last_updated: Utc::now(),
            error_message: None,
            detail: None,
            config_checksum: config_checksum.to_string(),
            last_test_at: None,
            last_test_result: None,
        }
    }

    pub fn error(config_checksum: &str, message: impl Into<String>) -> Self {
        Self {
            state: ProviderState::Error,
            last_updated: Utc::now(),
            error_message: Some(message.into()),
            detail: None,
            config_checksum: config_checksum.to_string(),
            last_test_at: None,
            last_test_result: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Successful delivery summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub attempts: u32,
}

/// A self-test message and what became of it
#[derive(Debug)]
pub struct TestDelivery {
    pub notification: Notification,
    pub result: Result<DeliveryReceipt, DeliveryError>,
}

/// Failure reported by a channel transport
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Telegram(#[from] TelegramApiError),
    #[error(transparent)]
    Mail(#[from] MailError),
}

impl ChannelError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Telegram(e) => e.is_retryable(),
            ChannelError::Mail(e) => e.is_retryable(),
        }
    }

    /// Server-requested wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ChannelError::Telegram(e) => e.retry_after(),
            ChannelError::Mail(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("non-retryable error: {source}")]
    Rejected { attempts: u32, source: ChannelError },
    #[error("failed after {attempts} retries: {source}")]
    RetriesExhausted { attempts: u32, source: ChannelError },
    #[error("context cancelled")]
    Cancelled { attempts: u32 },
    #[error("provider is in error state: {0}")]
    Unavailable(String),
    #[error("no test recipient configured for provider {0}")]
    NoTestRecipient(String),
}

impl DeliveryError {
    /// Number of transport attempts made before this error was returned
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::Rejected { attempts, .. }
            | DeliveryError::RetriesExhausted { attempts, .. }
            | DeliveryError::Cancelled { attempts } => *attempts,
            _ => 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeliveryError::Cancelled { .. })
    }
}

/// Construction and teardown errors
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("invalid {kind} configuration: {message}")]
    InvalidConfig { kind: ProviderKind, message: String },
    #[error("failed to initialize {kind} transport: {message}")]
    Transport { kind: ProviderKind, message: String },
    #[error("failed to close provider {id}: {message}")]
    Close { id: String, message: String },
}

impl ProviderError {
    pub fn invalid(kind: ProviderKind, message: impl Into<String>) -> Self {
        ProviderError::InvalidConfig { kind, message: message.into() }
    }
}

/// A configured notification channel instance
///
/// Production: Telegram and SMTP channels, plus the failed placeholder
/// Testing: `mocks::TrackingProvider`
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Checksum of the configuration this instance was built from
    fn config_checksum(&self) -> &str;

    /// Deliver one notification, retrying transient failures
    async fn send(
        &self,
        notification: &Notification,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReceipt, DeliveryError>;

    /// Probe connectivity and report current health
    async fn status(&self) -> ProviderStatus;

    fn test_recipient(&self) -> Result<String, DeliveryError>;

    /// Send a fixed test message to the test recipient.
    /// Fails without sending when no test message can be addressed.
    async fn test(&self, cancel: &CancellationToken) -> Result<TestDelivery, DeliveryError>;

    /// Release resources. Called once by the registry.
    fn close(&self) -> Result<(), ProviderError>;

    fn is_closed(&self) -> bool;
}
