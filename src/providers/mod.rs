//! Notification channels and the factory that builds them from config records

pub mod email;
pub mod failed;
pub mod telegram;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::production::{LettreMailTransport, ReqwestTelegramApi};
use crate::notification::Notification;
use crate::provider_config::ProviderRecord;
use crate::retry::RetryPolicy;
use crate::traits::{
    MailTransport, Provider, ProviderError, ProviderKind, ProviderStatus, TelegramApi, TestResult,
};

pub use email::{EmailProvider, EmailSettings};
pub use failed::FailedProvider;
pub use telegram::{TelegramProvider, TelegramSettings};

pub const TEST_SUBJECT: &str = "Test from notirelay";

/// Body of the self-test message
pub fn test_message(now: DateTime<Utc>) -> String {
    format!(
        "Test notification from notirelay server - {}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

pub(crate) fn test_notification(provider_id: &str, recipient: String, now: DateTime<Utc>) -> Notification {
    Notification::new(
        format!("test-{}-{}", provider_id, now.timestamp()),
        provider_id,
        recipient,
        test_message(now),
    )
    .with_subject(TEST_SUBJECT)
}

// ============================================================================
// ProviderFactory
// ============================================================================

pub type TelegramApiBuilder =
    Arc<dyn Fn(&TelegramSettings) -> Result<Arc<dyn TelegramApi>, ProviderError> + Send + Sync>;
pub type MailTransportBuilder =
    Arc<dyn Fn(&EmailSettings) -> Result<Arc<dyn MailTransport>, ProviderError> + Send + Sync>;

/// Builds provider instances from validated records
///
/// Transport construction is injected so tests can swap in recorded doubles.
#[derive(Clone)]
pub struct ProviderFactory {
    telegram_api: TelegramApiBuilder,
    mail_transport: MailTransportBuilder,
    retry: RetryPolicy,
}

impl ProviderFactory {
    pub fn new(
        telegram_api: impl Fn(&TelegramSettings) -> Result<Arc<dyn TelegramApi>, ProviderError> + Send + Sync + 'static,
        mail_transport: impl Fn(&EmailSettings) -> Result<Arc<dyn MailTransport>, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            telegram_api: Arc::new(telegram_api),
            mail_transport: Arc::new(mail_transport),
            retry: RetryPolicy::default(),
        }
    }

    /// Factory wired to the Telegram Bot API over HTTPS and lettre SMTP
    pub fn production() -> Self {
        Self::new(
            |settings| Ok(Arc::new(ReqwestTelegramApi::new(settings)?) as Arc<dyn TelegramApi>),
            |settings| Ok(Arc::new(LettreMailTransport::new(settings)?) as Arc<dyn MailTransport>),
        )
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the channel named by `record.kind`
    pub fn build(&self, record: &ProviderRecord) -> Result<Arc<dyn Provider>, ProviderError> {
        match record.kind {
            ProviderKind::Telegram => {
                let settings = TelegramSettings::from_config(&record.config)?;
                let api = (self.telegram_api)(&settings)?;
                Ok(Arc::new(TelegramProvider::new(
                    record.id.clone(),
                    settings,
                    record.checksum.clone(),
                    api,
                    self.retry.clone(),
                )))
            }
            ProviderKind::Email => {
                let settings = EmailSettings::from_config(&record.config)?;
                let transport = (self.mail_transport)(&settings)?;
                Ok(Arc::new(EmailProvider::new(
                    record.id.clone(),
                    settings,
                    record.checksum.clone(),
                    transport,
                    self.retry.clone(),
                )))
            }
        }
    }

    /// Build the channel, or a failed placeholder carrying the construction error
    pub fn build_or_failed(&self, record: &ProviderRecord) -> Arc<dyn Provider> {
        match self.build(record) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(
                    provider_id = %record.id,
                    provider_type = %record.kind,
                    error = %e,
                    "Provider construction failed, installing failed placeholder"
                );
                Arc::new(FailedProvider::new(record, &e))
            }
        }
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Outcome of the most recent self-test
#[derive(Default)]
pub(crate) struct TestTracker {
    last: Mutex<Option<(DateTime<Utc>, TestResult)>>,
}

impl TestTracker {
    pub(crate) fn record(&self, success: bool) {
        let result = if success { TestResult::Success } else { TestResult::Failed };
        *self.last.lock() = Some((Utc::now(), result));
    }

    pub(crate) fn apply(&self, mut status: ProviderStatus) -> ProviderStatus {
        if let Some((at, result)) = *self.last.lock() {
            status.last_test_at = Some(at);
            status.last_test_result = Some(result);
        }
        status
    }
}

/// Typed access to a record's `config` object
pub(crate) struct ConfigFields<'a> {
    kind: ProviderKind,
    map: &'a Map<String, Value>,
}

impl<'a> ConfigFields<'a> {
    pub(crate) fn new(kind: ProviderKind, map: &'a Map<String, Value>) -> Self {
        Self { kind, map }
    }

    pub(crate) fn invalid(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::invalid(self.kind, message)
    }

    /// First non-null key wins
    fn lookup(&self, keys: &[&str]) -> Option<(&'a str, &'a Value)> {
        keys.iter()
            .find_map(|k| self.map.get_key_value(*k).filter(|(_, v)| !v.is_null()))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn string(&self, keys: &[&str]) -> Result<Option<String>, ProviderError> {
        match self.lookup(keys) {
            None => Ok(None),
            Some((_, Value::String(s))) if s.trim().is_empty() => Ok(None),
            Some((_, Value::String(s))) => Ok(Some(s.trim().to_string())),
            Some((key, _)) => Err(self.invalid(format!("{} must be a string", key))),
        }
    }

    pub(crate) fn required_string(&self, keys: &[&str]) -> Result<String, ProviderError> {
        self.string(keys)?
            .ok_or_else(|| self.invalid(format!("{} is required", keys.join(" or "))))
    }

    /// Number or numeric string
    pub(crate) fn unsigned(&self, keys: &[&str]) -> Result<Option<u64>, ProviderError> {
        match self.lookup(keys) {
            None => Ok(None),
            Some((key, Value::Number(n))) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("{} must be a non-negative integer", key))),
            Some((key, Value::String(s))) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| self.invalid(format!("{} must be a non-negative integer", key))),
            Some((key, _)) => Err(self.invalid(format!("{} must be a number", key))),
        }
    }

    pub(crate) fn boolean(&self, key: &str) -> Result<Option<bool>, ProviderError> {
        match self.lookup(&[key]) {
            None => Ok(None),
            Some((_, Value::Bool(b))) => Ok(Some(*b)),
            Some((key, _)) => Err(self.invalid(format!("{} must be a boolean", key))),
        }
    }

    /// String or integer, rendered as a string
    pub(crate) fn identifier(&self, keys: &[&str]) -> Result<Option<String>, ProviderError> {
        match self.lookup(keys) {
            Some((_, Value::Number(n))) if n.is_i64() => Ok(Some(n.to_string())),
            Some((key, Value::Number(_))) => Err(self.invalid(format!("{} must be an integer", key))),
            _ => self.string(keys),
        }
    }
}
