//! Email (SMTP) channel
//!
//! Sends plain-text mail through an SMTP relay.
//! Health check: open a session and NOOP

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{test_notification, ConfigFields, TestTracker};
use crate::notification::Notification;
use crate::retry::{deliver_with_retry, RetryPolicy};
use crate::traits::{
    ChannelError, DeliveryError, DeliveryReceipt, MailTransport, OutgoingMail, Provider,
    ProviderError, ProviderKind, ProviderStatus, TestDelivery,
};

pub const DEFAULT_SUBJECT: &str = "Notification";
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone, PartialEq)]
pub struct EmailSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub from_name: Option<String>,
    pub use_tls: bool,
    pub timeout: Duration,
    pub test_recipient: Option<String>,
}

impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("from_name", &self.from_name)
            .field("use_tls", &self.use_tls)
            .field("timeout", &self.timeout)
            .field("test_recipient", &self.test_recipient)
            .finish()
    }
}

impl EmailSettings {
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, ProviderError> {
        let fields = ConfigFields::new(ProviderKind::Email, config);

        let host = fields.required_string(&["smtp_host", "host"])?;

        let port = fields
            .unsigned(&["smtp_port", "port"])?
            .ok_or_else(|| fields.invalid("smtp_port or port is required"))?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| fields.invalid(format!("port {} is out of range (1-65535)", port)))?;

        let from = fields.required_string(&["from_address", "from"])?;
        if !is_valid_email(&from) {
            return Err(fields.invalid(format!("from address {:?} is not a valid email", from)));
        }

        let test_recipient = fields.string(&["test_recipient"])?;
        if let Some(addr) = &test_recipient {
            if !is_valid_email(addr) {
                return Err(fields.invalid(format!("test_recipient {:?} is not a valid email", addr)));
            }
        }

        let timeout_seconds = fields
            .unsigned(&["timeout_seconds", "timeout"])?
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);

        Ok(Self {
            host,
            port,
            username: fields.string(&["username"])?,
            password: fields.string(&["password"])?,
            from,
            from_name: fields.string(&["from_name"])?,
            use_tls: fields.boolean("use_tls")?.unwrap_or(false),
            timeout: Duration::from_secs(timeout_seconds),
            test_recipient,
        })
    }
}

/// Exactly one `@`, non-empty local part, dotted domain
pub fn is_valid_email(address: &str) -> bool {
    let address = address.trim();
    let mut parts = address.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !address.chars().any(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// A notification channel backed by one SMTP account
pub struct EmailProvider {
    id: String,
    settings: EmailSettings,
    checksum: String,
    transport: Arc<dyn MailTransport>,
    retry: RetryPolicy,
    tests: TestTracker,
    closed: AtomicBool,
}

impl EmailProvider {
    pub fn new(
        id: String,
        settings: EmailSettings,
        checksum: String,
        transport: Arc<dyn MailTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            id,
            settings,
            checksum,
            transport,
            retry,
            tests: TestTracker::default(),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl Provider for EmailProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Email
    }

    fn config_checksum(&self) -> &str {
        &self.checksum
    }

    async fn send(
        &self,
        notification: &Notification,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let recipient = notification.recipient.trim();
        if recipient.is_empty() {
            return Err(DeliveryError::InvalidRecipient("recipient is required".into()));
        }
        if !is_valid_email(recipient) {
            return Err(DeliveryError::InvalidRecipient(format!(
                "invalid email address: {}",
                recipient
            )));
        }

        let mail = OutgoingMail {
            from: self.settings.from.clone(),
            from_name: self.settings.from_name.clone(),
            to: recipient.to_string(),
            subject: notification
                .subject
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            body: notification.message.clone(),
        };

        tracing::debug!(
            provider_id = %self.id,
            notification_id = %notification.id,
            host = %self.settings.host,
            "Sending email"
        );

        let transport = &self.transport;
        let mail = &mail;
        let receipt = deliver_with_retry(&self.retry, cancel, &self.id, move |_| async move {
            transport.send(mail).await.map_err(ChannelError::from)
        })
        .await?;

        tracing::info!(
            provider_id = %self.id,
            notification_id = %notification.id,
            attempts = receipt.attempts,
            "Email delivered"
        );
        Ok(receipt)
    }

    async fn status(&self) -> ProviderStatus {
        let status = match self.transport.test_connection().await {
            Ok(()) => ProviderStatus::active(&self.checksum)
                .with_detail(format!("SMTP: {}:{}", self.settings.host, self.settings.port)),
            Err(e) => ProviderStatus::error(
                &self.checksum,
                format!("Failed to connect to SMTP server: {}", e),
            ),
        };
        self.tests.apply(status)
    }

    fn test_recipient(&self) -> Result<String, DeliveryError> {
        self.settings
            .test_recipient
            .clone()
            .or_else(|| Some(self.settings.from.clone()).filter(|f| !f.is_empty()))
            .ok_or_else(|| DeliveryError::NoTestRecipient(self.id.clone()))
    }

    async fn test(&self, cancel: &CancellationToken) -> Result<TestDelivery, DeliveryError> {
        let recipient = match self.test_recipient() {
            Ok(recipient) => recipient,
            Err(e) => {
                self.tests.record(false);
                return Err(e);
            }
        };

        let notification = test_notification(&self.id, recipient, Utc::now());
        let result = self.send(&notification, cancel).await;
        self.tests.record(result.is_ok());
        Ok(TestDelivery { notification, result })
    }

    fn close(&self) -> Result<(), ProviderError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(provider_id = %self.id, "Closed email provider");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
