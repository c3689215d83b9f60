//! Notification requests, notifications and delivery log records

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::traits::ProviderKind;

pub const MAX_MESSAGE_LEN: usize = 4096;
pub const MAX_SUBJECT_LEN: usize = 200;
pub const MAX_METADATA_ENTRIES: usize = 10;
pub const MAX_METADATA_KEY_LEN: usize = 50;
pub const MAX_METADATA_VALUE_LEN: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" | "" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(ValidationError::InvalidPriority(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("metadata can have at most {0} entries")]
    TooManyMetadataEntries(usize),
    #[error("metadata key {0:?} exceeds 50 characters")]
    MetadataKeyTooLong(String),
    #[error("metadata value for key {0:?} exceeds 200 characters")]
    MetadataValueTooLong(String),
    #[error("priority must be one of: low, normal, high (got {0:?})")]
    InvalidPriority(String),
}

/// Caller-supplied request, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub provider_id: String,
    pub recipient: String,
    pub message: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub priority: Option<String>,
}

impl NotificationRequest {
    pub fn new(
        provider_id: impl Into<String>,
        recipient: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            recipient: recipient.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn validate(&self) -> Result<Priority, ValidationError> {
        if self.provider_id.trim().is_empty() {
            return Err(ValidationError::Missing("provider_id"));
        }
        if self.recipient.trim().is_empty() {
            return Err(ValidationError::Missing("recipient"));
        }
        if self.message.is_empty() {
            return Err(ValidationError::Missing("message"));
        }
        if self.message.chars().count() > MAX_MESSAGE_LEN {
            return Err(ValidationError::TooLong { field: "message", max: MAX_MESSAGE_LEN });
        }
        if let Some(subject) = &self.subject {
            if subject.chars().count() > MAX_SUBJECT_LEN {
                return Err(ValidationError::TooLong { field: "subject", max: MAX_SUBJECT_LEN });
            }
        }
        if self.metadata.len() > MAX_METADATA_ENTRIES {
            return Err(ValidationError::TooManyMetadataEntries(MAX_METADATA_ENTRIES));
        }
        for (key, value) in &self.metadata {
            if key.chars().count() > MAX_METADATA_KEY_LEN {
                return Err(ValidationError::MetadataKeyTooLong(key.clone()));
            }
            let rendered = match value {
                Value::String(s) => s.chars().count(),
                other => other.to_string().chars().count(),
            };
            if rendered > MAX_METADATA_VALUE_LEN {
                return Err(ValidationError::MetadataValueTooLong(key.clone()));
            }
        }
        self.priority.as_deref().unwrap_or("normal").parse()
    }

    /// Validate and stamp a fresh id and creation time
    pub fn into_notification(self) -> Result<Notification, ValidationError> {
        let priority = self.validate()?;
        Ok(Notification {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id: self.provider_id,
            recipient: self.recipient,
            message: self.message,
            subject: self.subject.filter(|s| !s.is_empty()),
            metadata: self.metadata,
            priority,
            created_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub provider_id: String,
    pub recipient: String,
    pub message: String,
    pub subject: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Build a notification with a known id, skipping request validation
    pub fn new(
        id: impl Into<String>,
        provider_id: impl Into<String>,
        recipient: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            recipient: recipient.into(),
            message: message.into(),
            subject: None,
            metadata: BTreeMap::new(),
            priority: Priority::Normal,
            created_at: Utc::now(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of one notification's attempt sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub notification: Notification,
    pub status: DeliveryOutcome,
    pub error_message: Option<String>,
    pub provider_type: ProviderKind,
    pub attempt_count: u32,
    pub delivered_at: Option<DateTime<Utc>>,
    pub is_test: bool,
}

impl DeliveryLogEntry {
    pub fn sent(notification: Notification, provider_type: ProviderKind, attempts: u32) -> Self {
        Self {
            notification,
            status: DeliveryOutcome::Sent,
            error_message: None,
            provider_type,
            attempt_count: attempts,
            delivered_at: Some(Utc::now()),
            is_test: false,
        }
    }

    pub fn failed(
        notification: Notification,
        provider_type: ProviderKind,
        attempts: u32,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            notification,
            status: DeliveryOutcome::Failed,
            error_message: Some(error.to_string()),
            provider_type,
            attempt_count: attempts,
            delivered_at: None,
            is_test: false,
        }
    }

    pub fn as_test(mut self) -> Self {
        self.is_test = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn request() -> NotificationRequest {
        NotificationRequest::new("ops-telegram", "123456", "disk almost full")
    }

    #[test]
    fn test_valid_request_defaults_to_normal_priority() {
        let priority = assert_ok!(request().validate());
        assert_eq!(priority, Priority::Normal);

        let notification = request().with_subject("alert").into_notification().unwrap();
        assert_eq!(notification.priority, Priority::Normal);
        assert_eq!(notification.subject.as_deref(), Some("alert"));
        assert!(uuid::Uuid::parse_str(&notification.id).is_ok());
    }

    #[test]
    fn test_required_fields() {
        let mut req = request();
        req.recipient = "  ".into();
        assert_eq!(req.validate(), Err(ValidationError::Missing("recipient")));

        let mut req = request();
        req.message.clear();
        assert_eq!(req.validate(), Err(ValidationError::Missing("message")));
    }

    #[test]
    fn test_length_limits() {
        let mut req = request();
        req.message = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert_err!(req.validate());

        let req = request().with_subject("s".repeat(MAX_SUBJECT_LEN + 1));
        assert_eq!(
            req.validate(),
            Err(ValidationError::TooLong { field: "subject", max: MAX_SUBJECT_LEN })
        );

        // Limits count characters, not bytes
        let mut req = request();
        req.message = "é".repeat(MAX_MESSAGE_LEN);
        assert_ok!(req.validate());
    }

    #[test]
    fn test_metadata_limits() {
        let mut req = request();
        for i in 0..=MAX_METADATA_ENTRIES {
            req.metadata.insert(format!("k{}", i), Value::from(i));
        }
        assert_eq!(
            req.validate(),
            Err(ValidationError::TooManyMetadataEntries(MAX_METADATA_ENTRIES))
        );

        let mut req = request();
        req.metadata.insert("k".repeat(51), Value::from("v"));
        assert!(matches!(req.validate(), Err(ValidationError::MetadataKeyTooLong(_))));

        let mut req = request();
        req.metadata.insert("host".into(), Value::from("v".repeat(201)));
        assert!(matches!(req.validate(), Err(ValidationError::MetadataValueTooLong(_))));
    }

    #[test]
    fn test_priority_parsing() {
        let mut req = request();
        req.priority = Some("high".into());
        assert_eq!(req.validate(), Ok(Priority::High));

        req.priority = Some("urgent".into());
        assert_eq!(req.validate(), Err(ValidationError::InvalidPriority("urgent".into())));
    }

    #[test]
    fn test_log_entry_constructors() {
        let n = Notification::new("n-1", "mail", "a@example.com", "hi");
        let sent = DeliveryLogEntry::sent(n.clone(), ProviderKind::Email, 2);
        assert_eq!(sent.status, DeliveryOutcome::Sent);
        assert!(sent.delivered_at.is_some());
        assert!(!sent.is_test);

        let failed = DeliveryLogEntry::failed(n, ProviderKind::Email, 1, "boom").as_test();
        assert_eq!(failed.status, DeliveryOutcome::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert!(failed.delivered_at.is_none());
        assert!(failed.is_test);
    }
}
