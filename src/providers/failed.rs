//! Placeholder for a provider whose construction failed
//!
//! Keeps the id visible in listings with the construction error attached.
//! Every operation reports that error.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::notification::Notification;
use crate::provider_config::ProviderRecord;
use crate::traits::{
    DeliveryError, DeliveryReceipt, Provider, ProviderError, ProviderKind, ProviderStatus, TestDelivery,
};

pub struct FailedProvider {
    id: String,
    kind: ProviderKind,
    checksum: String,
    message: String,
    failed_at: DateTime<Utc>,
    closed: AtomicBool,
}

impl FailedProvider {
    pub fn new(record: &ProviderRecord, error: &ProviderError) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind,
            checksum: record.checksum.clone(),
            message: format!("Initialization failed: {}", error),
            failed_at: Utc::now(),
            closed: AtomicBool::new(false),
        }
    }

    fn unavailable(&self) -> DeliveryError {
        DeliveryError::Unavailable(self.message.clone())
    }
}

#[async_trait::async_trait]
impl Provider for FailedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn config_checksum(&self) -> &str {
        &self.checksum
    }

    async fn send(
        &self,
        _notification: &Notification,
        _cancel: &CancellationToken,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        Err(self.unavailable())
    }

    async fn status(&self) -> ProviderStatus {
        let mut status = ProviderStatus::error(&self.checksum, self.message.clone());
        status.last_updated = self.failed_at;
        status
    }

    fn test_recipient(&self) -> Result<String, DeliveryError> {
        Err(self.unavailable())
    }

    async fn test(&self, _cancel: &CancellationToken) -> Result<TestDelivery, DeliveryError> {
        Err(self.unavailable())
    }

    fn close(&self) -> Result<(), ProviderError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ProviderState;
    use serde_json::Map;

    fn failed() -> FailedProvider {
        let record = ProviderRecord::new("tg", ProviderKind::Telegram, true, Map::new()).unwrap();
        let error = ProviderError::invalid(ProviderKind::Telegram, "bot_token is required");
        FailedProvider::new(&record, &error)
    }

    #[tokio::test]
    async fn test_every_operation_reports_the_construction_error() {
        let p = failed();
        let cancel = CancellationToken::new();
        let n = Notification::new("n", "tg", "1", "hello");

        let send = p.send(&n, &cancel).await.unwrap_err();
        assert_eq!(
            send.to_string(),
            "provider is in error state: Initialization failed: invalid telegram configuration: bot_token is required"
        );
        assert!(matches!(p.test(&cancel).await, Err(DeliveryError::Unavailable(_))));
        assert!(matches!(p.test_recipient(), Err(DeliveryError::Unavailable(_))));
        assert!(p.close().is_ok());
        assert!(p.is_closed());
    }

    #[tokio::test]
    async fn test_status_is_fixed() {
        let p = failed();
        let first = p.status().await;
        let second = p.status().await;

        assert_eq!(first.state, ProviderState::Error);
        assert_eq!(first.config_checksum, p.config_checksum());
        assert_eq!(first, second);
        assert_eq!(p.kind(), ProviderKind::Telegram);
    }
}
