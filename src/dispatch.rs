//! Notification dispatch
//!
//! Resolves the provider, sends under a deadline, and hands the final outcome
//! to the async logger. Every resolved send produces exactly one log entry.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::notification::{DeliveryLogEntry, Notification, NotificationRequest, ValidationError};
use crate::notification_logger::NotificationLogger;
use crate::registry::ProviderRegistry;
use crate::traits::{DeliveryError, DeliveryReceipt, Provider, TestDelivery};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid notification: {0}")]
    Validation(#[from] ValidationError),
    #[error("provider not found: {0}")]
    ProviderNotFound(String),
    #[error("notification {notification_id} failed: {source}")]
    Delivery {
        notification_id: String,
        #[source]
        source: DeliveryError,
    },
    #[error("provider {provider_id} cannot run a self-test: {source}")]
    TestUnavailable {
        provider_id: String,
        #[source]
        source: DeliveryError,
    },
}

/// Result of a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub notification_id: String,
    pub provider_id: String,
    pub attempts: u32,
}

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    logger: Arc<NotificationLogger>,
    send_timeout: Duration,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(registry: Arc<ProviderRegistry>, logger: Arc<NotificationLogger>, send_timeout: Duration) -> Self {
        Self {
            registry,
            logger,
            send_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel every in-flight send
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Validate, deliver and log one notification
    pub async fn dispatch(&self, request: NotificationRequest) -> Result<DispatchOutcome, DispatchError> {
        let notification = request.into_notification()?;
        let provider = self.resolve(&notification.provider_id)?;

        tracing::debug!(
            notification_id = %notification.id,
            provider_id = %notification.provider_id,
            priority = %notification.priority.as_str(),
            "Dispatching notification"
        );

        let cancel = self.deadline();
        let result = provider.send(&notification, &cancel).await;
        cancel.cancel();

        self.record(provider.as_ref(), notification, result, false)
    }

    /// Run the provider self-test and log the message it sent as a test entry.
    /// Nothing is logged when the provider cannot address a test message.
    pub async fn test_provider(&self, id: &str) -> Result<DispatchOutcome, DispatchError> {
        let provider = self.resolve(id)?;

        let cancel = self.deadline();
        let delivery = provider.test(&cancel).await;
        cancel.cancel();

        match delivery {
            Ok(TestDelivery { notification, result }) => self.record(provider.as_ref(), notification, result, true),
            Err(e) => {
                tracing::warn!(provider_id = %id, error = %e, "Provider self-test could not run");
                Err(DispatchError::TestUnavailable {
                    provider_id: id.to_string(),
                    source: e,
                })
            }
        }
    }

    fn resolve(&self, id: &str) -> Result<Arc<dyn Provider>, DispatchError> {
        self.registry.get(id).map_err(|_| {
            tracing::warn!(provider_id = %id, "Dispatch to unknown provider");
            DispatchError::ProviderNotFound(id.to_string())
        })
    }

    /// Child of the shutdown token that also fires after `send_timeout`
    fn deadline(&self) -> CancellationToken {
        let cancel = self.shutdown.child_token();
        let timer = cancel.clone();
        let timeout = self.send_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => timer.cancel(),
            }
        });
        cancel
    }

    fn record(
        &self,
        provider: &dyn Provider,
        notification: Notification,
        result: Result<DeliveryReceipt, DeliveryError>,
        is_test: bool,
    ) -> Result<DispatchOutcome, DispatchError> {
        let notification_id = notification.id.clone();
        let provider_id = notification.provider_id.clone();

        let (entry, outcome) = match result {
            Ok(receipt) => {
                tracing::info!(
                    notification_id = %notification_id,
                    provider_id = %provider_id,
                    attempts = receipt.attempts,
                    is_test,
                    "Notification delivered"
                );
                let entry = DeliveryLogEntry::sent(notification, provider.kind(), receipt.attempts);
                let outcome = Ok(DispatchOutcome {
                    notification_id,
                    provider_id,
                    attempts: receipt.attempts,
                });
                (entry, outcome)
            }
            Err(e) => {
                tracing::warn!(
                    notification_id = %notification_id,
                    provider_id = %provider_id,
                    attempts = e.attempts(),
                    error = %e,
                    is_test,
                    "Notification delivery failed"
                );
                let entry = DeliveryLogEntry::failed(notification, provider.kind(), e.attempts(), &e);
                (entry, Err(DispatchError::Delivery { notification_id, source: e }))
            }
        };

        self.logger.log(if is_test { entry.as_test() } else { entry });
        outcome
    }
}
