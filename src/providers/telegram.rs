//! Telegram channel
//!
//! Delivers through the Bot API `sendMessage` method.
//! Health check: `getMe`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{test_notification, ConfigFields, TestTracker};
use crate::notification::Notification;
use crate::retry::{deliver_with_retry, RetryPolicy};
use crate::traits::{
    ChannelError, ChatId, DeliveryError, DeliveryReceipt, OutgoingMessage, Provider, ProviderError,
    ProviderKind, ProviderStatus, TelegramApi, TestDelivery,
};

pub const DEFAULT_API_ENDPOINT: &str = "https://api.telegram.org";
pub const DEFAULT_PARSE_MODE: &str = "HTML";
const DEFAULT_TIMEOUT_SECONDS: u64 = 5;

static BOT_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+:[A-Za-z0-9_-]{20,}$").unwrap());

#[derive(Clone, PartialEq)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub default_chat_id: ChatId,
    pub test_chat_id: Option<ChatId>,
    /// `None` sends plain text
    pub parse_mode: Option<String>,
    pub timeout: Duration,
    pub api_endpoint: String,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &"<redacted>")
            .field("default_chat_id", &self.default_chat_id)
            .field("test_chat_id", &self.test_chat_id)
            .field("parse_mode", &self.parse_mode)
            .field("timeout", &self.timeout)
            .field("api_endpoint", &self.api_endpoint)
            .finish()
    }
}

impl TelegramSettings {
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, ProviderError> {
        let fields = ConfigFields::new(ProviderKind::Telegram, config);

        let bot_token = fields.required_string(&["bot_token"])?;
        if !BOT_TOKEN.is_match(&bot_token) {
            return Err(fields.invalid("bot_token is not a valid Telegram bot token"));
        }

        let default_chat_id = fields
            .identifier(&["default_chat_id", "chat_id"])?
            .ok_or_else(|| fields.invalid("default_chat_id is required"))?
            .parse::<ChatId>()
            .map_err(|e| fields.invalid(e))?;

        let test_chat_id = fields
            .identifier(&["test_chat_id"])?
            .map(|raw| raw.parse::<ChatId>())
            .transpose()
            .map_err(|e| fields.invalid(e))?;

        let parse_mode = match fields.string(&["parse_mode"])? {
            None => Some(DEFAULT_PARSE_MODE.to_string()),
            Some(mode) if mode.eq_ignore_ascii_case("none") => None,
            Some(mode) => match mode.as_str() {
                "HTML" | "Markdown" | "MarkdownV2" => Some(mode),
                other => {
                    return Err(fields.invalid(format!(
                        "parse_mode must be HTML, Markdown, MarkdownV2 or none (got {})",
                        other
                    )))
                }
            },
        };

        let timeout_seconds = fields
            .unsigned(&["timeout_seconds", "timeout"])?
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);

        let api_endpoint = fields
            .string(&["api_endpoint"])?
            .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            bot_token,
            default_chat_id,
            test_chat_id,
            parse_mode,
            timeout: Duration::from_secs(timeout_seconds),
            api_endpoint,
        })
    }
}

/// A notification channel backed by one Telegram bot
pub struct TelegramProvider {
    id: String,
    settings: TelegramSettings,
    checksum: String,
    api: Arc<dyn TelegramApi>,
    retry: RetryPolicy,
    tests: TestTracker,
    closed: AtomicBool,
}

impl TelegramProvider {
    pub fn new(
        id: String,
        settings: TelegramSettings,
        checksum: String,
        api: Arc<dyn TelegramApi>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            id,
            settings,
            checksum,
            api,
            retry,
            tests: TestTracker::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Message text with the subject as a bold header
    fn render(&self, notification: &Notification) -> String {
        let subject = match notification.subject.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ => return notification.message.clone(),
        };
        match self.settings.parse_mode.as_deref() {
            Some("HTML") => format!("<b>{}</b>\n\n{}", subject, notification.message),
            Some(_) => format!("*{}*\n\n{}", subject, notification.message),
            None => format!("{}\n\n{}", subject, notification.message),
        }
    }
}

#[async_trait::async_trait]
impl Provider for TelegramProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Telegram
    }

    fn config_checksum(&self) -> &str {
        &self.checksum
    }

    async fn send(
        &self,
        notification: &Notification,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        if notification.recipient.trim().is_empty() {
            return Err(DeliveryError::InvalidRecipient("recipient is required".into()));
        }
        let chat_id: ChatId = notification
            .recipient
            .parse()
            .map_err(DeliveryError::InvalidRecipient)?;
        if notification.message.is_empty() {
            return Err(DeliveryError::InvalidMessage("message is required".into()));
        }

        let message = OutgoingMessage {
            chat_id,
            text: self.render(notification),
            parse_mode: self.settings.parse_mode.clone(),
        };

        tracing::debug!(
            provider_id = %self.id,
            notification_id = %notification.id,
            chat_id = %message.chat_id,
            "Sending Telegram message"
        );

        let api = &self.api;
        let message = &message;
        let receipt = deliver_with_retry(&self.retry, cancel, &self.id, move |_| async move {
            api.send_message(message).await.map(drop).map_err(ChannelError::from)
        })
        .await?;

        tracing::info!(
            provider_id = %self.id,
            notification_id = %notification.id,
            attempts = receipt.attempts,
            "Telegram message delivered"
        );
        Ok(receipt)
    }

    async fn status(&self) -> ProviderStatus {
        let status = match self.api.get_me().await {
            Ok(bot) => {
                let detail = match bot.username {
                    Some(username) => format!("Bot: @{} ({})", username, bot.first_name),
                    None => format!("Bot: {}", bot.first_name),
                };
                ProviderStatus::active(&self.checksum).with_detail(detail)
            }
            Err(e) => ProviderStatus::error(&self.checksum, format!("Failed to connect to Telegram: {}", e)),
        };
        self.tests.apply(status)
    }

    fn test_recipient(&self) -> Result<String, DeliveryError> {
        let chat = self.settings.test_chat_id.as_ref().unwrap_or(&self.settings.default_chat_id);
        Ok(chat.to_string())
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
            tracing::debug!(provider_id = %self.id, "Closed Telegram provider");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
