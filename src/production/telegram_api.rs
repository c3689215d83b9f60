//! Reqwest-based Telegram Bot API client

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::providers::TelegramSettings;
use crate::traits::{BotInfo, OutgoingMessage, ProviderError, ProviderKind, TelegramApi, TelegramApiError};

/// Response wrapper every Bot API method returns
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    chat_id: &'a crate::traits::ChatId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

pub struct ReqwestTelegramApi {
    client: Client,
    // Carries the bot token; never log it
    base_url: String,
}

impl ReqwestTelegramApi {
    pub fn new(settings: &TelegramSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| ProviderError::Transport {
                kind: ProviderKind::Telegram,
                message: e.to_string(),
            })?;

        tracing::debug!(
            endpoint = %settings.api_endpoint,
            timeout_secs = settings.timeout.as_secs(),
            "Initialized Telegram API client"
        );
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", settings.api_endpoint.trim_end_matches('/'), settings.bot_token),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TelegramApiError> {
        let status = response.status();
        let envelope: ApiEnvelope<T> = response.json().await.map_err(|e| {
            if status.is_success() {
                TelegramApiError::InvalidResponse(e.to_string())
            } else {
                // Non-JSON error page from a proxy or gateway
                TelegramApiError::Api {
                    code: status.as_u16(),
                    description: status.canonical_reason().unwrap_or("unknown error").to_string(),
                    retry_after: None,
                }
            }
        })?;

        if envelope.ok {
            return envelope
                .result
                .ok_or_else(|| TelegramApiError::InvalidResponse("missing result".to_string()));
        }

        Err(TelegramApiError::Api {
            code: envelope.error_code.unwrap_or_else(|| status.as_u16()),
            description: envelope.description.unwrap_or_else(|| "unknown error".to_string()),
            retry_after: envelope.parameters.and_then(|p| p.retry_after),
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TelegramApiError {
    // Strip the URL: it embeds the bot token
    let e = e.without_url();
    if e.is_timeout() {
        tracing::warn!("Telegram API request timed out");
        TelegramApiError::Timeout
    } else {
        tracing::warn!(error = %e, "Telegram API network error");
        TelegramApiError::NetworkError(e.to_string())
    }
}

#[async_trait::async_trait]
impl TelegramApi for ReqwestTelegramApi {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<i64, TelegramApiError> {
        let body = SendMessageBody {
            chat_id: &message.chat_id,
            text: &message.text,
            parse_mode: message.parse_mode.as_deref(),
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let sent: SentMessage = Self::decode(response).await?;
        tracing::debug!(chat_id = %message.chat_id, message_id = sent.message_id, "Telegram message sent");
        Ok(sent.message_id)
    }

    async fn get_me(&self) -> Result<BotInfo, TelegramApiError> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_parsing() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7","parameters":{"retry_after":7}}"#;
        let envelope: ApiEnvelope<SentMessage> = serde_json::from_str(body).unwrap();

        assert!(!envelope.ok);
        assert_eq!(envelope.error_code, Some(429));
        assert_eq!(envelope.parameters.and_then(|p| p.retry_after), Some(7));
    }

    #[test]
    fn test_success_envelope_parsing() {
        let body = r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"Relay","username":"relay_bot"}}"#;
        let envelope: ApiEnvelope<BotInfo> = serde_json::from_str(body).unwrap();

        let bot = envelope.result.unwrap();
        assert_eq!(bot.id, 42);
        assert_eq!(bot.username.as_deref(), Some("relay_bot"));
    }

    #[test]
    fn test_send_body_shape() {
        let chat = crate::traits::ChatId::Username("@ops_alerts".into());
        let body = SendMessageBody { chat_id: &chat, text: "hi", parse_mode: None };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"chat_id": "@ops_alerts", "text": "hi"})
        );
    }
}
