//! Telegram Bot API client trait

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TelegramApiError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Timeout")]
    Timeout,
    #[error("Telegram API error {code}: {description}")]
    Api {
        code: u16,
        description: String,
        retry_after: Option<u64>,
    },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TelegramApiError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            TelegramApiError::NetworkError(_) => true,
            TelegramApiError::Timeout => true,
            TelegramApiError::Api { code, retry_after, .. } => {
                // Flood control and server errors; 4xx rejections are final
                retry_after.is_some() || *code == 429 || *code >= 500
            }
            TelegramApiError::InvalidResponse(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TelegramApiError::Api { retry_after: Some(secs), .. } if *secs > 0 => {
                Some(Duration::from_secs(*secs))
            }
            _ => None,
        }
    }
}

/// Chat destination: numeric chat id or public `@username`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChatId {
    Numeric(i64),
    Username(String),
}

impl FromStr for ChatId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix('@') {
            let valid = (5..=32).contains(&name.len())
                && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if valid {
                return Ok(ChatId::Username(s.to_string()));
            }
            return Err(format!("invalid Telegram username: {}", s));
        }
        s.parse::<i64>()
            .map(ChatId::Numeric)
            .map_err(|_| format!("invalid Telegram chat ID: {}", s))
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatId::Numeric(id) => write!(f, "{}", id),
            ChatId::Username(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub parse_mode: Option<String>,
}

/// Identity returned by `getMe`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BotInfo {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Trait for Telegram Bot API calls
///
/// Production: reqwest HTTP client
/// Testing: Recorded responses
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TelegramApi: Send + Sync {
    /// Send a text message, returning the Telegram message id
    async fn send_message(&self, message: &OutgoingMessage) -> Result<i64, TelegramApiError>;

    /// Fetch the bot identity; doubles as a connectivity probe
    async fn get_me(&self) -> Result<BotInfo, TelegramApiError>;
}
