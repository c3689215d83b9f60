//! Trait definitions for dependency injection
//!
//! Every channel, the log store and the filesystem are abstracted behind traits
//! so the relay core can be exercised without network or disk.

mod file_watcher;
mod log_sink;
mod mail_transport;
mod provider;
mod telegram_api;

pub use file_watcher::{EventSender, FileEvent, FileEventKind, FileWatcher, FileWatcherError};
pub use log_sink::{LogSink, SinkError};
pub use mail_transport::{MailError, MailTransport, OutgoingMail};
pub use provider::{
    ChannelError, DeliveryError, DeliveryReceipt, Provider, ProviderError, ProviderKind,
    ProviderState, ProviderStatus, TestDelivery, TestResult,
};
pub use telegram_api::{BotInfo, ChatId, OutgoingMessage, TelegramApi, TelegramApiError};

#[cfg(test)]
pub use log_sink::MockLogSink;
#[cfg(test)]
pub use mail_transport::MockMailTransport;
#[cfg(test)]
pub use telegram_api::MockTelegramApi;
