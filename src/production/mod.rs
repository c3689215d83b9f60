//! Production implementations of traits

mod file_watcher;
mod log_sink;
mod mail_transport;
mod telegram_api;

pub use file_watcher::NotifyWatcher;
pub use log_sink::{SqliteLogSink, StoredLog};
pub use mail_transport::LettreMailTransport;
pub use telegram_api::ReqwestTelegramApi;
