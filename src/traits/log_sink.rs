//! Persistence sink for delivery log batches

use thiserror::Error;

use crate::notification::DeliveryLogEntry;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Trait for persisting delivery outcomes
///
/// Production: SQLite
/// Testing: In-memory
#[cfg_attr(test, mockall::automock)]
pub trait LogSink: Send + Sync {
    /// Persist the whole batch atomically; returns rows written
    fn write_batch(&self, entries: &[DeliveryLogEntry]) -> Result<usize, SinkError>;
}
