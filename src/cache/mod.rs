pub mod memory;
pub mod protected;
pub mod redis;

pub use memory::MemoryMessageCache;
pub use protected::{CacheOperation, OperationBinding, ProtectedCache, ProtectedCacheError};
pub use redis::RedisMessageCache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Chat message as stored in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Errors raised by a cache backend
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Result of a read through a protected cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<T> {
    /// Value found
    Hit(T),
    /// Backend answered and had nothing under the key
    Miss,
    /// Circuit open, the backend was not asked
    Unavailable,
}

impl<T> CacheLookup<T> {
    /// Collapse misses and refusals into `None` for callers that fall back either way
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            CacheLookup::Miss | CacheLookup::Unavailable => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheLookup::Unavailable)
    }
}

impl<T> From<Option<T>> for CacheLookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => CacheLookup::Hit(value),
            None => CacheLookup::Miss,
        }
    }
}

/// Remote message store
///
/// Implementations report a missing key as `Ok(None)`, never as an error.
#[async_trait]
pub trait MessageCache: Send + Sync {
    async fn set_message(&self, message: &Message) -> Result<(), CacheError>;

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, CacheError>;

    async fn delete_message(&self, message_id: &str) -> Result<(), CacheError>;

    async fn set_chat_messages(&self, chat_id: &str, messages: &[Message]) -> Result<(), CacheError>;

    async fn get_chat_messages(&self, chat_id: &str) -> Result<Option<Vec<Message>>, CacheError>;
}

/// Type-erased message cache, chosen at startup from configuration
pub type SharedMessageCache = Arc<dyn MessageCache>;

#[async_trait]
impl<T: MessageCache + ?Sized> MessageCache for Arc<T> {
    async fn set_message(&self, message: &Message) -> Result<(), CacheError> {
        (**self).set_message(message).await
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, CacheError> {
        (**self).get_message(message_id).await
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), CacheError> {
        (**self).delete_message(message_id).await
    }

    async fn set_chat_messages(&self, chat_id: &str, messages: &[Message]) -> Result<(), CacheError> {
        (**self).set_chat_messages(chat_id, messages).await
    }

    async fn get_chat_messages(&self, chat_id: &str) -> Result<Option<Vec<Message>>, CacheError> {
        (**self).get_chat_messages(chat_id).await
    }
}

pub(crate) fn message_key(message_id: &str) -> String {
    format!("message:{}", message_id)
}

pub(crate) fn chat_messages_key(chat_id: &str) -> String {
    format!("chat:{}:messages", chat_id)
}
