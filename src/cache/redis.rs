use super::{chat_messages_key, message_key, CacheError, Message, MessageCache};
use ::redis::{aio::ConnectionManager, AsyncCommands};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info};

/// Redis-backed message cache
///
/// Values are stored as JSON strings with a per-kind TTL. Connection pooling
/// and reconnects are left to the redis `ConnectionManager`.
#[derive(Clone)]
pub struct RedisMessageCache {
    /// Redis connection manager
    connection: ConnectionManager,
    message_ttl: Duration,
    chat_messages_ttl: Duration,
}

impl RedisMessageCache {
    /// Connect to Redis
    pub async fn connect(
        redis_url: &str,
        message_ttl: Duration,
        chat_messages_ttl: Duration,
    ) -> Result<Self, CacheError> {
        let client = ::redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        info!(
            message_ttl_secs = message_ttl.as_secs(),
            chat_messages_ttl_secs = chat_messages_ttl.as_secs(),
            "Connected to Redis message cache"
        );

        Ok(Self::with_connection(connection, message_ttl, chat_messages_ttl))
    }

    pub fn with_connection(
        connection: ConnectionManager,
        message_ttl: Duration,
        chat_messages_ttl: Duration,
    ) -> Self {
        Self {
            connection,
            message_ttl,
            chat_messages_ttl,
        }
    }

    async fn set_json<T: serde::Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        let mut connection = self.connection.clone();
        connection
            .set_ex::<_, _, ()>(key, payload, ttl.as_secs().max(1))
            .await
            .map_err(|e| {
                error!(key, error = %e, "Redis SETEX failed");
                CacheError::from(e)
            })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let mut connection = self.connection.clone();
        let payload: Option<String> = connection.get(key).await.map_err(|e| {
            error!(key, error = %e, "Redis GET failed");
            CacheError::from(e)
        })?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => {
                debug!(key, "Redis cache miss");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for RedisMessageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisMessageCache")
            .field("connection", &"<redis::aio::ConnectionManager>")
            .field("message_ttl", &self.message_ttl)
            .field("chat_messages_ttl", &self.chat_messages_ttl)
            .finish()
    }
}

#[async_trait]
impl MessageCache for RedisMessageCache {
    async fn set_message(&self, message: &Message) -> Result<(), CacheError> {
        self.set_json(&message_key(&message.id), message, self.message_ttl)
            .await
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, CacheError> {
        self.get_json(&message_key(message_id)).await
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        connection
            .del::<_, ()>(message_key(message_id))
            .await
            .map_err(CacheError::from)
    }

    async fn set_chat_messages(&self, chat_id: &str, messages: &[Message]) -> Result<(), CacheError> {
        self.set_json(&chat_messages_key(chat_id), messages, self.chat_messages_ttl)
            .await
    }

    async fn get_chat_messages(&self, chat_id: &str) -> Result<Option<Vec<Message>>, CacheError> {
        self.get_json(&chat_messages_key(chat_id)).await
    }
}
