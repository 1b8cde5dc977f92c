use super::{chat_messages_key, message_key, CacheError, Message, MessageCache};
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// In-process message cache backed by moka
///
/// Used when no Redis URL is configured, and as a well-behaved backend in tests.
#[derive(Debug, Clone)]
pub struct MemoryMessageCache {
    messages: Cache<String, Arc<Message>>,
    chat_messages: Cache<String, Arc<Vec<Message>>>,
}

impl MemoryMessageCache {
    pub fn new(max_capacity: u64, message_ttl: Duration, chat_messages_ttl: Duration) -> Self {
        info!(
            max_capacity,
            message_ttl_secs = message_ttl.as_secs(),
            chat_messages_ttl_secs = chat_messages_ttl.as_secs(),
            "Initialized in-memory message cache"
        );

        Self {
            messages: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(message_ttl)
                .build(),
            chat_messages: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(chat_messages_ttl)
                .build(),
        }
    }
}

impl Default for MemoryMessageCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(24 * 3600), Duration::from_secs(3600))
    }
}

#[async_trait]
impl MessageCache for MemoryMessageCache {
    async fn set_message(&self, message: &Message) -> Result<(), CacheError> {
        self.messages
            .insert(message_key(&message.id), Arc::new(message.clone()))
            .await;
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, CacheError> {
        let hit = self.messages.get(&message_key(message_id)).await;
        debug!(message_id, hit = hit.is_some(), "Memory cache lookup");
        Ok(hit.map(|message| message.as_ref().clone()))
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), CacheError> {
        self.messages.invalidate(&message_key(message_id)).await;
        Ok(())
    }

    async fn set_chat_messages(&self, chat_id: &str, messages: &[Message]) -> Result<(), CacheError> {
        self.chat_messages
            .insert(chat_messages_key(chat_id), Arc::new(messages.to_vec()))
            .await;
        Ok(())
    }

    async fn get_chat_messages(&self, chat_id: &str) -> Result<Option<Vec<Message>>, CacheError> {
        let hit = self.chat_messages.get(&chat_messages_key(chat_id)).await;
        Ok(hit.map(|messages| messages.as_ref().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            chat_id: "chat-1".to_string(),
            sender_id: "alice".to_string(),
            content: "hello".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_message_lifecycle() {
        let cache = MemoryMessageCache::default();
        assert_eq!(cache.get_message("m1").await.unwrap(), None);

        let msg = message("m1");
        cache.set_message(&msg).await.unwrap();
        assert_eq!(cache.get_message("m1").await.unwrap(), Some(msg));

        cache.delete_message("m1").await.unwrap();
        assert_eq!(cache.get_message("m1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_chat_messages() {
        let cache = MemoryMessageCache::default();
        let history = vec![message("m1"), message("m2")];

        cache.set_chat_messages("chat-1", &history).await.unwrap();

        assert_eq!(cache.get_chat_messages("chat-1").await.unwrap(), Some(history));
        assert_eq!(cache.get_chat_messages("chat-2").await.unwrap(), None);
    }
}
