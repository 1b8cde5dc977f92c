use super::{CacheError, CacheLookup, Message, MessageCache};
use crate::circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitOpenError,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Default deadline for a single cache call
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(1);

/// Logical cache operations, each guarded by its own breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    SetMessage,
    GetMessage,
    DeleteMessage,
    SetChatMessages,
    GetChatMessages,
}

impl CacheOperation {
    pub const ALL: [CacheOperation; 5] = [
        CacheOperation::SetMessage,
        CacheOperation::GetMessage,
        CacheOperation::DeleteMessage,
        CacheOperation::SetChatMessages,
        CacheOperation::GetChatMessages,
    ];

    /// Registry name of the breaker guarding this operation
    pub fn breaker_name(&self) -> &'static str {
        match self {
            CacheOperation::SetMessage => "redis-set-message",
            CacheOperation::GetMessage => "redis-get-message",
            CacheOperation::DeleteMessage => "redis-delete-message",
            CacheOperation::SetChatMessages => "redis-set-chat-messages",
            CacheOperation::GetChatMessages => "redis-get-chat-messages",
        }
    }

    pub fn from_breaker_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|operation| operation.breaker_name() == name)
    }
}

/// Deadline and breaker configuration for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationBinding {
    pub timeout: Duration,
    /// `None` uses the registry defaults
    pub breaker: Option<CircuitBreakerConfig>,
}

impl OperationBinding {
    /// Built-in binding for an operation
    pub fn default_for(operation: CacheOperation) -> Self {
        let breaker = match operation {
            CacheOperation::SetMessage => Some(CircuitBreakerConfig::new(5, Duration::from_secs(10), 2)),
            _ => None,
        };

        Self {
            timeout: DEFAULT_OPERATION_TIMEOUT,
            breaker,
        }
    }

    pub fn default_table() -> HashMap<CacheOperation, OperationBinding> {
        CacheOperation::ALL
            .into_iter()
            .map(|operation| (operation, Self::default_for(operation)))
            .collect()
    }
}

/// Error from a protected write
#[derive(Error, Debug)]
pub enum ProtectedCacheError {
    /// Circuit open, the backend was not called
    #[error("service temporarily unavailable: {0}")]
    Unavailable(#[from] CircuitOpenError),

    /// The backend was called and failed
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ProtectedCacheError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ProtectedCacheError::Unavailable(_))
    }
}

impl From<BreakerError<CacheError>> for ProtectedCacheError {
    fn from(err: BreakerError<CacheError>) -> Self {
        match err {
            BreakerError::Open(open) => ProtectedCacheError::Unavailable(open),
            BreakerError::Inner(inner) => ProtectedCacheError::Cache(inner),
        }
    }
}

/// Message cache wrapper that applies a circuit breaker and a deadline to every call
///
/// Reads never surface an open circuit as an error: they return
/// [`CacheLookup::Unavailable`] so the caller can go to the authoritative store.
/// A cache miss is a successful call and never counts against the breaker.
pub struct ProtectedCache<C> {
    inner: Arc<C>,
    registry: CircuitBreakerRegistry,
    bindings: HashMap<CacheOperation, OperationBinding>,
}

impl<C: MessageCache> ProtectedCache<C> {
    pub fn new(inner: C, registry: CircuitBreakerRegistry) -> Self {
        Self::with_bindings(inner, registry, OperationBinding::default_table())
    }

    /// Operations missing from `bindings` use their built-in binding
    pub fn with_bindings(
        inner: C,
        registry: CircuitBreakerRegistry,
        mut bindings: HashMap<CacheOperation, OperationBinding>,
    ) -> Self {
        for operation in CacheOperation::ALL {
            bindings
                .entry(operation)
                .or_insert_with(|| OperationBinding::default_for(operation));
        }

        Self {
            inner: Arc::new(inner),
            registry,
            bindings,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry {
        &self.registry
    }

    pub fn binding(&self, operation: CacheOperation) -> OperationBinding {
        self.bindings
            .get(&operation)
            .cloned()
            .unwrap_or_else(|| OperationBinding::default_for(operation))
    }

    /// Breaker for an operation, created with the binding's configuration on first use
    pub fn breaker(&self, operation: CacheOperation) -> Arc<CircuitBreaker> {
        let binding = self.binding(operation);
        match binding.breaker {
            Some(config) => self.registry.get_with(operation.breaker_name(), config),
            None => self.registry.get(operation.breaker_name()),
        }
    }

    /// Create every bound breaker up front so they are visible before first use
    pub fn register_breakers(&self) {
        for operation in CacheOperation::ALL {
            self.breaker(operation);
        }
    }

    pub async fn set_message(&self, message: &Message) -> Result<(), ProtectedCacheError> {
        self.guarded(CacheOperation::SetMessage, || self.inner.set_message(message))
            .await
            .map_err(ProtectedCacheError::from)
    }

    pub async fn get_message(&self, message_id: &str) -> Result<CacheLookup<Message>, CacheError> {
        self.read(CacheOperation::GetMessage, || self.inner.get_message(message_id))
            .await
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<(), ProtectedCacheError> {
        self.guarded(CacheOperation::DeleteMessage, || {
            self.inner.delete_message(message_id)
        })
        .await
        .map_err(ProtectedCacheError::from)
    }

    pub async fn set_chat_messages(
        &self,
        chat_id: &str,
        messages: &[Message],
    ) -> Result<(), ProtectedCacheError> {
        self.guarded(CacheOperation::SetChatMessages, || {
            self.inner.set_chat_messages(chat_id, messages)
        })
        .await
        .map_err(ProtectedCacheError::from)
    }

    pub async fn get_chat_messages(
        &self,
        chat_id: &str,
    ) -> Result<CacheLookup<Vec<Message>>, CacheError> {
        self.read(CacheOperation::GetChatMessages, || {
            self.inner.get_chat_messages(chat_id)
        })
        .await
    }

    async fn read<T, F, Fut>(&self, operation: CacheOperation, call: F) -> Result<CacheLookup<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, CacheError>>,
    {
        match self.guarded(operation, call).await {
            Ok(found) => Ok(CacheLookup::from(found)),
            Err(BreakerError::Open(_)) => {
                warn!(
                    operation = operation.breaker_name(),
                    "Circuit open, reporting cache as unavailable"
                );
                Ok(CacheLookup::Unavailable)
            }
            Err(BreakerError::Inner(e)) => Err(e),
        }
    }

    /// Run `call` through the operation's breaker with the operation's deadline
    async fn guarded<T, F, Fut>(&self, operation: CacheOperation, call: F) -> Result<T, BreakerError<CacheError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let timeout = self.binding(operation).timeout;
        let breaker = self.breaker(operation);

        let result = breaker
            .execute(|| async move {
                match tokio::time::timeout(timeout, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(CacheError::Timeout(timeout)),
                }
            })
            .await;

        match &result {
            Err(BreakerError::Inner(e)) => error!(
                operation = operation.breaker_name(),
                error = %e,
                "Cache operation failed"
            ),
            Err(BreakerError::Open(_)) => debug!(
                operation = operation.breaker_name(),
                "Cache operation rejected by open circuit"
            ),
            Ok(_) => {}
        }

        result
    }
}

impl<C> std::fmt::Debug for ProtectedCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedCache")
            .field("registry", &self.registry)
            .field("bindings", &self.bindings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryMessageCache;

    #[test]
    fn test_breaker_names_round_trip() {
        for operation in CacheOperation::ALL {
            assert_eq!(
                CacheOperation::from_breaker_name(operation.breaker_name()),
                Some(operation)
            );
        }
        assert_eq!(CacheOperation::from_breaker_name("redis-unknown"), None);
    }

    #[test]
    fn test_set_message_binding_uses_two_probe_calls() {
        let binding = OperationBinding::default_for(CacheOperation::SetMessage);
        assert_eq!(binding.timeout, Duration::from_secs(1));
        assert_eq!(binding.breaker.unwrap().half_open_max_calls, 2);
        assert!(OperationBinding::default_for(CacheOperation::GetMessage)
            .breaker
            .is_none());
    }

    #[test]
    fn test_register_breakers_creates_all() {
        let registry = CircuitBreakerRegistry::new();
        let cache = ProtectedCache::new(MemoryMessageCache::default(), registry.clone());

        cache.register_breakers();

        assert_eq!(registry.len(), CacheOperation::ALL.len());
        let set_message = registry.find("redis-set-message").unwrap();
        assert_eq!(set_message.config().half_open_max_calls, 2);
    }

    #[test]
    fn test_custom_bindings_fill_missing_operations() {
        let mut bindings = HashMap::new();
        bindings.insert(
            CacheOperation::GetMessage,
            OperationBinding {
                timeout: Duration::from_millis(200),
                breaker: None,
            },
        );
        let cache = ProtectedCache::with_bindings(
            MemoryMessageCache::default(),
            CircuitBreakerRegistry::new(),
            bindings,
        );

        assert_eq!(
            cache.binding(CacheOperation::GetMessage).timeout,
            Duration::from_millis(200)
        );
        assert_eq!(
            cache.binding(CacheOperation::DeleteMessage),
            OperationBinding::default_for(CacheOperation::DeleteMessage)
        );
    }
}
