use crate::cache::{CacheOperation, OperationBinding};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis message cache; in-memory cache when absent
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Defaults for breakers created without explicit configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Protected cache bindings
    #[serde(default)]
    pub protected_cache: ProtectedCacheConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// TTL for single messages
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,
    /// TTL for chat histories
    #[serde(default = "default_chat_messages_ttl_secs")]
    pub chat_messages_ttl_secs: u64,
}

/// Protected cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedCacheConfig {
    /// Deadline for each cache call unless overridden per operation
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Per-operation overrides keyed by breaker name (e.g. "redis-get-message")
    #[serde(default)]
    pub operations: HashMap<String, OperationOverride>,
}

/// Override for a single protected operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationOverride {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub circuit_breaker: Option<BreakerOverride>,
}

/// Breaker fields to change for one operation
///
/// Missing fields keep the operation's built-in value, or the registry
/// defaults when the operation has none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerOverride {
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub reset_timeout_ms: Option<u64>,
    #[serde(default)]
    pub half_open_max_calls: Option<u32>,
}

impl BreakerOverride {
    pub fn apply(&self, base: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            reset_timeout_ms: self.reset_timeout_ms.unwrap_or(base.reset_timeout_ms),
            half_open_max_calls: self.half_open_max_calls.unwrap_or(base.half_open_max_calls),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "chat_resilience=info,tower_http=info".to_string()
}

fn default_message_ttl_secs() -> u64 {
    24 * 3600
}

fn default_chat_messages_ttl_secs() -> u64 {
    3600
}

fn default_operation_timeout_ms() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for ProtectedCacheConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
            operations: HashMap::new(),
        }
    }
}

impl RedisConfig {
    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }

    pub fn chat_messages_ttl(&self) -> Duration {
        Duration::from_secs(self.chat_messages_ttl_secs)
    }
}

impl ProtectedCacheConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Binding table: built-in bindings, the global timeout, then per-operation overrides
    ///
    /// `defaults` are the registry defaults, the base for overrides of operations
    /// without a built-in breaker configuration.
    pub fn bindings(
        &self,
        defaults: &CircuitBreakerConfig,
    ) -> Result<HashMap<CacheOperation, OperationBinding>> {
        let mut bindings = OperationBinding::default_table();
        for binding in bindings.values_mut() {
            binding.timeout = self.operation_timeout();
        }

        for (name, override_) in &self.operations {
            let operation = CacheOperation::from_breaker_name(name).ok_or_else(|| {
                ServiceError::Config(format!("Unknown protected cache operation: {}", name))
            })?;
            let binding = bindings
                .entry(operation)
                .or_insert_with(|| OperationBinding::default_for(operation));
            if let Some(timeout_ms) = override_.timeout_ms {
                binding.timeout = Duration::from_millis(timeout_ms);
            }
            if let Some(breaker) = &override_.circuit_breaker {
                let base = binding.breaker.as_ref().unwrap_or(defaults);
                binding.breaker = Some(breaker.apply(base));
            }
        }

        Ok(bindings)
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ServiceError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(problem) = self.circuit_breaker.invalid_field() {
            return Err(ServiceError::Config(format!(
                "Invalid circuit_breaker defaults: {}",
                problem
            )));
        }

        if self.protected_cache.operation_timeout_ms == 0 {
            return Err(ServiceError::Config(
                "protected_cache.operation_timeout_ms must be > 0".to_string(),
            ));
        }

        for (name, override_) in &self.protected_cache.operations {
            if CacheOperation::from_breaker_name(name).is_none() {
                return Err(ServiceError::Config(format!(
                    "Unknown protected cache operation: {}",
                    name
                )));
            }
            if override_.timeout_ms == Some(0) {
                return Err(ServiceError::Config(format!(
                    "timeout_ms must be > 0 for operation: {}",
                    name
                )));
            }
            if let Some(problem) = override_
                .circuit_breaker
                .as_ref()
                .and_then(|breaker| breaker.apply(&self.circuit_breaker).invalid_field())
            {
                return Err(ServiceError::Config(format!(
                    "Invalid circuit_breaker for operation {}: {}",
                    name, problem
                )));
            }
        }

        if let Some(redis) = &self.redis {
            if !redis.url.starts_with("redis://") && !redis.url.starts_with("rediss://") {
                return Err(ServiceError::Config(
                    "Redis URL must start with redis:// or rediss://".to_string(),
                ));
            }
            if redis.message_ttl_secs == 0 || redis.chat_messages_ttl_secs == 0 {
                return Err(ServiceError::Config(
                    "Redis TTLs must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}
