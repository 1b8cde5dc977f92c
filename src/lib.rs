pub mod admin;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod metrics;

use crate::admin::setup_admin_router;
use crate::cache::{MemoryMessageCache, ProtectedCache, RedisMessageCache, SharedMessageCache};
use crate::circuit_breaker::{CircuitBreakerRegistry, LoggingObserver, MetricsObserver};
use crate::config::{AppConfig, LogFormat, LoggingConfig};
use crate::error::{Result, ServiceError};
use axum::Router as AxumRouter;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Long-lived pieces shared by the server and its callers
pub struct Components {
    pub registry: CircuitBreakerRegistry,
    pub cache: ProtectedCache<SharedMessageCache>,
}

/// Registry with the configured defaults, logging and metrics observers on every breaker
pub fn build_registry(config: &AppConfig) -> CircuitBreakerRegistry {
    CircuitBreakerRegistry::builder()
        .defaults(config.circuit_breaker.clone())
        .observer(Arc::new(LoggingObserver))
        .observer(Arc::new(MetricsObserver))
        .build()
}

/// Connect the message cache and wrap it in circuit breakers
pub async fn build_components(config: &AppConfig) -> Result<Components> {
    let registry = build_registry(config);

    let store: SharedMessageCache = match &config.redis {
        Some(redis) => Arc::new(
            RedisMessageCache::connect(&redis.url, redis.message_ttl(), redis.chat_messages_ttl())
                .await?,
        ),
        None => {
            info!("No Redis configured, using in-memory message cache");
            Arc::new(MemoryMessageCache::default())
        }
    };

    let bindings = config.protected_cache.bindings(&config.circuit_breaker)?;
    let cache = ProtectedCache::with_bindings(store, registry.clone(), bindings);
    cache.register_breakers();

    Ok(Components { registry, cache })
}

/// HTTP application: admin routes under /api
pub fn build_app(registry: CircuitBreakerRegistry) -> AxumRouter {
    AxumRouter::new()
        .nest("/api", setup_admin_router(registry))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Initialize the service and serve until the listener fails
pub async fn init_server(config: AppConfig) -> Result<()> {
    // Validate configuration
    config.validate()?;
    crate::metrics::describe_metrics();

    info!("Starting chat resilience service");

    let components = build_components(&config).await?;
    info!(
        breakers = components.registry.len(),
        "Circuit breakers registered"
    );

    let app = build_app(components.registry.clone());

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(ServiceError::Io)?;

    info!(addr = %addr, "Admin interface ready to accept connections");

    axum::serve(listener, app)
        .await
        .map_err(|e| ServiceError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Initialize tracing/logging
pub fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}
