use super::breaker::CircuitBreaker;
use super::clock::{Clock, SystemClock};
use super::observer::SharedObserver;
use super::types::{CircuitBreakerConfig, CircuitBreakerSnapshot};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Options applied when a breaker is created for the first time
#[derive(Clone, Default)]
pub struct BreakerOptions {
    /// Overrides the registry defaults
    pub config: Option<CircuitBreakerConfig>,
    /// Notified after the registry-wide observers
    pub observer: Option<SharedObserver>,
}

impl BreakerOptions {
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl From<CircuitBreakerConfig> for BreakerOptions {
    fn from(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Some(config),
            observer: None,
        }
    }
}

/// Hands out one shared circuit breaker per operation name
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    /// Circuit breakers per operation
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    /// Configuration for breakers created without an explicit one
    defaults: CircuitBreakerConfig,
    /// Attached to every breaker this registry creates
    observers: Arc<Vec<SharedObserver>>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    /// Registry with default configuration on the system clock
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CircuitBreakerRegistryBuilder {
        CircuitBreakerRegistryBuilder {
            defaults: CircuitBreakerConfig::default(),
            observers: Vec::new(),
            clock: None,
        }
    }

    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    /// Get or create the breaker for `name` with the registry defaults
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with(name, BreakerOptions::default())
    }

    /// Get or create the breaker for `name`
    ///
    /// `options` only apply if this call creates the breaker; an existing
    /// breaker is returned as is.
    pub fn get_with(&self, name: &str, options: impl Into<BreakerOptions>) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.value().clone();
        }

        let options = options.into();
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(self.create(name, options)))
            .value()
            .clone()
    }

    /// Look up a breaker without creating one
    pub fn find(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    /// Forget a breaker along with its configuration
    ///
    /// The next lookup creates a fresh breaker from whatever options it passes.
    /// Holders of the removed instance keep using it until they look it up again.
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let removed = self.breakers.remove(name).map(|(_, breaker)| breaker);
        if removed.is_some() {
            info!(breaker = %name, "Circuit breaker removed from registry");
        }
        removed
    }

    /// Close a breaker in place, keeping its configuration and observers
    ///
    /// Returns false if no breaker is registered under `name`.
    pub fn reset(&self, name: &str) -> bool {
        match self.find(name) {
            Some(breaker) => {
                breaker.reset();
                info!(breaker = %name, "Circuit breaker reset");
                true
            }
            None => false,
        }
    }

    /// Copy of the current name to breaker mapping
    pub fn list_all(&self) -> HashMap<String, Arc<CircuitBreaker>> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Snapshots of every registered breaker, sorted by name
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .list_all()
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn create(&self, name: &str, options: BreakerOptions) -> CircuitBreaker {
        debug!(breaker = %name, "Creating new circuit breaker");

        CircuitBreaker::builder(name)
            .config(options.config.unwrap_or_else(|| self.defaults.clone()))
            .clock(self.clock.clone())
            .observers(self.observers.iter().cloned())
            .observers(options.observer)
            .build()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.breakers.len())
            .field("defaults", &self.defaults)
            .field("observers", &self.observers.len())
            .field("clock", &self.clock)
            .finish()
    }
}

pub struct CircuitBreakerRegistryBuilder {
    defaults: CircuitBreakerConfig,
    observers: Vec<SharedObserver>,
    clock: Option<Arc<dyn Clock>>,
}

impl CircuitBreakerRegistryBuilder {
    pub fn defaults(mut self, defaults: CircuitBreakerConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry {
            breakers: Arc::new(DashMap::new()),
            defaults: self.defaults,
            observers: Arc::new(self.observers),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        }
    }
}
