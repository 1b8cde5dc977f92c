pub mod breaker;
pub mod clock;
pub mod observer;
pub mod registry;
pub mod types;

pub use breaker::{CircuitBreaker, CircuitBreakerBuilder, CircuitPermit};
pub use clock::{Clock, ManualClock, SystemClock};
pub use observer::{LoggingObserver, MetricsObserver, SharedObserver, StateObserver};
pub use registry::{BreakerOptions, CircuitBreakerRegistry, CircuitBreakerRegistryBuilder};
pub use types::{
    BreakerError, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerSnapshot,
    CircuitOpenError, CircuitState,
};
