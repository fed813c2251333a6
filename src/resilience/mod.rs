pub mod types;
pub mod circuit_breaker;
pub mod retry;
pub mod single_flight;

#[cfg(test)]
mod tests;

pub use types::*;
pub use circuit_breaker::{BreakerSnapshot, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use retry::{RetryExecutor, RetryPolicy, with_timeout};
pub use single_flight::{SingleFlight, SingleFlightStats};
