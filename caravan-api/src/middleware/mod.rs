pub mod auth;
pub mod resiliency;

pub use auth::{require_auth, Claims};
pub use resiliency::{circuit_breaker_middleware, CircuitBreaker, ResiliencyState};
