use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Circuit breaker type shared by outbound service clients.
pub type ServiceBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for the geocoding service.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// While open, lookups fail fast and the engine carries on without
/// coordinates instead of waiting on a dead service for every lead.
pub fn create_geocoder_circuit_breaker() -> ServiceBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
