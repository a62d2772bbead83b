//! Pipeline entry points.
//!
//! - `Harvester`: run one extraction request end to end
//! - `run_with_retry`: bounded retries with a shared circuit breaker
//! - `with_session_renewal`: renew once when a step lands on the login flow
//! - `run_validate`: check a config file

pub mod circuit_breaker;
pub mod harvest;
pub mod validate;

pub use circuit_breaker::{
    BreakerState, CircuitBreaker, FaultClass, RetryPolicy, classify, run_with_retry,
    with_session_renewal,
};
pub use harvest::{HarvestFailure, HarvestOutcome, HarvestStats, HarvestWarning, Harvester};
pub use validate::run_validate;
