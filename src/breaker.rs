use failsafe::backoff::EqualJittered;
use failsafe::failure_policy::{ConsecutiveFailures, OrElse, SuccessRateOverTimeWindow};
use failsafe::{CircuitBreaker, Config, StateMachine};

use crate::error::CatalogError;

pub(crate) type CircuitBreakerType = StateMachine<
    OrElse<SuccessRateOverTimeWindow<EqualJittered>, ConsecutiveFailures<EqualJittered>>,
    (),
>;

pub(crate) fn new_breaker() -> CircuitBreakerType {
    Config::new().build()
}

fn counts_as_failure(err: &CatalogError) -> bool {
    err.is_store_failure()
}

/// Runs a store call through the breaker. Request errors (missing ids,
/// validation, conflicts) pass through without touching the failure count.
pub(crate) fn guarded<T, F>(breaker: &CircuitBreakerType, f: F) -> Result<T, CatalogError>
where
    F: FnOnce() -> Result<T, CatalogError>,
{
    match breaker.call_with(counts_as_failure, f) {
        Ok(val) => Ok(val),
        Err(failsafe::Error::Inner(err)) => Err(err),
        Err(failsafe::Error::Rejected) => {
            //store is not responsive, fail fast
            log::warn!("circuit breaker open, rejecting store call");
            Err(CatalogError::Unavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_keep_breaker_closed() {
        let breaker = new_breaker();
        for id in 0..50 {
            let res: Result<(), _> = guarded(&breaker, || Err(CatalogError::not_found("maki", id)));
            assert!(matches!(res, Err(CatalogError::NotFound { .. })));
        }
        assert!(breaker.is_call_permitted());
        assert_eq!(guarded(&breaker, || Ok(3)).unwrap(), 3);
    }

    #[test]
    fn test_store_failures_open_breaker() {
        let breaker = new_breaker();
        for _ in 0..10 {
            let _: Result<(), _> = guarded(&breaker, || {
                Err(CatalogError::Database(
                    diesel::result::Error::RollbackTransaction,
                ))
            });
        }
        assert!(!breaker.is_call_permitted());
        let res = guarded(&breaker, || Ok(1));
        assert!(matches!(res, Err(CatalogError::Unavailable)));
    }
}
