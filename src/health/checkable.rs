use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use crate::error::{Error, Result};
use crate::health::HealthCheckable;
use crate::types::timestamp::Timestamp;

#[derive(Default)]
struct HealthState {
    last_success: Option<Timestamp>,
    last_failure: Option<(Timestamp, Error)>,
}

/// Healthy while the most recent report was a success and that success is
/// no older than `max_acceptable_update_delay`.
pub struct TimeBoundedHealthChecker {
    name: String,
    max_acceptable_update_delay: Duration,
    state: Mutex<HealthState>,
}

impl TimeBoundedHealthChecker {
    pub fn new(name: impl Into<String>, max_acceptable_update_delay: Duration) -> Self {
        TimeBoundedHealthChecker {
            name: name.into(),
            max_acceptable_update_delay,
            state: Mutex::new(HealthState::default()),
        }
    }

    pub fn report_success_at(&self, timestamp: Timestamp) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_success = Some(timestamp);
    }

    pub fn report_failure_at(&self, timestamp: Timestamp, err: Error) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_failure = Some((timestamp, err));
    }

    pub fn health_check_at(&self, now: Timestamp) -> Result<()> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(last_success) = state.last_success else {
            return Err(Error::NoSuccessfulUpdate);
        };

        if let Some((failed_at, err)) = &state.last_failure {
            if *failed_at > last_success {
                return Err(Error::LastUpdateFailed {
                    timestamp: *failed_at,
                    error: err.to_string(),
                });
            }
        }

        if now.duration_since(last_success) > self.max_acceptable_update_delay {
            return Err(Error::StaleUpdate {
                last_success,
                max_delay: self.max_acceptable_update_delay,
            });
        }

        Ok(())
    }
}

impl HealthCheckable for TimeBoundedHealthChecker {
    fn service_name(&self) -> &str {
        &self.name
    }

    fn report_success(&self) {
        self.report_success_at(Timestamp::now());
    }

    fn report_failure(&self, err: Error) {
        self.report_failure_at(Timestamp::now(), err);
    }

    fn health_check(&self) -> Result<()> {
        self.health_check_at(Timestamp::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_DELAY: Duration = Duration::from_secs(5);

    #[test]
    fn test_unhealthy_before_first_success() {
        let checker = TimeBoundedHealthChecker::new("test", MAX_DELAY);
        assert_eq!(checker.health_check_at(Timestamp(1_000)), Err(Error::NoSuccessfulUpdate));

        checker.report_failure_at(Timestamp(1_000), Error::RpcError("down".into()));
        assert_eq!(checker.health_check_at(Timestamp(1_000)), Err(Error::NoSuccessfulUpdate));
    }

    #[test]
    fn test_healthy_after_success() {
        let checker = TimeBoundedHealthChecker::new("test", MAX_DELAY);
        checker.report_success_at(Timestamp(1_000));
        assert!(checker.health_check_at(Timestamp(1_000)).is_ok());
        assert!(checker.health_check_at(Timestamp(6_000)).is_ok());
    }

    #[test]
    fn test_unhealthy_when_last_report_failed() {
        let checker = TimeBoundedHealthChecker::new("test", MAX_DELAY);
        checker.report_success_at(Timestamp(1_000));
        checker.report_failure_at(Timestamp(2_000), Error::RpcError("down".into()));

        assert!(matches!(
            checker.health_check_at(Timestamp(2_000)),
            Err(Error::LastUpdateFailed { timestamp: Timestamp(2_000), .. })
        ));

        checker.report_success_at(Timestamp(3_000));
        assert!(checker.health_check_at(Timestamp(3_000)).is_ok());
    }

    #[test]
    fn test_unhealthy_when_stale() {
        let checker = TimeBoundedHealthChecker::new("test", MAX_DELAY);
        checker.report_success_at(Timestamp(1_000));

        assert_eq!(
            checker.health_check_at(Timestamp(6_001)),
            Err(Error::StaleUpdate {
                last_success: Timestamp(1_000),
                max_delay: MAX_DELAY,
            })
        );
    }
}
