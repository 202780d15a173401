pub mod checkable;
pub mod monitor;

pub use checkable::TimeBoundedHealthChecker;
pub use monitor::HealthMonitor;

use crate::error::{Error, Result};

/// A subtask whose liveness can be polled by the health monitor.
pub trait HealthCheckable: Send + Sync {
    fn service_name(&self) -> &str;

    fn report_success(&self);

    fn report_failure(&self, err: Error);

    /// `Ok` while the service is healthy, otherwise the reason it is not.
    fn health_check(&self) -> Result<()>;
}
