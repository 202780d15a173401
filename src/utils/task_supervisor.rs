use tokio::task::JoinHandle;
use tracing::{error, info};
use crate::error::Error;

/// Task Supervisor - tracks the daemon's long-lived workers
///
/// Every worker is spawned through the supervisor so that shutdown can wait
/// for all of them to exit.
///
/// ## Usage
/// ```rust,ignore
/// let mut supervisor = TaskSupervisor::new();
/// supervisor.spawn("price_fetcher_Binance", fetcher.run(stop_rx));
///
/// // Later, after signalling stop:
/// supervisor.wait_all().await;
/// ```
pub struct TaskSupervisor {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor { tasks: Vec::new() }
    }

    /// Spawn a new background task and register it
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> &mut Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(future);

        info!("Spawned background task: {}", name);
        self.tasks.push((name, handle));
        self
    }

    /// Waits for every registered task to exit. Returns the tasks that panicked.
    pub async fn wait_all(&mut self) -> Vec<Error> {
        info!("Waiting for {} background tasks", self.tasks.len());
        let mut failures = Vec::new();

        for (name, handle) in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                error!("Task {} failed: {:?}", name, e);
                failures.push(Error::TaskFailed {
                    name,
                    reason: e.to_string(),
                });
            }
        }
        failures
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
