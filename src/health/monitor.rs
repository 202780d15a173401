use std::sync::Arc;
use std::time::Duration;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};
use crate::error::{Error, Result};
use crate::health::HealthCheckable;
use crate::observability::metrics;

/// Invoked with the service name and its latest health error once a service
/// has been unhealthy for longer than its allowance.
pub type UnhealthyCallback = Arc<dyn Fn(&str, &Error) + Send + Sync>;

struct MonitoredService {
    service: Arc<dyn HealthCheckable>,
    max_unhealthy: Duration,
    registered_at: Instant,
    first_unhealthy: Option<Instant>,
}

/// Polls registered services and escalates the ones that stay unhealthy.
///
/// A newly registered service is not checked until the startup grace period
/// has passed. After that it is polled every `polling_interval`; the first
/// failing poll starts its unhealthy clock and any healthy poll resets it.
pub struct HealthMonitor {
    services: DashMap<String, MonitoredService>,
    startup_grace_period: Duration,
    polling_interval: Duration,
    on_unhealthy: UnhealthyCallback,
    stop_tx: watch::Sender<bool>,
}

impl HealthMonitor {
    pub fn new(startup_grace_period: Duration, polling_interval: Duration, on_unhealthy: UnhealthyCallback) -> Self {
        let (stop_tx, _) = watch::channel(false);
        HealthMonitor {
            services: DashMap::new(),
            startup_grace_period,
            polling_interval,
            on_unhealthy,
            stop_tx,
        }
    }

    pub fn register_service(&self, service: Arc<dyn HealthCheckable>, max_unhealthy: Duration) -> Result<()> {
        if *self.stop_tx.borrow() {
            return Err(Error::MonitorStopped);
        }

        let name = service.service_name().to_string();
        match self.services.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::ServiceAlreadyRegistered(name)),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(MonitoredService {
                    service,
                    max_unhealthy,
                    registered_at: Instant::now(),
                    first_unhealthy: None,
                });
                info!(service = %name, "Registered service with health monitor");
                Ok(())
            }
        }
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Checks every service once. Returns the services that exceeded their
    /// unhealthy allowance, after invoking the callback for each of them.
    pub fn poll_once(&self, now: Instant) -> Vec<String> {
        let mut exceeded = Vec::new();

        for mut entry in self.services.iter_mut() {
            let monitored = entry.value_mut();
            if now < monitored.registered_at + self.startup_grace_period {
                continue;
            }

            match monitored.service.health_check() {
                Ok(()) => {
                    monitored.first_unhealthy = None;
                }
                Err(e) => {
                    let name = monitored.service.service_name().to_string();
                    metrics::HEALTH_CHECK_FAILURES.with_label_values(&[name.as_str()]).inc();

                    let first_unhealthy = *monitored.first_unhealthy.get_or_insert(now);
                    let unhealthy_for = now.saturating_duration_since(first_unhealthy);
                    warn!(service = %name, error = %e, unhealthy_for = ?unhealthy_for, "Service is unhealthy");

                    if unhealthy_for >= monitored.max_unhealthy {
                        exceeded.push((name, e));
                    }
                }
            }
        }

        // Callbacks run outside the map guards.
        for (name, err) in &exceeded {
            (self.on_unhealthy)(name, err);
        }
        exceeded.into_iter().map(|(name, _)| name).collect()
    }

    /// Polls until `stop` is called.
    pub async fn run(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut ticker = time::interval(self.polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = stop_rx.changed() => {}
                _ = ticker.tick() => {
                    self.poll_once(Instant::now());
                }
            }
        }
        info!("Health monitor stopped");
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
