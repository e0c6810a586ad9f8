//! Provision monitor for tracking registry occupancy and dispatcher load

use std::sync::Arc;

use a3s_guest_core::config::MonitorConfig;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::dispatcher::{DispatcherStats, TaskDispatcher};
use crate::registry::{GuestRegistry, RegistryStats};

/// Combined provisioning statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionStats {
    pub registry: RegistryStats,
    pub dispatcher: DispatcherStats,
}

/// Provision monitor
pub struct ProvisionMonitor {
    registry: Arc<GuestRegistry>,
    dispatcher: TaskDispatcher,
    config: MonitorConfig,
}

impl ProvisionMonitor {
    /// Create a new monitor with default thresholds
    pub fn new(registry: Arc<GuestRegistry>, dispatcher: TaskDispatcher) -> Self {
        Self::with_config(registry, dispatcher, MonitorConfig::default())
    }

    /// Create a new monitor with custom configuration
    pub fn with_config(
        registry: Arc<GuestRegistry>,
        dispatcher: TaskDispatcher,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            config,
        }
    }

    /// Start monitoring in the background
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut ticker = interval(self.config.interval());

        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                self.check_health();
            }
        })
    }

    /// Log current load, warning when a threshold is exceeded.
    ///
    /// Returns whether every threshold held.
    pub fn check_health(&self) -> bool {
        let stats = self.stats();
        let in_flight = stats.registry.in_flight();
        let mut healthy = true;

        debug!(
            "Guests: preparing={}, running={}, succeeded={}, failed={}; tasks: pending={}, active={}, completed={}",
            stats.registry.preparing,
            stats.registry.running,
            stats.registry.succeeded,
            stats.registry.failed,
            stats.dispatcher.pending,
            stats.dispatcher.active,
            stats.dispatcher.completed
        );

        if let Some(max) = stats.dispatcher.max_concurrency {
            if stats.dispatcher.active >= max {
                warn!("Dispatcher is at maximum concurrency ({})", max);
            }
        }

        if in_flight > self.config.in_flight_warning_threshold {
            warn!(
                guests = ?self.registry.in_flight(),
                "High number of in-flight guests: {} (threshold: {})",
                in_flight,
                self.config.in_flight_warning_threshold
            );
            healthy = false;
        }

        if stats.dispatcher.active > self.config.active_warning_threshold {
            warn!(
                "High number of active tasks: {} (threshold: {})",
                stats.dispatcher.active, self.config.active_warning_threshold
            );
            healthy = false;
        }

        healthy
    }

    /// Get current statistics
    pub fn stats(&self) -> ProvisionStats {
        ProvisionStats {
            registry: self.registry.stats(),
            dispatcher: self.dispatcher.stats(),
        }
    }
}
