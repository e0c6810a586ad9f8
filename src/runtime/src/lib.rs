//! A3S Guest Runtime - Admission and dispatch of guest provisioning.
//!
//! This crate owns the per-guest registry that serializes provisioning,
//! the asynchronous task dispatcher, and the orchestrator that ties both to a
//! hypervisor-specific [`GuestProvisioner`].

pub mod dispatcher;
pub mod monitor;
pub mod orchestrator;
pub mod provisioner;
pub mod registry;

// Re-export common types
pub use dispatcher::{DispatcherStats, Finalizer, Task, TaskDispatcher, TaskTicket};
pub use monitor::{ProvisionMonitor, ProvisionStats};
pub use orchestrator::ProvisioningOrchestrator;
pub use provisioner::GuestProvisioner;
pub use registry::{Admission, AdmissionGuard, GuestEntry, GuestRegistry, GuestState, RegistryStats};

/// A3S Guest Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
