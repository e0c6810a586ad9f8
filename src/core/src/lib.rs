//! A3S Guest Core - Foundational Types for Guest Provisioning
//!
//! Error taxonomy, provisioning request types with their boundary decoding,
//! precondition validation, and the event channel through which task outcomes
//! are reported.

pub mod config;
pub mod error;
pub mod event;
pub mod request;
pub mod task;
pub mod validate;

// Re-export commonly used types
pub use config::{DispatcherConfig, GuestConfig, LogLevel, MonitorConfig};
pub use error::{ErrorKind, GuestError, Result};
pub use event::{EventEmitter, EventPayload, GuestEvent};
pub use request::{
    EsxiAccessInfo, EsxiCreateConfig, GuestId, ImportConfig, LibvirtCreateConfig,
    LibvirtImportConfig, LibvirtServer,
};
pub use task::{CancelHandle, RequestContext, TaskId, TaskResult};
pub use validate::validate;

/// A3S Guest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
