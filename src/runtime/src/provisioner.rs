//! GuestProvisioner - Trait for hypervisor-specific creation backends.

use a3s_guest_core::error::Result;
use a3s_guest_core::request::{
    EsxiCreateConfig, GuestId, LibvirtCreateConfig, LibvirtImportConfig, LibvirtServer,
};
use async_trait::async_trait;

/// Performs the slow part of provisioning: creating disks, attaching the
/// descriptor and booting the guest.
///
/// Implementations run inside dispatched tasks and may suspend for minutes.
/// Returned values are reported verbatim as the task's success payload.
#[async_trait]
pub trait GuestProvisioner: Send + Sync {
    /// Import one server described in the libvirt XML dump.
    async fn import_libvirt_server(
        &self,
        config: &LibvirtImportConfig,
        server: &LibvirtServer,
    ) -> Result<serde_json::Value>;

    /// Create a guest from a libvirt descriptor and local disk files.
    async fn create_from_libvirt(
        &self,
        guest_id: &GuestId,
        config: &LibvirtCreateConfig,
    ) -> Result<serde_json::Value>;

    /// Create a guest from an exported ESXi disk set.
    async fn create_from_esxi(
        &self,
        guest_id: &GuestId,
        config: &EsxiCreateConfig,
    ) -> Result<serde_json::Value>;
}
