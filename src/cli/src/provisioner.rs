//! Local provisioner that records guests in the state directory.

use std::path::PathBuf;

use a3s_guest_core::error::{GuestError, Result};
use a3s_guest_core::request::{
    EsxiCreateConfig, GuestId, LibvirtCreateConfig, LibvirtImportConfig, LibvirtServer,
};
use a3s_guest_runtime::GuestProvisioner;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;

use crate::state::{GuestRecord, GuestStateFile};

/// Provisioner that checks local disk images and persists a record per guest.
pub struct LocalProvisioner {
    state: Mutex<GuestStateFile>,
}

impl LocalProvisioner {
    pub fn open(state_dir: &std::path::Path) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(GuestStateFile::load_in(state_dir)?),
        })
    }

    async fn record(&self, record: GuestRecord) -> Result<serde_json::Value> {
        let value = serde_json::to_value(&record)?;
        let mut state = self.state.lock().await;
        state.upsert(record)?;
        tracing::info!(path = %state.path().display(), "Guest recorded");
        Ok(value)
    }
}

fn check_disks(disks: &[(String, PathBuf)]) -> Result<()> {
    for (disk_id, path) in disks {
        if !path.exists() {
            return Err(GuestError::BadRequest(format!(
                "Disk {} path {} not found",
                disk_id,
                path.display()
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl GuestProvisioner for LocalProvisioner {
    async fn import_libvirt_server(
        &self,
        config: &LibvirtImportConfig,
        server: &LibvirtServer,
    ) -> Result<serde_json::Value> {
        tracing::debug!(
            guest_id = %server.uuid,
            nics = server.mac_ip.len(),
            "Importing libvirt server"
        );
        self.record(GuestRecord {
            guest_id: server.uuid.clone(),
            source: "libvirt_import".to_string(),
            desc: json!({
                "xml_file_path": config.xml_file_path,
                "mac_ip": server.mac_ip,
            }),
            disks: Vec::new(),
            monitor_path: config.monitor_path.clone(),
            created_at: Utc::now(),
        })
        .await
    }

    async fn create_from_libvirt(
        &self,
        guest_id: &GuestId,
        config: &LibvirtCreateConfig,
    ) -> Result<serde_json::Value> {
        let disks = config.disk_paths();
        check_disks(&disks)?;
        self.record(GuestRecord {
            guest_id: guest_id.clone(),
            source: "libvirt".to_string(),
            desc: config.desc.clone(),
            disks,
            monitor_path: config.monitor_path.clone(),
            created_at: Utc::now(),
        })
        .await
    }

    async fn create_from_esxi(
        &self,
        guest_id: &GuestId,
        config: &EsxiCreateConfig,
    ) -> Result<serde_json::Value> {
        let access = &config.esxi_access_info;
        tracing::debug!(
            guest_id = %guest_id,
            host_ip = %access.host_ip,
            guest_ext_id = %access.guest_ext_id,
            "Creating guest from ESXi"
        );
        // Credentials stay out of the state file
        self.record(GuestRecord {
            guest_id: guest_id.clone(),
            source: "esxi".to_string(),
            desc: json!({
                "desc": config.desc,
                "host_ip": access.host_ip,
                "guest_ext_id": access.guest_ext_id,
            }),
            disks: Vec::new(),
            monitor_path: None,
            created_at: Utc::now(),
        })
        .await
    }
}
