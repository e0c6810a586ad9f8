//! Precondition checks run before a request is admitted.
//!
//! Pure apart from filesystem existence checks; nothing here touches the
//! guest registry.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{GuestError, Result};
use crate::request::{EsxiCreateConfig, ImportConfig, LibvirtCreateConfig, LibvirtImportConfig};

/// Validate any provisioning request.
pub fn validate(config: &ImportConfig) -> Result<()> {
    match config {
        ImportConfig::LibvirtImport(c) => validate_libvirt_import(c),
        ImportConfig::LibvirtCreate(c) => validate_libvirt_create(c),
        ImportConfig::EsxiCreate(c) => validate_esxi_create(c),
    }
}

pub fn validate_libvirt_import(config: &LibvirtImportConfig) -> Result<()> {
    if config.xml_file_path.is_empty() {
        return Err(GuestError::missing("xml_file_path"));
    }
    if !Path::new(&config.xml_file_path).exists() {
        return Err(GuestError::BadRequest(format!(
            "xml_file_path {} not found",
            config.xml_file_path
        )));
    }

    if config.servers.is_empty() {
        return Err(GuestError::missing("servers"));
    }
    if let Some(server) = config.servers.iter().find(|s| s.uuid.is_empty()) {
        return Err(GuestError::InputParameter(format!(
            "server with mac_ip {:?} has empty uuid",
            server.mac_ip
        )));
    }
    let mut seen = HashSet::new();
    if let Some(server) = config.servers.iter().find(|s| !seen.insert(s.uuid.as_str())) {
        return Err(GuestError::InputParameter(format!(
            "duplicate server uuid {}",
            server.uuid
        )));
    }

    if let Some(monitor_path) = non_empty(&config.monitor_path) {
        if let Err(e) = std::fs::read_dir(monitor_path) {
            return Err(GuestError::BadRequest(format!(
                "Monitor path {} can't open as dir: {}",
                monitor_path, e
            )));
        }
    }

    Ok(())
}

pub fn validate_libvirt_create(config: &LibvirtCreateConfig) -> Result<()> {
    require_object(&config.desc, "desc")?;
    require_object(&config.disks_path, "disks_path")?;
    if let Some(map) = config.disks_path.as_object() {
        if let Some((id, _)) = map.iter().find(|(_, path)| !path.is_string()) {
            return Err(GuestError::InputParameter(format!(
                "disks_path.{} is not a string",
                id
            )));
        }
    }

    if let Some(monitor_path) = non_empty(&config.monitor_path) {
        if !Path::new(monitor_path).exists() {
            return Err(GuestError::BadRequest(format!(
                "Monitor path {} not found",
                monitor_path
            )));
        }
    }

    Ok(())
}

pub fn validate_esxi_create(config: &EsxiCreateConfig) -> Result<()> {
    require_object(&config.desc, "desc")?;

    let access = &config.esxi_access_info;
    let required = [
        ("esxi_access_info.host_ip", access.host_ip.as_str()),
        ("esxi_access_info.guest_ext_id", access.guest_ext_id.as_str()),
        ("esxi_access_info.datastore.host", access.datastore.host.as_str()),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
        return Err(GuestError::missing(*field));
    }

    Ok(())
}

fn require_object(value: &serde_json::Value, field: &str) -> Result<()> {
    if value.is_object() {
        Ok(())
    } else {
        Err(GuestError::InputParameter(format!("{} is not dict", field)))
    }
}

fn non_empty(path: &Option<String>) -> Option<&str> {
    path.as_deref().filter(|p| !p.is_empty())
}
