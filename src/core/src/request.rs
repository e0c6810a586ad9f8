//! Provisioning request types and boundary decoding.
//!
//! Request bodies arrive as loosely-typed JSON. They are decoded exactly once
//! here into [`ImportConfig`] variants; everything past this point matches on
//! typed values.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{GuestError, Result};

/// Opaque, globally unique guest identifier.
pub type GuestId = String;

/// One guest listed in a libvirt import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ServerEntry")]
pub struct LibvirtServer {
    /// Guest identifier of the imported server
    pub uuid: GuestId,

    /// MAC address -> IP address bindings for the guest NICs
    #[serde(default)]
    pub mac_ip: HashMap<String, String>,
}

impl LibvirtServer {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            mac_ip: HashMap::new(),
        }
    }
}

/// Servers may be listed as bare identifiers or as full objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum ServerEntry {
    Id(String),
    Full {
        uuid: String,
        #[serde(default)]
        mac_ip: HashMap<String, String>,
    },
}

impl From<ServerEntry> for LibvirtServer {
    fn from(entry: ServerEntry) -> Self {
        match entry {
            ServerEntry::Id(uuid) => Self::new(uuid),
            ServerEntry::Full { uuid, mac_ip } => Self { uuid, mac_ip },
        }
    }
}

/// Import of guests described by a libvirt domain XML dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibvirtImportConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub xml_file_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_path: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub servers: Vec<LibvirtServer>,
}

/// An explicit `null` reads the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Creation of one guest from a libvirt descriptor and its disk files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibvirtCreateConfig {
    /// Guest descriptor; must be a JSON object
    pub desc: serde_json::Value,

    /// Disk id -> local disk path; must be a JSON object
    pub disks_path: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_path: Option<String>,
}

impl LibvirtCreateConfig {
    /// Disk paths keyed by disk id.
    pub fn disk_paths(&self) -> Vec<(String, PathBuf)> {
        self.disks_path
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(id, path)| {
                        path.as_str().map(|p| (id.clone(), PathBuf::from(p)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// vCenter endpoint and credentials for reading an ESXi datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreAccessInfo {
    pub vcenter_id: String,
    pub host: String,
    pub port: u16,
    pub account: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_id: Option<String>,
}

/// Where an exported ESXi guest lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsxiAccessInfo {
    pub datastore: DatastoreAccessInfo,
    pub host_ip: String,
    pub guest_ext_id: String,
}

/// Creation of one guest from an exported ESXi disk set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsxiCreateConfig {
    /// Guest descriptor; must be a JSON object
    pub desc: serde_json::Value,

    pub esxi_access_info: EsxiAccessInfo,
}

/// Provisioning request, one variant per source kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportConfig {
    LibvirtImport(LibvirtImportConfig),
    LibvirtCreate(LibvirtCreateConfig),
    EsxiCreate(EsxiCreateConfig),
}

impl ImportConfig {
    /// Short name of the source kind, used in logs and task types.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LibvirtImport(_) => "libvirt_import",
            Self::LibvirtCreate(_) => "libvirt_create",
            Self::EsxiCreate(_) => "esxi_create",
        }
    }
}

impl From<LibvirtImportConfig> for ImportConfig {
    fn from(config: LibvirtImportConfig) -> Self {
        Self::LibvirtImport(config)
    }
}

impl From<LibvirtCreateConfig> for ImportConfig {
    fn from(config: LibvirtCreateConfig) -> Self {
        Self::LibvirtCreate(config)
    }
}

impl From<EsxiCreateConfig> for ImportConfig {
    fn from(config: EsxiCreateConfig) -> Self {
        Self::EsxiCreate(config)
    }
}

/// Decode a libvirt import body.
pub fn decode_libvirt_import(body: &serde_json::Value) -> Result<LibvirtImportConfig> {
    serde_json::from_value(body.clone()).map_err(|e| {
        GuestError::InputParameter(format!("Parse params to libvirt config error {}", e))
    })
}

/// Decode a libvirt create body.
pub fn decode_libvirt_create(body: &serde_json::Value) -> Result<LibvirtCreateConfig> {
    let desc = require_dict(body, "desc")?;
    let disks_path = require_dict(body, "disks_path")?;
    let monitor_path = body
        .get("monitor_path")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(LibvirtCreateConfig {
        desc,
        disks_path,
        monitor_path,
    })
}

/// Decode an ESXi create body.
pub fn decode_esxi_create(body: &serde_json::Value) -> Result<EsxiCreateConfig> {
    let desc = require_dict(body, "desc")?;
    let esxi_access_info = body
        .get("esxi_access_info")
        .cloned()
        .and_then(|v| serde_json::from_value::<EsxiAccessInfo>(v).ok())
        .ok_or_else(|| GuestError::missing("esxi_access_info"))?;

    Ok(EsxiCreateConfig {
        desc,
        esxi_access_info,
    })
}

fn require_dict(body: &serde_json::Value, field: &str) -> Result<serde_json::Value> {
    let value = match body.get(field) {
        Some(serde_json::Value::Null) | None => return Err(GuestError::missing(field)),
        Some(value) => value,
    };
    if !value.is_object() {
        return Err(GuestError::InputParameter(format!("{} is not dict", field)));
    }
    Ok(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn access_info() -> serde_json::Value {
        json!({
            "datastore": {
                "vcenter_id": "vc-1",
                "host": "10.0.0.5",
                "port": 443,
                "account": "root",
                "password": "secret"
            },
            "host_ip": "10.0.0.9",
            "guest_ext_id": "vm-42"
        })
    }

    #[test]
    fn test_decode_libvirt_import_full() {
        let body = json!({
            "xml_file_path": "/etc/libvirt/qemu",
            "monitor_path": "/var/run/libvirt",
            "servers": [
                {"uuid": "srv-1", "mac_ip": {"52:54:00:aa:bb:cc": "10.0.0.2"}},
                "srv-2"
            ]
        });
        let config = decode_libvirt_import(&body).unwrap();
        assert_eq!(config.xml_file_path, "/etc/libvirt/qemu");
        assert_eq!(config.monitor_path.as_deref(), Some("/var/run/libvirt"));
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].mac_ip["52:54:00:aa:bb:cc"], "10.0.0.2");
        assert_eq!(config.servers[1], LibvirtServer::new("srv-2"));
    }

    #[test]
    fn test_decode_libvirt_import_missing_fields_default_empty() {
        let config = decode_libvirt_import(&json!({})).unwrap();
        assert!(config.xml_file_path.is_empty());
        assert!(config.servers.is_empty());
        assert!(config.monitor_path.is_none());
    }

    #[test]
    fn test_decode_libvirt_import_null_fields_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let xml = dir.path().display().to_string();

        let body = json!({"xml_file_path": null, "servers": ["srv-1"]});
        let config = decode_libvirt_import(&body).unwrap();
        assert!(config.xml_file_path.is_empty());
        let err = crate::validate::validate_libvirt_import(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
        assert!(err.to_string().contains("xml_file_path"));

        let body = json!({"xml_file_path": xml, "servers": null});
        let config = decode_libvirt_import(&body).unwrap();
        assert!(config.servers.is_empty());
        let err = crate::validate::validate_libvirt_import(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
        assert!(err.to_string().contains("servers"));
    }

    #[test]
    fn test_decode_libvirt_import_wrong_shape() {
        let err = decode_libvirt_import(&json!({"servers": "srv-1"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputParameter);
        assert!(err.to_string().contains("Parse params to libvirt config error"));

        let err = decode_libvirt_import(&json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputParameter);
    }

    #[test]
    fn test_decode_libvirt_create() {
        let body = json!({
            "desc": {"name": "srv-1"},
            "disks_path": {"disk-0": "/data/srv-1.qcow2"},
            "monitor_path": ""
        });
        let config = decode_libvirt_create(&body).unwrap();
        assert!(config.monitor_path.is_none());
        assert_eq!(
            config.disk_paths(),
            vec![("disk-0".to_string(), PathBuf::from("/data/srv-1.qcow2"))]
        );
    }

    #[test]
    fn test_decode_libvirt_create_missing_desc() {
        let err = decode_libvirt_create(&json!({"disks_path": {}})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
        assert!(err.to_string().contains("desc"));
    }

    #[test]
    fn test_decode_libvirt_create_desc_not_dict() {
        let err = decode_libvirt_create(&json!({"desc": [1], "disks_path": {}})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputParameter);
        assert_eq!(err.to_string(), "Invalid input parameter: desc is not dict");
    }

    #[test]
    fn test_decode_libvirt_create_disks_not_dict() {
        let err =
            decode_libvirt_create(&json!({"desc": {}, "disks_path": "/data"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputParameter);

        let err = decode_libvirt_create(&json!({"desc": {}})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
    }

    #[test]
    fn test_decode_esxi_create() {
        let body = json!({"desc": {"name": "vm"}, "esxi_access_info": access_info()});
        let config = decode_esxi_create(&body).unwrap();
        assert_eq!(config.esxi_access_info.datastore.port, 443);
        assert!(config.esxi_access_info.datastore.private_id.is_none());
        assert_eq!(config.esxi_access_info.guest_ext_id, "vm-42");
    }

    #[test]
    fn test_decode_esxi_create_bad_access_info() {
        let err = decode_esxi_create(&json!({"desc": {}})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);

        let err = decode_esxi_create(&json!({"desc": {}, "esxi_access_info": {"host_ip": "x"}}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
        assert!(err.to_string().contains("esxi_access_info"));
    }

    #[test]
    fn test_import_config_tagging() {
        let config: ImportConfig = LibvirtImportConfig::default().into();
        assert_eq!(config.kind(), "libvirt_import");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["kind"], "libvirt_import");
    }
}
