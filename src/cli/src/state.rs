//! State management for provisioned guests.
//!
//! Persists guest metadata to `<state-dir>/guests.json` with atomic writes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State file name inside the state directory.
pub const STATE_FILE_NAME: &str = "guests.json";

/// Metadata record for a single provisioned guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestRecord {
    /// Guest id (libvirt server uuid for imports)
    pub guest_id: String,
    /// "libvirt_import" | "libvirt" | "esxi"
    pub source: String,
    /// Guest descriptor as submitted
    #[serde(default)]
    pub desc: serde_json::Value,
    /// Disk paths keyed by disk id (libvirt sources only)
    #[serde(default)]
    pub disks: Vec<(String, PathBuf)>,
    /// Monitor socket directory, if any
    #[serde(default)]
    pub monitor_path: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Persistent state file backed by JSON.
pub struct GuestStateFile {
    path: PathBuf,
    records: Vec<GuestRecord>,
}

impl GuestStateFile {
    /// Load state from disk. Creates an empty state if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let records: Vec<GuestRecord> = serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable state file"
                );
                Vec::new()
            });
            Ok(Self {
                path: path.to_path_buf(),
                records,
            })
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Self {
                path: path.to_path_buf(),
                records: Vec::new(),
            })
        }
    }

    /// Load from `<state_dir>/guests.json`.
    pub fn load_in(state_dir: &Path) -> Result<Self, std::io::Error> {
        Self::load(&state_dir.join(STATE_FILE_NAME))
    }

    /// Save state to disk atomically (write to .tmp, then rename).
    pub fn save(&self) -> Result<(), std::io::Error> {
        let data = serde_json::to_string_pretty(&self.records).map_err(std::io::Error::other)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &data)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Insert or replace the record for its guest id and persist.
    pub fn upsert(&mut self, record: GuestRecord) -> Result<(), std::io::Error> {
        self.records.retain(|r| r.guest_id != record.guest_id);
        self.records.push(record);
        self.save()
    }

    /// Find a record by guest id.
    pub fn find(&self, guest_id: &str) -> Option<&GuestRecord> {
        self.records.iter().find(|r| r.guest_id == guest_id)
    }

    /// All records.
    pub fn records(&self) -> &[GuestRecord] {
        &self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
