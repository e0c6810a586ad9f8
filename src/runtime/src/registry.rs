//! Guest registry - per-guest admission and lifecycle state.
//!
//! The registry is the only shared mutable state of the orchestrator. Every
//! mutation goes through one of its operations, each of which holds the
//! entry's shard lock for the whole check-and-update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use a3s_guest_core::error::{GuestError, Result};
use a3s_guest_core::request::GuestId;
use a3s_guest_core::task::TaskResult;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Guest provisioning state machine.
///
/// `Idle -> Preparing -> Running -> {Succeeded | Failed}`, then released back
/// to `Idle`. A guest with no registry entry is `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestState {
    /// No operation in flight
    Idle,

    /// Admission granted, work not yet started
    Preparing,

    /// Work executing
    Running,

    /// Work finished successfully, not yet released
    Succeeded,

    /// Work failed or was cancelled, not yet released
    Failed,
}

impl GuestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Preparing | Self::Running)
    }
}

impl std::fmt::Display for GuestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Registry record for one guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestEntry {
    pub state: GuestState,
    /// Serial of the admission holding this entry
    pub admission: u64,
    pub admitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Outcome recorded by `mark_result`
    pub result: Option<TaskResult>,
}

impl GuestEntry {
    fn preparing(admission: u64) -> Self {
        let now = Utc::now();
        Self {
            state: GuestState::Preparing,
            admission,
            admitted_at: now,
            updated_at: now,
            result: None,
        }
    }

    fn transition(&mut self, state: GuestState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// Per-state entry counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub preparing: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RegistryStats {
    /// Guests holding an admission that has not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.preparing + self.running
    }
}

/// Proof of one successful `admit`.
///
/// Dispatching or aborting requires the admission itself, so a caller can
/// only act on the entry it was granted, never on one admitted for another
/// request under the same guest id.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Admission {
    guest_id: GuestId,
    serial: u64,
}

impl Admission {
    pub fn guest_id(&self) -> &str {
        &self.guest_id
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self {
            guest_id: self.guest_id.clone(),
            serial: self.serial,
        }
    }
}

/// Process-local map from guest identifier to provisioning state.
///
/// Constructed explicitly and shared through `Arc`; there is no global
/// instance.
#[derive(Debug, Default)]
pub struct GuestRegistry {
    entries: DashMap<GuestId, GuestEntry>,
    next_admission: AtomicU64,
}

impl GuestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a provisioning operation for `guest_id`.
    ///
    /// Check and insert happen under one entry lock, so of two concurrent
    /// calls for the same guest exactly one succeeds. Any existing entry,
    /// including a terminal one whose release is still pending, is a
    /// conflict.
    pub fn admit(&self, guest_id: &str) -> Result<Admission> {
        match self.entries.entry(guest_id.to_string()) {
            Entry::Occupied(entry) => {
                let state = entry.get().state;
                tracing::debug!(
                    guest_id,
                    state = %state,
                    awaiting_release = state.is_terminal(),
                    "Admission rejected"
                );
                Err(GuestError::conflict(guest_id))
            }
            Entry::Vacant(entry) => {
                let serial = self.next_admission.fetch_add(1, Ordering::Relaxed) + 1;
                entry.insert(GuestEntry::preparing(serial));
                tracing::debug!(guest_id, admission = serial, "Guest admitted");
                Ok(Admission {
                    guest_id: guest_id.to_string(),
                    serial,
                })
            }
        }
    }

    /// `Preparing -> Running` for the entry held by `admission`.
    ///
    /// An entry granted to a different admission is a conflict.
    pub fn mark_running(&self, admission: &Admission) -> Result<()> {
        let guest_id = admission.guest_id();
        let mut entry = self.entries.get_mut(guest_id).ok_or_else(|| {
            GuestError::BadRequest(format!("Guest {} was not prepared for creation", guest_id))
        })?;
        if entry.admission != admission.serial {
            return Err(GuestError::conflict(guest_id));
        }
        match entry.state {
            GuestState::Preparing => {
                entry.transition(GuestState::Running);
                Ok(())
            }
            GuestState::Running => Err(GuestError::conflict(guest_id)),
            state => Err(GuestError::Internal(format!(
                "Guest {} cannot start from state {}",
                guest_id, state
            ))),
        }
    }

    /// `Running -> Succeeded | Failed`.
    ///
    /// Any other source state is an invariant violation and returns
    /// `Internal`; the entry is left untouched.
    pub fn mark_result(&self, guest_id: &str, result: &TaskResult) -> Result<GuestState> {
        let mut entry = self.entries.get_mut(guest_id).ok_or_else(|| {
            GuestError::Internal(format!("Result recorded for unknown guest {}", guest_id))
        })?;
        if entry.state != GuestState::Running {
            return Err(GuestError::Internal(format!(
                "Result recorded for guest {} in state {}",
                guest_id, entry.state
            )));
        }

        let state = if result.is_success() {
            GuestState::Succeeded
        } else {
            GuestState::Failed
        };
        entry.transition(state);
        entry.result = Some(result.clone());
        Ok(state)
    }

    /// Remove the entry, making the guest eligible for a new operation.
    pub fn release(&self, guest_id: &str) -> Option<GuestEntry> {
        let removed = self.entries.remove(guest_id).map(|(_, entry)| entry);
        if let Some(entry) = &removed {
            tracing::debug!(guest_id, state = %entry.state, "Guest released");
        }
        removed
    }

    /// Remove the entry only if `admission` still holds it.
    pub fn release_admission(&self, admission: &Admission) -> Option<GuestEntry> {
        let removed = self
            .entries
            .remove_if(admission.guest_id(), |_, entry| {
                entry.admission == admission.serial
            })
            .map(|(_, entry)| entry);
        if let Some(entry) = &removed {
            tracing::debug!(
                guest_id = admission.guest_id(),
                state = %entry.state,
                "Guest released"
            );
        }
        removed
    }

    /// Release an admission that never started work.
    ///
    /// Returns false (and leaves the entry alone) unless `admission` holds
    /// the entry and the guest is still `Preparing`.
    pub fn abandon(&self, admission: &Admission) -> bool {
        self.entries
            .remove_if(admission.guest_id(), |_, entry| {
                entry.admission == admission.serial && entry.state == GuestState::Preparing
            })
            .is_some()
    }

    /// Current state, `None` when the guest has no entry.
    pub fn lookup(&self, guest_id: &str) -> Option<GuestState> {
        self.entries.get(guest_id).map(|entry| entry.state)
    }

    /// Current state, treating absence as `Idle`.
    pub fn state(&self, guest_id: &str) -> GuestState {
        self.lookup(guest_id).unwrap_or(GuestState::Idle)
    }

    /// Identifiers of guests with an operation in flight.
    pub fn in_flight(&self) -> Vec<GuestId> {
        self.entries
            .iter()
            .filter(|entry| entry.state.is_in_flight())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.entries.iter() {
            match entry.state {
                GuestState::Preparing => stats.preparing += 1,
                GuestState::Running => stats.running += 1,
                GuestState::Succeeded => stats.succeeded += 1,
                GuestState::Failed => stats.failed += 1,
                GuestState::Idle => {}
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Releases a guest's registry entry when dropped.
///
/// Held by dispatched work so the entry is released on every exit path,
/// including panics and the task future being dropped. Only the entry of the
/// guarded admission is ever removed.
#[derive(Debug)]
pub struct AdmissionGuard {
    registry: Arc<GuestRegistry>,
    admission: Admission,
    armed: bool,
}

impl AdmissionGuard {
    /// Take ownership of an existing admission.
    pub fn new(registry: Arc<GuestRegistry>, admission: Admission) -> Self {
        Self {
            registry,
            admission,
            armed: true,
        }
    }

    /// Admit `guest_id` and guard the new entry.
    pub fn admit(registry: Arc<GuestRegistry>, guest_id: &str) -> Result<Self> {
        let admission = registry.admit(guest_id)?;
        Ok(Self::new(registry, admission))
    }

    pub fn guest_id(&self) -> &str {
        self.admission.guest_id()
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    /// Release now, returning the removed entry.
    pub fn release(mut self) -> Option<GuestEntry> {
        self.armed = false;
        self.registry.release_admission(&self.admission)
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(guest_id = %self.guest_id(), "Releasing guest on abnormal exit");
            self.registry.release_admission(&self.admission);
        }
    }
}
