use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::request::GuestId;
use crate::task::{TaskId, TaskResult};

/// Event key type
pub type EventKey = String;

/// Event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Empty,
    String(String),
    Result(TaskResult),
    Map(HashMap<String, serde_json::Value>),
}

/// Guest event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestEvent {
    /// Event key (e.g., "guest.create.succeeded")
    pub key: EventKey,

    /// Guest the event concerns, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<GuestId>,

    /// Dispatched task the event concerns, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    /// Event payload
    pub payload: EventPayload,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl GuestEvent {
    /// Create a new event
    pub fn new(key: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            key: key.into(),
            guest_id: None,
            task_id: None,
            payload,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create an event with no payload
    pub fn empty(key: impl Into<String>) -> Self {
        Self::new(key, EventPayload::Empty)
    }

    /// Create an event with a string payload
    pub fn with_string(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(key, EventPayload::String(message.into()))
    }

    /// Create an event carrying a task outcome
    pub fn with_result(key: impl Into<String>, result: TaskResult) -> Self {
        Self::new(key, EventPayload::Result(result))
    }

    /// Attach the guest identifier
    pub fn for_guest(mut self, guest_id: impl Into<String>) -> Self {
        self.guest_id = Some(guest_id.into());
        self
    }

    /// Attach the task identifier
    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Task outcome carried by this event, if any
    pub fn result(&self) -> Option<&TaskResult> {
        match &self.payload {
            EventPayload::Result(result) => Some(result),
            _ => None,
        }
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<GuestEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event
    pub fn emit(&self, event: GuestEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<GuestEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events with a filter
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&GuestEvent) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            filter: Arc::new(filter),
        }
    }

    /// Subscribe to events concerning one guest
    pub fn subscribe_guest(&self, guest_id: impl Into<String>) -> EventStream {
        let guest_id = guest_id.into();
        self.subscribe_filtered(move |event| event.guest_id.as_deref() == Some(guest_id.as_str()))
    }
}

/// Event stream with filtering
pub struct EventStream {
    receiver: broadcast::Receiver<GuestEvent>,
    filter: Arc<dyn Fn(&GuestEvent) -> bool + Send + Sync>,
}

impl EventStream {
    /// Receive the next matching event
    pub async fn recv(&mut self) -> Option<GuestEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Event catalog - predefined event keys
pub mod events {
    // Admission events
    pub const GUEST_ADMITTED: &str = "guest.admitted";
    pub const GUEST_RELEASED: &str = "guest.released";

    // Creation events
    pub const GUEST_CREATE_STARTED: &str = "guest.create.started";
    pub const GUEST_CREATE_SUCCEEDED: &str = "guest.create.succeeded";
    pub const GUEST_CREATE_FAILED: &str = "guest.create.failed";
    pub const GUEST_CREATE_CANCELLED: &str = "guest.create.cancelled";

    // Import events
    pub const GUEST_IMPORT_STARTED: &str = "guest.import.started";
    pub const GUEST_IMPORT_SKIPPED: &str = "guest.import.skipped";
    pub const GUEST_IMPORT_SUCCEEDED: &str = "guest.import.succeeded";
    pub const GUEST_IMPORT_FAILED: &str = "guest.import.failed";

    // Task events
    pub const TASK_COMPLETED: &str = "task.completed";
}
