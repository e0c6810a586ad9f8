//! Task outcome and request context types shared by the dispatcher and its
//! callers.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ErrorKind, GuestError};

/// Task identifier
pub type TaskId = String;

/// Outcome of one dispatched task. Produced exactly once per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    /// Work completed
    Success { data: serde_json::Value },

    /// Work failed
    Failure { kind: ErrorKind, message: String },

    /// Context cancelled before or during execution
    Cancelled { reason: String },
}

impl TaskResult {
    pub fn success(data: serde_json::Value) -> Self {
        Self::Success { data }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Error kind for non-success outcomes.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
            Self::Cancelled { .. } => Some(ErrorKind::Cancelled),
        }
    }
}

impl From<crate::error::Result<serde_json::Value>> for TaskResult {
    fn from(result: crate::error::Result<serde_json::Value>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(GuestError::Cancelled(reason)) => Self::cancelled(reason),
            Err(e) => Self::failure(e.kind(), e.to_string()),
        }
    }
}

/// Caller context carried by a submitted task.
///
/// Cloning shares the cancellation signal. A context with no deadline that
/// was created with [`RequestContext::background`] is never cancelled.
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancelled: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Handle that cancels every clone of its [`RequestContext`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl RequestContext {
    /// Context that is never cancelled.
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            cancelled: rx,
            deadline: None,
        }
    }

    /// Context cancelled through the returned handle.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancelled: rx,
                deadline: None,
            },
            CancelHandle { tx },
        )
    }

    /// Same cancellation signal, with a deadline `timeout` from now.
    ///
    /// An earlier existing deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancelled: self.cancelled.clone(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context was cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Human-readable reason, if cancelled.
    pub fn cancel_reason(&self) -> Option<&'static str> {
        if *self.cancelled.borrow() {
            Some("context cancelled")
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some("context deadline exceeded")
        } else {
            None
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) {
        let mut rx = self.cancelled.clone();
        let flag = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = flag => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => flag.await,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}
