//! Task dispatcher - runs provisioning work off the request path.
//!
//! `submit` returns a [`TaskTicket`] immediately. The work runs on its own
//! tokio task and its [`TaskResult`] is delivered exactly once: to the
//! optional finalizer first, then on the event channel and the ticket.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use a3s_guest_core::config::DispatcherConfig;
use a3s_guest_core::error::{ErrorKind, Result};
use a3s_guest_core::event::{events, EventEmitter, GuestEvent};
use a3s_guest_core::request::GuestId;
use a3s_guest_core::task::{RequestContext, TaskId, TaskResult};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Unit of deferred work.
#[async_trait]
pub trait Task: Send + Sync {
    /// Execute the work. `ctx` may be polled to stop early.
    async fn execute(&self, ctx: &RequestContext) -> Result<serde_json::Value>;

    /// Get task type (for logging/debugging)
    fn task_type(&self) -> &str;

    /// Guest the task provisions, if it targets exactly one
    fn guest_id(&self) -> Option<&str> {
        None
    }
}

/// Callback run with the task outcome before it is published.
pub type Finalizer = Box<dyn FnOnce(&TaskResult) + Send + 'static>;

/// Acknowledgment returned by [`TaskDispatcher::submit`].
#[derive(Debug)]
pub struct TaskTicket {
    task_id: TaskId,
    task_type: String,
    guest_id: Option<GuestId>,
    result_rx: oneshot::Receiver<TaskResult>,
}

impl TaskTicket {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn guest_id(&self) -> Option<&str> {
        self.guest_id.as_deref()
    }

    /// Wait for the task outcome.
    pub async fn wait(self) -> TaskResult {
        self.result_rx.await.unwrap_or_else(|_| {
            TaskResult::failure(ErrorKind::Internal, "task dropped before reporting a result")
        })
    }
}

/// Dispatcher counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Submitted, not yet executing
    pub pending: usize,
    /// Currently executing
    pub active: usize,
    /// Results delivered
    pub completed: u64,
    /// Concurrency ceiling, if bounded
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
}

/// Task wrapper
struct TaskWrapper {
    id: TaskId,
    ctx: RequestContext,
    task: Box<dyn Task>,
    finalizer: Option<Finalizer>,
    result_tx: oneshot::Sender<TaskResult>,
}

/// Task dispatcher
#[derive(Clone)]
pub struct TaskDispatcher {
    semaphore: Option<Arc<Semaphore>>,
    max_concurrency: Option<usize>,
    default_timeout: Option<Duration>,
    counters: Arc<Counters>,
    event_emitter: EventEmitter,
}

impl TaskDispatcher {
    /// Create a new dispatcher
    pub fn new(config: &DispatcherConfig, event_emitter: EventEmitter) -> Self {
        let max_concurrency = config.max_concurrency.filter(|max| *max > 0);
        Self {
            semaphore: max_concurrency.map(|max| Arc::new(Semaphore::new(max))),
            max_concurrency,
            default_timeout: config.task_timeout(),
            counters: Arc::new(Counters::default()),
            event_emitter,
        }
    }

    /// Submit a task.
    ///
    /// Returns without waiting for the task to start. Must be called from
    /// within a Tokio runtime.
    pub fn submit(
        &self,
        ctx: RequestContext,
        task: Box<dyn Task>,
        finalizer: Option<Finalizer>,
    ) -> TaskTicket {
        let ctx = match (ctx.deadline(), self.default_timeout) {
            (None, Some(timeout)) => ctx.with_timeout(timeout),
            _ => ctx,
        };

        let (result_tx, result_rx) = oneshot::channel();
        let ticket = TaskTicket {
            task_id: Uuid::new_v4().to_string(),
            task_type: task.task_type().to_string(),
            guest_id: task.guest_id().map(str::to_string),
            result_rx,
        };

        tracing::debug!(
            task_id = %ticket.task_id,
            task_type = %ticket.task_type,
            guest_id = ?ticket.guest_id,
            "Task submitted"
        );

        let wrapper = TaskWrapper {
            id: ticket.task_id.clone(),
            ctx,
            task,
            finalizer,
            result_tx,
        };

        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        let semaphore = self.semaphore.clone();
        let counters = Arc::clone(&self.counters);
        let event_emitter = self.event_emitter.clone();
        tokio::spawn(async move {
            run_task(wrapper, semaphore, counters, event_emitter).await;
        });

        ticket
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            pending: self.counters.pending.load(Ordering::SeqCst),
            active: self.counters.active.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            max_concurrency: self.max_concurrency,
        }
    }

    /// Event channel results are published on
    pub fn event_emitter(&self) -> &EventEmitter {
        &self.event_emitter
    }
}

enum Start {
    Run(Option<OwnedSemaphorePermit>),
    Cancelled(&'static str),
}

async fn run_task(
    wrapper: TaskWrapper,
    semaphore: Option<Arc<Semaphore>>,
    counters: Arc<Counters>,
    event_emitter: EventEmitter,
) {
    let TaskWrapper {
        id,
        ctx,
        task,
        finalizer,
        result_tx,
    } = wrapper;

    // Wait for a slot, unless the caller gives up first
    let start = match semaphore {
        Some(semaphore) => tokio::select! {
            _ = ctx.done() => Start::Cancelled(ctx.cancel_reason().unwrap_or("context cancelled")),
            permit = semaphore.acquire_owned() => Start::Run(permit.ok()),
        },
        None => Start::Run(None),
    };
    let start = match start {
        Start::Run(_) if ctx.is_cancelled() => {
            Start::Cancelled(ctx.cancel_reason().unwrap_or("context cancelled"))
        }
        start => start,
    };
    counters.pending.fetch_sub(1, Ordering::SeqCst);

    let result = match start {
        Start::Cancelled(reason) => {
            tracing::info!(
                task_id = %id,
                task_type = task.task_type(),
                reason,
                "Task dropped before start"
            );
            TaskResult::cancelled(reason)
        }
        Start::Run(permit) => {
            counters.active.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(task_id = %id, task_type = task.task_type(), "Task started");

            let outcome = AssertUnwindSafe(task.execute(&ctx)).catch_unwind().await;

            counters.active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);

            match outcome {
                Ok(_) if ctx.is_cancelled() => {
                    TaskResult::cancelled(ctx.cancel_reason().unwrap_or("context cancelled"))
                }
                Ok(result) => TaskResult::from(result),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(
                        task_id = %id,
                        task_type = task.task_type(),
                        %message,
                        "Task panicked"
                    );
                    TaskResult::failure(ErrorKind::Internal, format!("task panicked: {}", message))
                }
            }
        }
    };

    if let Some(finalizer) = finalizer {
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| finalizer(&result))) {
            tracing::error!(
                task_id = %id,
                message = %panic_message(panic.as_ref()),
                "Task finalizer panicked"
            );
        }
    }

    match &result {
        TaskResult::Success { .. } => {
            tracing::info!(task_id = %id, task_type = task.task_type(), "Task completed")
        }
        TaskResult::Failure { kind, message } => tracing::warn!(
            task_id = %id,
            task_type = task.task_type(),
            %kind,
            %message,
            "Task failed"
        ),
        TaskResult::Cancelled { reason } => {
            tracing::info!(task_id = %id, task_type = task.task_type(), %reason, "Task cancelled")
        }
    }

    let mut event = GuestEvent::with_result(events::TASK_COMPLETED, result.clone()).for_task(&id);
    if let Some(guest_id) = task.guest_id() {
        event = event.for_guest(guest_id);
    }
    counters.completed.fetch_add(1, Ordering::SeqCst);
    event_emitter.emit(event);
    let _ = result_tx.send(result);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
