//! CLI command definitions and dispatch.

mod create_esxi;
mod create_libvirt;
mod import_libvirt;
mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_guest_core::config::GuestConfig;
use a3s_guest_core::task::{RequestContext, TaskResult};
use a3s_guest_runtime::{ProvisionMonitor, ProvisioningOrchestrator, TaskTicket};
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::provisioner::LocalProvisioner;

/// A3S Guest - import and create guests from libvirt and ESXi sources.
#[derive(Parser)]
#[command(name = "a3s-guest", version, about)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// State directory, overriding the configured one
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Import the servers of a libvirt XML dump
    ImportLibvirt(import_libvirt::ImportLibvirtArgs),
    /// Create a guest from a libvirt descriptor and local disks
    CreateLibvirt(create_libvirt::CreateLibvirtArgs),
    /// Create a guest from an ESXi export
    CreateEsxi(create_esxi::CreateEsxiArgs),
    /// List recorded guests
    Status(status::StatusArgs),
}

impl Cli {
    /// Load the configuration file, or defaults when none was given, and
    /// apply the `--state-dir` override.
    pub fn load_config(&self) -> Result<GuestConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => GuestConfig::load(path)?,
            None => GuestConfig::default(),
        };
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        Ok(config)
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, config: GuestConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::ImportLibvirt(args) => import_libvirt::execute(args, &config).await,
        Command::CreateLibvirt(args) => create_libvirt::execute(args, &config).await,
        Command::CreateEsxi(args) => create_esxi::execute(args, &config).await,
        Command::Status(args) => status::execute(args, &config).await,
    }
}

/// Orchestrator wired to the local provisioner, with its health monitor.
pub(crate) struct Session {
    pub orchestrator: ProvisioningOrchestrator,
    monitor: tokio::task::JoinHandle<()>,
}

impl Session {
    pub fn open(config: &GuestConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let provisioner = Arc::new(LocalProvisioner::open(&config.state_dir)?);
        let orchestrator = ProvisioningOrchestrator::from_config(config, provisioner);
        let monitor = Arc::new(ProvisionMonitor::with_config(
            Arc::clone(orchestrator.registry()),
            orchestrator.dispatcher().clone(),
            config.monitor.clone(),
        ))
        .start();
        Ok(Self {
            orchestrator,
            monitor,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

/// Read a JSON request body from a file.
pub(crate) fn read_request(path: &Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read request {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&data)?)
}

/// A context cancelled on Ctrl-C.
pub(crate) fn interruptible_context() -> RequestContext {
    let (ctx, handle) = RequestContext::with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            handle.cancel();
        }
    });
    ctx
}

/// Wait for a dispatched task, print its outcome as JSON and fail unless it
/// succeeded.
pub(crate) async fn report(ticket: TaskTicket) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(task_id = %ticket.task_id(), task_type = %ticket.task_type(), "Accepted");
    let task_id = ticket.task_id().to_string();
    let task_type = ticket.task_type().to_string();
    let guest_id = ticket.guest_id().map(str::to_string);

    let result = ticket.wait().await;
    let output = json!({
        "task_id": task_id,
        "task_type": task_type,
        "guest_id": guest_id,
        "status": result.error_kind().map_or(200, |kind| kind.status_code()),
        "result": result,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    outcome(&result).map_err(Into::into)
}

fn outcome(result: &TaskResult) -> Result<(), String> {
    match result {
        TaskResult::Success { .. } => Ok(()),
        TaskResult::Failure { kind, message } => {
            Err(format!("{kind} ({}): {message}", kind.status_code()))
        }
        TaskResult::Cancelled { reason } => Err(format!("cancelled: {reason}")),
    }
}
