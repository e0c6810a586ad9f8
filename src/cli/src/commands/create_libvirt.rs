//! `a3s-guest create-libvirt` command - Create a guest from a libvirt descriptor.

use std::path::PathBuf;

use a3s_guest_core::config::GuestConfig;
use clap::Args;

use super::Session;

#[derive(Args)]
pub struct CreateLibvirtArgs {
    /// Guest id
    pub guest_id: String,

    /// JSON request: { desc, disks_path, monitor_path? }
    #[arg(long)]
    pub request: PathBuf,
}

pub async fn execute(
    args: CreateLibvirtArgs,
    config: &GuestConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = super::read_request(&args.request)?;
    let session = Session::open(config)?;

    let ticket = session.orchestrator.handle_create_from_libvirt(
        super::interruptible_context(),
        &args.guest_id,
        &body,
    )?;
    super::report(ticket).await
}
