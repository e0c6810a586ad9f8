//! `a3s-guest create-esxi` command - Create a guest from an ESXi export.

use std::path::PathBuf;

use a3s_guest_core::config::GuestConfig;
use clap::Args;

use super::Session;

#[derive(Args)]
pub struct CreateEsxiArgs {
    /// Guest id
    pub guest_id: String,

    /// JSON request: { desc, esxi_access_info }
    #[arg(long)]
    pub request: PathBuf,
}

pub async fn execute(
    args: CreateEsxiArgs,
    config: &GuestConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = super::read_request(&args.request)?;
    let session = Session::open(config)?;

    let ticket = session.orchestrator.handle_create_from_esxi(
        super::interruptible_context(),
        &args.guest_id,
        &body,
    )?;
    super::report(ticket).await
}
