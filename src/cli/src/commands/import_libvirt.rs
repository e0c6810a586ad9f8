//! `a3s-guest import-libvirt` command - Import servers from a libvirt dump.

use std::path::PathBuf;

use a3s_guest_core::config::GuestConfig;
use clap::Args;

use super::Session;

#[derive(Args)]
pub struct ImportLibvirtArgs {
    /// JSON request: { xml_file_path, servers, monitor_path? }
    #[arg(long)]
    pub request: PathBuf,
}

pub async fn execute(
    args: ImportLibvirtArgs,
    config: &GuestConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = super::read_request(&args.request)?;
    let session = Session::open(config)?;

    let ticket = session
        .orchestrator
        .handle_import_from_libvirt(super::interruptible_context(), &body)?;
    super::report(ticket).await
}
