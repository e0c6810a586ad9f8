//! `a3s-guest status` command - Recorded guests as JSON.

use a3s_guest_core::config::GuestConfig;
use clap::Args;

use crate::state::GuestStateFile;

#[derive(Args)]
pub struct StatusArgs {
    /// Only show this guest
    pub guest_id: Option<String>,
}

pub async fn execute(
    args: StatusArgs,
    config: &GuestConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = GuestStateFile::load_in(&config.state_dir)?;

    let json = match &args.guest_id {
        Some(id) => {
            let record = state
                .find(id)
                .ok_or_else(|| format!("No such guest: {id}"))?;
            serde_json::to_string_pretty(record)?
        }
        None => serde_json::to_string_pretty(state.records())?,
    };
    println!("{json}");

    Ok(())
}
