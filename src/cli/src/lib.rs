//! A3S Guest CLI - Guest import and creation from the command line.

pub mod commands;
pub mod provisioner;
pub mod state;
