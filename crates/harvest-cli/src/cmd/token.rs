//! Token subcommand - inspect or refresh the stored OAuth credential

use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use harvest_core::Shutdown;
use harvest_hh::Credential;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct TokenArgs {
    #[command(subcommand)]
    pub action: TokenAction,
}

#[derive(Subcommand, Debug)]
pub enum TokenAction {
    /// Show expiry of the stored credential
    Status,
    /// Exchange the refresh token for a new credential now
    Refresh,
}

pub fn run(args: TokenArgs, config: &Config, shutdown: &Shutdown) -> Result<ExitCode> {
    let tokens = harvest_hh::token_manager(&config.endpoints(), &config.auth.token_file, shutdown);
    let credential = match args.action {
        TokenAction::Status => tokens.status().context("Cannot read credential")?,
        TokenAction::Refresh => {
            anyhow::ensure!(
                config.auth.client_id.is_some() && config.auth.client_secret.is_some(),
                "CLIENT_ID and CLIENT_SECRET are required to refresh"
            );
            let credential = tokens.refresh_now().context("Token refresh failed")?;
            log::info!("Token refreshed");
            credential
        }
    };
    print_credential(&credential, config);
    Ok(ExitCode::SUCCESS)
}

fn print_credential(credential: &Credential, config: &Config) {
    let now = Utc::now();
    let remaining = credential.expires_at() - now;
    let state = if credential.is_valid_at(now) {
        format!("valid ({} min left)", remaining.num_minutes())
    } else {
        "expired (refresh on next use)".to_string()
    };

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Token").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    table.add_row(vec![
        "File",
        &config.auth.token_file.display().to_string(),
    ]);
    table.add_row(vec!["Issued", &credential.issued_at.to_rfc3339()]);
    table.add_row(vec!["Expires", &credential.expires_at().to_rfc3339()]);
    table.add_row(vec!["State", &state]);
    eprintln!("\n{table}");
}
