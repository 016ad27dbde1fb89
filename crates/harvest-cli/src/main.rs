//! harvest - resumable vacancy harvester for the hh.ru API
//!
//! Walks a range of vacancy ids with a worker pool, keeps the records that
//! match a publication window and role category, and appends them to JSONL.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use harvest_core::{ProgressContext, SharedProgress, Shutdown};

mod cmd;
mod config;

use config::Config;

/// Exit code for configuration and startup failures
const EXIT_STARTUP: u8 = 2;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Resumable vacancy harvester for the hh.ru API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./harvest.toml or ~/.config/harvest/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch vacancies by id range (resumable)
    Fetch(cmd::fetch::FetchArgs),
    /// List vacancies published in a date window
    Search(cmd::search::SearchArgs),
    /// Inspect or refresh the OAuth credential
    Token(cmd::token::TokenArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // .env first so CLIENT_ID / CLIENT_SECRET and ${VAR} references resolve
    let dotenv = dotenvy::dotenv();

    let progress: SharedProgress = Arc::new(ProgressContext::new());

    // Logging:
    //   TTY:     warn unless --debug, the progress bar shows activity
    //   non-TTY: info unless --quiet, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = cli.quiet || (is_tty && !cli.debug);
    if let Err(e) = harvest_core::init_logging(quiet, cli.debug, multi) {
        eprintln!("Logger already initialized: {e}");
    }
    if let Ok(path) = dotenv {
        log::debug!("Loaded environment from {}", path.display());
    }

    match run(cli, &progress) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

fn run(cli: Cli, progress: &SharedProgress) -> Result<ExitCode> {
    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    harvest_core::set_http_config(config.http_config());

    let shutdown = Shutdown::new();
    shutdown.install_signal_handlers()?;

    match cli.command {
        Command::Fetch(args) => cmd::fetch::run(args, &config, &shutdown, progress),
        Command::Search(args) => cmd::search::run(args, &config, &shutdown),
        Command::Token(args) => cmd::token::run(args, &config, &shutdown),
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let set_or_not = |v: &Option<String>| if v.is_some() { "configured" } else { "not set" };
    let http = config.http_config();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Vacancies URL", &config.api.vacancies_url]);
    table.add_row(vec!["Roles URL", &config.api.roles_url]);
    table.add_row(vec!["Token URL", &config.api.token_url]);
    table.add_row(vec!["User agent", &http.user_agent]);
    table.add_row(vec!["Client id", set_or_not(&config.auth.client_id)]);
    table.add_row(vec!["Client secret", set_or_not(&config.auth.client_secret)]);
    table.add_row(vec![
        "Token file",
        &config.auth.token_file.display().to_string(),
    ]);
    table.add_row(vec![
        "Id range",
        &format!("{}..{}", config.fetch.start_id, config.fetch.end_id),
    ]);
    table.add_row(vec!["Workers", &config.fetch.workers.to_string()]);
    table.add_row(vec![
        "Retries",
        &format!(
            "{} attempts, {}ms base delay",
            config.fetch.max_retries, config.fetch.retry_delay_ms
        ),
    ]);
    table.add_row(vec!["Category", &config.fetch.category]);
    table.add_row(vec!["Year", &config.fetch.year.to_string()]);
    table.add_row(vec![
        "Checkpoint",
        &format!(
            "{} (flush every {})",
            config.fetch.checkpoint_file.display(),
            config.fetch.flush_every
        ),
    ]);
    table.add_row(vec![
        "Output",
        &config
            .fetch
            .output_file(config.fetch.year)
            .display()
            .to_string(),
    ]);
    table.add_row(vec![
        "Timeouts",
        &format!(
            "connect {}s, request {}s",
            config.http.connect_timeout, config.http.request_timeout
        ),
    ]);

    eprintln!("\n{table}");
}
